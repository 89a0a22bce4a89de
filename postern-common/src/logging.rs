use std::str::FromStr;

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

/// Emit an event inside a span named after the side of the relay it
/// concerns. With `id = ...` the span also carries the message it is about
/// as `message_id`, so one message can be followed from fetch to deletion.
#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, id = $id:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!($level, $span, message_id = %$id);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg),*)
    }};

    ($level:expr, $span:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg),*)
    }};
}

/// Relay-side traffic (towards the destination).
#[macro_export]
macro_rules! outgoing {
    (level = $level:ident, id = $id:expr, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", id = $id, $($msg),*)
    };

    (id = $id:expr, $($msg:expr),*) => {
        $crate::outgoing!(level = TRACE, id = $id, $($msg),*)
    };

    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "outgoing", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::outgoing!(level = TRACE, $($msg),*)
    };
}

/// Mailbox-side traffic (from the source).
#[macro_export]
macro_rules! incoming {
    (level = $level:ident, id = $id:expr, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "incoming", id = $id, $($msg),*)
    };

    (id = $id:expr, $($msg:expr),*) => {
        $crate::incoming!(level = TRACE, id = $id, $($msg),*)
    };

    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "incoming", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::incoming!(level = TRACE, $($msg),*)
    };
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, id = $id:expr, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", id = $id, $($msg),*)
    };

    (id = $id:expr, $($msg:expr),*) => {
        $crate::internal!(level = TRACE, id = $id, $($msg),*)
    };

    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

/// Install the global `tracing` subscriber.
///
/// The level comes from `LOG_LEVEL` (any `LevelFilter` name), defaulting to
/// `TRACE` in debug builds and `INFO` in release builds. Only events whose
/// target belongs to one of the `postern` crates are shown.
pub fn init() {
    let default = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    let level = level_from(std::env::var("LOG_LEVEL").ok().as_deref(), default);

    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_ansi(true)
                .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
                .with_filter(level)
                .with_filter(FilterFn::new(|metadata| {
                    metadata.target().starts_with("postern")
                })),
        )
        .init();
}

/// Parse a `LOG_LEVEL` value, falling back to `default` when it is unset
/// or unrecognised.
pub fn level_from(value: Option<&str>, default: LevelFilter) -> LevelFilter {
    value.map_or(default, |level| {
        LevelFilter::from_str(level).unwrap_or_else(|_| {
            eprintln!("Invalid log level specified {level}, defaulting to {default}");
            default
        })
    })
}
