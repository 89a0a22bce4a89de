pub mod audit;
pub mod logging;
mod secret;

pub use secret::Secret;
pub use tracing;

/// Run-wide control signal, broadcast to every worker of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Stop starting new work; abandon in-flight work before acknowledging it.
    Shutdown,
}
