//! Policy abstractions for relay operations.
//!
//! Policies are plain values built from configuration, kept apart from the
//! pipeline that consults them so they can be tested on their own.
//!
//! - [`RetryPolicy`]: Determines how often and how soon a transient delivery
//!   failure is retried

pub mod retry;

pub use retry::RetryPolicy;
