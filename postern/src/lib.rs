//! Forward every message of an IMAP mailbox to fixed destinations through
//! an authenticated SMTP relay, deleting the original only once every copy
//! was accepted.

pub mod config;
pub mod controller;

pub use config::{Config, ConfigError};
pub use controller::Postern;
