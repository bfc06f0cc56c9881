//! Local persistence: a SQLite worker thread plus the backend built on it.

mod connection;
mod helpers;
mod listeners;
mod local;
mod migrations;
mod password;
mod repositories;

pub use connection::Database;
pub use local::{LocalBackend, MAX_FAILED_ATTEMPTS, MIN_PASSWORD_LENGTH};
