//! Credential handling and connection parameters.
//!
//! # Module Structure
//! - `credentials`: username/password container with automatic memory zeroing
//! - `connection`: connection parameters and `postgres://` URL parsing

mod connection;
mod credentials;

pub use connection::{ConnectionParams, DEFAULT_PORT, DEFAULT_USER, parse_connection_string};
pub use credentials::Credentials;
