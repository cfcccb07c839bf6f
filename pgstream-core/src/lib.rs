//! Streaming PostgreSQL dumps from `pg_dump` and `pg_dumpall`.
//!
//! This crate starts the dump tool as a subprocess and exposes its standard
//! output as an async byte stream. It does not look inside the dump.
//!
//! # Security Guarantees
//! - Passwords reach the tool only through `PGPASSWORD`, never argv
//! - The child gets a cleared environment; nothing else leaks into it
//! - Credentials are zeroized on drop and never logged
//!
//! # Resource Guarantees
//! - Every [`DumpStream`] is backed by a supervisor task that reaps the child
//! - [`DumpStream::close`] reports the exit status; dropping an unclosed
//!   stream kills the process
//! - Cancelling the caller's token kills the process and unblocks reads

pub mod dump;
pub mod error;
pub mod logging;
pub mod security;
pub mod tools;

// Re-export commonly used types
pub use dump::{DumpStream, DumpTarget, Dumper};
pub use error::{DumpError, Result};
pub use logging::init_logging;
pub use security::{ConnectionParams, Credentials, parse_connection_string};
pub use tools::{DumpTool, DumpTools, ToolStatus, resolve, resolve_in};
