//! Subprocess-backed dump streams.
//!
//! [`Dumper`] starts the dump tool and returns a [`DumpStream`] as soon as
//! the process exists. The stream is read like any other async reader and
//! must be closed to learn the tool's exit status.

mod launcher;
mod stream;

pub use launcher::{Dumper, PASSWORD_ENV, build_args};
pub use stream::DumpStream;

use crate::tools::DumpTool;

/// What a dump covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpTarget {
    /// One named database, via `pg_dump -d <name>`
    Database(String),
    /// Every database on the server, via `pg_dumpall`
    Instance,
}

impl DumpTarget {
    /// Tool that produces this kind of dump.
    pub fn tool(&self) -> DumpTool {
        match self {
            Self::Database(_) => DumpTool::PgDump,
            Self::Instance => DumpTool::PgDumpAll,
        }
    }
}
