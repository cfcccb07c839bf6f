//! Locating the external dump executables.
//!
//! Resolution happens once, when a [`DumpTools`] value is built, and the
//! result never changes afterwards. A missing executable is not an error at
//! this point; it is reported when a dump that needs it is requested.

use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// The two external programs a dump can be delegated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DumpTool {
    /// `pg_dump`, single-database dumps
    #[serde(rename = "pg_dump")]
    PgDump,
    /// `pg_dumpall`, whole-instance dumps
    #[serde(rename = "pg_dumpall")]
    PgDumpAll,
}

impl DumpTool {
    /// Every tool, in resolution order.
    pub const ALL: [Self; 2] = [Self::PgDump, Self::PgDumpAll];

    /// Name looked up in the search path.
    pub fn executable_name(self) -> &'static str {
        match self {
            Self::PgDump => "pg_dump",
            Self::PgDumpAll => "pg_dumpall",
        }
    }
}

impl fmt::Display for DumpTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.executable_name())
    }
}

/// Resolution outcome for one tool, as reported by `pgstream-dump tools`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolStatus {
    /// Which tool
    pub tool: DumpTool,
    /// Absolute path, or `None` when unavailable
    pub path: Option<PathBuf>,
}

/// Resolved locations of `pg_dump` and `pg_dumpall`.
///
/// Build one at startup and hand it to [`crate::Dumper::new`]; it is
/// immutable and cheap to clone.
///
/// # Example
/// ```rust
/// use pgstream_core::tools::{DumpTool, DumpTools};
///
/// let tools = DumpTools::new(Some("/usr/bin/pg_dump".into()), None);
/// assert!(tools.is_available(DumpTool::PgDump));
/// assert!(!tools.is_available(DumpTool::PgDumpAll));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpTools {
    pg_dump: Option<PathBuf>,
    pg_dumpall: Option<PathBuf>,
}

impl DumpTools {
    /// Uses exactly the given paths, without any lookup.
    pub fn new(pg_dump: Option<PathBuf>, pg_dumpall: Option<PathBuf>) -> Self {
        Self {
            pg_dump,
            pg_dumpall,
        }
    }

    /// Searches the process `PATH` for both tools.
    pub fn discover() -> Self {
        match std::env::var_os("PATH") {
            Some(path) => Self::from_search_path(&path),
            None => {
                debug!("PATH is not set; no dump tools available");
                Self::default()
            }
        }
    }

    /// Searches an explicit search path (same syntax as `PATH`).
    pub fn from_search_path(search_path: &OsStr) -> Self {
        let lookup = |tool: DumpTool| {
            let found = resolve_in(search_path, tool.executable_name());
            match &found {
                Some(path) => debug!("Resolved {} to {}", tool, path.display()),
                None => debug!("{} not found in search path", tool),
            }
            found
        };

        Self {
            pg_dump: lookup(DumpTool::PgDump),
            pg_dumpall: lookup(DumpTool::PgDumpAll),
        }
    }

    /// Replaces the resolved location of `tool` with `path`.
    ///
    /// Used for explicit configuration, which wins over the search.
    #[must_use]
    pub fn with_override(mut self, tool: DumpTool, path: PathBuf) -> Self {
        match tool {
            DumpTool::PgDump => self.pg_dump = Some(path),
            DumpTool::PgDumpAll => self.pg_dumpall = Some(path),
        }
        self
    }

    /// Resolved path of `tool`, if available.
    pub fn path(&self, tool: DumpTool) -> Option<&Path> {
        match tool {
            DumpTool::PgDump => self.pg_dump.as_deref(),
            DumpTool::PgDumpAll => self.pg_dumpall.as_deref(),
        }
    }

    /// Whether `tool` was found.
    pub fn is_available(&self, tool: DumpTool) -> bool {
        self.path(tool).is_some()
    }

    /// Per-tool resolution report.
    pub fn status(&self) -> Vec<ToolStatus> {
        DumpTool::ALL
            .into_iter()
            .map(|tool| ToolStatus {
                tool,
                path: self.path(tool).map(Path::to_path_buf),
            })
            .collect()
    }
}

/// Looks `name` up in the process `PATH`.
pub fn resolve(name: &str) -> Option<PathBuf> {
    let search_path = std::env::var_os("PATH")?;
    resolve_in(&search_path, name)
}

/// Looks `name` up in `search_path`.
///
/// A name that already contains a path separator is checked as-is. Empty
/// search path entries are skipped rather than meaning the current directory.
pub fn resolve_in(search_path: &OsStr, name: &str) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }

    if Path::new(name).components().count() > 1 {
        let candidate = PathBuf::from(name);
        return is_executable(&candidate).then(|| absolute(candidate));
    }

    std::env::split_paths(search_path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .flat_map(|dir| candidate_names(name).map(move |file| dir.join(file)))
        .find(|candidate| is_executable(candidate))
        .map(absolute)
}

fn absolute(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}

#[cfg(windows)]
fn candidate_names(name: &str) -> impl Iterator<Item = String> {
    let names = if Path::new(name).extension().is_some() {
        vec![name.to_string()]
    } else {
        vec![format!("{name}.exe"), name.to_string()]
    };
    names.into_iter()
}

#[cfg(not(windows))]
fn candidate_names(name: &str) -> impl Iterator<Item = String> {
    std::iter::once(name.to_string())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
