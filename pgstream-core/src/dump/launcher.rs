//! Starting dump processes.

use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::DumpTarget;
use super::stream::{DumpStream, ExitReceiver, ExitReport};
use crate::error::{DumpError, Result};
use crate::security::ConnectionParams;
use crate::tools::{DumpTool, DumpTools};

/// Environment variable carrying the password to the dump tool.
pub const PASSWORD_ENV: &str = "PGPASSWORD";

/// Starts `pg_dump` / `pg_dumpall` processes and hands back their output.
///
/// A `Dumper` only holds the tool locations resolved at startup, so one
/// instance can serve any number of concurrent dumps.
///
/// # Example
/// ```rust,no_run
/// use pgstream_core::{ConnectionParams, Credentials, Dumper, DumpTools};
/// use tokio::io::AsyncReadExt;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> pgstream_core::Result<()> {
/// let dumper = Dumper::new(DumpTools::discover());
/// let params = ConnectionParams::new(
///     "localhost",
///     5432,
///     Credentials::new("postgres".to_string(), Some("postgres".to_string())),
/// );
///
/// let mut stream = dumper
///     .dump_database(&CancellationToken::new(), "app", &params)
///     .await?;
/// let mut dump = Vec::new();
/// let read = stream.read_to_end(&mut dump).await;
/// stream.close().await?;
/// read.map_err(|e| pgstream_core::DumpError::io("reading dump", e))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Dumper {
    tools: DumpTools,
}

impl Dumper {
    /// Creates a dumper over already-resolved tools.
    pub fn new(tools: DumpTools) -> Self {
        Self { tools }
    }

    /// The tool locations this dumper launches.
    pub fn tools(&self) -> &DumpTools {
        &self.tools
    }

    /// Dumps a single database with `pg_dump`.
    ///
    /// # Errors
    /// [`DumpError::NotInstalled`] when `pg_dump` was not resolved,
    /// [`DumpError::Cancelled`] when `cancel` has already fired,
    /// [`DumpError::Start`] when the process could not be created.
    pub async fn dump_database(
        &self,
        cancel: &CancellationToken,
        database: &str,
        params: &ConnectionParams,
    ) -> Result<DumpStream> {
        self.dump(cancel, &DumpTarget::Database(database.to_string()), params)
            .await
    }

    /// Dumps the whole instance with `pg_dumpall`.
    ///
    /// # Errors
    /// [`DumpError::NotInstalled`] when `pg_dumpall` was not resolved,
    /// [`DumpError::Cancelled`] when `cancel` has already fired,
    /// [`DumpError::Start`] when the process could not be created.
    pub async fn dump_all(
        &self,
        cancel: &CancellationToken,
        params: &ConnectionParams,
    ) -> Result<DumpStream> {
        self.dump(cancel, &DumpTarget::Instance, params).await
    }

    /// Starts the dump for `target` and returns as soon as the process exists.
    ///
    /// The process runs with a cleared environment holding only
    /// `PGPASSWORD`, stderr discarded and stdin closed. Cancelling `cancel`
    /// kills it.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// See [`Dumper::dump_database`] and [`Dumper::dump_all`].
    pub async fn dump(
        &self,
        cancel: &CancellationToken,
        target: &DumpTarget,
        params: &ConnectionParams,
    ) -> Result<DumpStream> {
        let tool = target.tool();
        let program = self
            .tools
            .path(tool)
            .ok_or(DumpError::NotInstalled { tool })?;

        if cancel.is_cancelled() {
            debug!("Not starting {}: already cancelled", tool);
            return Err(DumpError::Cancelled);
        }

        let args = build_args(target, params);
        info!("Starting {} against {}", tool, params);

        let mut child =
            spawn(program, &args, params).map_err(|e| DumpError::start_failed(tool, e))?;
        let pid = child.id();

        let Some(pipe) = child.stdout.take() else {
            // kill_on_drop reaps it once `child` goes out of scope
            warn!("{} started without a stdout pipe", tool);
            return Err(DumpError::MissingPipe { tool });
        };

        let kill = cancel.child_token();
        let exit = supervise(tool, child, kill.clone());
        debug!("{} running with pid {:?}", tool, pid);

        Ok(DumpStream::new(tool, pid, pipe, exit, kill))
    }
}

/// Argument list for `target`, in the fixed `-h -p -U [-d]` order.
pub fn build_args(target: &DumpTarget, params: &ConnectionParams) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-h".into(),
        params.host().into(),
        "-p".into(),
        params.port().to_string().into(),
        "-U".into(),
        params.credentials().username().into(),
    ];
    if let DumpTarget::Database(name) = target {
        args.push("-d".into());
        args.push(name.into());
    }
    args
}

fn spawn(program: &Path, args: &[OsString], params: &ConnectionParams) -> std::io::Result<Child> {
    Command::new(program)
        .args(args)
        .env_clear()
        .env(PASSWORD_ENV, params.credentials().password_or_empty())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
}

/// Owns `child` until it exits, killing it first if `kill` fires.
///
/// The exit status is delivered on the returned channel, so the process is
/// reaped even if nobody ever asks for the status.
fn supervise(tool: DumpTool, mut child: Child, kill: CancellationToken) -> ExitReceiver {
    let (exit_tx, exit_rx) = oneshot::channel();

    tokio::spawn(async move {
        // Kill wins a tie, so an exit not yet observed counts as cancelled
        let report = tokio::select! {
            biased;
            () = kill.cancelled() => kill_and_reap(tool, &mut child).await,
            status = child.wait() => ExitReport { status, killed: false },
        };
        let _ = exit_tx.send(report);
    });

    exit_rx
}

async fn kill_and_reap(tool: DumpTool, child: &mut Child) -> ExitReport {
    debug!("Killing {} (pid {:?})", tool, child.id());
    let status = match child.kill().await {
        Ok(()) => child.wait().await,
        Err(e) => Err(e),
    };
    ExitReport {
        status,
        killed: true,
    }
}
