//! PostgreSQL dump streaming tool.
//!
//! This binary runs `pg_dump` or `pg_dumpall` and streams the dump to a
//! file or stdout.
//!
//! # Security Guarantees
//! - The password reaches the dump tool through `PGPASSWORD` only
//! - Connection URLs are redacted before logging
//! - A dump that fails or is interrupted always exits non-zero

use std::time::Instant;

use clap::Parser;
use pgstream_core::{
    ConnectionParams, DumpError, DumpTarget, DumpTools, Dumper, Result,
    error::redact_database_url, init_logging,
};
use pgstream_dump::{Cli, Command, output};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.global.verbose, cli.global.quiet)?;

    let tools = cli.tools.resolve();

    if cli.command == Command::Tools {
        return show_tools(&tools);
    }

    let (params, url_database) = cli.connection.connection_params()?;
    let Some(target) = cli.command.target(url_database)? else {
        return Ok(());
    };
    output::check_compression(cli.compress)?;

    if let Some(url) = &cli.connection.database_url {
        info!("Target: {}", redact_database_url(url));
    }

    let cancel = CancellationToken::new();
    watch_for_interrupt(cancel.clone());

    run_dump(tools, &cancel, &target, &params, &cli).await
}

/// Prints the resolved tool locations as JSON.
fn show_tools(tools: &DumpTools) -> Result<()> {
    let json = serde_json::to_string_pretty(&tools.status()).map_err(|e| {
        DumpError::configuration(format!("Failed to serialize tool status: {}", e))
    })?;
    println!("{}", json);
    Ok(())
}

/// Cancels `cancel` on the first Ctrl-C.
fn watch_for_interrupt(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted, stopping dump");
                cancel.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });
}

async fn run_dump(
    tools: DumpTools,
    cancel: &CancellationToken,
    target: &DumpTarget,
    params: &ConnectionParams,
    cli: &Cli,
) -> Result<()> {
    let started = Instant::now();
    let dumper = Dumper::new(tools);

    let mut stream = dumper.dump(cancel, target, params).await.map_err(|e| {
        if e.is_not_installed() {
            error!("{}", e);
            error!("Install the PostgreSQL client tools or pass --pg-dump / --pg-dumpall");
        } else {
            error!("Failed to start dump: {}", e);
        }
        e
    })?;

    match &cli.output {
        Some(path) => info!("Output: {}", path.display()),
        None => info!("Output: stdout"),
    }

    let bytes = output::write_dump(&mut stream, cli.output.as_deref(), cli.compress)
        .await
        .map_err(|e| {
            if e.is_cancelled() {
                warn!("Dump cancelled");
            } else {
                error!("Dump failed: {}", e);
            }
            e
        })?;

    info!(
        "✓ Dump completed: {} bytes in {:.2?}",
        bytes,
        started.elapsed()
    );
    Ok(())
}
