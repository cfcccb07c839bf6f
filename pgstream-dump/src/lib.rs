//! Library module for pgstream-dump
//!
//! Holds the command-line surface and configuration resolution so they can
//! be tested without spawning the binary. The entry point is in main.rs.

pub mod output;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use pgstream_core::dump::PASSWORD_ENV;
use pgstream_core::security::{DEFAULT_PORT, DEFAULT_USER};
use pgstream_core::{
    ConnectionParams, Credentials, DumpError, DumpTarget, DumpTool, DumpTools, Result,
    parse_connection_string,
};

/// CLI argument structure
#[derive(Parser)]
#[command(name = "pgstream-dump")]
#[command(about = "Stream pg_dump / pg_dumpall output to a file or stdout")]
#[command(version)]
#[command(long_about = "
pgstream-dump - streaming PostgreSQL dumps

Runs pg_dump (one database) or pg_dumpall (whole server) and streams the
output to a file or stdout without buffering it in memory. The tool's exit
status decides this command's exit status, so a dump that fails half-way
never looks successful.

SECURITY FEATURES:
- The password is passed to pg_dump through PGPASSWORD only
- pg_dump runs with an otherwise empty environment
- Connection URLs are redacted in logs

EXAMPLES:
  pgstream-dump --database-url postgres://user@localhost/app database > app.sql
  pgstream-dump --host db.internal --username backup --password-prompt all -o all.sql
  pgstream-dump --compress -o app.sql.zst database app
  pgstream-dump tools
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(flatten)]
    pub tools: ToolArgs,

    /// Output file path
    #[arg(
        short,
        long,
        global = true,
        value_name = "FILE",
        help = "Write the dump to FILE instead of stdout"
    )]
    pub output: Option<PathBuf>,

    /// Enable compression
    #[arg(long, global = true, help = "Compress output using Zstandard")]
    pub compress: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Dump one database with pg_dump
    Database(DatabaseArgs),
    /// Dump every database on the server with pg_dumpall
    All,
    /// Show where pg_dump and pg_dumpall were found
    Tools,
}

/// Arguments of the `database` command
#[derive(Args, Debug, PartialEq, Eq)]
pub struct DatabaseArgs {
    /// Database name
    #[arg(help = "Database to dump (defaults to the one in --database-url)")]
    pub name: Option<String>,
}

/// Logging flags
#[derive(Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all logs except errors")]
    pub quiet: bool,
}

/// Where to connect and as whom.
///
/// The password is never a flag; it comes from a prompt, the URL, or
/// `PGPASSWORD`, in that order.
#[derive(Args)]
pub struct ConnectionArgs {
    /// Database connection URL
    #[arg(
        long,
        env = "DATABASE_URL",
        hide_env_values = true,
        help = "postgres:// connection URL (overrides --host/--port/--username)"
    )]
    pub database_url: Option<String>,

    /// Server host
    #[arg(long, env = "PGHOST", default_value = "localhost")]
    pub host: String,

    /// Server port
    #[arg(long, env = "PGPORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// User name
    #[arg(long, env = "PGUSER", default_value = DEFAULT_USER)]
    pub username: String,

    /// Prompt for the password
    #[arg(long, help = "Prompt for the password instead of reading PGPASSWORD")]
    pub password_prompt: bool,
}

impl ConnectionArgs {
    /// Resolves the connection, prompting or reading `PGPASSWORD` as needed.
    ///
    /// Returns the parameters and the database named in the URL, if any.
    ///
    /// # Errors
    /// Returns a configuration error for an unusable URL or a failed prompt.
    pub fn connection_params(&self) -> Result<(ConnectionParams, Option<String>)> {
        let prompted = if self.password_prompt {
            let password = rpassword::prompt_password("Password: ").map_err(|e| {
                DumpError::configuration(format!("Failed to read password: {}", e))
            })?;
            Some(password)
        } else {
            None
        };

        self.build(prompted, std::env::var(PASSWORD_ENV).ok())
    }

    /// Combines the flags with an already-obtained password.
    ///
    /// Precedence: prompted password, then the URL's password, then
    /// `env_password`.
    ///
    /// # Errors
    /// Returns a configuration error for an unusable URL.
    pub fn build(
        &self,
        prompted: Option<String>,
        env_password: Option<String>,
    ) -> Result<(ConnectionParams, Option<String>)> {
        let Some(url) = &self.database_url else {
            let credentials = Credentials::new(self.username.clone(), prompted.or(env_password));
            return Ok((
                ConnectionParams::new(self.host.clone(), self.port, credentials),
                None,
            ));
        };

        let (params, database) = parse_connection_string(url)?;
        if prompted.is_none() && params.credentials().has_password() {
            return Ok((params, database));
        }

        let credentials = Credentials::new(
            params.credentials().username().to_string(),
            prompted.or(env_password),
        );
        Ok((
            ConnectionParams::new(params.host(), params.port(), credentials),
            database,
        ))
    }
}

/// Explicit tool locations
#[derive(Args)]
pub struct ToolArgs {
    /// pg_dump override
    #[arg(
        long = "pg-dump",
        env = "PGSTREAM_PG_DUMP",
        value_name = "PATH",
        help = "Use this pg_dump instead of searching PATH"
    )]
    pub pg_dump: Option<PathBuf>,

    /// pg_dumpall override
    #[arg(
        long = "pg-dumpall",
        env = "PGSTREAM_PG_DUMPALL",
        value_name = "PATH",
        help = "Use this pg_dumpall instead of searching PATH"
    )]
    pub pg_dumpall: Option<PathBuf>,
}

impl ToolArgs {
    /// Searches `PATH`, then applies the overrides.
    pub fn resolve(&self) -> DumpTools {
        self.apply(DumpTools::discover())
    }

    /// Applies the overrides to already-resolved tools.
    pub fn apply(&self, mut tools: DumpTools) -> DumpTools {
        if let Some(path) = &self.pg_dump {
            tools = tools.with_override(DumpTool::PgDump, path.clone());
        }
        if let Some(path) = &self.pg_dumpall {
            tools = tools.with_override(DumpTool::PgDumpAll, path.clone());
        }
        tools
    }
}

impl Command {
    /// What to dump, or `None` for commands that do not dump.
    ///
    /// # Errors
    /// Returns a configuration error when `database` has no name from
    /// either the argument or the URL.
    pub fn target(&self, url_database: Option<String>) -> Result<Option<DumpTarget>> {
        match self {
            Self::Database(args) => args
                .name
                .clone()
                .or(url_database)
                .map(|name| Some(DumpTarget::Database(name)))
                .ok_or_else(|| {
                    DumpError::configuration(
                        "No database given; pass a name or include one in --database-url",
                    )
                }),
            Self::All => Ok(Some(DumpTarget::Instance)),
            Self::Tools => Ok(None),
        }
    }
}
