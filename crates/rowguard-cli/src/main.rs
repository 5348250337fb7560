//! Rowguard Command-Line Client
//!
//! Validates policy bundles and answers access questions against JSON
//! record fixtures.

mod commands;
mod formatter;
mod input;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args as ClapArgs, Parser, Subcommand};
use formatter::OutputFormat;
use rowguard_core::Operation;
use tracing_subscriber::EnvFilter;

/// Rowguard Command-Line Client
#[derive(Parser, Debug)]
#[command(name = "rowguard")]
#[command(version, about = "Row-level and field-level policy evaluation")]
pub struct Args {
    /// Output format
    #[arg(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,

    /// Log level for rowguard crates (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate a policy bundle without publishing it
    Validate {
        /// Policy bundle (JSON)
        #[arg(long)]
        policy: PathBuf,
    },

    /// Parse a domain and print its normalized form
    Parse {
        /// Domain text, e.g. "[('owner', '=', 42)]"
        domain: String,

        /// Validate field paths against this model of --policy
        #[arg(long, requires = "policy")]
        model: Option<String>,

        /// Policy bundle providing the model catalog
        #[arg(long)]
        policy: Option<PathBuf>,
    },

    /// Model-level check of one operation
    Check {
        #[command(flatten)]
        request: Request,
    },

    /// Keep the records the principal may act on
    Filter {
        #[command(flatten)]
        request: Request,

        /// Records file (JSON object keyed by model)
        #[arg(long)]
        records: PathBuf,

        /// Candidate ids; defaults to every record of --model
        #[arg(long, value_delimiter = ',')]
        ids: Vec<i64>,
    },

    /// Full read path: check, filter and project fields
    Project {
        #[command(flatten)]
        principal: PrincipalArgs,

        /// Target model
        #[arg(long)]
        model: String,

        /// Records file (JSON object keyed by model)
        #[arg(long)]
        records: PathBuf,

        /// Requested fields
        #[arg(long, value_delimiter = ',', required = true)]
        fields: Vec<String>,
    },

    /// Gate a write of field values to one record
    GuardWrite {
        #[command(flatten)]
        principal: PrincipalArgs,

        /// Target model
        #[arg(long)]
        model: String,

        /// Records file (JSON object keyed by model)
        #[arg(long)]
        records: PathBuf,

        /// Record being written
        #[arg(long)]
        record: i64,

        /// Field values as a JSON object
        #[arg(long)]
        values: String,
    },

    /// Publish a bundle into a persistent archive
    Publish {
        /// Policy bundle (JSON)
        #[arg(long)]
        policy: PathBuf,

        /// Archive directory
        #[arg(long)]
        archive: PathBuf,

        /// Keep only the newest N generations after publishing
        #[arg(long)]
        keep: Option<usize>,
    },

    /// List the generations stored in an archive
    History {
        /// Archive directory
        #[arg(long)]
        archive: PathBuf,
    },
}

/// Who is asking.
#[derive(ClapArgs, Debug, Clone)]
pub struct PrincipalArgs {
    /// Policy bundle (JSON)
    #[arg(long)]
    pub policy: PathBuf,

    /// Principal identifier
    #[arg(long)]
    pub principal: String,

    /// Groups of the principal, comma separated
    #[arg(long, value_delimiter = ',')]
    pub groups: Vec<String>,
}

/// Principal, model and operation of a request.
#[derive(ClapArgs, Debug, Clone)]
pub struct Request {
    #[command(flatten)]
    pub principal: PrincipalArgs,

    /// Target model
    #[arg(long)]
    pub model: String,

    /// Operation: read, write, create or unlink
    #[arg(long, default_value = "read")]
    pub operation: Operation,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    let formatter = formatter::create_formatter(args.format);
    match commands::run(args.command, &*formatter) {
        Ok(outcome) => {
            println!("{}", outcome.output);
            if outcome.denied {
                ExitCode::from(2)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("{}", formatter.format_error(&e.to_string()));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(format!("rowguard={level}")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rowguard=info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
