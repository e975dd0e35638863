use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::sync::{ItemStatus, OperationKind};

#[derive(Parser)]
#[command(name = "caresync")]
#[command(about = "Offline mutation queue and sync coordinator for health record clients")]
#[command(long_about = "caresync - offline write queue for health record clients

Local writes (create, update, delete of remote resources) are queued in a
durable SQLite store and replayed against the remote server through a
configurable adapter command once connectivity allows.

QUICK START:
  caresync enqueue create Patient '{\"id\":\"P1\"}'   Queue a write
  caresync status                                  Show sync status
  caresync sync                                    Flush pending writes
  caresync list --status failed                    Show dead-lettered writes

OUTPUT FORMATS:
  --output pretty    Human-readable colored output (default)
  --output json      Machine-readable JSON for scripting

For more information on a specific command, run:
  caresync <command> --help")]
#[command(version, propagate_version = true)]
pub struct Cli {
    /// Output format for command results
    ///
    /// Use 'pretty' for human-readable colored output (default),
    /// or 'json' for machine-readable output suitable for scripting.
    #[arg(short, long, value_enum, global = true)]
    pub output: Option<OutputFormat>,

    /// Data directory holding config.yaml and queue.db
    #[arg(long, env = "CARESYNC_HOME", global = true)]
    pub home: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for command results.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable colored output.
    #[default]
    Pretty,
    /// Machine-readable JSON output.
    Json,
}

/// Operation kind accepted on the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum KindArg {
    Create,
    Update,
    Delete,
}

impl From<KindArg> for OperationKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Create => Self::Create,
            KindArg::Update => Self::Update,
            KindArg::Delete => Self::Delete,
        }
    }
}

/// Item status filter accepted on the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusArg {
    Pending,
    Processing,
    Failed,
}

impl From<StatusArg> for ItemStatus {
    fn from(status: StatusArg) -> Self {
        match status {
            StatusArg::Pending => Self::Pending,
            StatusArg::Processing => Self::Processing,
            StatusArg::Failed => Self::Failed,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a local write
    ///
    /// The write is persisted before the command returns. It is applied
    /// on the next `sync` or by a running daemon.
    ///
    /// # Examples
    ///
    ///   caresync enqueue create Patient '{"id":"P1","name":[{"family":"Doe"}]}'
    ///   caresync enqueue update Observation @obs.json --priority 5
    ///   caresync enqueue delete Patient '{"id":"P2"}'
    #[command(alias = "e")]
    Enqueue {
        /// Kind of write
        #[arg(value_enum)]
        kind: KindArg,

        /// Remote resource type, e.g. Patient
        resource_type: String,

        /// JSON payload, `@file` to read a file, or `-` for stdin
        #[arg(default_value = "{}")]
        payload: String,

        /// Priority; higher is applied first
        #[arg(long, short = 'p', allow_hyphen_values = true)]
        priority: Option<i32>,
    },

    /// List queued writes
    ///
    /// Shows items in the order they will be applied.
    ///
    /// # Examples
    ///
    ///   caresync list
    ///   caresync list --status failed
    ///   caresync list -o json | jq '.[].id'
    #[command(alias = "ls")]
    List {
        /// Only show items with this status
        #[arg(long, short = 's', value_enum)]
        status: Option<StatusArg>,

        /// Maximum items to show
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },

    /// Show sync status and queue counts
    #[command(alias = "st")]
    Status {
        /// Treat the network as unavailable
        #[arg(long)]
        offline: bool,
    },

    /// Flush pending writes through the adapter
    ///
    /// Runs one pass over the items pending when it starts. Requires
    /// `adapter.command` in config.yaml.
    Sync {
        /// Treat the network as unavailable (nothing is sent)
        #[arg(long)]
        offline: bool,
    },

    /// Re-queue dead-lettered writes
    ///
    /// Attempt counts are kept; a re-queued item that fails again is
    /// dead-lettered on its next failure.
    Retry {
        /// Item to re-queue
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        id: Option<String>,

        /// Re-queue every failed item
        #[arg(long)]
        all: bool,
    },

    /// Remove failed items older than the retention window
    Cleanup {
        /// Override `sync.failed_retention_hours`
        #[arg(long)]
        older_than_hours: Option<u64>,
    },

    /// Discard one queued write regardless of status
    #[command(alias = "rm")]
    Remove {
        /// Item to remove
        id: String,
    },

    /// Discard every queued write
    ///
    /// Intended for an account or cache reset. Unsent writes are lost.
    Clear {
        /// Confirm the reset
        #[arg(long)]
        force: bool,
    },

    /// Run the coordinator in the foreground
    ///
    /// Reads control lines from stdin and prints events as they occur.
    /// Writes made while the daemon runs must go through its control
    /// lines; a separate `caresync enqueue` is not seen until restart.
    ///
    /// # Commands
    ///
    ///   online                                   Report connectivity
    ///   offline                                  Report loss of connectivity
    ///   wake                                     External wake signal
    ///   sync                                     Force a pass now
    ///   status                                   Print current status
    ///   enqueue <kind> <type> [priority] [json]  Queue a write
    ///   retry <id> | retry all                   Re-queue failed items
    ///   quit                                     Stop the daemon (also on end of input)
    Daemon {
        /// Start in the offline state
        #[arg(long)]
        offline: bool,
    },

    /// Generate shell completion scripts
    ///
    /// # Examples
    ///
    ///   caresync completions bash > ~/.bash_completion.d/caresync
    ///   caresync completions zsh > ~/.zfunc/_caresync
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}
