use clap::{Args, Parser, Subcommand};

/// Ordered event ingestion into PostgreSQL.
#[derive(Parser, Debug)]
#[command(name = "sluice", version, about)]
pub struct Cli {
    /// Config profile; keys are read as `{PROFILE}_{KEY}` before `{KEY}`.
    #[arg(long, global = true, env = "SLUICE_PROFILE")]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply database migrations.
    Migrate,

    /// Load events from every configured source into the inbox and storage.
    Ingest {
        /// Run a single pass over all sources, then exit.
        #[arg(long)]
        once: bool,
    },

    /// Move events left in the inbox into final storage.
    RetryWorker {
        /// Run a single drain pass, then exit.
        #[arg(long)]
        once: bool,
    },

    /// Request log maintenance.
    #[command(subcommand)]
    RequestLog(RequestLogCommand),
}

#[derive(Subcommand, Debug)]
pub enum RequestLogCommand {
    /// Delete old terminal rows, optionally archiving them first.
    Prune(PruneArgs),

    /// Delete failed reservations so their range can be fetched again.
    ClearFailed {
        /// Source whose failed reservations are cleared.
        #[arg(long)]
        source: String,

        /// Only clear the reservation for this `after_id`.
        #[arg(long)]
        after_id: Option<i64>,
    },
}

#[derive(Args, Debug)]
pub struct PruneArgs {
    /// Keep succeeded rows for this many days.
    #[arg(long, default_value_t = 7)]
    pub succeeded_days: u32,

    /// Keep failed rows for this many days.
    #[arg(long, default_value_t = 30)]
    pub failed_days: u32,

    /// Copy rows into `event_request_log_archive` before deleting.
    #[arg(long)]
    pub archive: bool,
}
