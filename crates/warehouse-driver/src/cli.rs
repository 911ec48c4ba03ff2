use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "warehouse-driver")]
pub struct Args {
    /// Logging level (stderr). Also supports RUST_LOG.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Directory with one `<dataset>.sqlite` file per dataset.
    #[arg(long)]
    pub warehouse_dir: PathBuf,

    /// Timeout for a single warehouse call.
    #[arg(long, default_value_t = 30_000)]
    pub timeout_ms: u64,

    /// Attempts per warehouse call, the first one included.
    #[arg(long, default_value_t = 5)]
    pub retry_max_attempts: u32,

    #[arg(long, default_value_t = 200)]
    pub retry_initial_backoff_ms: u64,

    #[arg(long, default_value_t = 10_000)]
    pub retry_max_backoff_ms: u64,
}
