use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use truerng::config::{DebiasMethod, SourceKind};

use crate::logging::LogArgs;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// One decimal value per line
    Decimal,
    /// One 8-digit lowercase hex word per line
    Hex,
    /// Little-endian 32-bit words, no separators
    Raw,
    /// Base64 (standard, with padding) of the little-endian words
    Base64,
    /// One 32-bit binary string per line
    Binary,
}

#[derive(Debug, Args)]
pub struct SourceArgs {
    /// Entropy source to use
    #[arg(long, value_enum)]
    pub source: Option<SourceKind>,

    /// Hardware RNG device path
    #[arg(long)]
    pub device: Option<String>,

    /// Device read timeout in milliseconds (1-60000)
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,

    /// Debiasing method
    #[arg(long, value_enum)]
    pub debias: Option<DebiasMethod>,

    /// Consecutive discards before a draw fails (1-1000000)
    #[arg(long)]
    pub max_consecutive_discards: Option<u32>,

    /// Worker threads for asynchronous requests (1-64)
    #[arg(long)]
    pub workers: Option<usize>,
}

#[derive(Debug, Parser)]
#[command(name = "truerng", version, about = "Uniform random integers from a hardware RNG")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Number of values to generate
    #[arg(short = 'n', long = "count", default_value_t = 10)]
    pub count: usize,

    /// Inclusive lower bound (requires --upper)
    #[arg(long, allow_negative_numbers = true, requires = "upper")]
    pub lower: Option<i32>,

    /// Inclusive upper bound (requires --lower)
    #[arg(long, allow_negative_numbers = true, requires = "lower")]
    pub upper: Option<i32>,

    /// Issue the requests asynchronously through the worker pool
    #[arg(long = "async")]
    pub use_async: bool,

    /// Output format
    #[arg(short = 'f', long = "format", value_enum, default_value_t = OutputFormat::Decimal)]
    pub format: OutputFormat,

    /// Write output to a file instead of stdout
    #[arg(short = 'o', long = "output-file")]
    pub output_file: Option<PathBuf>,

    /// Configuration file path (default: /etc/truerng.toml)
    #[arg(long = "config")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub log: LogArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write raw little-endian 32-bit values to stdout until interrupted
    Stream(StreamArgs),
    /// Show availability, version, source and correction counts
    Info(InfoArgs),
    /// Run FIPS 140-2 tests, entropy estimates and a range uniformity test
    Check(CheckArgs),
}

#[derive(Debug, Parser)]
pub struct StreamArgs {
    /// Stop after this many values (default: run until interrupted)
    #[arg(short = 'l', long)]
    pub limit: Option<u64>,

    /// Configuration file path (default: /etc/truerng.toml)
    #[arg(long = "config")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub log: LogArgs,
}

#[derive(Debug, Parser)]
pub struct InfoArgs {
    /// Configuration file path (default: /etc/truerng.toml)
    #[arg(long = "config")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub log: LogArgs,
}

#[derive(Debug, Parser)]
pub struct CheckArgs {
    /// Duration to run (e.g. 30s, 5m, 1h; bare number = seconds)
    #[arg(short = 'd', long, default_value = "10s")]
    pub duration: String,

    /// Bytes per sample (FIPS tests require >= 2500)
    #[arg(short = 's', long, default_value_t = 2500)]
    pub sample_size: usize,

    /// Buckets for the range uniformity test (2-4096)
    #[arg(short = 'b', long, default_value_t = 16,
          value_parser = clap::value_parser!(u32).range(2..=4096))]
    pub buckets: u32,

    /// Progress report interval in seconds
    #[arg(short = 'r', long, default_value_t = 5)]
    pub report_interval: u64,

    /// Configuration file path (default: /etc/truerng.toml)
    #[arg(long = "config")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub log: LogArgs,
}
