use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use vidupe_core::BestMemberPolicy;

#[derive(Debug, Parser)]
#[command(name = "vidupe", version)]
#[command(about = "Find duplicate videos by what they show, not how they are encoded", long_about = None)]
pub struct Cli {
	/// More log output (-v debug, -vv trace)
	#[arg(short, long, action = ArgAction::Count, global = true)]
	pub verbose: u8,

	/// Configuration file (default: ~/.vidupe/config.toml)
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
	/// Scan files and directories for duplicate videos
	Scan(ScanArgs),
	/// Print the effective configuration as TOML
	Config,
	/// Check that FFmpeg and FFprobe are available
	Check,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ScanArgs {
	/// Video files or directories to scan
	#[arg(required = true, value_name = "PATH")]
	pub paths: Vec<PathBuf>,

	/// Minimum similarity for two videos to be grouped (0.5-1.0)
	#[arg(short, long)]
	pub threshold: Option<f64>,

	/// Frames sampled per minute of video
	#[arg(long)]
	pub density: Option<f64>,

	/// Worker threads (default: number of CPUs)
	#[arg(short = 'j', long)]
	pub workers: Option<usize>,

	/// Which copy to suggest keeping: largest_resolution, largest_size or newest
	#[arg(long)]
	pub policy: Option<BestMemberPolicy>,

	/// Ignore files smaller than this many bytes
	#[arg(long, value_name = "BYTES")]
	pub min_size: Option<u64>,

	/// Ignore videos shorter than this many seconds
	#[arg(long, value_name = "SECONDS")]
	pub min_duration: Option<f64>,

	/// Ignore videos longer than this many seconds
	#[arg(long, value_name = "SECONDS")]
	pub max_duration: Option<f64>,

	/// Fingerprint cache file (default: ~/.vidupe/fingerprints.bin)
	#[arg(long, value_name = "FILE", conflicts_with = "no_cache")]
	pub cache: Option<PathBuf>,

	/// Neither read nor write the fingerprint cache
	#[arg(long)]
	pub no_cache: bool,

	/// Print the result as JSON
	#[arg(long)]
	pub json: bool,

	/// Hide the progress bar
	#[arg(long)]
	pub no_progress: bool,
}
