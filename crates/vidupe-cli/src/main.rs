//! `vidupe`: find perceptually duplicate videos.

mod cli;
mod logging;
mod progress;
mod report;
mod settings;

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, ScanArgs};
use progress::ProgressDisplay;
use tracing::{error, info, warn};
use vidupe_core::{DetectionPipeline, FingerprintCache, ScanJob};
use vidupe_media::{check_ffmpeg, check_ffprobe, discover_videos, FfmpegDecoder, FfprobeProbe};

fn main() -> ExitCode {
	let cli = Cli::parse();
	logging::init_logger(cli.verbose);

	let outcome = match &cli.command {
		Commands::Scan(args) => run_scan(&cli, args),
		Commands::Config => print_config(&cli),
		Commands::Check => run_check(),
	};

	match outcome {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			error!("{err:#}");
			ExitCode::FAILURE
		}
	}
}

fn run_scan(cli: &Cli, args: &ScanArgs) -> Result<()> {
	let config = settings::load_config(cli.config.as_deref())?;
	let config = settings::apply_overrides(config, args)?;

	check_ffprobe()?;
	check_ffmpeg()?;

	let files = discover_videos(args.paths.as_slice()).context("Failed to collect input files")?;
	if files.is_empty() {
		info!("No video files found");
		return Ok(());
	}
	info!(files = files.len(), "Collected input files");

	let probe = FfprobeProbe::new();
	let decoder = FfmpegDecoder::new();
	let pipeline = DetectionPipeline::new(&probe, &decoder);

	let cache_path = (!args.no_cache)
		.then(|| args.cache.clone().unwrap_or_else(settings::default_cache_path));
	let cache = match &cache_path {
		Some(path) => FingerprintCache::load(path, pipeline.extractor_id(), config.normalize_size)
			.unwrap_or_else(|err| {
				warn!(error = %err, "Ignoring unreadable fingerprint cache");
				FingerprintCache::new()
			}),
		None => FingerprintCache::new(),
	};
	let cache = Arc::new(cache);
	let normalize_size = config.normalize_size;

	let (tx, rx) = crossbeam_channel::unbounded();
	let display = ProgressDisplay::spawn(rx, !args.no_progress && !args.json);
	let job = ScanJob::new(files, config)?
		.with_cache(Arc::clone(&cache))
		.with_progress(tx);
	let result = pipeline.run(&job);
	drop(job);
	display.finish();
	let result = result?;

	if let Some(path) = &cache_path {
		if let Err(err) = cache.save(path, pipeline.extractor_id(), normalize_size) {
			warn!(error = %err, "Failed to save fingerprint cache");
		}
	}

	let stdout = io::stdout();
	let mut out = stdout.lock();
	if args.json {
		report::write_json(&mut out, &result)?;
	} else {
		report::write_text(&mut out, &result)?;
	}
	out.flush()?;
	Ok(())
}

fn print_config(cli: &Cli) -> Result<()> {
	let config = settings::load_config(cli.config.as_deref())?;
	let text = toml::to_string_pretty(&config).context("Failed to render configuration")?;
	print!("{text}");
	Ok(())
}

fn run_check() -> Result<()> {
	check_ffprobe()?;
	check_ffmpeg()?;
	println!("ffmpeg and ffprobe found");
	Ok(())
}
