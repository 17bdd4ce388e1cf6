//! Configuration loading: TOML file, then command-line overrides.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;
use vidupe_core::EngineConfig;

use crate::cli::ScanArgs;

/// `~/.vidupe`, or `./.vidupe` without a home directory.
pub fn data_dir() -> PathBuf {
	dirs::home_dir()
		.unwrap_or_else(|| PathBuf::from("."))
		.join(".vidupe")
}

/// Default configuration file.
pub fn default_config_path() -> PathBuf {
	data_dir().join("config.toml")
}

/// Default fingerprint cache file.
pub fn default_cache_path() -> PathBuf {
	data_dir().join("fingerprints.bin")
}

/// Read the configuration.
///
/// An explicit `path` must exist. Without one, the default file is used
/// when present and built-in defaults otherwise.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
	let (path, required) = match path {
		Some(path) => (path.to_path_buf(), true),
		None => (default_config_path(), false),
	};

	if !required && !path.exists() {
		debug!(path = %path.display(), "No configuration file, using defaults");
		return Ok(EngineConfig::default());
	}

	let text = fs::read_to_string(&path)
		.with_context(|| format!("Failed to read configuration file {}", path.display()))?;
	let config = parse_config(&text)
		.with_context(|| format!("Invalid configuration file {}", path.display()))?;
	debug!(path = %path.display(), "Loaded configuration");
	Ok(config)
}

/// Parse TOML; absent keys keep their defaults.
pub fn parse_config(text: &str) -> Result<EngineConfig> {
	let config: EngineConfig = toml::from_str(text)?;
	config.validate()?;
	Ok(config)
}

/// Apply command-line overrides and validate the result.
pub fn apply_overrides(mut config: EngineConfig, args: &ScanArgs) -> Result<EngineConfig> {
	if let Some(threshold) = args.threshold {
		config.similarity_threshold = threshold;
	}
	if let Some(density) = args.density {
		config.sample_density = density;
	}
	if let Some(workers) = args.workers {
		config.max_workers = workers;
	}
	if let Some(policy) = args.policy {
		config.best_member_policy = policy;
	}
	if let Some(min_size) = args.min_size {
		config.min_file_size = min_size;
	}
	if let Some(min_duration) = args.min_duration {
		config.min_duration = min_duration;
	}
	if let Some(max_duration) = args.max_duration {
		config.max_duration = Some(max_duration);
	}
	config.validate().context("Invalid option")?;
	Ok(config)
}

#[cfg(test)]
mod tests {
	use super::*;
	use vidupe_core::BestMemberPolicy;

	#[test]
	fn test_partial_file_keeps_defaults() {
		let config = parse_config(
			r#"
			similarity_threshold = 0.9
			best_member_policy = "largest_size"

			[score_calibration]
			distance_ceiling = 0.35
			"#,
		)
		.unwrap();
		assert!((config.similarity_threshold - 0.9).abs() < f64::EPSILON);
		assert_eq!(config.best_member_policy, BestMemberPolicy::LargestSize);
		assert!((config.score_calibration.distance_ceiling - 0.35).abs() < f64::EPSILON);
		assert!((config.sample_density - 12.0).abs() < f64::EPSILON);
	}

	#[test]
	fn test_invalid_file_rejected() {
		assert!(parse_config("similarity_threshold = 0.3").is_err());
		assert!(parse_config("best_member_policy = \"smallest\"").is_err());
		assert!(parse_config("similarity_threshold = ").is_err());
	}

	#[test]
	fn test_explicit_file_must_exist() {
		let dir = tempfile::tempdir().unwrap();
		assert!(load_config(Some(&dir.path().join("missing.toml"))).is_err());

		let path = dir.path().join("vidupe.toml");
		fs::write(&path, "sample_density = 24.0\n").unwrap();
		let config = load_config(Some(&path)).unwrap();
		assert!((config.sample_density - 24.0).abs() < f64::EPSILON);
	}

	#[test]
	fn test_overrides() {
		let args = ScanArgs {
			threshold: Some(0.95),
			workers: Some(3),
			max_duration: Some(600.0),
			..ScanArgs::default()
		};
		let config = apply_overrides(EngineConfig::default(), &args).unwrap();
		assert!((config.similarity_threshold - 0.95).abs() < f64::EPSILON);
		assert_eq!(config.max_workers, 3);
		assert_eq!(config.max_duration, Some(600.0));

		let bad = ScanArgs {
			threshold: Some(1.5),
			..ScanArgs::default()
		};
		assert!(apply_overrides(EngineConfig::default(), &bad).is_err());
	}
}
