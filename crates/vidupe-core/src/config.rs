//! Engine configuration.
//!
//! Every recognized option lives on [`EngineConfig`]. Missing fields in a
//! serialized config fall back to [`EngineConfig::default`], so a TOML file
//! only needs the options it wants to change.

use serde::{Deserialize, Serialize};

use crate::cluster::BestMemberPolicy;
use crate::error::{EngineError, Result};
use crate::similarity::ScoreCalibration;

/// Configuration for one detection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
	/// Minimum similarity for two files to be linked (0.5-1.0)
	pub similarity_threshold: f64,
	/// Frames sampled per minute of video
	pub sample_density: f64,
	/// Relative duration difference the prefilter tolerates
	pub duration_tolerance: f64,
	/// Relative aspect-ratio difference the prefilter tolerates
	pub aspect_tolerance: f64,
	/// Which member of a group is suggested to keep
	pub best_member_policy: BestMemberPolicy,
	/// Worker threads for fingerprinting and scoring
	pub max_workers: usize,

	/// Fewest samples taken from any file, however short
	pub min_samples: usize,
	/// Most samples taken from any file, however long
	pub max_samples: usize,
	/// Fraction of requested offsets that must decode
	pub min_decoded_fraction: f64,
	/// Luma variance below which a frame counts as near-uniform
	pub uniform_variance: f64,
	/// Side length of the normalized square frame
	pub normalize_size: u32,

	/// Largest alignment shift tried, in sample positions
	pub max_shift: usize,
	/// Fraction of the shorter sequence an alignment window must cover
	pub min_overlap_fraction: f64,
	/// Distance-to-similarity mapping
	pub score_calibration: ScoreCalibration,
	/// Skip full scoring when aggregate hashes differ in more bits than this
	pub aggregate_triage_bits: Option<u32>,

	/// How far below the threshold a component may sag before it is split
	pub cluster_slack: f64,
	/// Confidence below which a score counts as weaker evidence
	pub min_confidence: f64,

	/// Files above this count use duration bucketing instead of all pairs
	pub bucket_threshold: usize,

	/// Smallest file size considered, in bytes
	pub min_file_size: u64,
	/// Shortest duration considered, in seconds
	pub min_duration: f64,
	/// Longest duration considered, in seconds
	pub max_duration: Option<f64>,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			similarity_threshold: 0.8,
			sample_density: 12.0,
			duration_tolerance: 0.15,
			aspect_tolerance: 0.05,
			best_member_policy: BestMemberPolicy::default(),
			max_workers: num_cpus::get(),
			min_samples: 4,
			max_samples: 240,
			min_decoded_fraction: 0.5,
			uniform_variance: 40.0,
			normalize_size: 32,
			max_shift: 3,
			min_overlap_fraction: 0.5,
			score_calibration: ScoreCalibration::default(),
			aggregate_triage_bits: None,
			cluster_slack: 0.1,
			min_confidence: 0.5,
			bucket_threshold: 2000,
			min_file_size: 0,
			min_duration: 0.0,
			max_duration: None,
		}
	}
}

fn invalid(field: &'static str, reason: impl Into<String>) -> EngineError {
	EngineError::InvalidConfig {
		field,
		reason: reason.into(),
	}
}

fn check_open_unit(field: &'static str, value: f64) -> Result<()> {
	if value > 0.0 && value < 1.0 {
		Ok(())
	} else {
		Err(invalid(field, format!("must be in (0, 1), got {value}")))
	}
}

impl EngineConfig {
	/// Check every option against its accepted range.
	///
	/// This is the only error a caller sees before a run starts.
	///
	/// # Errors
	///
	/// Returns [`EngineError::InvalidConfig`] naming the first bad option.
	pub fn validate(&self) -> Result<()> {
		if !(0.5..=1.0).contains(&self.similarity_threshold) {
			return Err(invalid(
				"similarity_threshold",
				format!("must be in [0.5, 1.0], got {}", self.similarity_threshold),
			));
		}
		if !(self.sample_density.is_finite() && self.sample_density > 0.0) {
			return Err(invalid(
				"sample_density",
				format!("must be positive, got {}", self.sample_density),
			));
		}
		check_open_unit("duration_tolerance", self.duration_tolerance)?;
		check_open_unit("aspect_tolerance", self.aspect_tolerance)?;
		check_open_unit("min_overlap_fraction", self.min_overlap_fraction)?;
		if self.max_workers == 0 {
			return Err(invalid("max_workers", "must be at least 1"));
		}
		if self.min_samples == 0 {
			return Err(invalid("min_samples", "must be at least 1"));
		}
		if self.min_samples > self.max_samples {
			return Err(invalid(
				"max_samples",
				format!("must be >= min_samples ({})", self.min_samples),
			));
		}
		if !(self.min_decoded_fraction > 0.0 && self.min_decoded_fraction <= 1.0) {
			return Err(invalid(
				"min_decoded_fraction",
				format!("must be in (0, 1], got {}", self.min_decoded_fraction),
			));
		}
		if self.uniform_variance < 0.0 {
			return Err(invalid("uniform_variance", "must not be negative"));
		}
		if self.normalize_size < 8 {
			return Err(invalid("normalize_size", "must be at least 8"));
		}
		if !(0.0..1.0).contains(&self.cluster_slack) {
			return Err(invalid(
				"cluster_slack",
				format!("must be in [0, 1), got {}", self.cluster_slack),
			));
		}
		if !(self.min_confidence > 0.0 && self.min_confidence <= 1.0) {
			return Err(invalid(
				"min_confidence",
				format!("must be in (0, 1], got {}", self.min_confidence),
			));
		}
		if let Some(max_duration) = self.max_duration {
			if max_duration < self.min_duration {
				return Err(invalid("max_duration", "must be >= min_duration"));
			}
		}
		self.score_calibration.validate()
	}

	/// Number of samples to request for a video of `duration_seconds`.
	#[must_use]
	pub fn sample_count(&self, duration_seconds: f64) -> usize {
		let wanted = (duration_seconds / 60.0 * self.sample_density).floor();
		// Negative or NaN wanted collapses to min_samples through the clamp.
		let wanted = if wanted.is_finite() && wanted > 0.0 {
			wanted as usize
		} else {
			0
		};
		wanted.clamp(self.min_samples, self.max_samples)
	}
}
