//! Similarity Scorer
//!
//! Compares two fingerprints that may differ in sample count and start
//! position. A small window of alignment shifts is searched; the shift with
//! the lowest mean per-sample distance wins and is mapped to a similarity
//! in [0, 1]:
//!
//! `similarity = clamp(1 - d / distance_ceiling, 0, 1)`
//!
//! Confidence is the share of samples that found a good match under the
//! winning alignment, measured against the longer sequence.
//!
//! The scorer is symmetric: arguments are put in a canonical order before
//! the search, and the reported offset is negated when they were swapped.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::fingerprint::{FeatureVector, Fingerprint};

// ============================================================================
// Calibration
// ============================================================================

/// Maps mean feature distance to a similarity score.
///
/// Calibration is per extractor: a learned embedding spreads distances
/// differently from a perceptual hash.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreCalibration {
	/// Mean distance at (and beyond) which similarity reaches 0
	pub distance_ceiling: f64,
	/// Per-sample distance that counts as a good match for confidence
	pub good_match_distance: f64,
	/// Per-sample distance under which two sequences count as identical
	pub identical_tolerance: f64,
}

impl Default for ScoreCalibration {
	fn default() -> Self {
		Self {
			distance_ceiling: 0.4,     // random 64-bit hashes sit near 0.5
			good_match_distance: 0.2,  // ~13 of 64 bits
			identical_tolerance: 0.02, // at most 1 of 64 bits
		}
	}
}

impl ScoreCalibration {
	/// Check that every distance lies in (0, 1].
	///
	/// # Errors
	///
	/// Returns [`EngineError::InvalidConfig`] for the first bad field.
	pub fn validate(&self) -> Result<()> {
		let fields = [
			("score_calibration.distance_ceiling", self.distance_ceiling),
			("score_calibration.good_match_distance", self.good_match_distance),
			("score_calibration.identical_tolerance", self.identical_tolerance),
		];
		for (field, value) in fields {
			if !(value > 0.0 && value <= 1.0) {
				return Err(EngineError::InvalidConfig {
					field,
					reason: format!("must be in (0, 1], got {value}"),
				});
			}
		}
		Ok(())
	}

	/// Similarity for a mean distance.
	#[inline]
	#[must_use]
	pub fn similarity(&self, mean_distance: f64) -> f64 {
		(1.0 - mean_distance / self.distance_ceiling).clamp(0.0, 1.0)
	}
}

// ============================================================================
// Score
// ============================================================================

/// Result of comparing two fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScore {
	/// 1.0 means identical content
	pub score: f64,
	/// Fraction of samples that aligned well, in [0, 1]
	pub confidence: f64,
	/// Winning shift: sample `j + offset` of the first argument is paired
	/// with sample `j` of the second
	pub offset: i32,
	/// Mean per-sample distance under the winning shift
	pub mean_distance: f64,
	/// Number of sample pairs in the winning window
	pub aligned: usize,
}

impl SimilarityScore {
	/// Score discounted for low coverage.
	///
	/// Scores with confidence at or above `min_confidence` count in full;
	/// below it the score is scaled by `confidence / min_confidence`.
	#[must_use]
	pub fn evidence(&self, min_confidence: f64) -> f64 {
		if self.confidence >= min_confidence {
			self.score
		} else {
			self.score * self.confidence / min_confidence
		}
	}
}

// ============================================================================
// Scorer
// ============================================================================

/// Candidate alignment during the search.
#[derive(Debug, Clone, Copy)]
struct Alignment {
	shift: i32,
	mean_distance: f64,
	overlap: usize,
	good: usize,
}

impl Alignment {
	/// Lower mean distance first, then larger overlap, then the shift closer
	/// to zero, then the positive shift.
	fn is_better_than(&self, other: &Self) -> bool {
		self.mean_distance
			.total_cmp(&other.mean_distance)
			.then_with(|| other.overlap.cmp(&self.overlap))
			.then_with(|| self.shift.unsigned_abs().cmp(&other.shift.unsigned_abs()))
			.then_with(|| other.shift.cmp(&self.shift))
			== Ordering::Less
	}
}

/// Alignment-searching comparator for fingerprints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityScorer {
	/// Largest shift tried in either direction
	pub max_shift: usize,
	/// Fraction of the shorter sequence a window must cover
	pub min_overlap_fraction: f64,
	/// Distance-to-similarity mapping
	pub calibration: ScoreCalibration,
}

impl Default for SimilarityScorer {
	fn default() -> Self {
		Self::from_config(&EngineConfig::default())
	}
}

impl SimilarityScorer {
	/// Scorer using the alignment and calibration settings of `config`.
	#[must_use]
	pub fn from_config(config: &EngineConfig) -> Self {
		Self {
			max_shift: config.max_shift,
			min_overlap_fraction: config.min_overlap_fraction,
			calibration: config.score_calibration,
		}
	}

	/// Compare two fingerprints.
	///
	/// # Errors
	///
	/// Returns [`EngineError::IncomparableFingerprint`] when either side is
	/// empty, the extractors or normalizations differ, or two feature vectors
	/// cannot be compared.
	pub fn score(&self, a: &Fingerprint, b: &Fingerprint) -> Result<SimilarityScore> {
		if a.is_empty() || b.is_empty() {
			return Err(EngineError::IncomparableFingerprint(
				"fingerprint has no samples".to_string(),
			));
		}
		if a.extractor_id != b.extractor_id || a.normalize_size != b.normalize_size {
			return Err(EngineError::IncomparableFingerprint(format!(
				"extractor `{}`@{} vs `{}`@{}",
				a.extractor_id, a.normalize_size, b.extractor_id, b.normalize_size
			)));
		}

		let swapped = canonical_order(a, b) == Ordering::Greater;
		let (first, second) = if swapped { (b, a) } else { (a, b) };

		let mut score = self
			.identical(first, second)?
			.map_or_else(|| self.search(first, second), Ok)?;
		if swapped {
			score.offset = -score.offset;
		}
		Ok(score)
	}

	/// Short-circuit for sequences that match sample-for-sample.
	///
	/// Aggregate equality alone never decides: every aligned pair must also
	/// sit within the identical tolerance.
	fn identical(&self, a: &Fingerprint, b: &Fingerprint) -> Result<Option<SimilarityScore>> {
		if a.aggregate != b.aggregate || a.len() != b.len() {
			return Ok(None);
		}

		let mut total = 0.0;
		for (x, y) in a.samples.iter().zip(b.samples.iter()) {
			let distance = sample_distance(&x.features, &y.features)?;
			if distance > self.calibration.identical_tolerance {
				return Ok(None);
			}
			total += distance;
		}

		Ok(Some(SimilarityScore {
			score: 1.0,
			confidence: 1.0,
			offset: 0,
			mean_distance: total / a.len() as f64,
			aligned: a.len(),
		}))
	}

	fn search(&self, a: &Fingerprint, b: &Fingerprint) -> Result<SimilarityScore> {
		let (len_a, len_b) = (a.len(), b.len());
		let min_overlap = minimum_overlap(len_a.min(len_b), self.min_overlap_fraction);
		let max_shift = i64::try_from(self.max_shift.min(len_a.max(len_b))).unwrap_or(0);

		let mut best: Option<Alignment> = None;
		for shift in -max_shift..=max_shift {
			// a[j + shift] pairs with b[j]
			let start = usize::try_from(-shift).unwrap_or(0);
			let end = usize::try_from(len_a as i64 - shift)
				.unwrap_or(0)
				.min(len_b);
			if end <= start || end - start < min_overlap {
				continue;
			}

			let mut total = 0.0;
			let mut good = 0;
			for j in start..end {
				let i = (j as i64 + shift) as usize;
				let distance = sample_distance(&a.samples[i].features, &b.samples[j].features)?;
				total += distance;
				if distance <= self.calibration.good_match_distance {
					good += 1;
				}
			}

			let overlap = end - start;
			let candidate = Alignment {
				shift: i32::try_from(shift).unwrap_or(0),
				mean_distance: total / overlap as f64,
				overlap,
				good,
			};
			if best.map_or(true, |current| candidate.is_better_than(&current)) {
				best = Some(candidate);
			}
		}

		// Shift 0 always qualifies for non-empty inputs.
		let best = best.ok_or_else(|| {
			EngineError::IncomparableFingerprint("no alignment window".to_string())
		})?;

		Ok(SimilarityScore {
			score: self.calibration.similarity(best.mean_distance),
			confidence: best.good as f64 / len_a.max(len_b) as f64,
			offset: best.shift,
			mean_distance: best.mean_distance,
			aligned: best.overlap,
		})
	}
}

fn sample_distance(a: &FeatureVector, b: &FeatureVector) -> Result<f64> {
	a.distance(b).ok_or_else(|| {
		EngineError::IncomparableFingerprint(format!(
			"feature vectors of length {} and {} cannot be compared",
			a.len(),
			b.len()
		))
	})
}

/// `max(1, ceil(len × fraction))`
fn minimum_overlap(len: usize, fraction: f64) -> usize {
	let wanted = (len as f64 * fraction).ceil();
	if wanted.is_finite() && wanted >= 1.0 {
		(wanted as usize).min(len.max(1))
	} else {
		1
	}
}

/// Total order over fingerprint contents, so that `score(a, b)` and
/// `score(b, a)` run the same search.
fn canonical_order(a: &Fingerprint, b: &Fingerprint) -> Ordering {
	a.len()
		.cmp(&b.len())
		.then_with(|| a.aggregate.cmp(&b.aggregate))
		.then_with(|| {
			a.samples
				.iter()
				.zip(b.samples.iter())
				.map(|(x, y)| {
					x.offset
						.total_cmp(&y.offset)
						.then_with(|| x.features.canonical_cmp(&y.features))
				})
				.find(|ordering| ordering.is_ne())
				.unwrap_or(Ordering::Equal)
		})
}
