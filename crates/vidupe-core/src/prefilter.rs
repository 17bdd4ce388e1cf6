//! Metadata Prefilter
//!
//! Cheap O(1) gate on container metadata that decides whether two files are
//! worth the cost of fingerprinting and scoring. Rejects on duration and
//! aspect ratio only; size, bitrate and file names never reject a pair,
//! since re-encodes legitimately differ in all three.

use tracing::debug;

use crate::config::EngineConfig;
use crate::record::MediaRecord;

/// Relative slack added to the duration sweep window so float rounding
/// never drops a pair the predicate would accept.
const SWEEP_EPSILON: f64 = 1e-9;

/// `|a - b| / max(a, b)`, 0 when both are 0.
#[inline]
#[must_use]
pub fn relative_difference(a: f64, b: f64) -> f64 {
	let largest = a.abs().max(b.abs());
	if largest == 0.0 {
		0.0
	} else {
		(a - b).abs() / largest
	}
}

/// Pair gate plus per-file size and duration limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prefilter {
	/// Relative duration difference tolerated
	pub duration_tolerance: f64,
	/// Relative aspect-ratio difference tolerated
	pub aspect_tolerance: f64,
	/// Above this many files, candidates come from the duration sweep
	pub bucket_threshold: usize,
	/// Smallest file size admitted
	pub min_file_size: u64,
	/// Shortest known duration admitted
	pub min_duration: f64,
	/// Longest known duration admitted
	pub max_duration: Option<f64>,
}

impl Default for Prefilter {
	fn default() -> Self {
		Self::from_config(&EngineConfig::default())
	}
}

impl Prefilter {
	/// Prefilter using the tolerances and limits in `config`.
	#[must_use]
	pub fn from_config(config: &EngineConfig) -> Self {
		Self {
			duration_tolerance: config.duration_tolerance,
			aspect_tolerance: config.aspect_tolerance,
			bucket_threshold: config.bucket_threshold,
			min_file_size: config.min_file_size,
			min_duration: config.min_duration,
			max_duration: config.max_duration,
		}
	}

	/// Whether `a` and `b` could plausibly be the same content.
	///
	/// An unknown duration or aspect ratio on either side never rejects.
	#[must_use]
	pub fn worth_comparing(&self, a: &MediaRecord, b: &MediaRecord) -> bool {
		if let (Some(da), Some(db)) = (a.known_duration(), b.known_duration()) {
			if relative_difference(da, db) > self.duration_tolerance {
				return false;
			}
		}
		if let (Some(ra), Some(rb)) = (a.aspect_ratio(), b.aspect_ratio()) {
			if relative_difference(ra, rb) > self.aspect_tolerance {
				return false;
			}
		}
		true
	}

	/// Reason a single file is excluded by the size and duration limits.
	#[must_use]
	pub fn limit_violation(&self, record: &MediaRecord) -> Option<String> {
		if record.size() < self.min_file_size {
			return Some(format!(
				"size {} bytes below minimum {}",
				record.size(),
				self.min_file_size
			));
		}
		if let Some(duration) = record.known_duration() {
			if duration < self.min_duration {
				return Some(format!(
					"duration {duration:.1}s below minimum {:.1}s",
					self.min_duration
				));
			}
			if let Some(max_duration) = self.max_duration {
				if duration > max_duration {
					return Some(format!(
						"duration {duration:.1}s above maximum {max_duration:.1}s"
					));
				}
			}
		}
		None
	}

	/// All index pairs `(i, j)` with `i < j` that pass [`worth_comparing`].
	///
	/// Small sets are tested exhaustively. Larger sets are swept in
	/// duration order so only neighbours within the tolerance window are
	/// visited; both paths return the same pairs, sorted.
	///
	/// [`worth_comparing`]: Self::worth_comparing
	#[must_use]
	pub fn candidate_pairs(&self, records: &[MediaRecord]) -> Vec<(usize, usize)> {
		let pairs = if records.len() <= self.bucket_threshold {
			self.exhaustive_pairs(records)
		} else {
			self.swept_pairs(records)
		};
		debug!(
			files = records.len(),
			pairs = pairs.len(),
			"Prefilter produced candidate pairs"
		);
		pairs
	}

	fn exhaustive_pairs(&self, records: &[MediaRecord]) -> Vec<(usize, usize)> {
		let mut pairs = Vec::new();
		for i in 0..records.len() {
			for j in i + 1..records.len() {
				if self.worth_comparing(&records[i], &records[j]) {
					pairs.push((i, j));
				}
			}
		}
		pairs
	}

	fn swept_pairs(&self, records: &[MediaRecord]) -> Vec<(usize, usize)> {
		let mut known: Vec<(f64, usize)> = Vec::with_capacity(records.len());
		let mut unknown: Vec<usize> = Vec::new();
		for (index, record) in records.iter().enumerate() {
			match record.known_duration() {
				Some(duration) => known.push((duration, index)),
				None => unknown.push(index),
			}
		}
		known.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)));

		let mut pairs = Vec::new();
		let mut push = |a: usize, b: usize| {
			if self.worth_comparing(&records[a], &records[b]) {
				pairs.push((a.min(b), a.max(b)));
			}
		};

		// (d_j - d_i) / d_j <= tol  <=>  d_j * (1 - tol) <= d_i
		let reach = 1.0 - self.duration_tolerance;
		for (position, &(shorter, a)) in known.iter().enumerate() {
			for &(longer, b) in &known[position + 1..] {
				if longer * reach > shorter * (1.0 + SWEEP_EPSILON) {
					break;
				}
				push(a, b);
			}
		}

		// Unknown durations pair with everything.
		for (position, &a) in unknown.iter().enumerate() {
			for &b in &unknown[position + 1..] {
				push(a, b);
			}
			for &(_, b) in &known {
				push(a, b);
			}
		}

		pairs.sort_unstable();
		pairs.dedup();
		pairs
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::record::{ContainerFormat, FileIdentity, Resolution};
	use std::path::PathBuf;
	use std::time::SystemTime;

	fn record(name: &str, duration: Option<f64>, resolution: Option<(u32, u32)>) -> MediaRecord {
		MediaRecord {
			identity: FileIdentity {
				path: PathBuf::from(name),
				size: 1_000,
				modified: SystemTime::UNIX_EPOCH,
			},
			duration_seconds: duration,
			resolution: resolution.map(|(w, h)| Resolution::new(w, h)),
			bitrate: Some(1_000_000),
			format: ContainerFormat::Mp4,
		}
	}

	#[test]
	fn test_duration_tolerance() {
		let filter = Prefilter::default();
		let a = record("a", Some(100.0), Some((1920, 1080)));
		assert!(filter.worth_comparing(&a, &record("b", Some(86.0), Some((1920, 1080)))));
		assert!(!filter.worth_comparing(&a, &record("c", Some(84.0), Some((1920, 1080)))));
		// symmetric
		assert!(!filter.worth_comparing(&record("c", Some(84.0), None), &a));
	}

	#[test]
	fn test_unknown_never_rejects() {
		let filter = Prefilter::default();
		let a = record("a", Some(100.0), Some((1920, 1080)));
		assert!(filter.worth_comparing(&a, &record("b", None, None)));
		// zero duration counts as unknown, but the aspect check still applies
		assert!(filter.worth_comparing(&a, &record("c", Some(0.0), None)));
		assert!(!filter.worth_comparing(&a, &record("d", Some(0.0), Some((1080, 1920)))));
	}

	#[test]
	fn test_aspect_tolerance() {
		let filter = Prefilter::default();
		let wide = record("a", Some(60.0), Some((1920, 1080)));
		// half resolution, same aspect
		assert!(filter.worth_comparing(&wide, &record("b", Some(60.0), Some((960, 540)))));
		// 4:3 is far from 16:9
		assert!(!filter.worth_comparing(&wide, &record("c", Some(60.0), Some((640, 480)))));
	}

	#[test]
	fn test_size_and_bitrate_ignored() {
		let filter = Prefilter::default();
		let a = record("a.mp4", Some(60.0), Some((1280, 720)));
		let mut b = record("totally-different-name.mkv", Some(60.5), Some((1280, 720)));
		b.identity.size = 1;
		b.bitrate = Some(1);
		assert!(filter.worth_comparing(&a, &b));
	}

	#[test]
	fn test_limits() {
		let filter = Prefilter {
			min_file_size: 500,
			min_duration: 10.0,
			max_duration: Some(100.0),
			..Prefilter::default()
		};
		assert!(filter.limit_violation(&record("ok", Some(50.0), None)).is_none());
		assert!(filter.limit_violation(&record("short", Some(5.0), None)).is_some());
		assert!(filter.limit_violation(&record("long", Some(500.0), None)).is_some());
		let mut tiny = record("tiny", Some(50.0), None);
		tiny.identity.size = 10;
		assert!(filter.limit_violation(&tiny).is_some());
		// unknown duration is not filtered by duration limits
		assert!(filter.limit_violation(&record("unknown", None, None)).is_none());
	}

	#[test]
	fn test_sweep_matches_exhaustive() {
		let durations = [
			Some(10.0),
			Some(11.0),
			Some(11.5),
			None,
			Some(60.0),
			Some(51.0),
			Some(69.0),
			Some(70.6),
			Some(60.0),
			None,
			Some(300.0),
			Some(255.0),
			Some(254.9),
		];
		let records: Vec<MediaRecord> = durations
			.iter()
			.enumerate()
			.map(|(i, d)| record(&format!("f{i}"), *d, Some((1280, 720))))
			.collect();

		let exhaustive = Prefilter {
			bucket_threshold: usize::MAX,
			..Prefilter::default()
		};
		let swept = Prefilter {
			bucket_threshold: 0,
			..Prefilter::default()
		};
		let expected = exhaustive.candidate_pairs(&records);
		assert_eq!(swept.candidate_pairs(&records), expected);
		// unknown durations pair with everything
		assert!(expected.contains(&(3, 10)));
		assert!(expected.contains(&(3, 9)));
		// 300 vs 255 is exactly 15%
		assert!(expected.contains(&(10, 11)));
		assert!(!expected.contains(&(10, 12)));
	}

	#[test]
	fn test_relative_difference() {
		assert!((relative_difference(100.0, 85.0) - 0.15).abs() < 1e-12);
		assert!((relative_difference(0.0, 0.0)).abs() < f64::EPSILON);
	}
}
