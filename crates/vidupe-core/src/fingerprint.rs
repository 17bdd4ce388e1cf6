//! Fingerprint Builder
//!
//! Turns the frames produced by a [`FrameSampler`] into a [`Fingerprint`]:
//! an ordered sequence of per-frame feature vectors plus a 64-bit aggregate
//! hash for coarse triage.
//!
//! ## Per-frame normalization
//!
//! Every frame goes through the same three steps, in this order:
//!
//! 1. resize to `normalize_size × normalize_size` (triangle filter)
//! 2. reduce to 8-bit luma
//! 3. hand the luma image to the [`FeatureExtractor`]
//!
//! Changing the order changes every hash, so fingerprints built with a
//! different `normalize_size` or extractor are never compared.

use std::cmp::Ordering;
use std::sync::Arc;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::features::FeatureExtractor;
use crate::sampler::FrameSampler;

// ============================================================================
// Feature Vectors
// ============================================================================

/// Fixed-length numeric description of one normalized frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureVector {
	/// Packed bits, compared by normalized Hamming distance
	Binary(SmallVec<[u8; 32]>),
	/// Real-valued components, compared by cosine distance
	Dense(Vec<f32>),
}

impl FeatureVector {
	/// Number of bits (binary) or components (dense).
	#[must_use]
	pub fn len(&self) -> usize {
		match self {
			Self::Binary(bytes) => bytes.len() * 8,
			Self::Dense(components) => components.len(),
		}
	}

	/// Whether the vector carries no information at all.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Distance in [0, 1] between two vectors of the same kind and length.
	///
	/// Binary vectors use the fraction of differing bits; dense vectors use
	/// `(1 - cosine) / 2`. Identical vectors are at distance exactly 0.
	/// Returns `None` when the vectors cannot be compared.
	#[must_use]
	pub fn distance(&self, other: &Self) -> Option<f64> {
		match (self, other) {
			(Self::Binary(a), Self::Binary(b)) if a.len() == b.len() && !a.is_empty() => {
				let bits = a.len() * 8;
				Some(f64::from(hamming_distance(a, b)) / bits as f64)
			}
			(Self::Dense(a), Self::Dense(b)) if a.len() == b.len() && !a.is_empty() => {
				Some(cosine_distance(a, b))
			}
			_ => None,
		}
	}

	/// Sign bits of the vector, in component order.
	///
	/// For binary vectors these are the bits themselves (least significant
	/// bit of each byte first); for dense vectors a component is set when it
	/// is positive.
	pub fn sign_bits(&self) -> impl Iterator<Item = bool> + '_ {
		let (bytes, dense): (&[u8], &[f32]) = match self {
			Self::Binary(bytes) => (bytes.as_slice(), &[]),
			Self::Dense(components) => (&[], components.as_slice()),
		};
		bytes
			.iter()
			.flat_map(|byte| (0..8).map(move |bit| (byte >> bit) & 1 == 1))
			.chain(dense.iter().map(|component| *component > 0.0))
	}

	/// Total order used to canonicalize argument order in the scorer.
	pub(crate) fn canonical_cmp(&self, other: &Self) -> Ordering {
		match (self, other) {
			(Self::Binary(a), Self::Binary(b)) => a.cmp(b),
			(Self::Dense(a), Self::Dense(b)) => a
				.iter()
				.zip(b.iter())
				.map(|(x, y)| x.total_cmp(y))
				.find(|ordering| ordering.is_ne())
				.unwrap_or_else(|| a.len().cmp(&b.len())),
			(Self::Binary(_), Self::Dense(_)) => Ordering::Less,
			(Self::Dense(_), Self::Binary(_)) => Ordering::Greater,
		}
	}
}

/// Number of differing bits between two packed hashes of equal length.
#[must_use]
pub fn hamming_distance(a: &[u8], b: &[u8]) -> u32 {
	a.iter()
		.zip(b.iter())
		.map(|(x, y)| (x ^ y).count_ones())
		.sum()
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
	if a == b {
		return 0.0;
	}

	let (dot, norm_a, norm_b) =
		a.iter()
			.zip(b.iter())
			.fold((0.0_f64, 0.0_f64, 0.0_f64), |(dot, na, nb), (&x, &y)| {
				let (x, y) = (f64::from(x), f64::from(y));
				(x.mul_add(y, dot), x.mul_add(x, na), y.mul_add(y, nb))
			});

	let magnitude = norm_a.sqrt() * norm_b.sqrt();
	if magnitude == 0.0 {
		// One side is all zeros: orthogonal by convention.
		return 0.5;
	}
	((1.0 - (dot / magnitude).clamp(-1.0, 1.0)) / 2.0).clamp(0.0, 1.0)
}

// ============================================================================
// Aggregate Hash
// ============================================================================

/// 64-bit summary of a whole fingerprint, for coarse triage only.
///
/// Bit `k` of every sample's sign bits is folded onto bit `k % 64`; an
/// aggregate bit is set when a strict majority of the folded bits are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct AggregateHash(pub u64);

impl AggregateHash {
	/// Width of the hash in bits.
	pub const BITS: u32 = 64;

	/// Majority-bit pooling over the samples.
	#[must_use]
	pub fn pool(samples: &[SampleVector]) -> Self {
		let mut ones = [0_u32; 64];
		let mut totals = [0_u32; 64];
		for sample in samples {
			for (k, bit) in sample.features.sign_bits().enumerate() {
				let slot = k % 64;
				totals[slot] += 1;
				if bit {
					ones[slot] += 1;
				}
			}
		}

		let hash = ones
			.iter()
			.zip(totals.iter())
			.enumerate()
			.filter(|(_, (ones, total))| **ones * 2 > **total)
			.fold(0_u64, |hash, (slot, _)| hash | 1 << slot);
		Self(hash)
	}

	/// Number of differing bits.
	#[inline]
	#[must_use]
	pub const fn distance(&self, other: &Self) -> u32 {
		(self.0 ^ other.0).count_ones()
	}
}

// ============================================================================
// Fingerprint
// ============================================================================

/// One sampled position and its feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleVector {
	/// Position as a fraction of the duration, in (0, 1)
	pub offset: f64,
	/// Features of the normalized frame at that position
	pub features: FeatureVector,
}

/// Compact visual signature of one video.
///
/// Samples are ordered by offset and never empty for a file that was
/// processed successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
	/// Identity of the extractor that produced every vector
	pub extractor_id: String,
	/// Side of the square frames the vectors were computed from
	pub normalize_size: u32,
	/// Ordered per-frame vectors
	pub samples: Vec<SampleVector>,
	/// Majority-bit pooled summary of `samples`
	pub aggregate: AggregateHash,
	/// Offsets the sampler planned
	pub requested_samples: usize,
	/// Offsets that produced no usable frame
	pub missing_samples: usize,
}

impl Fingerprint {
	/// Assemble a fingerprint from already computed samples.
	///
	/// Samples are sorted by offset; the aggregate is recomputed.
	#[must_use]
	pub fn from_samples(
		extractor_id: impl Into<String>,
		normalize_size: u32,
		mut samples: Vec<SampleVector>,
	) -> Self {
		samples.sort_by(|a, b| a.offset.total_cmp(&b.offset));
		let aggregate = AggregateHash::pool(&samples);
		let requested_samples = samples.len();
		Self {
			extractor_id: extractor_id.into(),
			normalize_size,
			samples,
			aggregate,
			requested_samples,
			missing_samples: 0,
		}
	}

	/// Number of samples.
	#[inline]
	#[must_use]
	pub fn len(&self) -> usize {
		self.samples.len()
	}

	/// Whether the fingerprint has no samples.
	#[inline]
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.samples.is_empty()
	}
}

// ============================================================================
// Builder
// ============================================================================

/// Resize to a square of side `size`, then reduce to luma.
#[must_use]
pub fn normalize_frame(image: &DynamicImage, size: u32) -> GrayImage {
	image.resize_exact(size, size, FilterType::Triangle).to_luma8()
}

/// Builds fingerprints with one extractor and one normalization.
#[derive(Clone)]
pub struct FingerprintBuilder {
	extractor: Arc<dyn FeatureExtractor>,
	normalize_size: u32,
	min_decoded_fraction: f64,
}

impl std::fmt::Debug for FingerprintBuilder {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FingerprintBuilder")
			.field("extractor", &self.extractor.id())
			.field("normalize_size", &self.normalize_size)
			.field("min_decoded_fraction", &self.min_decoded_fraction)
			.finish()
	}
}

impl FingerprintBuilder {
	/// Create a builder for `extractor` using the normalization in `config`.
	#[must_use]
	pub fn new(extractor: Arc<dyn FeatureExtractor>, config: &EngineConfig) -> Self {
		Self {
			extractor,
			normalize_size: config.normalize_size,
			min_decoded_fraction: config.min_decoded_fraction,
		}
	}

	/// Identity of the extractor in use.
	#[must_use]
	pub fn extractor_id(&self) -> &str {
		self.extractor.id()
	}

	/// Normalize one frame and extract its features.
	#[must_use]
	pub fn features_of(&self, image: &DynamicImage) -> FeatureVector {
		let normalized = normalize_frame(image, self.normalize_size);
		self.extractor.extract_features(&normalized)
	}

	/// Drain `sampler` and build a fingerprint.
	///
	/// # Errors
	///
	/// Returns [`EngineError::Unprocessable`] when no sample survived or when
	/// fewer than `min_decoded_fraction` of the requested offsets decoded.
	pub fn build(&self, mut sampler: FrameSampler<'_>) -> Result<Fingerprint> {
		let samples: Vec<SampleVector> = sampler
			.by_ref()
			.map(|frame| SampleVector {
				offset: frame.offset,
				features: self.features_of(&frame.image),
			})
			.collect();

		let report = sampler.report();
		let decoded_fraction = if report.requested == 0 {
			0.0
		} else {
			report.decoded as f64 / report.requested as f64
		};

		if samples.is_empty() || decoded_fraction < self.min_decoded_fraction {
			return Err(EngineError::Unprocessable {
				requested: report.requested,
				decoded: report.decoded,
			});
		}

		debug!(
			samples = samples.len(),
			requested = report.requested,
			missing = report.missing,
			substituted = report.substituted,
			dropped_uniform = report.dropped_uniform,
			"Built fingerprint"
		);

		let aggregate = AggregateHash::pool(&samples);
		Ok(Fingerprint {
			extractor_id: self.extractor.id().to_string(),
			normalize_size: self.normalize_size,
			samples,
			aggregate,
			requested_samples: report.requested,
			missing_samples: report.missing,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use smallvec::smallvec;

	fn binary(bytes: &[u8]) -> FeatureVector {
		FeatureVector::Binary(bytes.iter().copied().collect())
	}

	#[test]
	#[allow(clippy::float_cmp)]
	fn test_binary_distance() {
		let a = binary(&[0b0000_0000, 0xFF]);
		let b = binary(&[0b0000_1111, 0xFF]);
		assert_eq!(a.distance(&a), Some(0.0));
		assert_eq!(a.distance(&b), Some(4.0 / 16.0));
		assert_eq!(a.distance(&b), b.distance(&a));
	}

	#[test]
	#[allow(clippy::float_cmp)]
	fn test_dense_distance() {
		let a = FeatureVector::Dense(vec![1.0, 0.0]);
		let b = FeatureVector::Dense(vec![0.0, 1.0]);
		let c = FeatureVector::Dense(vec![-1.0, 0.0]);
		assert_eq!(a.distance(&a), Some(0.0));
		assert!((a.distance(&b).unwrap_or_default() - 0.5).abs() < 1e-12);
		assert!((a.distance(&c).unwrap_or_default() - 1.0).abs() < 1e-12);
	}

	#[test]
	fn test_incomparable_vectors() {
		let bits = binary(&[1, 2]);
		let dense = FeatureVector::Dense(vec![1.0; 16]);
		assert_eq!(bits.distance(&dense), None);
		assert_eq!(bits.distance(&binary(&[1, 2, 3])), None);
		assert_eq!(binary(&[]).distance(&binary(&[])), None);
	}

	#[test]
	fn test_hamming_distance() {
		assert_eq!(hamming_distance(&[0xFF], &[0x00]), 8);
		assert_eq!(hamming_distance(&[0b1010], &[0b0101]), 4);
		assert_eq!(hamming_distance(&[], &[]), 0);
	}

	#[test]
	fn test_aggregate_majority() {
		let sample = |byte: u8, offset: f64| SampleVector {
			offset,
			features: FeatureVector::Binary(smallvec![byte]),
		};
		// bit 0 set in 2 of 3, bit 1 set in 1 of 3, bit 2 in all
		let samples = vec![
			sample(0b101, 0.1),
			sample(0b111, 0.5),
			sample(0b100, 0.9),
		];
		assert_eq!(AggregateHash::pool(&samples), AggregateHash(0b101));

		// 1 of 2 is a tie and stays clear
		let samples = vec![sample(0b1, 0.1), sample(0b0, 0.5)];
		assert_eq!(AggregateHash::pool(&samples), AggregateHash(0));
	}

	#[test]
	fn test_aggregate_folds_wide_vectors() {
		// 128 bits: byte 0 and byte 8 both land on slots 0..8
		let mut bytes = [0_u8; 16];
		bytes[0] = 0x01;
		bytes[8] = 0x01;
		let samples = vec![SampleVector {
			offset: 0.5,
			features: binary(&bytes),
		}];
		assert_eq!(AggregateHash::pool(&samples), AggregateHash(1));
		assert_eq!(AggregateHash(0b1011).distance(&AggregateHash(0b0001)), 2);
	}

	#[test]
	fn test_from_samples_orders_offsets() {
		let fingerprint = Fingerprint::from_samples(
			"test",
			32,
			vec![
				SampleVector {
					offset: 0.75,
					features: binary(&[1]),
				},
				SampleVector {
					offset: 0.25,
					features: binary(&[2]),
				},
			],
		);
		assert_eq!(fingerprint.len(), 2);
		assert!(fingerprint.samples[0].offset < fingerprint.samples[1].offset);
		assert_eq!(fingerprint.requested_samples, 2);
	}

	#[test]
	fn test_normalize_frame_size() {
		let image = DynamicImage::new_rgb8(320, 180);
		let normalized = normalize_frame(&image, 32);
		assert_eq!(normalized.dimensions(), (32, 32));
	}
}
