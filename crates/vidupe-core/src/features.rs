//! Frame feature extraction.
//!
//! The engine only depends on [`FeatureExtractor`]: given a normalized luma
//! frame, produce a fixed-length [`FeatureVector`]. Two built-in providers:
//!
//! - [`DctHashExtractor`]: a 64-bit perceptual hash (median over the DCT
//!   coefficients), the default
//! - [`LumaGridExtractor`]: a dense, zero-mean grid of block luma means
//!
//! An extractor's [`id`](FeatureExtractor::id) is stored in every
//! fingerprint; fingerprints from different extractors are never compared.

use image::{DynamicImage, GrayImage};
use image_hasher::{HashAlg, Hasher, HasherConfig};

use crate::fingerprint::FeatureVector;

/// Capability interface for per-frame feature providers.
pub trait FeatureExtractor: Send + Sync {
	/// Stable identity of this provider and its parameters.
	fn id(&self) -> &str;

	/// Compute the feature vector of one normalized frame.
	///
	/// Must be deterministic and always return vectors of the same kind and
	/// length.
	fn extract_features(&self, frame: &GrayImage) -> FeatureVector;
}

// ============================================================================
// DCT Perceptual Hash
// ============================================================================

/// Perceptual hash over the low-frequency DCT coefficients.
///
/// Each bit records whether a coefficient is above the median, which keeps
/// the hash stable under rescaling, recompression and small brightness
/// shifts.
pub struct DctHashExtractor {
	hasher: Hasher,
	id: String,
}

impl DctHashExtractor {
	/// Create an extractor producing `hash_size × hash_size` bits.
	#[must_use]
	pub fn new(hash_size: u32) -> Self {
		let hasher = HasherConfig::new()
			.hash_alg(HashAlg::Median)
			.preproc_dct()
			.hash_size(hash_size, hash_size)
			.to_hasher();
		Self {
			hasher,
			id: format!("dct-median-{hash_size}x{hash_size}"),
		}
	}
}

impl Default for DctHashExtractor {
	fn default() -> Self {
		// 64-bit hash (8x8)
		Self::new(8)
	}
}

impl std::fmt::Debug for DctHashExtractor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DctHashExtractor")
			.field("id", &self.id)
			.finish_non_exhaustive()
	}
}

impl FeatureExtractor for DctHashExtractor {
	fn id(&self) -> &str {
		&self.id
	}

	fn extract_features(&self, frame: &GrayImage) -> FeatureVector {
		let image = DynamicImage::ImageLuma8(frame.clone());
		let hash = self.hasher.hash_image(&image);
		FeatureVector::Binary(hash.as_bytes().iter().copied().collect())
	}
}

// ============================================================================
// Luma Grid
// ============================================================================

/// Dense descriptor: mean luma of each cell in a `grid × grid` layout,
/// shifted to zero mean so global brightness changes cancel out.
#[derive(Debug, Clone)]
pub struct LumaGridExtractor {
	grid: u32,
	id: String,
}

impl LumaGridExtractor {
	/// Create an extractor with `grid × grid` cells (at least 1).
	#[must_use]
	pub fn new(grid: u32) -> Self {
		let grid = grid.max(1);
		Self {
			grid,
			id: format!("luma-grid-{grid}x{grid}"),
		}
	}
}

impl Default for LumaGridExtractor {
	fn default() -> Self {
		Self::new(8)
	}
}

impl FeatureExtractor for LumaGridExtractor {
	fn id(&self) -> &str {
		&self.id
	}

	fn extract_features(&self, frame: &GrayImage) -> FeatureVector {
		let (width, height) = frame.dimensions();
		let cells = (self.grid * self.grid) as usize;
		let mut sums = vec![0.0_f64; cells];
		let mut counts = vec![0_u32; cells];

		for (x, y, pixel) in frame.enumerate_pixels() {
			let cx = (u64::from(x) * u64::from(self.grid) / u64::from(width.max(1))) as usize;
			let cy = (u64::from(y) * u64::from(self.grid) / u64::from(height.max(1))) as usize;
			let cell = cy * self.grid as usize + cx;
			sums[cell] += f64::from(pixel.0[0]);
			counts[cell] += 1;
		}

		let means: Vec<f64> = sums
			.iter()
			.zip(counts.iter())
			.map(|(sum, &count)| if count == 0 { 0.0 } else { sum / f64::from(count) })
			.collect();
		let overall = means.iter().sum::<f64>() / cells as f64;

		FeatureVector::Dense(
			means
				.iter()
				.map(|mean| ((mean - overall) / 255.0) as f32)
				.collect(),
		)
	}
}
