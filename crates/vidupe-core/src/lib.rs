//! # Vidupe Core
//!
//! Perceptual duplicate detection for video libraries. Finds files that
//! show the same content even when they were re-encoded, rescaled, trimmed
//! or wrapped in a different container.
//!
//! ## How a run works
//!
//! 1. **Probe** every file for cheap container metadata ([`MediaRecord`])
//! 2. **Prefilter** pairs on duration and aspect ratio, so most of the
//!    `n²` pairs never cost a decode
//! 3. **Sample** frames at fixed fractions of each file's duration
//!    ([`FrameSampler`]), skipping corrupt and near-uniform frames
//! 4. **Fingerprint** each sampled frame with a [`FeatureExtractor`] and
//!    keep the ordered sequence ([`Fingerprint`])
//! 5. **Score** candidate pairs by aligning their sequences over a small
//!    range of shifts ([`SimilarityScorer`]), which absorbs trimmed intros
//!    and outros
//! 6. **Cluster** the scored pairs into [`DuplicateGroup`]s, each with a
//!    best member chosen by policy
//!
//! Decoding and probing are collaborators ([`FrameDecoder`],
//! [`MediaProbe`]); this crate never shells out or touches codecs itself.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use vidupe_core::{DetectionPipeline, EngineConfig, FrameDecoder, MediaProbe, ScanJob};
//!
//! fn find_duplicates(
//!     probe: &dyn MediaProbe,
//!     decoder: &dyn FrameDecoder,
//!     files: Vec<PathBuf>,
//! ) -> vidupe_core::Result<()> {
//!     let job = ScanJob::new(files, EngineConfig::default())?;
//!     let result = DetectionPipeline::new(probe, decoder).run(&job)?;
//!
//!     for group in &result.groups {
//!         if let Some(best) = group.best() {
//!             println!("keep {} ({} copies)", best.path().display(), group.len());
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Guarantees
//!
//! - Scores are symmetric: `score(a, b) == score(b, a)`
//! - A file identical to another scores exactly 1.0 against it
//! - Raising the similarity threshold never merges groups
//! - One corrupt file never aborts a run; it is reported and skipped

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod cluster;
pub mod config;
pub mod error;
pub mod features;
pub mod fingerprint;
pub mod job;
pub mod pipeline;
pub mod prefilter;
pub mod record;
pub mod sampler;
pub mod similarity;

pub use cache::{FingerprintCache, CACHE_FORMAT_VERSION};
pub use cluster::{
	cluster, BestMemberPolicy, ClusterConfig, DuplicateGroup, PairScore, ScoredPair, UnionFind,
};
pub use config::EngineConfig;
pub use error::{DecodeError, EngineError, ProbeError, Result};
pub use features::{DctHashExtractor, FeatureExtractor, LumaGridExtractor};
pub use fingerprint::{
	hamming_distance, normalize_frame, AggregateHash, FeatureVector, Fingerprint,
	FingerprintBuilder, SampleVector,
};
pub use job::{
	CancelToken, Progress, RunPhase, RunResult, RunStatus, RunSummary, ScanJob, SkipReason,
	SkippedFile,
};
pub use pipeline::DetectionPipeline;
pub use prefilter::{relative_difference, Prefilter};
pub use record::{
	is_supported_video, ContainerFormat, FileIdentity, MediaProbe, MediaRecord, Resolution,
	SUPPORTED_EXTENSIONS,
};
pub use sampler::{
	luma_variance, sample_offsets, FrameDecoder, FrameSampler, SampledFrame, SamplingReport,
};
pub use similarity::{ScoreCalibration, SimilarityScore, SimilarityScorer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_version() {
		assert!(!VERSION.is_empty());
	}
}
