//! Error types for the detection engine and its collaborators.

use std::path::PathBuf;

/// Errors produced by the engine itself.
///
/// Per-file and per-pair failures during a run are reported as values in the
/// run summary; only configuration, pool setup and cache I/O surface as `Err`
/// from [`crate::pipeline::DetectionPipeline::run`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
	/// A configuration value is outside its accepted range.
	#[error("invalid configuration: `{field}` {reason}")]
	InvalidConfig {
		/// Name of the offending option
		field: &'static str,
		/// What is wrong with it
		reason: String,
	},

	/// Too few sampled frames could be decoded to build a fingerprint.
	#[error("unprocessable: only {decoded} of {requested} sampled frames decoded")]
	Unprocessable {
		/// Number of offsets the sampler asked for
		requested: usize,
		/// Number of offsets that produced a frame
		decoded: usize,
	},

	/// Scoring was attempted on fingerprints that cannot be compared.
	#[error("incomparable fingerprints: {0}")]
	IncomparableFingerprint(String),

	/// The worker pool could not be created.
	#[error("failed to build worker pool: {0}")]
	WorkerPool(String),

	/// Fingerprint cache file could not be read or written.
	#[error("cache I/O error at {path}: {source}")]
	CacheIo {
		/// Cache file location
		path: PathBuf,
		/// Underlying error
		#[source]
		source: std::io::Error,
	},

	/// Fingerprint cache contents could not be encoded or decoded.
	#[error("cache encoding error: {0}")]
	CacheEncoding(String),
}

/// Failure reported by a [`crate::sampler::FrameDecoder`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
	/// The region around the timestamp is damaged or unreadable.
	#[error("corrupt frame at {timestamp:.3}s: {reason}")]
	Corrupt {
		/// Requested timestamp in seconds
		timestamp: f64,
		/// Decoder-specific detail
		reason: String,
	},

	/// The file cannot be decoded at all (codec, container or tooling).
	#[error("unsupported media: {0}")]
	Unsupported(String),
}

/// Failure reported by a [`crate::record::MediaProbe`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
	/// The file does not exist or is not readable.
	#[error("file not readable: {0}")]
	Unreadable(String),

	/// The container could be opened but carries no usable video metadata.
	#[error("no usable video metadata: {0}")]
	InvalidContainer(String),
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
