//! Scan jobs: the explicit state of one detection run.
//!
//! A [`ScanJob`] owns the input file set and configuration, the live
//! progress counters, the cancellation flag and the fingerprint cache.
//! Nothing here is global; two jobs in one process never share state unless
//! they are handed the same cache.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::cache::FingerprintCache;
use crate::cluster::DuplicateGroup;
use crate::config::EngineConfig;
use crate::error::Result;

// ============================================================================
// Cancellation
// ============================================================================

/// Shared cancellation flag.
///
/// Cloning hands out another handle to the same flag. Workers look at it
/// between units of work, never in the middle of one.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
	/// New, not cancelled.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Request cancellation.
	pub fn cancel(&self) {
		self.0.store(true, Ordering::Relaxed);
	}

	/// Whether cancellation was requested.
	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::Relaxed)
	}
}

// ============================================================================
// Progress
// ============================================================================

/// Stage a run is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RunPhase {
	/// Not started
	#[default]
	Pending,
	/// Reading container metadata
	Probing,
	/// Sampling frames and building fingerprints
	Fingerprinting,
	/// Comparing candidate pairs
	Scoring,
	/// Grouping
	Clustering,
	/// Done, completed or cancelled
	Finished,
}

impl fmt::Display for RunPhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Self::Pending => "pending",
			Self::Probing => "probing",
			Self::Fingerprinting => "fingerprinting",
			Self::Scoring => "scoring",
			Self::Clustering => "clustering",
			Self::Finished => "finished",
		};
		f.write_str(name)
	}
}

/// Snapshot of the progress counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
	/// Current stage
	pub phase: RunPhase,
	/// Files with a fingerprint (built or cached) so far
	pub files_fingerprinted: usize,
	/// Files that need a fingerprint
	pub files_total: usize,
	/// Candidate pairs scored so far
	pub pairs_scored: usize,
	/// Candidate pairs to score
	pub pairs_total: usize,
}

// ============================================================================
// Scan Job
// ============================================================================

/// State of one detection run.
#[derive(Debug)]
pub struct ScanJob {
	files: Vec<PathBuf>,
	config: EngineConfig,
	cancel: CancelToken,
	cache: Arc<FingerprintCache>,
	progress_tx: Option<Sender<Progress>>,

	phase: RwLock<RunPhase>,
	files_total: AtomicUsize,
	files_fingerprinted: AtomicUsize,
	pairs_total: AtomicUsize,
	pairs_scored: AtomicUsize,
}

impl ScanJob {
	/// Create a job over `files`.
	///
	/// # Errors
	///
	/// Returns [`crate::EngineError::InvalidConfig`] if `config` does not
	/// validate. This is the only error reported before a run starts.
	pub fn new(files: Vec<PathBuf>, config: EngineConfig) -> Result<Self> {
		config.validate()?;
		Ok(Self {
			files,
			config,
			cancel: CancelToken::new(),
			cache: Arc::new(FingerprintCache::new()),
			progress_tx: None,
			phase: RwLock::new(RunPhase::Pending),
			files_total: AtomicUsize::new(0),
			files_fingerprinted: AtomicUsize::new(0),
			pairs_total: AtomicUsize::new(0),
			pairs_scored: AtomicUsize::new(0),
		})
	}

	/// Use a prior cache (for example one loaded from disk).
	#[must_use]
	pub fn with_cache(mut self, cache: Arc<FingerprintCache>) -> Self {
		self.cache = cache;
		self
	}

	/// Send a progress snapshot on every change.
	#[must_use]
	pub fn with_progress(mut self, sender: Sender<Progress>) -> Self {
		self.progress_tx = Some(sender);
		self
	}

	/// Use an externally owned cancellation flag.
	#[must_use]
	pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
		self.cancel = token;
		self
	}

	/// Input files, in caller order.
	#[must_use]
	pub fn files(&self) -> &[PathBuf] {
		&self.files
	}

	/// Validated configuration.
	#[must_use]
	pub const fn config(&self) -> &EngineConfig {
		&self.config
	}

	/// Fingerprint cache shared with this job.
	#[must_use]
	pub const fn cache(&self) -> &Arc<FingerprintCache> {
		&self.cache
	}

	/// Handle to this job's cancellation flag.
	#[must_use]
	pub fn cancel_token(&self) -> CancelToken {
		self.cancel.clone()
	}

	/// Request cancellation.
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	/// Whether cancellation was requested.
	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Current counters.
	#[must_use]
	pub fn progress(&self) -> Progress {
		Progress {
			phase: *self.phase.read(),
			files_fingerprinted: self.files_fingerprinted.load(Ordering::Relaxed),
			files_total: self.files_total.load(Ordering::Relaxed),
			pairs_scored: self.pairs_scored.load(Ordering::Relaxed),
			pairs_total: self.pairs_total.load(Ordering::Relaxed),
		}
	}

	pub(crate) fn enter_phase(&self, phase: RunPhase) {
		*self.phase.write() = phase;
		self.publish();
	}

	pub(crate) fn reset_counters(&self, files_total: usize, pairs_total: usize) {
		self.files_total.store(files_total, Ordering::Relaxed);
		self.files_fingerprinted.store(0, Ordering::Relaxed);
		self.pairs_total.store(pairs_total, Ordering::Relaxed);
		self.pairs_scored.store(0, Ordering::Relaxed);
	}

	pub(crate) fn set_pairs_total(&self, pairs_total: usize) {
		self.pairs_total.store(pairs_total, Ordering::Relaxed);
		self.publish();
	}

	pub(crate) fn file_done(&self) {
		let _ = self.files_fingerprinted.fetch_add(1, Ordering::Relaxed);
		self.publish();
	}

	pub(crate) fn pair_done(&self) {
		let _ = self.pairs_scored.fetch_add(1, Ordering::Relaxed);
		self.publish();
	}

	fn publish(&self) {
		if let Some(tx) = &self.progress_tx {
			// A dropped receiver just means nobody is watching.
			let _ = tx.send(self.progress());
		}
	}
}

// ============================================================================
// Run Result
// ============================================================================

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
	/// All work finished and groups were computed
	Completed,
	/// Cancellation was requested; no groups
	Cancelled,
}

impl fmt::Display for RunStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Completed => f.write_str("completed"),
			Self::Cancelled => f.write_str("cancelled"),
		}
	}
}

/// Why a file took no part in grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum SkipReason {
	/// Unreadable file or unusable container
	MetadataUnavailable(String),
	/// Outside the configured size or duration limits
	Filtered(String),
	/// Too few frames decoded for a trustworthy fingerprint
	Unprocessable {
		/// Offsets planned
		requested: usize,
		/// Offsets decoded
		decoded: usize,
	},
}

impl fmt::Display for SkipReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::MetadataUnavailable(detail) => write!(f, "metadata unavailable: {detail}"),
			Self::Filtered(detail) => write!(f, "filtered: {detail}"),
			Self::Unprocessable { requested, decoded } => {
				write!(f, "unprocessable: {decoded} of {requested} samples decoded")
			}
		}
	}
}

/// A file left out of the run, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
	/// The file
	pub path: PathBuf,
	/// Why it was left out
	pub reason: SkipReason,
}

/// Counters describing a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunSummary {
	/// Distinct input files
	pub files_seen: usize,
	/// Files with a fingerprint (built or cached)
	pub files_fingerprinted: usize,
	/// Fingerprints reused from the cache
	pub cache_hits: usize,
	/// Cache entries dropped because their file changed
	pub cache_invalidated: usize,
	/// Files left out, for any reason
	pub files_skipped: usize,
	/// Pairs that passed the prefilter
	pub candidate_pairs: usize,
	/// Pairs fully scored
	pub pairs_scored: usize,
	/// Pairs dismissed by aggregate-hash triage
	pub triaged_pairs: usize,
	/// Pairs whose fingerprints could not be compared
	pub incomparable_pairs: usize,
	/// Wall-clock duration of the run
	pub elapsed_ms: u64,
}

/// What a caller gets back from a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
	/// Completed or cancelled
	pub status: RunStatus,
	/// Duplicate groups, strongest first; empty when cancelled
	pub groups: Vec<DuplicateGroup>,
	/// Files left out, in input order
	pub skipped: Vec<SkippedFile>,
	/// Counters
	pub summary: RunSummary,
}

impl RunResult {
	/// Whether the run was cancelled.
	#[must_use]
	pub fn is_cancelled(&self) -> bool {
		self.status == RunStatus::Cancelled
	}
}
