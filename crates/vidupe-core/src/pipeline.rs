//! Detection pipeline.
//!
//! Runs the stages in order over a [`ScanJob`]:
//!
//! 1. probe every file for metadata (unreadable files are skipped)
//! 2. apply the size and duration limits, then the pair prefilter
//! 3. fingerprint each file that appears in a candidate pair, once
//! 4. score every candidate pair
//! 5. cluster (waits for all scores)
//!
//! Fingerprinting and scoring run on a bounded rayon pool. Cancellation is
//! checked before each file and each pair; a unit already in progress is
//! finished but its result is discarded.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info, instrument, warn};

use crate::cluster::{cluster, ClusterConfig, DuplicateGroup, ScoredPair};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::features::{DctHashExtractor, FeatureExtractor};
use crate::fingerprint::{Fingerprint, FingerprintBuilder};
use crate::job::{RunPhase, RunResult, RunStatus, RunSummary, ScanJob, SkipReason, SkippedFile};
use crate::prefilter::Prefilter;
use crate::record::{MediaProbe, MediaRecord};
use crate::sampler::{FrameDecoder, FrameSampler};
use crate::similarity::SimilarityScorer;

// ============================================================================
// Unit Outcomes
// ============================================================================

enum FingerprintOutcome {
	Built(Arc<Fingerprint>),
	Cached(Arc<Fingerprint>),
	Failed(SkipReason),
	Abandoned,
}

enum PairOutcome {
	Scored(ScoredPair),
	Incomparable,
	Abandoned,
}

/// Mutable bookkeeping for one run.
struct RunState {
	started: Instant,
	summary: RunSummary,
	/// (input position, skipped file)
	skipped: Vec<(usize, SkippedFile)>,
}

impl RunState {
	fn new() -> Self {
		Self {
			started: Instant::now(),
			summary: RunSummary::default(),
			skipped: Vec::new(),
		}
	}

	fn skip(&mut self, position: usize, path: PathBuf, reason: SkipReason) {
		warn!(path = %path.display(), %reason, "Skipping file");
		self.skipped.push((position, SkippedFile { path, reason }));
	}

	fn finish(mut self, job: &ScanJob, status: RunStatus, groups: Vec<DuplicateGroup>) -> RunResult {
		self.skipped.sort_by_key(|(position, _)| *position);
		self.summary.files_skipped = self.skipped.len();
		self.summary.elapsed_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);
		job.enter_phase(RunPhase::Finished);

		match status {
			RunStatus::Completed => info!(
				groups = groups.len(),
				skipped = self.summary.files_skipped,
				pairs_scored = self.summary.pairs_scored,
				elapsed_ms = self.summary.elapsed_ms,
				"Detection run completed"
			),
			RunStatus::Cancelled => info!(
				pairs_scored = self.summary.pairs_scored,
				elapsed_ms = self.summary.elapsed_ms,
				"Detection run cancelled"
			),
		}

		RunResult {
			status,
			groups,
			skipped: self.skipped.into_iter().map(|(_, file)| file).collect(),
			summary: self.summary,
		}
	}
}

// ============================================================================
// Pipeline
// ============================================================================

/// Orchestrates the engine over the collaborators it is given.
#[derive(Clone)]
pub struct DetectionPipeline<'a> {
	probe: &'a dyn MediaProbe,
	decoder: &'a dyn FrameDecoder,
	extractor: Arc<dyn FeatureExtractor>,
}

impl std::fmt::Debug for DetectionPipeline<'_> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DetectionPipeline")
			.field("extractor", &self.extractor.id())
			.finish_non_exhaustive()
	}
}

impl<'a> DetectionPipeline<'a> {
	/// Pipeline with the default perceptual-hash extractor.
	#[must_use]
	pub fn new(probe: &'a dyn MediaProbe, decoder: &'a dyn FrameDecoder) -> Self {
		Self {
			probe,
			decoder,
			extractor: Arc::new(DctHashExtractor::default()),
		}
	}

	/// Replace the feature extractor.
	#[must_use]
	pub fn with_extractor(mut self, extractor: Arc<dyn FeatureExtractor>) -> Self {
		self.extractor = extractor;
		self
	}

	/// Identity of the feature extractor in use.
	#[must_use]
	pub fn extractor_id(&self) -> &str {
		self.extractor.id()
	}

	/// Run every stage over `job`.
	///
	/// Per-file and per-pair problems are reported in the result, never as
	/// `Err`. A cancelled run returns `Ok` with [`RunStatus::Cancelled`] and
	/// no groups.
	///
	/// # Errors
	///
	/// [`EngineError::InvalidConfig`] if the job's configuration does not
	/// validate, [`EngineError::WorkerPool`] if the thread pool cannot be
	/// created.
	#[instrument(skip_all, fields(files = job.files().len(), extractor = %self.extractor.id()))]
	pub fn run(&self, job: &ScanJob) -> Result<RunResult> {
		let config = job.config();
		config.validate()?;
		let pool = rayon::ThreadPoolBuilder::new()
			.num_threads(config.max_workers)
			.thread_name(|index| format!("vidupe-worker-{index}"))
			.build()
			.map_err(|err| EngineError::WorkerPool(err.to_string()))?;

		let mut state = RunState::new();
		info!(workers = config.max_workers, "Starting detection run");

		// Probe
		job.enter_phase(RunPhase::Probing);
		let (records, positions) = self.probe_all(job, &pool, &mut state);
		if job.is_cancelled() {
			return Ok(state.finish(job, RunStatus::Cancelled, Vec::new()));
		}

		// Prefilter
		let prefilter = Prefilter::from_config(config);
		let pairs = prefilter.candidate_pairs(&records);
		state.summary.candidate_pairs = pairs.len();
		state.summary.cache_invalidated = job.cache().revalidate(&records);

		// Fingerprint
		let mut needed: Vec<usize> = pairs.iter().flat_map(|&(a, b)| [a, b]).collect();
		needed.sort_unstable();
		needed.dedup();
		job.reset_counters(needed.len(), 0);
		job.enter_phase(RunPhase::Fingerprinting);

		let builder = FingerprintBuilder::new(Arc::clone(&self.extractor), config);
		let outcomes: Vec<(usize, FingerprintOutcome)> = pool.install(|| {
			needed
				.par_iter()
				.map(|&index| (index, self.fingerprint(job, &builder, &records[index])))
				.collect()
		});

		let mut fingerprints: Vec<Option<Arc<Fingerprint>>> = vec![None; records.len()];
		for (index, outcome) in outcomes {
			match outcome {
				FingerprintOutcome::Built(fingerprint) => {
					state.summary.files_fingerprinted += 1;
					fingerprints[index] = Some(fingerprint);
				}
				FingerprintOutcome::Cached(fingerprint) => {
					state.summary.files_fingerprinted += 1;
					state.summary.cache_hits += 1;
					fingerprints[index] = Some(fingerprint);
				}
				FingerprintOutcome::Failed(reason) => {
					state.skip(positions[index], records[index].path().to_path_buf(), reason);
				}
				FingerprintOutcome::Abandoned => {}
			}
		}
		if job.is_cancelled() {
			return Ok(state.finish(job, RunStatus::Cancelled, Vec::new()));
		}

		// Score
		let scorable = self.triage(config, &pairs, &fingerprints, &mut state);
		job.set_pairs_total(scorable.len());
		job.enter_phase(RunPhase::Scoring);

		let scorer = SimilarityScorer::from_config(config);
		let outcomes: Vec<PairOutcome> = pool.install(|| {
			scorable
				.par_iter()
				.map(|&(a, b)| score_pair(job, &scorer, &records, &fingerprints, a, b))
				.collect()
		});

		let mut scored = Vec::with_capacity(outcomes.len());
		for outcome in outcomes {
			match outcome {
				PairOutcome::Scored(pair) => scored.push(pair),
				PairOutcome::Incomparable => state.summary.incomparable_pairs += 1,
				PairOutcome::Abandoned => {}
			}
		}
		state.summary.pairs_scored = scored.len();
		if job.is_cancelled() {
			return Ok(state.finish(job, RunStatus::Cancelled, Vec::new()));
		}

		// Cluster
		job.enter_phase(RunPhase::Clustering);
		let groups = cluster(&records, &scored, &ClusterConfig::from_config(config));
		Ok(state.finish(job, RunStatus::Completed, groups))
	}

	/// Probe all distinct input paths. Returns the admitted records and,
	/// for each, its position in the input.
	fn probe_all(
		&self,
		job: &ScanJob,
		pool: &ThreadPool,
		state: &mut RunState,
	) -> (Vec<MediaRecord>, Vec<usize>) {
		let mut seen = HashSet::new();
		let unique: Vec<(usize, &PathBuf)> = job
			.files()
			.iter()
			.enumerate()
			.filter(|(_, path)| seen.insert(path.as_path()))
			.collect();
		state.summary.files_seen = unique.len();

		let probed: Vec<_> = pool.install(|| {
			unique
				.par_iter()
				.map(|&(position, path)| {
					if job.is_cancelled() {
						None
					} else {
						Some((position, path, self.probe.probe(path)))
					}
				})
				.collect()
		});

		let prefilter = Prefilter::from_config(job.config());
		let mut records = Vec::new();
		let mut positions = Vec::new();
		for (position, path, result) in probed.into_iter().flatten() {
			match result {
				Ok(record) => {
					if let Some(violation) = prefilter.limit_violation(&record) {
						state.skip(position, path.clone(), SkipReason::Filtered(violation));
					} else {
						records.push(record);
						positions.push(position);
					}
				}
				Err(err) => {
					state.skip(
						position,
						path.clone(),
						SkipReason::MetadataUnavailable(err.to_string()),
					);
				}
			}
		}
		debug!(admitted = records.len(), "Probing finished");
		(records, positions)
	}

	fn fingerprint(
		&self,
		job: &ScanJob,
		builder: &FingerprintBuilder,
		record: &MediaRecord,
	) -> FingerprintOutcome {
		if job.is_cancelled() {
			return FingerprintOutcome::Abandoned;
		}

		let config = job.config();
		if let Some(cached) = job.cache().get(&record.identity).filter(|fingerprint| {
			fingerprint.extractor_id == builder.extractor_id()
				&& fingerprint.normalize_size == config.normalize_size
				&& !fingerprint.is_empty()
		}) {
			job.file_done();
			return FingerprintOutcome::Cached(cached);
		}

		let sampler = FrameSampler::new(record, self.decoder, config);
		let outcome = match builder.build(sampler) {
			Ok(fingerprint) => {
				let fingerprint = Arc::new(fingerprint);
				job.cache().insert(record.identity.clone(), Arc::clone(&fingerprint));
				FingerprintOutcome::Built(fingerprint)
			}
			Err(EngineError::Unprocessable { requested, decoded }) => {
				FingerprintOutcome::Failed(SkipReason::Unprocessable { requested, decoded })
			}
			Err(err) => FingerprintOutcome::Failed(SkipReason::MetadataUnavailable(err.to_string())),
		};
		job.file_done();
		outcome
	}

	/// Pairs with both fingerprints available, minus those dismissed by the
	/// aggregate hash when triage is enabled.
	fn triage(
		&self,
		config: &EngineConfig,
		pairs: &[(usize, usize)],
		fingerprints: &[Option<Arc<Fingerprint>>],
		state: &mut RunState,
	) -> Vec<(usize, usize)> {
		let mut scorable = Vec::with_capacity(pairs.len());
		for &(a, b) in pairs {
			let (Some(fa), Some(fb)) = (&fingerprints[a], &fingerprints[b]) else {
				continue;
			};
			if let Some(max_bits) = config.aggregate_triage_bits {
				if fa.aggregate.distance(&fb.aggregate) > max_bits {
					state.summary.triaged_pairs += 1;
					continue;
				}
			}
			scorable.push((a, b));
		}
		debug!(
			scorable = scorable.len(),
			triaged = state.summary.triaged_pairs,
			extractor = %self.extractor.id(),
			"Pairs ready for scoring"
		);
		scorable
	}
}

fn score_pair(
	job: &ScanJob,
	scorer: &SimilarityScorer,
	records: &[MediaRecord],
	fingerprints: &[Option<Arc<Fingerprint>>],
	a: usize,
	b: usize,
) -> PairOutcome {
	if job.is_cancelled() {
		return PairOutcome::Abandoned;
	}
	let (Some(fa), Some(fb)) = (&fingerprints[a], &fingerprints[b]) else {
		return PairOutcome::Abandoned;
	};

	let outcome = match scorer.score(fa, fb) {
		Ok(score) => PairOutcome::Scored(ScoredPair { a, b, score }),
		Err(err) => {
			warn!(
				a = %records[a].path().display(),
				b = %records[b].path().display(),
				error = %err,
				"Skipping pair with incomparable fingerprints"
			);
			PairOutcome::Incomparable
		}
	};
	job.pair_done();
	outcome
}
