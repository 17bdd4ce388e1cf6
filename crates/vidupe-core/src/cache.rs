//! Fingerprint cache.
//!
//! The only shared mutable structure of a run. Entries are keyed by path
//! and remember the [`FileIdentity`] they were built from; an entry whose
//! identity no longer matches the probed file is stale and gets dropped.
//!
//! The cache can be persisted between runs. The file starts with a small
//! header (format version, extractor id, normalization size) followed by
//! the entries, both `bincode` encoded. A header that does not match the
//! current engine yields an empty cache instead of an error.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::fingerprint::Fingerprint;
use crate::record::{FileIdentity, MediaRecord};

/// Bumped whenever the on-disk layout or fingerprint semantics change.
pub const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CacheHeader {
	version: u32,
	extractor_id: String,
	normalize_size: u32,
}

#[derive(Debug, Clone)]
struct CachedFingerprint {
	identity: FileIdentity,
	fingerprint: Arc<Fingerprint>,
}

/// Thread-safe map from file to fingerprint.
#[derive(Debug, Default)]
pub struct FingerprintCache {
	entries: RwLock<HashMap<PathBuf, CachedFingerprint>>,
}

impl FingerprintCache {
	/// Empty cache.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of entries.
	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	/// Whether the cache holds no entries.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}

	/// Fingerprint for `identity`, if cached under exactly that identity.
	#[must_use]
	pub fn get(&self, identity: &FileIdentity) -> Option<Arc<Fingerprint>> {
		self.entries
			.read()
			.get(&identity.path)
			.filter(|entry| entry.identity == *identity)
			.map(|entry| Arc::clone(&entry.fingerprint))
	}

	/// Store a fingerprint, replacing any entry for the same path.
	pub fn insert(&self, identity: FileIdentity, fingerprint: Arc<Fingerprint>) {
		let _ = self.entries.write().insert(
			identity.path.clone(),
			CachedFingerprint {
				identity,
				fingerprint,
			},
		);
	}

	/// Drop entries whose file changed since they were built.
	///
	/// Only paths present in `records` are checked. Returns the number of
	/// entries dropped.
	pub fn revalidate(&self, records: &[MediaRecord]) -> usize {
		let mut entries = self.entries.write();
		let mut dropped = 0;
		for record in records {
			let stale = entries
				.get(record.path())
				.is_some_and(|entry| entry.identity != record.identity);
			if stale {
				let _ = entries.remove(record.path());
				debug!(path = %record.path().display(), "Dropped stale cache entry");
				dropped += 1;
			}
		}
		dropped
	}

	/// Write entries built by `extractor_id` at `normalize_size` to `path`.
	///
	/// The file is written next to `path` first and renamed into place, so
	/// an interrupted save leaves the previous cache intact.
	///
	/// # Errors
	///
	/// [`EngineError::CacheIo`] on filesystem failures,
	/// [`EngineError::CacheEncoding`] if serialization fails.
	pub fn save(&self, path: &Path, extractor_id: &str, normalize_size: u32) -> Result<()> {
		let io_error = |source| EngineError::CacheIo {
			path: path.to_path_buf(),
			source,
		};

		if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(io_error)?;
		}

		let header = CacheHeader {
			version: CACHE_FORMAT_VERSION,
			extractor_id: extractor_id.to_string(),
			normalize_size,
		};
		let entries = self.entries.read();
		let mut records: Vec<(&FileIdentity, &Fingerprint)> = entries
			.values()
			.filter(|entry| {
				entry.fingerprint.extractor_id == extractor_id
					&& entry.fingerprint.normalize_size == normalize_size
			})
			.map(|entry| (&entry.identity, entry.fingerprint.as_ref()))
			.collect();
		records.sort_by(|a, b| a.0.path.cmp(&b.0.path));

		let staging = path.with_extension("tmp");
		let file = File::create(&staging).map_err(io_error)?;
		let mut writer = BufWriter::new(file);
		bincode::serialize_into(&mut writer, &header)
			.and_then(|()| bincode::serialize_into(&mut writer, &records))
			.map_err(|err| EngineError::CacheEncoding(err.to_string()))?;
		writer.flush().map_err(io_error)?;
		drop(writer);
		fs::rename(&staging, path).map_err(io_error)?;

		info!(path = %path.display(), entries = records.len(), "Saved fingerprint cache");
		Ok(())
	}

	/// Read a cache written by [`save`](Self::save).
	///
	/// A missing file, or one written by another format version, extractor
	/// or normalization, gives an empty cache.
	///
	/// # Errors
	///
	/// [`EngineError::CacheIo`] if the file exists but cannot be read,
	/// [`EngineError::CacheEncoding`] if its contents are damaged.
	pub fn load(path: &Path, extractor_id: &str, normalize_size: u32) -> Result<Self> {
		let file = match File::open(path) {
			Ok(file) => file,
			Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::new()),
			Err(source) => {
				return Err(EngineError::CacheIo {
					path: path.to_path_buf(),
					source,
				})
			}
		};
		let mut reader = BufReader::new(file);

		let header: CacheHeader = bincode::deserialize_from(&mut reader)
			.map_err(|err| EngineError::CacheEncoding(err.to_string()))?;
		if header.version != CACHE_FORMAT_VERSION
			|| header.extractor_id != extractor_id
			|| header.normalize_size != normalize_size
		{
			info!(
				path = %path.display(),
				version = header.version,
				extractor = %header.extractor_id,
				"Ignoring fingerprint cache built with different settings"
			);
			return Ok(Self::new());
		}

		let records: Vec<(FileIdentity, Fingerprint)> = bincode::deserialize_from(&mut reader)
			.map_err(|err| EngineError::CacheEncoding(err.to_string()))?;

		let cache = Self::new();
		for (identity, fingerprint) in records {
			cache.insert(identity, Arc::new(fingerprint));
		}
		debug!(path = %path.display(), entries = cache.len(), "Loaded fingerprint cache");
		Ok(cache)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fingerprint::{FeatureVector, SampleVector};
	use crate::record::ContainerFormat;
	use std::time::{Duration, SystemTime};

	fn identity(name: &str, size: u64) -> FileIdentity {
		FileIdentity {
			path: PathBuf::from(name),
			size,
			modified: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
		}
	}

	fn fingerprint(extractor: &str) -> Arc<Fingerprint> {
		Arc::new(Fingerprint::from_samples(
			extractor,
			32,
			vec![SampleVector {
				offset: 0.5,
				features: FeatureVector::Binary([0xAB_u8; 8].iter().copied().collect()),
			}],
		))
	}

	#[test]
	fn test_get_requires_matching_identity() {
		let cache = FingerprintCache::new();
		cache.insert(identity("a.mp4", 10), fingerprint("x"));
		assert!(cache.get(&identity("a.mp4", 10)).is_some());
		assert!(cache.get(&identity("a.mp4", 11)).is_none());
		assert!(cache.get(&identity("b.mp4", 10)).is_none());
	}

	#[test]
	fn test_revalidate_drops_changed_files() {
		let cache = FingerprintCache::new();
		cache.insert(identity("a.mp4", 10), fingerprint("x"));
		cache.insert(identity("b.mp4", 10), fingerprint("x"));
		cache.insert(identity("elsewhere.mp4", 10), fingerprint("x"));

		let record = |identity: FileIdentity| MediaRecord {
			identity,
			duration_seconds: Some(10.0),
			resolution: None,
			bitrate: None,
			format: ContainerFormat::Mp4,
		};
		let records = vec![record(identity("a.mp4", 10)), record(identity("b.mp4", 99))];

		assert_eq!(cache.revalidate(&records), 1);
		assert_eq!(cache.len(), 2);
		assert!(cache.get(&identity("a.mp4", 10)).is_some());
	}

	#[test]
	fn test_save_and_load() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nested").join("cache.bin");

		let cache = FingerprintCache::new();
		cache.insert(identity("a.mp4", 10), fingerprint("x"));
		cache.insert(identity("b.mp4", 20), fingerprint("other"));
		cache.save(&path, "x", 32).unwrap();

		let loaded = FingerprintCache::load(&path, "x", 32).unwrap();
		assert_eq!(loaded.len(), 1);
		assert_eq!(loaded.get(&identity("a.mp4", 10)), Some(fingerprint("x")));

		// different extractor or normalization: start over
		assert!(FingerprintCache::load(&path, "y", 32).unwrap().is_empty());
		assert!(FingerprintCache::load(&path, "x", 16).unwrap().is_empty());
	}

	#[test]
	fn test_load_missing_and_damaged() {
		let dir = tempfile::tempdir().unwrap();
		let missing = dir.path().join("missing.bin");
		assert!(FingerprintCache::load(&missing, "x", 32).unwrap().is_empty());

		let damaged = dir.path().join("damaged.bin");
		fs::write(&damaged, b"\x01").unwrap();
		assert!(matches!(
			FingerprintCache::load(&damaged, "x", 32),
			Err(EngineError::CacheEncoding(_))
		));
	}
}
