//! Expand user-supplied paths into the video files to scan.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use vidupe_core::is_supported_video;
use walkdir::WalkDir;

use crate::error::{MediaError, Result};

/// Collect supported video files under `roots`.
///
/// Files given directly are kept if their extension is supported;
/// directories are walked recursively without following symlinks.
/// Unreadable entries inside a directory are logged and skipped. The
/// result is sorted and free of duplicates.
///
/// # Errors
///
/// [`MediaError::VideoNotFound`] if a root does not exist.
pub fn discover_videos<P: AsRef<Path>>(roots: &[P]) -> Result<Vec<PathBuf>> {
	let mut found = Vec::new();

	for root in roots {
		let root = root.as_ref();
		if root.is_file() {
			if is_supported_video(root) {
				found.push(root.to_path_buf());
			} else {
				debug!(path = %root.display(), "Ignoring unsupported file");
			}
			continue;
		}
		if !root.is_dir() {
			return Err(MediaError::VideoNotFound(root.to_path_buf()));
		}

		for entry in WalkDir::new(root).follow_links(false) {
			match entry {
				Ok(entry) if entry.file_type().is_file() && is_supported_video(entry.path()) => {
					found.push(entry.into_path());
				}
				Ok(_) => {}
				Err(err) => warn!(error = %err, "Skipping unreadable directory entry"),
			}
		}
	}

	found.sort();
	found.dedup();
	debug!(files = found.len(), "Discovered videos");
	Ok(found)
}
