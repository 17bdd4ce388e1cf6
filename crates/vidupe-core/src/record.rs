//! Media Records
//!
//! One [`MediaRecord`] per video file: a stable identity plus the cheap
//! container metadata the prefilter works from. Records are immutable once
//! probed; a changed file gets a new identity and therefore a new record.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::ProbeError;

// ============================================================================
// Identity
// ============================================================================

/// Stable identity of a file on disk: path, size and modification time.
///
/// Two identities are equal only if all three match, which is what cache
/// revalidation relies on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileIdentity {
	/// Absolute or caller-supplied path
	pub path: PathBuf,
	/// Size in bytes
	pub size: u64,
	/// Last modification time
	pub modified: SystemTime,
}

impl FileIdentity {
	/// Read the identity of `path` from the filesystem.
	///
	/// # Errors
	///
	/// Returns the underlying I/O error if the file cannot be stat'ed.
	pub fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
		let path = path.as_ref();
		let metadata = std::fs::metadata(path)?;
		Ok(Self {
			path: path.to_path_buf(),
			size: metadata.len(),
			modified: metadata.modified()?,
		})
	}
}

// ============================================================================
// Resolution
// ============================================================================

/// Frame dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
	/// Width in pixels
	pub width: u32,
	/// Height in pixels
	pub height: u32,
}

impl Resolution {
	/// Create a resolution.
	#[must_use]
	pub const fn new(width: u32, height: u32) -> Self {
		Self { width, height }
	}

	/// Width / height, or `None` for degenerate dimensions.
	#[must_use]
	pub fn aspect_ratio(&self) -> Option<f64> {
		if self.width == 0 || self.height == 0 {
			None
		} else {
			Some(f64::from(self.width) / f64::from(self.height))
		}
	}

	/// Total pixel count.
	#[must_use]
	pub const fn pixels(&self) -> u64 {
		self.width as u64 * self.height as u64
	}
}

impl fmt::Display for Resolution {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}x{}", self.width, self.height)
	}
}

// ============================================================================
// Container Format
// ============================================================================

/// Extensions accepted at the scanner boundary (lowercase, no dot).
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
	"mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v", "3gp", "asf", "rm", "rmvb",
];

/// Whether `path` has one of the [`SUPPORTED_EXTENSIONS`] (case-insensitive).
#[must_use]
pub fn is_supported_video(path: &Path) -> bool {
	path.extension()
		.and_then(|ext| ext.to_str())
		.is_some_and(|ext| {
			let ext = ext.to_ascii_lowercase();
			SUPPORTED_EXTENSIONS.contains(&ext.as_str())
		})
}

/// Container format, derived from the file extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ContainerFormat {
	/// MPEG-4 Part 14
	Mp4,
	/// Audio Video Interleave
	Avi,
	/// Matroska
	Mkv,
	/// QuickTime
	Mov,
	/// Windows Media Video
	Wmv,
	/// Flash Video
	Flv,
	/// WebM
	Webm,
	/// iTunes MPEG-4
	M4v,
	/// 3GPP
	ThreeGp,
	/// Advanced Systems Format
	Asf,
	/// RealMedia
	Rm,
	/// RealMedia variable bitrate
	Rmvb,
	/// Anything else (lowercased extension, empty if none)
	Other(String),
	/// Not known
	#[default]
	Unknown,
}

impl ContainerFormat {
	/// Map a path's extension to a container format.
	#[must_use]
	pub fn from_path(path: &Path) -> Self {
		let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
			return Self::Unknown;
		};
		match ext.to_ascii_lowercase().as_str() {
			"mp4" => Self::Mp4,
			"avi" => Self::Avi,
			"mkv" => Self::Mkv,
			"mov" => Self::Mov,
			"wmv" => Self::Wmv,
			"flv" => Self::Flv,
			"webm" => Self::Webm,
			"m4v" => Self::M4v,
			"3gp" => Self::ThreeGp,
			"asf" => Self::Asf,
			"rm" => Self::Rm,
			"rmvb" => Self::Rmvb,
			other => Self::Other(other.to_string()),
		}
	}
}

// ============================================================================
// Media Record
// ============================================================================

/// Metadata for one video file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
	/// Path + size + mtime
	pub identity: FileIdentity,
	/// Duration in seconds, if the container reports one
	pub duration_seconds: Option<f64>,
	/// Frame dimensions of the primary video stream
	pub resolution: Option<Resolution>,
	/// Overall bitrate in bits per second
	pub bitrate: Option<u64>,
	/// Container format
	pub format: ContainerFormat,
}

impl MediaRecord {
	/// Path of the underlying file.
	#[inline]
	#[must_use]
	pub fn path(&self) -> &Path {
		&self.identity.path
	}

	/// File size in bytes.
	#[inline]
	#[must_use]
	pub const fn size(&self) -> u64 {
		self.identity.size
	}

	/// Duration if it is known and positive.
	#[inline]
	#[must_use]
	pub fn known_duration(&self) -> Option<f64> {
		self.duration_seconds
			.filter(|duration| duration.is_finite() && *duration > 0.0)
	}

	/// Aspect ratio if the resolution is known.
	#[inline]
	#[must_use]
	pub fn aspect_ratio(&self) -> Option<f64> {
		self.resolution.and_then(|resolution| resolution.aspect_ratio())
	}
}

/// Metadata collaborator: turns a path into a [`MediaRecord`].
///
/// Implementations must be cheap relative to frame decoding; the pipeline
/// probes every input file before any pair is considered.
pub trait MediaProbe: Send + Sync {
	/// Probe one file.
	///
	/// # Errors
	///
	/// Returns [`ProbeError`] when the file is unreadable or carries no
	/// usable video metadata. The pipeline reports such files as
	/// `MetadataUnavailable` and continues.
	fn probe(&self, path: &Path) -> Result<MediaRecord, ProbeError>;
}
