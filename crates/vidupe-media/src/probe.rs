//! Container metadata through FFprobe.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::Deserialize;
use tracing::{debug, instrument};
use vidupe_core::{ContainerFormat, FileIdentity, MediaProbe, MediaRecord, ProbeError, Resolution};

use crate::error::{MediaError, Result};

// ============================================================================
// FFprobe Output
// ============================================================================

/// Raw FFprobe stream data.
#[derive(Debug, Deserialize)]
struct FfprobeStream {
	codec_type: String,
	#[serde(default)]
	duration: Option<String>,
	#[serde(default)]
	width: Option<u32>,
	#[serde(default)]
	height: Option<u32>,
	#[serde(default)]
	bit_rate: Option<String>,
}

/// Raw FFprobe format data.
#[derive(Debug, Deserialize)]
struct FfprobeFormat {
	#[serde(default)]
	duration: Option<String>,
	#[serde(default)]
	bit_rate: Option<String>,
}

/// Raw FFprobe output.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
	#[serde(default)]
	streams: Vec<FfprobeStream>,
	#[serde(default)]
	format: Option<FfprobeFormat>,
}

fn parse_number<T: std::str::FromStr>(value: Option<&String>) -> Option<T> {
	value.and_then(|v| v.trim().parse().ok())
}

/// Build a record from FFprobe JSON for the file at `identity`.
fn record_from_json(json: &str, identity: FileIdentity) -> Result<MediaRecord> {
	let probe: FfprobeOutput =
		serde_json::from_str(json).map_err(|e| MediaError::JsonParseError(e.to_string()))?;

	let video_stream = probe
		.streams
		.iter()
		.find(|s| s.codec_type == "video")
		.ok_or_else(|| MediaError::NoVideoStream(identity.path.clone()))?;

	// Stream duration first, then container duration
	let duration_seconds = parse_number::<f64>(video_stream.duration.as_ref())
		.or_else(|| parse_number(probe.format.as_ref().and_then(|f| f.duration.as_ref())))
		.filter(|d| d.is_finite() && *d > 0.0);

	let resolution = match (video_stream.width, video_stream.height) {
		(Some(width), Some(height)) if width > 0 && height > 0 => Some(Resolution::new(width, height)),
		_ => None,
	};

	let bitrate = parse_number::<u64>(probe.format.as_ref().and_then(|f| f.bit_rate.as_ref()))
		.or_else(|| parse_number(video_stream.bit_rate.as_ref()));

	let format = ContainerFormat::from_path(&identity.path);
	Ok(MediaRecord {
		identity,
		duration_seconds,
		resolution,
		bitrate,
		format,
	})
}

// ============================================================================
// Probe
// ============================================================================

/// Check if FFprobe is available in PATH.
///
/// # Errors
///
/// [`MediaError::FfprobeNotFound`] if `ffprobe -version` cannot be run.
#[instrument]
pub fn check_ffprobe() -> Result<()> {
	let status = Command::new("ffprobe")
		.arg("-version")
		.stdout(Stdio::null())
		.stderr(Stdio::null())
		.status();

	match status {
		Ok(status) if status.success() => Ok(()),
		_ => Err(MediaError::FfprobeNotFound),
	}
}

/// [`MediaProbe`] backed by the `ffprobe` executable.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
	program: PathBuf,
}

impl Default for FfprobeProbe {
	fn default() -> Self {
		Self {
			program: PathBuf::from("ffprobe"),
		}
	}
}

impl FfprobeProbe {
	/// Probe using `ffprobe` from PATH.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Use a specific `ffprobe` executable.
	#[must_use]
	pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
		self.program = program.into();
		self
	}

	/// Read the identity and container metadata of `video_path`.
	///
	/// # Errors
	///
	/// [`MediaError::VideoNotFound`] if the file cannot be stat'ed,
	/// [`MediaError::FfprobeNotFound`] if the tool cannot be started,
	/// [`MediaError::InvalidVideo`] if it rejects the file and
	/// [`MediaError::NoVideoStream`] for files without video.
	#[instrument(skip_all, fields(video = %video_path.display()))]
	pub fn probe_file(&self, video_path: &Path) -> Result<MediaRecord> {
		let identity = FileIdentity::from_path(video_path)
			.map_err(|_| MediaError::VideoNotFound(video_path.to_path_buf()))?;

		let output = Command::new(&self.program)
			.args([
				"-v",
				"error",
				"-show_entries",
				"stream=codec_type,duration,width,height,bit_rate",
				"-show_entries",
				"format=duration,bit_rate",
				"-of",
				"json",
			])
			.arg(video_path)
			.stdin(Stdio::null())
			.output()
			.map_err(|_| MediaError::FfprobeNotFound)?;

		if !output.status.success() {
			debug!(
				exit_code = ?output.status.code(),
				stderr = %String::from_utf8_lossy(&output.stderr).trim(),
				"FFprobe rejected file"
			);
			return Err(MediaError::InvalidVideo(video_path.to_path_buf()));
		}

		let record = record_from_json(&String::from_utf8_lossy(&output.stdout), identity)?;
		debug!(
			duration = ?record.duration_seconds,
			resolution = ?record.resolution,
			"Probed video"
		);
		Ok(record)
	}
}

impl MediaProbe for FfprobeProbe {
	fn probe(&self, path: &Path) -> std::result::Result<MediaRecord, ProbeError> {
		self.probe_file(path).map_err(ProbeError::from)
	}
}
