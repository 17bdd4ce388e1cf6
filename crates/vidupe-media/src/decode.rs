//! Frame decoding through the FFmpeg CLI.
//!
//! Each request spawns one `ffmpeg` process that seeks to the timestamp and
//! writes a single PNG frame to stdout, so nothing touches the disk.
//! Input seeking (`-ss` before `-i`) keeps a request cheap even deep into a
//! long file.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use image::DynamicImage;
use tracing::{debug, instrument};
use vidupe_core::{DecodeError, FrameDecoder};

use crate::error::{MediaError, Result};

/// FFmpeg messages meaning no timestamp of the file will ever decode.
const FATAL_MESSAGES: &[&str] = &[
	"Invalid data found when processing input",
	"could not find codec parameters",
	"Decoder not found",
	"does not contain any stream",
	"moov atom not found",
];

/// Check if FFmpeg is available in PATH.
///
/// # Errors
///
/// [`MediaError::FfmpegNotFound`] if `ffmpeg -version` cannot be run.
#[instrument]
pub fn check_ffmpeg() -> Result<()> {
	let status = Command::new("ffmpeg")
		.arg("-version")
		.stdout(Stdio::null())
		.stderr(Stdio::null())
		.status();

	match status {
		Ok(status) if status.success() => Ok(()),
		_ => Err(MediaError::FfmpegNotFound),
	}
}

/// [`FrameDecoder`] backed by the `ffmpeg` executable.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
	program: PathBuf,
	max_width: Option<u32>,
}

impl Default for FfmpegDecoder {
	fn default() -> Self {
		Self {
			program: PathBuf::from("ffmpeg"),
			max_width: Some(320),
		}
	}
}

impl FfmpegDecoder {
	/// Decoder using `ffmpeg` from PATH, downscaling frames to 320px wide.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Use a specific `ffmpeg` executable.
	#[must_use]
	pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
		self.program = program.into();
		self
	}

	/// Downscale inside FFmpeg to at most this width (`None` keeps the
	/// source size). Fingerprints are computed on tiny frames anyway, so
	/// this only saves pipe bandwidth and PNG work.
	#[must_use]
	pub const fn with_max_width(mut self, max_width: Option<u32>) -> Self {
		self.max_width = max_width;
		self
	}

	fn command(&self, video_path: &Path, timestamp_seconds: f64) -> Command {
		let mut command = Command::new(&self.program);
		let _ = command
			.args(["-v", "error", "-ss", &format!("{timestamp_seconds:.3}"), "-i"])
			.arg(video_path)
			.args(["-frames:v", "1"]);
		if let Some(width) = self.max_width {
			let _ = command.args(["-vf", &format!("scale='min({width},iw)':-2")]);
		}
		let _ = command
			.args(["-f", "image2pipe", "-vcodec", "png", "-"])
			.stdin(Stdio::null());
		command
	}

	/// Extract the frame shown at `timestamp_seconds`.
	///
	/// # Errors
	///
	/// [`MediaError::VideoNotFound`] and [`MediaError::FfmpegNotFound`] for
	/// missing inputs, [`MediaError::InvalidVideo`] when FFmpeg cannot read
	/// the file at all, [`MediaError::FrameExtractionFailed`] or
	/// [`MediaError::ImageReadError`] when only this frame failed.
	#[instrument(skip_all, fields(video = %video_path.display(), timestamp = timestamp_seconds))]
	pub fn extract_frame(&self, video_path: &Path, timestamp_seconds: f64) -> Result<DynamicImage> {
		if !video_path.exists() {
			return Err(MediaError::VideoNotFound(video_path.to_path_buf()));
		}

		let output = self
			.command(video_path, timestamp_seconds)
			.output()
			.map_err(|err| match err.kind() {
				std::io::ErrorKind::NotFound => MediaError::FfmpegNotFound,
				_ => MediaError::IoError(err),
			})?;

		if !output.status.success() {
			let stderr = String::from_utf8_lossy(&output.stderr);
			if FATAL_MESSAGES.iter().any(|message| stderr.contains(message)) {
				return Err(MediaError::InvalidVideo(video_path.to_path_buf()));
			}
			return Err(MediaError::FfmpegError {
				message: stderr.trim().to_string(),
				exit_code: output.status.code(),
			});
		}

		if output.stdout.is_empty() {
			// Seeking past the last frame succeeds but writes nothing
			return Err(MediaError::FrameExtractionFailed {
				timestamp: timestamp_seconds,
				reason: "no frame at timestamp".to_string(),
			});
		}

		let image = image::load_from_memory(&output.stdout)?;
		debug!(width = image.width(), height = image.height(), "Decoded frame");
		Ok(image)
	}
}

impl FrameDecoder for FfmpegDecoder {
	fn decode_frame(
		&self,
		path: &Path,
		timestamp_seconds: f64,
	) -> std::result::Result<DynamicImage, DecodeError> {
		self.extract_frame(path, timestamp_seconds)
			.map_err(|err| err.into_decode_error(timestamp_seconds))
	}
}
