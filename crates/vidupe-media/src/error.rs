//! Error types for media operations.

use std::path::PathBuf;

use vidupe_core::{DecodeError, ProbeError};

/// Errors that can occur while probing, decoding or discovering videos.
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
	/// FFmpeg is not installed or not found in PATH.
	#[error("FFmpeg not found. Please install FFmpeg: https://ffmpeg.org/download.html")]
	FfmpegNotFound,

	/// FFprobe is not installed or not found in PATH.
	#[error("FFprobe not found. Please install FFmpeg: https://ffmpeg.org/download.html")]
	FfprobeNotFound,

	/// Video file not found.
	#[error("Video file not found: {0}")]
	VideoNotFound(PathBuf),

	/// Invalid video file (corrupt or unsupported format).
	#[error("Invalid or unsupported video format: {0}")]
	InvalidVideo(PathBuf),

	/// FFmpeg or FFprobe exited with an error.
	#[error("FFmpeg failed: {message}")]
	FfmpegError {
		/// Error message from FFmpeg
		message: String,
		/// Exit code if available
		exit_code: Option<i32>,
	},

	/// Failed to extract frame at timestamp.
	#[error("Failed to extract frame at {timestamp}s: {reason}")]
	FrameExtractionFailed {
		/// Timestamp in seconds
		timestamp: f64,
		/// Reason for failure
		reason: String,
	},

	/// Video has no video streams.
	#[error("Video has no video streams: {0}")]
	NoVideoStream(PathBuf),

	/// Failed to decode the extracted image.
	#[error("Failed to read image: {0}")]
	ImageReadError(#[from] image::ImageError),

	/// I/O error.
	#[error("I/O error: {0}")]
	IoError(#[from] std::io::Error),

	/// JSON parsing error.
	#[error("Failed to parse FFprobe output: {0}")]
	JsonParseError(String),
}

impl MediaError {
	/// Check if this error is due to a missing external tool.
	#[must_use]
	pub const fn is_missing_dependency(&self) -> bool {
		matches!(self, Self::FfmpegNotFound | Self::FfprobeNotFound)
	}

	/// Check if the error only affects one frame, so other timestamps of
	/// the same file may still decode.
	#[must_use]
	pub const fn is_recoverable(&self) -> bool {
		matches!(
			self,
			Self::FrameExtractionFailed { .. } | Self::ImageReadError(_) | Self::FfmpegError { .. }
		)
	}

	/// Convert into the engine's decode error for a frame at `timestamp`.
	#[must_use]
	pub fn into_decode_error(self, timestamp: f64) -> DecodeError {
		if self.is_recoverable() {
			DecodeError::Corrupt {
				timestamp,
				reason: self.to_string(),
			}
		} else {
			DecodeError::Unsupported(self.to_string())
		}
	}
}

impl From<MediaError> for ProbeError {
	fn from(err: MediaError) -> Self {
		match err {
			MediaError::VideoNotFound(_) | MediaError::IoError(_) | MediaError::FfprobeNotFound => {
				Self::Unreadable(err.to_string())
			}
			other => Self::InvalidContainer(other.to_string()),
		}
	}
}

/// Result type alias for media operations.
pub type Result<T> = std::result::Result<T, MediaError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_missing_dependency() {
		assert!(MediaError::FfmpegNotFound.is_missing_dependency());
		assert!(MediaError::FfprobeNotFound.is_missing_dependency());
		assert!(!MediaError::NoVideoStream(PathBuf::from("a.mp4")).is_missing_dependency());
	}

	#[test]
	fn test_decode_error_mapping() {
		let per_frame = MediaError::FrameExtractionFailed {
			timestamp: 3.0,
			reason: "empty output".to_string(),
		};
		assert!(matches!(
			per_frame.into_decode_error(3.0),
			DecodeError::Corrupt { .. }
		));

		let whole_file = MediaError::InvalidVideo(PathBuf::from("a.mp4"));
		assert!(matches!(
			whole_file.into_decode_error(3.0),
			DecodeError::Unsupported(_)
		));
		assert!(matches!(
			MediaError::FfmpegNotFound.into_decode_error(0.0),
			DecodeError::Unsupported(_)
		));
	}

	#[test]
	fn test_probe_error_mapping() {
		let missing: ProbeError = MediaError::VideoNotFound(PathBuf::from("a.mp4")).into();
		assert!(matches!(missing, ProbeError::Unreadable(_)));
		let no_stream: ProbeError = MediaError::NoVideoStream(PathBuf::from("a.mp3")).into();
		assert!(matches!(no_stream, ProbeError::InvalidContainer(_)));
	}
}
