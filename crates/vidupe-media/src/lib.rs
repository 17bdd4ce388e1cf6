//! # Vidupe Media
//!
//! The outside world for the detection engine: FFmpeg and FFprobe as
//! external processes, plus directory discovery.
//!
//! - [`FfprobeProbe`] implements [`vidupe_core::MediaProbe`]
//! - [`FfmpegDecoder`] implements [`vidupe_core::FrameDecoder`]
//! - [`discover_videos`] expands directories into supported video files
//!
//! Both tools must be on `PATH` (or configured explicitly). Use
//! [`check_ffmpeg`] and [`check_ffprobe`] to fail early with a clear
//! message.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod decode;
pub mod discover;
pub mod error;
pub mod probe;

pub use decode::{check_ffmpeg, FfmpegDecoder};
pub use discover::discover_videos;
pub use error::{MediaError, Result};
pub use probe::{check_ffprobe, FfprobeProbe};
