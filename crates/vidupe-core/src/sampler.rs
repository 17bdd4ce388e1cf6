//! Frame Sampler
//!
//! Chooses where to look inside a video and pulls decoded frames from a
//! [`FrameDecoder`] one at a time.
//!
//! For `n` samples the offsets are `(i + 0.5) / n` of the duration, so a
//! trimmed copy of a file still lines up sample-for-sample after a small
//! shift. A frame that is near-uniform (black, fades, solid cards) is
//! replaced once by the frame halfway to the next offset; if that one is
//! uniform too, the position is dropped.

use std::iter::FusedIterator;
use std::path::Path;

use image::imageops::FilterType;
use image::DynamicImage;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::DecodeError;
use crate::record::MediaRecord;

/// Side of the thumbnail used by the uniformity check.
const VARIANCE_PROBE_SIZE: u32 = 16;

/// Decoding collaborator: seek to a timestamp and return one frame.
pub trait FrameDecoder: Send + Sync {
	/// Decode the frame shown at `timestamp_seconds`.
	///
	/// # Errors
	///
	/// [`DecodeError::Corrupt`] when the region around the timestamp is
	/// damaged (the sampler skips that offset), [`DecodeError::Unsupported`]
	/// when nothing in the file can be decoded (the sampler stops).
	fn decode_frame(&self, path: &Path, timestamp_seconds: f64) -> Result<DynamicImage, DecodeError>;
}

/// One decoded sample.
#[derive(Debug, Clone)]
pub struct SampledFrame {
	/// Position as a fraction of the duration
	pub offset: f64,
	/// Position in seconds
	pub timestamp_seconds: f64,
	/// Decoded frame
	pub image: DynamicImage,
}

/// What happened to the planned offsets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplingReport {
	/// Offsets planned
	pub requested: usize,
	/// Offsets where the decoder returned a frame
	pub decoded: usize,
	/// Offsets where the decoder failed
	pub missing: usize,
	/// Uniform frames replaced by a neighbour
	pub substituted: usize,
	/// Uniform frames with no usable neighbour
	pub dropped_uniform: usize,
}

/// Evenly spaced fractional offsets `(i + 0.5) / n`.
#[must_use]
pub fn sample_offsets(count: usize) -> Vec<f64> {
	let n = count as f64;
	(0..count).map(|i| (i as f64 + 0.5) / n).collect()
}

/// Luma variance of a small thumbnail of `image`.
#[must_use]
pub fn luma_variance(image: &DynamicImage) -> f64 {
	let thumbnail = image
		.resize_exact(VARIANCE_PROBE_SIZE, VARIANCE_PROBE_SIZE, FilterType::Triangle)
		.to_luma8();
	let pixels = thumbnail.as_raw();
	if pixels.is_empty() {
		return 0.0;
	}
	let n = pixels.len() as f64;
	let mean = pixels.iter().map(|&p| f64::from(p)).sum::<f64>() / n;
	pixels
		.iter()
		.map(|&p| {
			let delta = f64::from(p) - mean;
			delta * delta
		})
		.sum::<f64>()
		/ n
}

/// Lazy, finite, single-pass sequence of frames from one file.
///
/// Frames are yielded in increasing offset order. Read [`report`] after
/// the iterator is exhausted to learn how many offsets succeeded.
///
/// [`report`]: FrameSampler::report
pub struct FrameSampler<'a> {
	decoder: &'a dyn FrameDecoder,
	path: &'a Path,
	duration: f64,
	offsets: Vec<f64>,
	next: usize,
	uniform_variance: f64,
	report: SamplingReport,
}

impl std::fmt::Debug for FrameSampler<'_> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FrameSampler")
			.field("path", &self.path)
			.field("duration", &self.duration)
			.field("next", &self.next)
			.field("report", &self.report)
			.finish_non_exhaustive()
	}
}

impl<'a> FrameSampler<'a> {
	/// Plan samples for `record` at the density in `config`.
	///
	/// A record without a known duration gets no offsets at all.
	#[must_use]
	pub fn new(record: &'a MediaRecord, decoder: &'a dyn FrameDecoder, config: &EngineConfig) -> Self {
		let (duration, offsets) = record.known_duration().map_or((0.0, Vec::new()), |duration| {
			(duration, sample_offsets(config.sample_count(duration)))
		});
		Self {
			decoder,
			path: record.path(),
			duration,
			report: SamplingReport {
				requested: offsets.len(),
				..SamplingReport::default()
			},
			offsets,
			next: 0,
			uniform_variance: config.uniform_variance,
		}
	}

	/// Counters so far.
	#[must_use]
	pub const fn report(&self) -> &SamplingReport {
		&self.report
	}

	/// Offset probed when the frame at position `index` is uniform.
	fn substitute_offset(&self, index: usize) -> f64 {
		let n = self.offsets.len() as f64;
		if index + 1 < self.offsets.len() {
			(index as f64 + 1.0) / n
		} else {
			(n - 0.25) / n
		}
	}

	fn decode(&self, offset: f64) -> Result<SampledFrame, DecodeError> {
		let timestamp_seconds = offset * self.duration;
		self.decoder
			.decode_frame(self.path, timestamp_seconds)
			.map(|image| SampledFrame {
				offset,
				timestamp_seconds,
				image,
			})
	}

	fn is_uniform(&self, frame: &SampledFrame) -> bool {
		luma_variance(&frame.image) < self.uniform_variance
	}

	fn give_up(&mut self, reason: &DecodeError) {
		let remaining = self.offsets.len() - self.next;
		debug!(
			path = %self.path.display(),
			remaining,
			error = %reason,
			"Decoder cannot handle file, abandoning remaining offsets"
		);
		self.report.missing += remaining;
		self.next = self.offsets.len();
	}
}

impl Iterator for FrameSampler<'_> {
	type Item = SampledFrame;

	fn next(&mut self) -> Option<Self::Item> {
		while self.next < self.offsets.len() {
			let index = self.next;
			let offset = self.offsets[index];

			let frame = match self.decode(offset) {
				Ok(frame) => frame,
				Err(err @ DecodeError::Unsupported(_)) => {
					self.give_up(&err);
					return None;
				}
				Err(err) => {
					debug!(path = %self.path.display(), offset, error = %err, "Skipping corrupt offset");
					self.report.missing += 1;
					self.next += 1;
					continue;
				}
			};
			self.next += 1;
			self.report.decoded += 1;

			if !self.is_uniform(&frame) {
				return Some(frame);
			}

			match self.decode(self.substitute_offset(index)) {
				Ok(substitute) if !self.is_uniform(&substitute) => {
					self.report.substituted += 1;
					return Some(substitute);
				}
				_ => self.report.dropped_uniform += 1,
			}
		}
		None
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		(0, Some(self.offsets.len() - self.next))
	}
}

impl FusedIterator for FrameSampler<'_> {}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::record::{ContainerFormat, FileIdentity};
	use image::{GrayImage, Luma};
	use std::path::PathBuf;
	use std::sync::Mutex;
	use std::time::SystemTime;

	/// Decoder driven by a closure over the timestamp.
	struct ScriptedDecoder<F> {
		script: F,
		calls: Mutex<Vec<f64>>,
	}

	impl<F> ScriptedDecoder<F>
	where
		F: Fn(f64) -> Result<DynamicImage, DecodeError> + Send + Sync,
	{
		fn new(script: F) -> Self {
			Self {
				script,
				calls: Mutex::new(Vec::new()),
			}
		}
	}

	impl<F> FrameDecoder for ScriptedDecoder<F>
	where
		F: Fn(f64) -> Result<DynamicImage, DecodeError> + Send + Sync,
	{
		fn decode_frame(&self, _path: &Path, timestamp_seconds: f64) -> Result<DynamicImage, DecodeError> {
			self.calls.lock().unwrap().push(timestamp_seconds);
			(self.script)(timestamp_seconds)
		}
	}

	fn textured() -> DynamicImage {
		DynamicImage::ImageLuma8(GrayImage::from_fn(32, 32, |x, y| {
			Luma([if (x / 4 + y / 4) % 2 == 0 { 30 } else { 220 }])
		}))
	}

	fn black() -> DynamicImage {
		DynamicImage::ImageLuma8(GrayImage::new(32, 32))
	}

	fn record(duration: Option<f64>) -> MediaRecord {
		MediaRecord {
			identity: FileIdentity {
				path: PathBuf::from("clip.mp4"),
				size: 1,
				modified: SystemTime::UNIX_EPOCH,
			},
			duration_seconds: duration,
			resolution: None,
			bitrate: None,
			format: ContainerFormat::Mp4,
		}
	}

	#[test]
	fn test_offsets_evenly_spaced() {
		let offsets = sample_offsets(10);
		assert_eq!(offsets.len(), 10);
		assert!((offsets[0] - 0.05).abs() < 1e-12);
		assert!((offsets[9] - 0.95).abs() < 1e-12);
		assert!(sample_offsets(0).is_empty());
	}

	#[test]
	fn test_samples_all_offsets() {
		let decoder = ScriptedDecoder::new(|_| Ok(textured()));
		let record = record(Some(60.0));
		let config = EngineConfig::default();
		let mut sampler = FrameSampler::new(&record, &decoder, &config);
		let frames: Vec<SampledFrame> = sampler.by_ref().collect();

		assert_eq!(frames.len(), 12);
		assert!((frames[0].timestamp_seconds - 2.5).abs() < 1e-9);
		assert!(frames.windows(2).all(|w| w[0].offset < w[1].offset));
		assert_eq!(sampler.report().decoded, 12);
		assert_eq!(sampler.report().missing, 0);
		assert!(sampler.next().is_none());
	}

	#[test]
	fn test_uniform_frame_substituted() {
		// black opening: first 4 seconds
		let decoder = ScriptedDecoder::new(|t| Ok(if t < 4.0 { black() } else { textured() }));
		let record = record(Some(60.0));
		let config = EngineConfig::default();
		let mut sampler = FrameSampler::new(&record, &decoder, &config);
		let frames: Vec<SampledFrame> = sampler.by_ref().collect();

		assert_eq!(frames.len(), 12);
		// 2.5s was black, replaced by 5.0s
		assert!((frames[0].timestamp_seconds - 5.0).abs() < 1e-9);
		assert!(frames[0].offset < frames[1].offset);
		assert_eq!(sampler.report().substituted, 1);
	}

	#[test]
	fn test_uniform_neighbour_dropped() {
		let decoder = ScriptedDecoder::new(|t| Ok(if t < 6.0 { black() } else { textured() }));
		let record = record(Some(60.0));
		let config = EngineConfig::default();
		let mut sampler = FrameSampler::new(&record, &decoder, &config);
		let frames: Vec<SampledFrame> = sampler.by_ref().collect();

		assert_eq!(frames.len(), 11);
		assert_eq!(sampler.report().dropped_uniform, 1);
		assert_eq!(sampler.report().decoded, 12);
	}

	#[test]
	fn test_corrupt_offsets_are_missing() {
		let decoder = ScriptedDecoder::new(|t| {
			if t > 30.0 {
				Err(DecodeError::Corrupt {
					timestamp: t,
					reason: "bad packet".to_string(),
				})
			} else {
				Ok(textured())
			}
		});
		let record = record(Some(60.0));
		let config = EngineConfig::default();
		let mut sampler = FrameSampler::new(&record, &decoder, &config);
		let count = sampler.by_ref().count();

		assert_eq!(count, 6);
		assert_eq!(sampler.report().missing, 6);
		assert_eq!(decoder.calls.lock().unwrap().len(), 12);
	}

	#[test]
	fn test_unsupported_stops_early() {
		let decoder = ScriptedDecoder::new(|_| Err(DecodeError::Unsupported("no codec".to_string())));
		let record = record(Some(60.0));
		let config = EngineConfig::default();
		let mut sampler = FrameSampler::new(&record, &decoder, &config);

		assert!(sampler.next().is_none());
		assert_eq!(sampler.report().missing, 12);
		assert_eq!(decoder.calls.lock().unwrap().len(), 1);
	}

	#[test]
	fn test_unknown_duration_plans_nothing() {
		let decoder = ScriptedDecoder::new(|_| Ok(textured()));
		let record = record(None);
		let config = EngineConfig::default();
		let mut sampler = FrameSampler::new(&record, &decoder, &config);

		assert!(sampler.next().is_none());
		assert_eq!(sampler.report().requested, 0);
		assert!(decoder.calls.lock().unwrap().is_empty());
	}

	#[test]
	fn test_luma_variance() {
		assert!(luma_variance(&black()) < 1.0);
		assert!(luma_variance(&textured()) > 1000.0);
	}
}
