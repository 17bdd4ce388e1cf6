//! Synthetic video library for end-to-end tests.
//!
//! Every clip is a sequence of static scenes, each an 8x8 grid of random
//! grey blocks seeded by the clip's content seed and the scene index. A
//! re-encode renders the same scenes at another resolution with a little
//! deterministic noise; a trim shifts where the clip starts in the source
//! timeline.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use image::{DynamicImage, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vidupe_core::{
	CancelToken, ContainerFormat, DecodeError, FileIdentity, MediaProbe, MediaRecord, ProbeError,
	Resolution,
};

/// Length of one static scene in the source timeline.
pub const SCENE_SECONDS: f64 = 20.0;

const GRID: u32 = 8;

/// Description of one synthetic file.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
	pub seed: u64,
	pub duration: f64,
	/// Where this clip starts in the source timeline
	pub start: f64,
	pub width: u32,
	pub height: u32,
	pub noise: bool,
	/// Decoding fails from this fraction of the duration onwards
	pub corrupt_from: Option<f64>,
	pub size: u64,
	pub modified_secs: u64,
}

impl Clip {
	/// Original at 128x96.
	pub fn source(seed: u64, duration: f64) -> Self {
		Self {
			seed,
			duration,
			start: 0.0,
			width: 128,
			height: 96,
			noise: false,
			corrupt_from: None,
			size: 48_000_000,
			modified_secs: 1_700_000_000,
		}
	}

	/// Same content at half resolution, smaller file, slightly longer.
	pub fn reencoded(mut self) -> Self {
		self.width /= 2;
		self.height /= 2;
		self.noise = true;
		self.size /= 3;
		self.duration += 0.5;
		self.modified_secs += 86_400;
		self
	}

	/// Drop the first `seconds` of the clip.
	pub fn trimmed(mut self, seconds: f64) -> Self {
		self.start += seconds;
		self.duration -= seconds;
		self
	}

	/// Make everything from `fraction` of the duration onwards undecodable.
	pub fn corrupt_from(mut self, fraction: f64) -> Self {
		self.corrupt_from = Some(fraction);
		self
	}

	fn scene_grid(&self, scene: u64) -> [[u8; GRID as usize]; GRID as usize] {
		let mut rng = StdRng::seed_from_u64(self.seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ scene);
		let mut grid = [[0_u8; GRID as usize]; GRID as usize];
		for row in &mut grid {
			for cell in row.iter_mut() {
				*cell = rng.gen_range(16..240);
			}
		}
		grid
	}

	/// Render the frame shown at `timestamp` seconds into this clip.
	pub fn render(&self, timestamp: f64) -> DynamicImage {
		let scene = ((timestamp + self.start) / SCENE_SECONDS).floor().max(0.0) as u64;
		let grid = self.scene_grid(scene);
		let (width, height) = (self.width, self.height);
		let noise = self.noise;

		DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
			let base = i16::from(grid[(y * GRID / height) as usize][(x * GRID / width) as usize]);
			let jitter = if noise {
				((x * 31 + y * 17 + scene as u32 * 7) % 7) as i16 - 3
			} else {
				0
			};
			let value = (base + jitter).clamp(0, 255) as u8;
			image::Rgb([value, value, value])
		}))
	}
}

/// In-memory stand-in for a directory of videos plus ffprobe and ffmpeg.
#[derive(Debug, Default)]
pub struct SyntheticLibrary {
	clips: BTreeMap<PathBuf, Clip>,
	decodes: AtomicUsize,
	cancel_after: Option<(usize, CancelToken)>,
}

impl SyntheticLibrary {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register `clip` under `name` and return its path.
	pub fn add(&mut self, name: &str, clip: Clip) -> PathBuf {
		let path = PathBuf::from("/library").join(name);
		let _ = self.clips.insert(path.clone(), clip);
		path
	}

	/// Trip `token` once this many frames have been decoded.
	pub fn cancel_after(mut self, decodes: usize, token: CancelToken) -> Self {
		self.cancel_after = Some((decodes, token));
		self
	}

	/// Move a file's modification time forward, as an edit in place would.
	pub fn touch(&mut self, path: &Path) {
		if let Some(clip) = self.clips.get_mut(path) {
			clip.modified_secs += 60;
		}
	}

	pub fn paths(&self) -> Vec<PathBuf> {
		self.clips.keys().cloned().collect()
	}

	pub fn decode_count(&self) -> usize {
		self.decodes.load(Ordering::SeqCst)
	}

	pub fn clip(&self, path: &Path) -> &Clip {
		&self.clips[path]
	}
}

impl MediaProbe for SyntheticLibrary {
	fn probe(&self, path: &Path) -> Result<MediaRecord, ProbeError> {
		let clip = self
			.clips
			.get(path)
			.ok_or_else(|| ProbeError::Unreadable(format!("{} does not exist", path.display())))?;
		Ok(MediaRecord {
			identity: FileIdentity {
				path: path.to_path_buf(),
				size: clip.size,
				modified: SystemTime::UNIX_EPOCH + Duration::from_secs(clip.modified_secs),
			},
			duration_seconds: Some(clip.duration),
			resolution: Some(Resolution::new(clip.width, clip.height)),
			bitrate: Some(clip.size * 8 / clip.duration.max(1.0) as u64),
			format: ContainerFormat::from_path(path),
		})
	}
}

impl vidupe_core::FrameDecoder for SyntheticLibrary {
	fn decode_frame(&self, path: &Path, timestamp_seconds: f64) -> Result<DynamicImage, DecodeError> {
		let decoded = self.decodes.fetch_add(1, Ordering::SeqCst) + 1;
		if let Some((limit, token)) = &self.cancel_after {
			if decoded >= *limit {
				token.cancel();
			}
		}

		let clip = self
			.clips
			.get(path)
			.ok_or_else(|| DecodeError::Unsupported(format!("{} does not exist", path.display())))?;
		if let Some(fraction) = clip.corrupt_from {
			if timestamp_seconds >= fraction * clip.duration {
				return Err(DecodeError::Corrupt {
					timestamp: timestamp_seconds,
					reason: "invalid NAL unit".to_string(),
				});
			}
		}
		Ok(clip.render(timestamp_seconds))
	}
}
