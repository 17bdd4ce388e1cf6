//! Rendering run results for humans and machines.

use std::io::{self, Write};

use vidupe_core::{DuplicateGroup, MediaRecord, RunResult};

/// `1536` → `1.5 KiB`
pub fn format_bytes(bytes: u64) -> String {
	const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
	let mut value = bytes as f64;
	let mut unit = 0;
	while value >= 1024.0 && unit < UNITS.len() - 1 {
		value /= 1024.0;
		unit += 1;
	}
	if unit == 0 {
		format!("{bytes} B")
	} else {
		format!("{value:.1} {}", UNITS[unit])
	}
}

/// `3725.0` → `1:02:05`
pub fn format_duration(seconds: f64) -> String {
	let total = seconds.max(0.0).round() as u64;
	let (hours, minutes, secs) = (total / 3600, total / 60 % 60, total % 60);
	if hours > 0 {
		format!("{hours}:{minutes:02}:{secs:02}")
	} else {
		format!("{minutes}:{secs:02}")
	}
}

fn describe(record: &MediaRecord) -> String {
	let resolution = record
		.resolution
		.map_or_else(|| "?".to_string(), |r| r.to_string());
	let duration = record
		.known_duration()
		.map_or_else(|| "?".to_string(), format_duration);
	format!("{resolution}, {duration}, {}", format_bytes(record.size()))
}

/// Bytes freed by keeping only the best member of each group.
pub fn reclaimable_bytes(groups: &[DuplicateGroup]) -> u64 {
	groups
		.iter()
		.flat_map(|group| group.members.iter().skip(1))
		.map(MediaRecord::size)
		.sum()
}

/// Plain-text report.
pub fn write_text(out: &mut impl Write, result: &RunResult) -> io::Result<()> {
	for (index, group) in result.groups.iter().enumerate() {
		writeln!(
			out,
			"Group {} ({} files, similarity {:.2}-{:.2})",
			index + 1,
			group.len(),
			group.min_score,
			group.mean_score
		)?;
		for (position, member) in group.members.iter().enumerate() {
			let marker = if position == 0 { "keep" } else { "    " };
			writeln!(
				out,
				"  {marker}  {}  [{}]",
				member.path().display(),
				describe(member)
			)?;
		}
		writeln!(out)?;
	}

	if !result.skipped.is_empty() {
		writeln!(out, "Skipped {} files:", result.skipped.len())?;
		for file in &result.skipped {
			writeln!(out, "  {}: {}", file.path.display(), file.reason)?;
		}
		writeln!(out)?;
	}

	let summary = &result.summary;
	writeln!(
		out,
		"{} {} duplicate groups among {} files ({} reclaimable), {} pairs compared, {} cached, {:.2}s",
		result.status,
		result.groups.len(),
		summary.files_seen,
		format_bytes(reclaimable_bytes(&result.groups)),
		summary.pairs_scored,
		summary.cache_hits,
		summary.elapsed_ms as f64 / 1000.0
	)
}

/// Pretty-printed JSON report.
pub fn write_json(out: &mut impl Write, result: &RunResult) -> io::Result<()> {
	serde_json::to_writer_pretty(&mut *out, result)?;
	writeln!(out)
}
