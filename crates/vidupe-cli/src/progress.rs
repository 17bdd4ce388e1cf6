use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Receiver;
use indicatif::{ProgressBar, ProgressStyle};
use vidupe_core::{Progress, RunPhase};

/// Progress bar fed from a run's progress channel on its own thread.
///
/// The thread ends when every sender is dropped, i.e. when the scan job
/// goes away.
pub struct ProgressDisplay {
	handle: JoinHandle<()>,
}

fn bar_style() -> ProgressStyle {
	ProgressStyle::with_template(
		"  {spinner:.cyan} {msg:<14} [{bar:30.cyan/dim}] {pos}/{len} ({eta} remaining)",
	)
	.unwrap_or_else(|_| ProgressStyle::default_bar())
	.progress_chars("━╸─")
	.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
}

/// Position and length shown for a snapshot.
const fn counters(progress: &Progress) -> (usize, usize) {
	match progress.phase {
		RunPhase::Scoring | RunPhase::Clustering => (progress.pairs_scored, progress.pairs_total),
		_ => (progress.files_fingerprinted, progress.files_total),
	}
}

impl ProgressDisplay {
	/// Start drawing. A hidden bar still drains the channel.
	pub fn spawn(events: Receiver<Progress>, visible: bool) -> Self {
		let handle = thread::spawn(move || {
			let bar = if visible {
				ProgressBar::new(0)
			} else {
				ProgressBar::hidden()
			};
			bar.set_style(bar_style());
			bar.enable_steady_tick(Duration::from_millis(80));

			let mut phase = RunPhase::Pending;
			for event in events {
				if event.phase != phase {
					phase = event.phase;
					bar.set_message(phase.to_string());
				}
				let (position, length) = counters(&event);
				if bar.length() != Some(length as u64) {
					bar.set_length(length as u64);
				}
				bar.set_position(position as u64);
			}
			bar.finish_and_clear();
		});
		Self { handle }
	}

	/// Wait for the channel to close and the bar to clear.
	pub fn finish(self) {
		// A panicked drawing thread only loses the bar
		let _ = self.handle.join();
	}
}
