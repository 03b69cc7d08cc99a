//! Progress display for long flash operations.

use coreflash::device::ProgressSink;
use indicatif::{ProgressBar, ProgressStyle};

/// An `indicatif` bar fed by the engine's byte-offset reports. Cancellation
/// is not wired up here; a batch tool runs operations to completion.
pub struct BarSink {
    bar: ProgressBar,
}

impl BarSink {
    pub fn new(total: u64, label: &'static str) -> Self {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template("{msg:>10} [{bar:40}] {bytes}/{total_bytes}")
                .unwrap()
                .progress_chars("=> "),
        );
        bar.set_message(label);
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressSink for BarSink {
    fn progress(&mut self, bytes: u32) {
        self.bar.set_position(u64::from(bytes));
    }
}
