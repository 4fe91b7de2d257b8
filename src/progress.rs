//! Terminal progress display for the client
//!
//! One bar over the total byte count of the run; the current file and its
//! throughput go in the message. Finished and failed files print above the bar.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::logger::Logger;

pub struct ProgressLogger {
    bar: ProgressBar,
    // Bytes of files already finished (sent or given up on)
    base: Mutex<u64>,
    file_started: Mutex<Instant>,
    file_size: Mutex<u64>,
    verbose: bool,
}

impl ProgressLogger {
    pub fn new(total_bytes: u64, verbose: bool) -> Self {
        let bar = ProgressBar::new(total_bytes);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {bytes}/{total_bytes} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Self {
            bar,
            base: Mutex::new(0),
            file_started: Mutex::new(Instant::now()),
            file_size: Mutex::new(0),
            verbose,
        }
    }

    /// A logger that tracks state but draws nothing (non-tty, tests)
    pub fn hidden(total_bytes: u64) -> Self {
        let logger = Self::new(total_bytes, false);
        logger.bar.set_draw_target(ProgressDrawTarget::hidden());
        logger
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    fn settle(&self, size: u64) {
        if let Ok(mut base) = self.base.lock() {
            *base += size;
            self.bar.set_position(*base);
        }
    }
}

impl Logger for ProgressLogger {
    fn file_start(&self, name: &str, size: u64) {
        if let Ok(mut started) = self.file_started.lock() {
            *started = Instant::now();
        }
        if let Ok(mut current) = self.file_size.lock() {
            *current = size;
        }
        self.bar.set_message(name.to_string());
    }

    fn chunk_sent(&self, name: &str, bytes_sent: u64, _size: u64) {
        let base = self.base.lock().map(|b| *b).unwrap_or(0);
        self.bar.set_position(base + bytes_sent);
        let elapsed = self
            .file_started
            .lock()
            .map(|s| s.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        if elapsed > 0.0 {
            let rate = bytes_sent as f64 / elapsed / 1_048_576.0;
            self.bar.set_message(format!("{} {:.1} MiB/s", name, rate));
        }
    }

    fn file_done(&self, name: &str, bytes: u64) {
        self.settle(bytes);
        if self.verbose {
            self.bar.println(format!("  sent {}", name));
        }
    }

    fn file_failed(&self, name: &str, reason: &str) {
        let size = self.file_size.lock().map(|s| *s).unwrap_or(0);
        self.settle(size);
        self.bar.println(format!("  failed {}: {}", name, reason));
    }

    fn done(&self, files: u64, bytes: u64, seconds: f64) {
        self.bar.finish_with_message(format!(
            "{} files, {} bytes in {:.1}s",
            files, bytes, seconds
        ));
    }
}
