use std::time::{Duration, Instant};

/// Monotonic stopwatch for cache-assisted reads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stopwatch {
    started_at: Option<Instant>,
}

impl Stopwatch {
    /// A stopwatch that has not been started.
    pub fn new() -> Self {
        Self::default()
    }

    /// A stopwatch started now.
    pub fn started() -> Self {
        let mut stopwatch = Self::new();
        stopwatch.start();
        stopwatch
    }

    /// Start, or restart, the measurement.
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    /// Time since [`start`](Self::start); `None` if never started.
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|started_at| started_at.elapsed())
    }
}
