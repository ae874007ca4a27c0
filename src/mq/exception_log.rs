//! Rolling window of abnormal consumer exceptions
//!
//! Entries expire once they are older than the window. A worker stops for good
//! once more than the allowed number of entries are live at the same time.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Time-windowed exception counter
#[derive(Debug)]
pub struct ExceptionLog {
    window: Duration,
    entries: Mutex<VecDeque<(Instant, String)>>,
}

impl ExceptionLog {
    /// Create a log whose entries live for `window`
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Record an exception now
    pub fn record(&self, description: impl Into<String>) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        Self::evict(&mut entries, now, self.window);
        entries.push_back((now, description.into()));
    }

    /// Live entries
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        Self::evict(&mut entries, Instant::now(), self.window);
        entries.len()
    }

    /// Whether no entries are live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether more than `allowed` entries are live
    pub fn exceeds(&self, allowed: usize) -> bool {
        self.len() > allowed
    }

    /// Descriptions of the live entries, oldest first
    pub fn recent(&self) -> Vec<String> {
        let mut entries = self.entries.lock();
        Self::evict(&mut entries, Instant::now(), self.window);
        entries.iter().map(|(_, d)| d.clone()).collect()
    }

    fn evict(entries: &mut VecDeque<(Instant, String)>, now: Instant, window: Duration) {
        while let Some((at, _)) = entries.front() {
            if now.duration_since(*at) >= window {
                entries.pop_front();
            } else {
                break;
            }
        }
    }
}
