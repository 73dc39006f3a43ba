//! Sliding request windows, keyed by origin.

use std::collections::{HashMap, VecDeque};

/// Per-origin request timestamps (seconds) inside the trailing window.
#[derive(Debug)]
pub struct RequestWindows {
    window_s: u64,
    entries: HashMap<String, VecDeque<u64>>,
}

impl RequestWindows {
    pub fn new(window_s: u64) -> Self {
        Self {
            window_s,
            entries: HashMap::new(),
        }
    }

    /// Prune to `>= now - window`, append `now`, return the new count.
    pub fn record(&mut self, origin: &str, now: u64) -> usize {
        let cutoff = now.saturating_sub(self.window_s);
        let q = self.entries.entry(origin.to_string()).or_default();
        prune(q, cutoff);
        q.push_back(now);
        q.len()
    }

    /// In-window count without recording a request.
    pub fn count(&mut self, origin: &str, now: u64) -> usize {
        let cutoff = now.saturating_sub(self.window_s);
        match self.entries.get_mut(origin) {
            Some(q) => {
                prune(q, cutoff);
                q.len()
            }
            None => 0,
        }
    }

    /// Drop origins whose window has emptied.
    pub fn sweep(&mut self, now: u64) {
        let cutoff = now.saturating_sub(self.window_s);
        self.entries.retain(|_, q| {
            prune(q, cutoff);
            !q.is_empty()
        });
    }

    pub fn forget(&mut self, origin: &str) {
        self.entries.remove(origin);
    }

    pub fn tracked(&self) -> usize {
        self.entries.len()
    }
}

fn prune(q: &mut VecDeque<u64>, cutoff: u64) {
    while q.front().is_some_and(|&t| t < cutoff) {
        q.pop_front();
    }
}
