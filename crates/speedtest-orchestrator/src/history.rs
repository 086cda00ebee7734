//! Bounded sample log for live charting.

use std::collections::VecDeque;

use serde::Serialize;

/// One observed `(download, upload, ping, jitter)` tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub download: String,
    pub upload: String,
    pub ping: String,
    pub jitter: String,
}

/// Ring buffer of samples. Appends are deduplicated against the last entry
/// and the oldest entry is evicted once `cap` is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct History {
    samples: VecDeque<Sample>,
    #[serde(skip)]
    cap: usize,
}

impl History {
    pub const DEFAULT_CAP: usize = 60;

    /// A cap of zero is raised to one.
    pub fn with_cap(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            samples: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Record a sample. Returns `false` when it equals the last entry.
    pub fn push(&mut self, sample: Sample) -> bool {
        if self.samples.back() == Some(&sample) {
            return false;
        }
        if self.samples.len() == self.cap {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        true
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn last(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::with_cap(Self::DEFAULT_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(dl: &str, ul: &str) -> Sample {
        Sample {
            download: dl.into(),
            upload: ul.into(),
            ping: "0".into(),
            jitter: "0".into(),
        }
    }

    #[test]
    fn consecutive_duplicates_are_dropped() {
        let mut h = History::with_cap(8);
        assert!(h.push(sample("10.00", "0.00")));
        assert!(!h.push(sample("10.00", "0.00")));
        assert!(h.push(sample("12.00", "0.00")));
        // Equal to an older entry but not the last one: kept.
        assert!(h.push(sample("10.00", "0.00")));
        assert_eq!(h.len(), 3);
    }

    #[test]
    fn evicts_oldest_at_cap() {
        let mut h = History::with_cap(3);
        for i in 0..10 {
            h.push(sample(&format!("{i}.00"), "0.00"));
        }
        assert_eq!(h.len(), 3);
        let kept: Vec<_> = h.iter().map(|s| s.download.as_str()).collect();
        assert_eq!(kept, ["7.00", "8.00", "9.00"]);
    }

    #[test]
    fn cap_never_exceeded_with_mixed_input() {
        let mut h = History::with_cap(5);
        let inputs = ["1", "1", "2", "3", "3", "3", "4", "5", "6", "6", "7", "1"];
        let mut distinct: Vec<&str> = Vec::new();
        for v in inputs {
            h.push(sample(v, "0"));
            if distinct.last() != Some(&v) {
                distinct.push(v);
            }
            assert!(h.len() <= h.cap());
        }
        let tail: Vec<_> = distinct[distinct.len() - 5..].to_vec();
        let kept: Vec<_> = h.iter().map(|s| s.download.as_str()).collect();
        assert_eq!(kept, tail);
    }

    #[test]
    fn zero_cap_is_raised() {
        let mut h = History::with_cap(0);
        h.push(sample("1", "1"));
        h.push(sample("2", "2"));
        assert_eq!(h.cap(), 1);
        assert_eq!(h.last().unwrap().download, "2");
    }
}
