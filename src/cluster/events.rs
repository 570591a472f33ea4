//! Bounded event log and utilization history

use std::collections::VecDeque;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Fixed-capacity FIFO: pushing past capacity evicts the oldest entry
#[derive(Debug, Clone)]
pub struct BoundedLog<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> BoundedLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: T) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Copy of the entries, oldest first
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&T> {
        self.entries.back()
    }
}

/// One point of the cluster CPU utilization history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSample {
    pub timestamp: DateTime<Utc>,
    /// Percentage in `[0, 100]`
    pub utilization: f64,
}

/// Prefix an event message with a local wall-clock timestamp
pub fn format_event(message: &str, at: DateTime<Utc>) -> String {
    let local = at.with_timezone(&Local);
    format!("[{}] {}", local.format("%Y-%m-%d %H:%M:%S"), message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let mut log = BoundedLog::new(3);
        for i in 0..5 {
            log.push(i);
        }
        assert_eq!(log.to_vec(), vec![2, 3, 4]);
        assert_eq!(log.len(), 3);
        assert_eq!(log.last(), Some(&4));
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut log = BoundedLog::new(0);
        log.push("x");
        assert!(log.is_empty());
    }

    #[test]
    fn test_format_event() {
        let line = format_event("Node n1 marked FAILED", Utc::now());
        assert!(line.starts_with('['));
        assert!(line.ends_with("] Node n1 marked FAILED"));
        // "[YYYY-mm-dd HH:MM:SS] " is 22 characters
        assert_eq!(line.find(']'), Some(20));
    }
}
