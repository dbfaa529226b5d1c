//! Deadline-ordered index of expiration entries.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use super::ExpirationEntry;

/// Min-heap of deadlines with a path index.
///
/// Each path has at most one live entry. Replacing or removing an entry
/// leaves its old heap slot behind; such slots are recognised by their
/// sequence number and discarded when they reach the top.
#[derive(Debug, Default)]
pub struct DeadlineQueue {
    heap: BinaryHeap<Reverse<(DateTime<Utc>, u64, PathBuf)>>,
    live: HashMap<PathBuf, (DateTime<Utc>, u64)>,
    next_seq: u64,
}

impl DeadlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `path`. Returns the replaced deadline.
    pub fn insert(&mut self, path: PathBuf, deadline: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let seq = self.next_seq;
        self.next_seq += 1;
        let previous = self.live.insert(path.clone(), (deadline, seq));
        self.heap.push(Reverse((deadline, seq, path)));
        previous.map(|(deadline, _)| deadline)
    }

    pub fn remove(&mut self, path: &Path) -> Option<DateTime<Utc>> {
        self.live.remove(path).map(|(deadline, _)| deadline)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.live.contains_key(path)
    }

    pub fn deadline(&self, path: &Path) -> Option<DateTime<Utc>> {
        self.live.get(path).map(|(deadline, _)| *deadline)
    }

    /// Earliest live deadline.
    pub fn next_deadline(&mut self) -> Option<DateTime<Utc>> {
        self.discard_stale_top();
        self.heap.peek().map(|Reverse((deadline, _, _))| *deadline)
    }

    /// Remove and return every live entry due at or before `now`, earliest first.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Vec<ExpirationEntry> {
        let mut due = Vec::new();
        loop {
            self.discard_stale_top();
            match self.heap.peek() {
                Some(Reverse((deadline, _, _))) if *deadline <= now => {}
                _ => break,
            }
            if let Some(Reverse((deadline, _, path))) = self.heap.pop() {
                self.live.remove(&path);
                due.push(ExpirationEntry { path, deadline });
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn discard_stale_top(&mut self) {
        loop {
            let stale = match self.heap.peek() {
                Some(Reverse((_, seq, path))) => self
                    .live
                    .get(path)
                    .is_none_or(|(_, live_seq)| live_seq != seq),
                None => break,
            };
            if !stale {
                break;
            }
            self.heap.pop();
        }
    }
}
