//! Bounded log of finished connection transcripts

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Transcript lines recorded for one finished connection
pub type TranscriptEntry = Vec<String>;

/// FIFO of connection transcripts holding at most `capacity` entries.
///
/// Appending past capacity evicts the oldest entry. Reading does not
/// affect eviction order.
#[derive(Debug)]
pub struct TransactionLog {
    capacity: usize,
    entries: Mutex<VecDeque<TranscriptEntry>>,
}

impl TransactionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an entry, evicting the oldest ones while over capacity
    pub fn append(&self, entry: TranscriptEntry) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the retained entries, oldest first
    pub fn snapshot(&self) -> Vec<TranscriptEntry> {
        self.entries.lock().iter().cloned().collect()
    }
}
