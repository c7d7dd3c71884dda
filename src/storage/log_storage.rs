use crate::raft::types::{LogEntry, LogIndex, Term};

/// Trait for the replicated log backing a node.
///
/// Indices are 0-based and contiguous. The log is append-only except for
/// [`LogStorage::truncate`], which the consensus layer calls when a leader's
/// entries conflict with the local suffix.
pub trait LogStorage: Send {
    fn append(&mut self, entry: LogEntry) -> LogIndex;
    fn extend(&mut self, entries: Vec<LogEntry>);
    fn get(&self, index: LogIndex) -> Option<&LogEntry>;
    /// Entries in `start..=end`, clamped to the log
    fn get_range(&self, start: LogIndex, end: LogIndex) -> Vec<LogEntry>;
    fn len(&self) -> u64;
    fn truncate(&mut self, from_index: LogIndex);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn last_index(&self) -> Option<LogIndex> {
        self.len().checked_sub(1)
    }

    fn last_term(&self) -> Term {
        self.last_index()
            .and_then(|i| self.term_at(i))
            .unwrap_or(0)
    }

    fn term_at(&self, index: LogIndex) -> Option<Term> {
        self.get(index).map(|e| e.term)
    }

    /// Every entry from `start` to the end of the log
    fn entries_from(&self, start: LogIndex) -> Vec<LogEntry> {
        match self.last_index() {
            Some(last) if start <= last => self.get_range(start, last),
            _ => Vec::new(),
        }
    }
}

/// In-memory log storage. Nothing survives a restart.
#[derive(Debug, Default, Clone)]
pub struct MemoryLogStorage {
    logs: Vec<LogEntry>,
}

impl MemoryLogStorage {
    pub fn new() -> Self {
        Self { logs: Vec::new() }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.logs
    }
}

impl From<Vec<LogEntry>> for MemoryLogStorage {
    fn from(logs: Vec<LogEntry>) -> Self {
        Self { logs }
    }
}

impl LogStorage for MemoryLogStorage {
    fn append(&mut self, entry: LogEntry) -> LogIndex {
        self.logs.push(entry);
        self.logs.len() as u64 - 1
    }

    fn extend(&mut self, entries: Vec<LogEntry>) {
        self.logs.extend(entries);
    }

    fn get(&self, index: LogIndex) -> Option<&LogEntry> {
        self.logs.get(index as usize)
    }

    fn get_range(&self, start: LogIndex, end: LogIndex) -> Vec<LogEntry> {
        if start > end || start as usize >= self.logs.len() {
            return Vec::new();
        }

        let end_idx = std::cmp::min(end as usize + 1, self.logs.len());
        self.logs[start as usize..end_idx].to_vec()
    }

    fn len(&self) -> u64 {
        self.logs.len() as u64
    }

    fn truncate(&mut self, from_index: LogIndex) {
        if (from_index as usize) < self.logs.len() {
            self.logs.truncate(from_index as usize);
            tracing::debug!("Truncated log from index {}", from_index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_get() {
        let mut storage = MemoryLogStorage::new();
        assert!(storage.is_empty());
        assert_eq!(storage.last_index(), None);
        assert_eq!(storage.last_term(), 0);

        assert_eq!(storage.append(LogEntry::new(1, vec![1, 2, 3])), 0);
        assert_eq!(storage.append(LogEntry::new(2, vec![4, 5, 6])), 1);

        assert_eq!(storage.last_index(), Some(1));
        assert_eq!(storage.last_term(), 2);
        assert_eq!(storage.term_at(0), Some(1));
        assert_eq!(storage.get(2), None);
    }

    #[test]
    fn test_range_is_clamped() {
        let mut storage = MemoryLogStorage::new();
        storage.extend(vec![
            LogEntry::new(1, vec![0]),
            LogEntry::new(1, vec![1]),
            LogEntry::new(1, vec![2]),
        ]);

        assert_eq!(storage.get_range(1, 10).len(), 2);
        assert_eq!(storage.get_range(2, 1).len(), 0);
        assert_eq!(storage.entries_from(0).len(), 3);
        assert!(storage.entries_from(3).is_empty());
    }

    #[test]
    fn test_truncate_discards_suffix() {
        let mut storage = MemoryLogStorage::from(vec![
            LogEntry::new(1, vec![0]),
            LogEntry::new(1, vec![1]),
            LogEntry::new(2, vec![2]),
        ]);

        storage.truncate(1);
        assert_eq!(storage.len(), 1);

        // Truncating past the end is a no-op
        storage.truncate(5);
        assert_eq!(storage.len(), 1);
    }
}
