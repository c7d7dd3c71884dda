use serde::{Deserialize, Serialize};

/// A single entry in the replicated log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    /// The term when this entry was created
    pub term: Term,
    /// Opaque command payload, interpreted only by the apply sink
    pub command: Vec<u8>,
}

impl LogEntry {
    pub fn new(term: Term, command: Vec<u8>) -> Self {
        Self { term, command }
    }
}

/// Type alias for term numbers
pub type Term = u64;

/// Type alias for log indices (0-based)
pub type LogIndex = u64;

/// Node identifier: index into the cluster's peer list
pub type NodeId = usize;
