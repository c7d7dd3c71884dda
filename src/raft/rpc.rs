use serde::{Deserialize, Serialize};
use super::types::{LogEntry, LogIndex, NodeId, Term};

/// RequestVote RPC - Invoked by candidates to gather votes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    /// Candidate's term
    pub term: Term,
    /// Candidate requesting vote
    pub candidate_id: NodeId,
    /// Index of candidate's last log entry (None for an empty log)
    pub last_log_index: Option<LogIndex>,
    /// Term of candidate's last log entry (0 for an empty log)
    pub last_log_term: Term,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    /// Current term, for candidate to update itself
    pub term: Term,
    /// True means candidate received vote
    pub vote_granted: bool,
}

/// AppendEntries RPC - Invoked by leader to replicate log entries and as heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    /// Leader's term
    pub term: Term,
    /// So follower can redirect clients
    pub leader_id: NodeId,
    /// Index of log entry immediately preceding new ones
    pub prev_log_index: Option<LogIndex>,
    /// Term of prev_log_index entry
    pub prev_log_term: Option<Term>,
    /// Log entries to store (empty for heartbeat)
    pub entries: Vec<LogEntry>,
    /// Leader's commit index
    pub leader_commit: Option<LogIndex>,
}

impl AppendEntriesRequest {
    pub fn is_heartbeat(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the first entry carried by this request
    pub fn first_index(&self) -> LogIndex {
        self.prev_log_index.map_or(0, |i| i + 1)
    }

    /// Index of the last entry carried by this request, or prev_log_index for a heartbeat
    pub fn last_index(&self) -> Option<LogIndex> {
        if self.entries.is_empty() {
            self.prev_log_index
        } else {
            Some(self.first_index() + self.entries.len() as u64 - 1)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    /// Current term, for leader to update itself
    pub term: Term,
    /// True if follower contained entry matching prev_log_index and prev_log_term
    pub success: bool,
}

/// Wrapper for all RPC messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftMessage {
    RequestVote(RequestVoteRequest),
    RequestVoteResponse(RequestVoteResponse),
    AppendEntries(AppendEntriesRequest),
    AppendEntriesResponse(AppendEntriesResponse),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_entries_index_window() {
        let heartbeat = AppendEntriesRequest {
            term: 1,
            leader_id: 0,
            prev_log_index: None,
            prev_log_term: None,
            entries: vec![],
            leader_commit: None,
        };
        assert!(heartbeat.is_heartbeat());
        assert_eq!(heartbeat.first_index(), 0);
        assert_eq!(heartbeat.last_index(), None);

        let request = AppendEntriesRequest {
            prev_log_index: Some(1),
            prev_log_term: Some(1),
            entries: vec![LogEntry::new(2, vec![1]), LogEntry::new(2, vec![2])],
            ..heartbeat
        };
        assert_eq!(request.first_index(), 2);
        assert_eq!(request.last_index(), Some(3));
    }
}
