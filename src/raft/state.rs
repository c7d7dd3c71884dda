use super::types::{LogIndex, NodeId, Term};
use std::collections::HashSet;

/// The three states a Raft node can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Follower state - receives updates from leader
    Follower,
    /// Candidate state - requesting votes for leadership
    Candidate,
    /// Leader state - manages log replication
    Leader,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Follower => write!(f, "Follower"),
            NodeState::Candidate => write!(f, "Candidate"),
            NodeState::Leader => write!(f, "Leader"),
        }
    }
}

/// Complete state of a Raft node
#[derive(Debug, Clone)]
pub struct RaftState {
    // Persistent state on all servers
    /// Latest term server has seen (initialized to 0)
    pub current_term: Term,
    /// Candidate that received vote in current term (or None)
    pub voted_for: Option<NodeId>,

    // Volatile state on all servers
    /// Index of highest log entry known to be committed
    pub commit_index: Option<LogIndex>,
    /// Index of highest log entry handed to the apply sink
    pub last_applied: Option<LogIndex>,
    /// Current role of this node
    pub state: NodeState,
    /// This node's index into the peer list
    pub me: NodeId,
    /// Number of nodes in the cluster, this one included
    pub cluster_size: usize,

    // Volatile state on leaders (reinitialized after election)
    /// For each server, index of the next log entry to send to that server
    pub next_index: Vec<LogIndex>,
    /// For each server, index of highest log entry known to be replicated on server
    pub match_index: Vec<Option<LogIndex>>,

    // Election state for candidates
    /// Set of nodes that voted for this candidate in current election
    pub votes_received: HashSet<NodeId>,
}

impl RaftState {
    pub fn new(me: NodeId, cluster_size: usize) -> Self {
        Self {
            current_term: 0,
            voted_for: None,
            commit_index: None,
            last_applied: None,
            state: NodeState::Follower,
            me,
            cluster_size,
            next_index: vec![0; cluster_size],
            match_index: vec![None; cluster_size],
            votes_received: HashSet::new(),
        }
    }

    /// Transition to follower state within the current term.
    ///
    /// The vote cast in this term is kept so a node never votes twice per term.
    pub fn become_follower(&mut self) {
        if self.state != NodeState::Follower {
            tracing::info!(
                "Node {} transitioning to Follower (term: {})",
                self.me,
                self.current_term
            );
        }
        self.state = NodeState::Follower;
        self.votes_received.clear();
    }

    /// Transition to candidate state
    pub fn become_candidate(&mut self) {
        self.current_term += 1;
        self.state = NodeState::Candidate;
        self.voted_for = Some(self.me);
        self.votes_received.clear();
        self.votes_received.insert(self.me);

        tracing::info!(
            "Node {} transitioning to Candidate (term: {})",
            self.me,
            self.current_term
        );
    }

    /// Transition to leader state
    pub fn become_leader(&mut self, log_len: u64) {
        tracing::info!(
            "Node {} transitioning to Leader (term: {})",
            self.me,
            self.current_term
        );

        self.state = NodeState::Leader;

        // Reinitialize leader state
        self.next_index = vec![log_len; self.cluster_size];
        self.match_index = vec![None; self.cluster_size];

        self.votes_received.clear();
    }

    /// Add a vote for this node
    pub fn add_vote(&mut self, from: NodeId) {
        self.votes_received.insert(from);
    }

    /// Check if we have received votes from a majority
    pub fn has_majority(&self) -> bool {
        self.is_quorum(self.votes_received.len())
    }

    /// Strict majority of the cluster
    pub fn is_quorum(&self, count: usize) -> bool {
        count * 2 > self.cluster_size
    }

    /// Adopt a higher term seen in a request or reply and step down.
    /// Returns true if the term changed.
    pub fn update_term(&mut self, term: Term) -> bool {
        if term > self.current_term {
            tracing::info!(
                "Node {} updating term from {} to {}",
                self.me,
                self.current_term,
                term
            );
            self.current_term = term;
            self.voted_for = None;
            self.become_follower();
            true
        } else {
            false
        }
    }

    /// Raise the commit index. Returns true if it moved forward.
    pub fn commit_to(&mut self, index: LogIndex) -> bool {
        if self.commit_index.map_or(true, |c| index > c) {
            self.commit_index = Some(index);
            true
        } else {
            false
        }
    }

    /// Whether `index` is already covered by the commit index
    pub fn is_committed(&self, index: LogIndex) -> bool {
        self.commit_index.map_or(false, |c| c >= index)
    }

    /// Ids of every other node in the cluster
    pub fn peers(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.cluster_size).filter(move |&id| id != self.me)
    }

    /// Check if we're the leader
    pub fn is_leader(&self) -> bool {
        self.state == NodeState::Leader
    }

    /// Check if we're a candidate
    pub fn is_candidate(&self) -> bool {
        self.state == NodeState::Candidate
    }

    /// Check if we're a follower
    pub fn is_follower(&self) -> bool {
        self.state == NodeState::Follower
    }
}
