use async_trait::async_trait;

use crate::raft::rpc::{
    AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse,
};

/// Carries the two Raft RPCs to one remote node.
///
/// Implementations report every failure as a [`TransportError`]; the
/// consensus engine treats it as "no vote" / "not replicated" and moves on.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn request_vote(
        &self,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteResponse, TransportError>;

    async fn append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The remote node could not be reached
    Unreachable(String),
    /// No reply within the RPC timeout
    Timeout,
    /// Request or reply could not be encoded on the wire
    Codec(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Unreachable(peer) => write!(f, "Peer unreachable: {}", peer),
            TransportError::Timeout => write!(f, "Request timeout"),
            TransportError::Codec(msg) => write!(f, "Codec error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}
