use super::rpc::{RequestVoteRequest, RequestVoteResponse};
use super::state::RaftState;
use super::types::{NodeId, Term};
use crate::storage::LogStorage;

/// Handle incoming RequestVote RPC
pub fn handle_request_vote<L: LogStorage + ?Sized>(
    raft_state: &mut RaftState,
    log_storage: &L,
    request: &RequestVoteRequest,
) -> RequestVoteResponse {
    tracing::debug!(
        "Node {} received RequestVote from {} (term: {}, my term: {})",
        raft_state.me,
        request.candidate_id,
        request.term,
        raft_state.current_term
    );

    if request.term < raft_state.current_term {
        tracing::debug!(
            "Node {} denied vote to {} - request term {} < current term {}",
            raft_state.me,
            request.candidate_id,
            request.term,
            raft_state.current_term
        );
        return RequestVoteResponse {
            term: raft_state.current_term,
            vote_granted: false,
        };
    }

    // A newer term clears our vote and demotes us
    raft_state.update_term(request.term);

    let can_vote = raft_state.voted_for.is_none()
        || raft_state.voted_for == Some(request.candidate_id);

    if !can_vote {
        tracing::debug!(
            "Node {} denied vote to {} - already voted for {:?}",
            raft_state.me,
            request.candidate_id,
            raft_state.voted_for
        );
        return RequestVoteResponse {
            term: raft_state.current_term,
            vote_granted: false,
        };
    }

    if !candidate_log_is_up_to_date(log_storage, request) {
        tracing::debug!(
            "Node {} denied vote to {} - log not up-to-date",
            raft_state.me,
            request.candidate_id
        );
        return RequestVoteResponse {
            term: raft_state.current_term,
            vote_granted: false,
        };
    }

    raft_state.voted_for = Some(request.candidate_id);

    tracing::info!(
        "Node {} granted vote to {} in term {}",
        raft_state.me,
        request.candidate_id,
        request.term
    );

    RequestVoteResponse {
        term: raft_state.current_term,
        vote_granted: true,
    }
}

/// Candidate's last entry must be at least as recent as ours: a higher last
/// term wins, equal terms compare by length.
fn candidate_log_is_up_to_date<L: LogStorage + ?Sized>(
    log_storage: &L,
    request: &RequestVoteRequest,
) -> bool {
    let last_log_term = log_storage.last_term();
    let last_log_index = log_storage.last_index();

    request.last_log_term > last_log_term
        || (request.last_log_term == last_log_term && request.last_log_index >= last_log_index)
}

/// Handle a RequestVote reply for the election started in `election_term`.
/// Returns true when this reply completes a majority.
pub fn handle_request_vote_response(
    raft_state: &mut RaftState,
    from: NodeId,
    election_term: Term,
    response: RequestVoteResponse,
) -> bool {
    // If response term is greater, update our term and become follower
    if raft_state.update_term(response.term) {
        return false;
    }

    // Ignore if we're not a candidate anymore
    if !raft_state.is_candidate() {
        tracing::debug!(
            "Node {} got vote reply from {} but election already finished",
            raft_state.me,
            from
        );
        return false;
    }

    // Ignore replies to an older election
    if raft_state.current_term != election_term {
        return false;
    }

    if !response.vote_granted {
        tracing::debug!("Node {} vote by peer {} not granted", raft_state.me, from);
        return false;
    }

    raft_state.add_vote(from);

    tracing::debug!(
        "Node {} received vote from {} ({}/{} votes)",
        raft_state.me,
        from,
        raft_state.votes_received.len(),
        raft_state.cluster_size
    );

    if raft_state.has_majority() {
        tracing::info!(
            "Node {} won election in term {} with {} votes",
            raft_state.me,
            raft_state.current_term,
            raft_state.votes_received.len()
        );
        return true;
    }

    false
}

/// Create a RequestVote request for this node
pub fn create_request_vote<L: LogStorage + ?Sized>(
    raft_state: &RaftState,
    log_storage: &L,
) -> RequestVoteRequest {
    RequestVoteRequest {
        term: raft_state.current_term,
        candidate_id: raft_state.me,
        last_log_index: log_storage.last_index(),
        last_log_term: log_storage.last_term(),
    }
}
