use super::apply::ApplyMsg;
use super::rpc::{AppendEntriesRequest, AppendEntriesResponse};
use super::state::RaftState;
use super::types::{LogIndex, NodeId, Term};
use crate::storage::LogStorage;

/// What a leader learned from one AppendEntries reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationOutcome {
    /// Follower stored everything up to the request's last index
    Replicated,
    /// Log mismatch; next_index was moved back by one
    Rejected,
    /// Reply carried a higher term and we are no longer leader
    SteppedDown,
    /// We left leadership or the term moved on since the request was sent
    Stale,
}

/// Handle incoming AppendEntries RPC
pub fn handle_append_entries<L: LogStorage + ?Sized>(
    raft_state: &mut RaftState,
    log_storage: &mut L,
    request: &AppendEntriesRequest,
) -> AppendEntriesResponse {
    tracing::debug!(
        "Node {} got {} from leader {} at term {}, my term {}, {} entries, prev_log_index {:?}",
        raft_state.me,
        if request.is_heartbeat() { "heartbeat" } else { "append entries" },
        request.leader_id,
        request.term,
        raft_state.current_term,
        request.entries.len(),
        request.prev_log_index
    );

    // Reply false if term < currentTerm
    if request.term < raft_state.current_term {
        tracing::debug!(
            "Node {} rejected AppendEntries from {} - stale term ({} < {})",
            raft_state.me,
            request.leader_id,
            request.term,
            raft_state.current_term
        );
        return reject(raft_state);
    }

    // A valid leader exists for this term
    raft_state.update_term(request.term);
    raft_state.become_follower();

    // Check log consistency
    if let Some(prev_log_index) = request.prev_log_index {
        match log_storage.term_at(prev_log_index) {
            None => {
                tracing::debug!(
                    "Node {} rejected AppendEntries - missing entry at index {}",
                    raft_state.me,
                    prev_log_index
                );
                return reject(raft_state);
            }
            Some(term) if Some(term) != request.prev_log_term => {
                tracing::info!(
                    "Node {} found log conflict at index {} ({} != {:?}), truncating",
                    raft_state.me,
                    prev_log_index,
                    term,
                    request.prev_log_term
                );
                log_storage.truncate(prev_log_index);
                return reject(raft_state);
            }
            Some(_) => {}
        }
    }

    // Append new entries, skipping the ones we already hold
    let first_index = request.first_index();
    for (offset, new_entry) in request.entries.iter().enumerate() {
        let index = first_index + offset as u64;
        match log_storage.term_at(index) {
            Some(term) if term == new_entry.term => continue,
            Some(_) => {
                tracing::info!(
                    "Node {} found log conflict at index {}, truncating",
                    raft_state.me,
                    index
                );
                log_storage.truncate(index);
                log_storage.extend(request.entries[offset..].to_vec());
                break;
            }
            None => {
                log_storage.extend(request.entries[offset..].to_vec());
                break;
            }
        }
    }

    // Update commit index
    if let (Some(leader_commit), Some(last_new_entry_index)) =
        (request.leader_commit, request.last_index())
    {
        if raft_state.commit_to(std::cmp::min(leader_commit, last_new_entry_index)) {
            tracing::debug!(
                "Node {} updated commit_index to {:?}",
                raft_state.me,
                raft_state.commit_index
            );
        }
    }

    AppendEntriesResponse {
        term: raft_state.current_term,
        success: true,
    }
}

fn reject(raft_state: &RaftState) -> AppendEntriesResponse {
    AppendEntriesResponse {
        term: raft_state.current_term,
        success: false,
    }
}

/// Handle AppendEntries response (for leaders)
///
/// `request_term` and `sent_last_index` describe the request this reply answers.
pub fn handle_append_entries_response(
    raft_state: &mut RaftState,
    from: NodeId,
    request_term: Term,
    sent_last_index: Option<LogIndex>,
    response: &AppendEntriesResponse,
) -> ReplicationOutcome {
    // If response term is greater, update our term and step down
    if raft_state.update_term(response.term) {
        return ReplicationOutcome::SteppedDown;
    }

    if !raft_state.is_leader() || raft_state.current_term != request_term {
        return ReplicationOutcome::Stale;
    }

    if response.success {
        if let Some(last) = sent_last_index {
            let match_idx = &mut raft_state.match_index[from];
            *match_idx = std::cmp::max(*match_idx, Some(last));

            let next_idx = &mut raft_state.next_index[from];
            *next_idx = std::cmp::max(*next_idx, last + 1);
        }

        tracing::debug!(
            "Node {} updated match_index for {} to {:?}",
            raft_state.me,
            from,
            raft_state.match_index[from]
        );

        ReplicationOutcome::Replicated
    } else {
        // Fall back by one entry and let the caller retry
        let next_idx = &mut raft_state.next_index[from];
        *next_idx = next_idx.saturating_sub(1);

        tracing::debug!(
            "Node {} decremented next_index for {} to {}",
            raft_state.me,
            from,
            *next_idx
        );

        ReplicationOutcome::Rejected
    }
}

/// Try to advance commit index based on match_index of followers.
///
/// Only entries from the current term are committed by counting replicas;
/// earlier entries are committed along with them.
pub fn advance_commit_index<L: LogStorage + ?Sized>(
    raft_state: &mut RaftState,
    log_storage: &L,
) -> bool {
    if !raft_state.is_leader() {
        return false;
    }

    let Some(last_log_index) = log_storage.last_index() else {
        return false;
    };
    let first_uncommitted = raft_state.commit_index.map_or(0, |c| c + 1);

    for n in (first_uncommitted..=last_log_index).rev() {
        if log_storage.term_at(n) != Some(raft_state.current_term) {
            continue;
        }

        // Count ourselves
        let replicas = 1 + raft_state
            .peers()
            .filter(|&peer| raft_state.match_index[peer].map_or(false, |m| m >= n))
            .count();

        if raft_state.is_quorum(replicas) {
            raft_state.commit_to(n);
            tracing::info!("Leader {} advanced commit_index to {}", raft_state.me, n);
            return true;
        }
    }

    false
}

/// Create AppendEntries request for a specific follower.
///
/// Carries `log[next_index..=upto]`, or everything from next_index on when
/// `upto` is None.
pub fn create_append_entries<L: LogStorage + ?Sized>(
    raft_state: &RaftState,
    log_storage: &L,
    follower_id: NodeId,
    upto: Option<LogIndex>,
) -> AppendEntriesRequest {
    let next_index = std::cmp::min(raft_state.next_index[follower_id], log_storage.len());

    let prev_log_index = next_index.checked_sub(1);
    let prev_log_term = prev_log_index.and_then(|i| log_storage.term_at(i));

    let entries = match upto {
        Some(upto) => log_storage.get_range(next_index, upto),
        None => log_storage.entries_from(next_index),
    };

    AppendEntriesRequest {
        term: raft_state.current_term,
        leader_id: raft_state.me,
        prev_log_index,
        prev_log_term,
        entries,
        leader_commit: raft_state.commit_index,
    }
}

/// Advance last_applied up to commit_index, returning the entries to apply in order
pub fn take_committed<L: LogStorage + ?Sized>(
    raft_state: &mut RaftState,
    log_storage: &L,
) -> Vec<ApplyMsg> {
    let mut applied = Vec::new();

    while raft_state.last_applied < raft_state.commit_index {
        let next = raft_state.last_applied.map_or(0, |i| i + 1);
        let Some(entry) = log_storage.get(next) else {
            break;
        };

        applied.push(ApplyMsg {
            command: entry.command.clone(),
            command_valid: true,
            command_index: next,
        });
        raft_state.last_applied = Some(next);
    }

    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raft::types::LogEntry;
    use crate::storage::MemoryLogStorage;

    fn request(
        term: Term,
        prev_log_index: Option<LogIndex>,
        prev_log_term: Option<Term>,
        entries: Vec<LogEntry>,
        leader_commit: Option<LogIndex>,
    ) -> AppendEntriesRequest {
        AppendEntriesRequest {
            term,
            leader_id: 0,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit,
        }
    }

    #[test]
    fn test_append_entries_success() {
        let mut raft_state = RaftState::new(1, 3);
        raft_state.current_term = 1;
        let mut log_storage = MemoryLogStorage::new();

        let response = handle_append_entries(
            &mut raft_state,
            &mut log_storage,
            &request(1, None, None, vec![LogEntry::new(1, vec![1, 2, 3])], None),
        );

        assert!(response.success);
        assert_eq!(log_storage.last_index(), Some(0));
        assert_eq!(raft_state.commit_index, None);
    }

    #[test]
    fn test_append_entries_reject_stale_term() {
        let mut raft_state = RaftState::new(1, 3);
        raft_state.current_term = 2;
        raft_state.become_candidate();
        let mut log_storage = MemoryLogStorage::new();

        let response = handle_append_entries(
            &mut raft_state,
            &mut log_storage,
            &request(1, None, None, vec![], None),
        );

        assert!(!response.success);
        assert_eq!(response.term, 3);
        assert!(raft_state.is_candidate());
    }

    #[test]
    fn test_append_entries_demotes_candidate() {
        let mut raft_state = RaftState::new(1, 3);
        raft_state.become_candidate();
        let mut log_storage = MemoryLogStorage::new();

        let response = handle_append_entries(
            &mut raft_state,
            &mut log_storage,
            &request(1, None, None, vec![], None),
        );

        assert!(response.success);
        assert!(raft_state.is_follower());
        // Vote for ourselves in term 1 still stands
        assert_eq!(raft_state.voted_for, Some(1));
    }

    #[test]
    fn test_append_entries_reject_missing_prev_entry() {
        let mut raft_state = RaftState::new(1, 3);
        let mut log_storage = MemoryLogStorage::from(vec![LogEntry::new(1, vec![])]);

        let response = handle_append_entries(
            &mut raft_state,
            &mut log_storage,
            &request(1, Some(3), Some(1), vec![LogEntry::new(1, vec![])], None),
        );

        assert!(!response.success);
        assert_eq!(log_storage.len(), 1);
    }

    #[test]
    fn test_prev_term_mismatch_truncates_and_rejects() {
        let mut raft_state = RaftState::new(1, 3);
        let mut log_storage = MemoryLogStorage::from(vec![
            LogEntry::new(1, vec![0]),
            LogEntry::new(1, vec![1]),
            LogEntry::new(1, vec![2]),
        ]);

        let response = handle_append_entries(
            &mut raft_state,
            &mut log_storage,
            &request(2, Some(1), Some(2), vec![LogEntry::new(2, vec![9])], None),
        );

        assert!(!response.success);
        assert_eq!(log_storage.len(), 1);
    }

    #[test]
    fn test_conflicting_suffix_is_replaced() {
        let mut raft_state = RaftState::new(1, 3);
        raft_state.current_term = 2;
        let mut log_storage = MemoryLogStorage::from(vec![
            LogEntry::new(1, vec![0]),
            LogEntry::new(1, vec![1]),
            LogEntry::new(2, vec![2]),
            LogEntry::new(2, vec![3]),
        ]);

        let leader_entries = vec![LogEntry::new(3, vec![20]), LogEntry::new(3, vec![30])];
        let response = handle_append_entries(
            &mut raft_state,
            &mut log_storage,
            &request(3, Some(1), Some(1), leader_entries.clone(), Some(1)),
        );

        assert!(response.success);
        assert_eq!(
            log_storage.entries(),
            &[
                LogEntry::new(1, vec![0]),
                LogEntry::new(1, vec![1]),
                leader_entries[0].clone(),
                leader_entries[1].clone(),
            ]
        );
        assert_eq!(raft_state.commit_index, Some(1));
    }

    #[test]
    fn test_duplicate_entries_are_not_appended_twice() {
        let mut raft_state = RaftState::new(1, 3);
        let mut log_storage = MemoryLogStorage::new();
        let entries = vec![LogEntry::new(1, vec![0]), LogEntry::new(1, vec![1])];

        let req = request(1, None, None, entries, None);
        handle_append_entries(&mut raft_state, &mut log_storage, &req);
        handle_append_entries(&mut raft_state, &mut log_storage, &req);

        assert_eq!(log_storage.len(), 2);
    }

    #[test]
    fn test_commit_index_clamped_to_last_new_entry() {
        let mut raft_state = RaftState::new(1, 3);
        let mut log_storage = MemoryLogStorage::new();

        handle_append_entries(
            &mut raft_state,
            &mut log_storage,
            &request(1, None, None, vec![LogEntry::new(1, vec![0])], Some(7)),
        );
        assert_eq!(raft_state.commit_index, Some(0));

        // A heartbeat never lowers the commit index
        handle_append_entries(
            &mut raft_state,
            &mut log_storage,
            &request(1, None, None, vec![], Some(0)),
        );
        assert_eq!(raft_state.commit_index, Some(0));
    }

    #[test]
    fn test_take_committed_applies_in_order_once() {
        let mut raft_state = RaftState::new(1, 3);
        let log_storage = MemoryLogStorage::from(vec![
            LogEntry::new(1, vec![0]),
            LogEntry::new(1, vec![1]),
            LogEntry::new(1, vec![2]),
        ]);

        raft_state.commit_to(1);
        let applied = take_committed(&mut raft_state, &log_storage);
        assert_eq!(
            applied.iter().map(|m| m.command_index).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert!(take_committed(&mut raft_state, &log_storage).is_empty());

        raft_state.commit_to(2);
        let applied = take_committed(&mut raft_state, &log_storage);
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].command, vec![2]);
        assert_eq!(raft_state.last_applied, Some(2));
    }

    #[test]
    fn test_create_append_entries_window() {
        let mut raft_state = RaftState::new(0, 3);
        raft_state.become_candidate();
        let log_storage = MemoryLogStorage::from(vec![
            LogEntry::new(1, vec![0]),
            LogEntry::new(1, vec![1]),
            LogEntry::new(1, vec![2]),
        ]);
        raft_state.become_leader(log_storage.len());

        let heartbeat = create_append_entries(&raft_state, &log_storage, 1, None);
        assert!(heartbeat.is_heartbeat());
        assert_eq!(heartbeat.prev_log_index, Some(2));
        assert_eq!(heartbeat.prev_log_term, Some(1));

        raft_state.next_index[1] = 1;
        let request = create_append_entries(&raft_state, &log_storage, 1, Some(1));
        assert_eq!(request.prev_log_index, Some(0));
        assert_eq!(request.entries, vec![LogEntry::new(1, vec![1])]);

        raft_state.next_index[2] = 0;
        let request = create_append_entries(&raft_state, &log_storage, 2, None);
        assert_eq!(request.prev_log_index, None);
        assert_eq!(request.prev_log_term, None);
        assert_eq!(request.entries.len(), 3);
    }

    #[test]
    fn test_leader_response_handling() {
        let mut raft_state = RaftState::new(0, 3);
        raft_state.become_candidate();
        raft_state.become_leader(2);
        let term = raft_state.current_term;

        let ok = AppendEntriesResponse {
            term,
            success: true,
        };
        let outcome = handle_append_entries_response(&mut raft_state, 1, term, Some(2), &ok);
        assert_eq!(outcome, ReplicationOutcome::Replicated);
        assert_eq!(raft_state.match_index[1], Some(2));
        assert_eq!(raft_state.next_index[1], 3);

        let rejected = AppendEntriesResponse {
            term,
            success: false,
        };
        let outcome = handle_append_entries_response(&mut raft_state, 2, term, Some(2), &rejected);
        assert_eq!(outcome, ReplicationOutcome::Rejected);
        assert_eq!(raft_state.next_index[2], 1);

        let outcome = handle_append_entries_response(&mut raft_state, 2, term - 1, None, &ok);
        assert_eq!(outcome, ReplicationOutcome::Stale);

        let newer = AppendEntriesResponse {
            term: term + 1,
            success: false,
        };
        let outcome = handle_append_entries_response(&mut raft_state, 2, term, None, &newer);
        assert_eq!(outcome, ReplicationOutcome::SteppedDown);
        assert!(raft_state.is_follower());
    }

    #[test]
    fn test_advance_commit_index_needs_quorum_in_current_term() {
        let mut raft_state = RaftState::new(0, 3);
        raft_state.current_term = 1;
        raft_state.become_candidate();
        let log_storage = MemoryLogStorage::from(vec![
            LogEntry::new(1, vec![0]),
            LogEntry::new(2, vec![1]),
        ]);
        raft_state.become_leader(log_storage.len());

        // Old-term entry replicated on a majority is not committed by counting
        raft_state.match_index[1] = Some(0);
        assert!(!advance_commit_index(&mut raft_state, &log_storage));

        raft_state.match_index[2] = Some(1);
        assert!(advance_commit_index(&mut raft_state, &log_storage));
        assert_eq!(raft_state.commit_index, Some(1));
    }
}
