use actix::prelude::*;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::broadcast;

use super::apply::ApplySink;
use super::election::{create_request_vote, handle_request_vote, handle_request_vote_response};
use super::log::{
    advance_commit_index, create_append_entries, handle_append_entries,
    handle_append_entries_response, take_committed, ReplicationOutcome,
};
use super::rpc::{
    AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse,
};
use super::state::{NodeState, RaftState};
use super::types::{LogEntry, LogIndex, NodeId, Term};
use crate::config::RaftConfig;
use crate::network::Peer;
use crate::storage::{LogStorage, MemoryLogStorage};
use crate::util::errors::{RaftError, Result};

const STATE_CHANNEL_CAPACITY: usize = 256;

/// Messages that the Raft actor can handle

/// Incoming RequestVote RPC
#[derive(Message, Debug)]
#[rtype(result = "RequestVoteResponse")]
pub struct RequestVote(pub RequestVoteRequest);

/// Incoming AppendEntries RPC
#[derive(Message, Debug)]
#[rtype(result = "AppendEntriesResponse")]
pub struct AppendEntries(pub AppendEntriesRequest);

/// Submit a command to be replicated (only the leader accepts it)
#[derive(Message, Debug)]
#[rtype(result = "StartResult")]
pub struct StartCommand {
    pub command: Vec<u8>,
}

/// Where a submitted command landed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartResult {
    /// Log index assigned to the command, None when not leader
    pub index: Option<LogIndex>,
    pub term: Term,
    pub is_leader: bool,
}

/// Subscribe to state-change notifications
#[derive(Message)]
#[rtype(result = "broadcast::Receiver<StateChange>")]
pub struct Subscribe;

/// Emitted on every role transition and every election attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub node: NodeId,
    pub term: Term,
    pub state: NodeState,
}

/// Get current Raft state (for debugging/monitoring)
#[derive(Message)]
#[rtype(result = "RaftStateInfo")]
pub struct GetState;

#[derive(Debug, Clone)]
pub struct RaftStateInfo {
    pub me: NodeId,
    pub state: NodeState,
    pub current_term: Term,
    pub voted_for: Option<NodeId>,
    pub commit_index: Option<LogIndex>,
    pub last_applied: Option<LogIndex>,
    pub last_log_index: Option<LogIndex>,
    pub log: Vec<LogEntry>,
}

// Implement MessageResponse for RaftStateInfo
impl<A, M> actix::dev::MessageResponse<A, M> for RaftStateInfo
where
    A: Actor,
    M: Message<Result = RaftStateInfo>,
{
    fn handle(self, _ctx: &mut A::Context, tx: Option<actix::dev::OneshotSender<M::Result>>) {
        if let Some(tx) = tx {
            let _ = tx.send(self);
        }
    }
}

/// Trigger election timeout
struct ElectionTimeout;

impl Message for ElectionTimeout {
    type Result = ();
}

/// Trigger heartbeat (for leaders)
struct HeartbeatTimeout;

impl Message for HeartbeatTimeout {
    type Result = ();
}

/// Main Raft actor.
///
/// Handlers and RPC completions all run on this actor's context one at a
/// time, so state is never touched concurrently. Completions re-check role
/// and term before acting because time has passed since the request left.
pub struct RaftActor {
    state: RaftState,
    log_storage: Box<dyn LogStorage>,
    apply_sink: Box<dyn ApplySink>,
    config: RaftConfig,
    peers: Vec<Peer>,
    /// Timeout used when the config asks for a fixed draw
    fixed_election_timeout: Duration,
    election_timeout_handle: Option<SpawnHandle>,
    heartbeat_timeout_handle: Option<SpawnHandle>,
    /// Accepted commands whose agreement waits for the previous index to commit
    pending_agreements: BTreeSet<LogIndex>,
    state_tx: broadcast::Sender<StateChange>,
}

impl Actor for RaftActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(
            "Raft node {} started with {} peers",
            self.state.me,
            self.peers.len()
        );
        self.reset_election_timeout(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!("Raft node {} stopped", self.state.me);
    }
}

impl RaftActor {
    /// `peers` lists every cluster member, this node included at index `me`.
    pub fn new(
        me: NodeId,
        peers: Vec<Peer>,
        config: RaftConfig,
        apply_sink: Box<dyn ApplySink>,
    ) -> Result<Self> {
        config.validate().map_err(RaftError::InvalidConfig)?;

        if me >= peers.len() {
            return Err(RaftError::InvalidConfig(format!(
                "node index {} is out of range for {} peers",
                me,
                peers.len()
            )));
        }

        let (state_tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);

        Ok(Self {
            state: RaftState::new(me, peers.len()),
            log_storage: Box::new(MemoryLogStorage::new()),
            apply_sink,
            fixed_election_timeout: config.draw_election_timeout(),
            config,
            peers,
            election_timeout_handle: None,
            heartbeat_timeout_handle: None,
            pending_agreements: BTreeSet::new(),
            state_tx,
        })
    }

    /// Replace the (empty, in-memory) log the node starts with
    pub fn with_log_storage(mut self, log_storage: Box<dyn LogStorage>) -> Self {
        self.log_storage = log_storage;
        self
    }

    fn emit_state(&self) {
        // No subscribers is fine
        let _ = self.state_tx.send(StateChange {
            node: self.state.me,
            term: self.state.current_term,
            state: self.state.state,
        });
    }

    fn role_snapshot(&self) -> (NodeState, Term) {
        (self.state.state, self.state.current_term)
    }

    /// React to a step-down performed by one of the RPC rules
    fn observe_transition(&mut self, before: (NodeState, Term), ctx: &mut Context<Self>) {
        let (prev_state, prev_term) = before;
        let stepped_down = self.state.is_follower()
            && (prev_state != NodeState::Follower || self.state.current_term > prev_term);

        if stepped_down {
            self.on_convert_to_follower(ctx);
        }
    }

    fn on_convert_to_follower(&mut self, ctx: &mut Context<Self>) {
        self.stop_heartbeat_timer(ctx);
        self.pending_agreements.clear();
        self.reset_election_timeout(ctx);
        self.emit_state();
    }

    fn election_timeout(&self) -> Duration {
        if self.config.randomize_election_timeout {
            self.config.draw_election_timeout()
        } else {
            self.fixed_election_timeout
        }
    }

    fn reset_election_timeout(&mut self, ctx: &mut Context<Self>) {
        // Cancel existing timer
        if let Some(handle) = self.election_timeout_handle.take() {
            ctx.cancel_future(handle);
        }

        if self.state.is_leader() {
            return;
        }

        let timeout = self.election_timeout();

        tracing::debug!(
            "Node {} reset election timeout to {}ms",
            self.state.me,
            timeout.as_millis()
        );

        let handle = ctx.run_later(timeout, |_act, ctx| {
            ctx.notify(ElectionTimeout);
        });

        self.election_timeout_handle = Some(handle);
    }

    fn start_heartbeat_timer(&mut self, ctx: &mut Context<Self>) {
        self.stop_heartbeat_timer(ctx);

        let handle = ctx.run_interval(self.config.heartbeat_interval(), |_act, ctx| {
            ctx.notify(HeartbeatTimeout);
        });

        self.heartbeat_timeout_handle = Some(handle);
    }

    fn stop_heartbeat_timer(&mut self, ctx: &mut Context<Self>) {
        if let Some(handle) = self.heartbeat_timeout_handle.take() {
            ctx.cancel_future(handle);
        }
    }

    fn start_election(&mut self, ctx: &mut Context<Self>) {
        self.state.become_candidate();
        self.emit_state();

        let election_term = self.state.current_term;
        let request = create_request_vote(&self.state, self.log_storage.as_ref());

        tracing::info!(
            "Node {} starting election for term {}",
            self.state.me,
            election_term
        );

        // A single-node cluster already has its majority
        if self.state.has_majority() {
            self.convert_to_leader(ctx);
            return;
        }

        let peer_ids: Vec<NodeId> = self.state.peers().collect();
        for peer in peer_ids {
            let call = self.peers[peer].send_request_vote(request.clone());

            ctx.spawn(call.into_actor(self).map(
                move |result, act: &mut RaftActor, ctx: &mut Context<RaftActor>| {
                    let response = match result {
                        Ok(response) => response,
                        Err(e) => {
                            tracing::debug!(
                                "Node {} vote request to {} failed: {}",
                                act.state.me,
                                act.peers[peer].address(),
                                e
                            );
                            return;
                        }
                    };

                    let before = act.role_snapshot();
                    if handle_request_vote_response(&mut act.state, peer, election_term, response)
                    {
                        act.convert_to_leader(ctx);
                    } else {
                        act.observe_transition(before, ctx);
                    }
                },
            ));
        }

        self.reset_election_timeout(ctx);
    }

    fn convert_to_leader(&mut self, ctx: &mut Context<Self>) {
        self.state.become_leader(self.log_storage.len());

        tracing::debug!(
            "Leader {} next_index {:?}, match_index {:?}",
            self.state.me,
            self.state.next_index,
            self.state.match_index
        );

        // Leaders don't run election timers
        if let Some(handle) = self.election_timeout_handle.take() {
            ctx.cancel_future(handle);
        }

        self.emit_state();
        self.start_heartbeat_timer(ctx);
        self.send_heartbeats(ctx);
    }

    fn send_heartbeats(&mut self, ctx: &mut Context<Self>) {
        if !self.state.is_leader() {
            tracing::debug!("Node {} stops heartbeat, not leader anymore", self.state.me);
            return;
        }

        let peer_ids: Vec<NodeId> = self.state.peers().collect();
        for peer in peer_ids {
            self.replicate(peer, None, ctx);
        }
    }

    /// Send `log[next_index[peer]..=upto]` (or the whole tail when `upto` is
    /// None) to one peer and fold the reply into leader state.
    ///
    /// A rejected agreement (`upto` set) is retried with next_index moved
    /// back by one; a rejected heartbeat waits for the next tick.
    fn replicate(&mut self, peer: NodeId, upto: Option<LogIndex>, ctx: &mut Context<Self>) {
        if !self.state.is_leader() {
            return;
        }

        let request = create_append_entries(&self.state, self.log_storage.as_ref(), peer, upto);
        let request_term = request.term;
        let sent_prev_index = request.prev_log_index;
        let sent_last_index = request.last_index();

        tracing::debug!(
            "Leader {} sends {} entries to {} at term {} (prev_log_index {:?})",
            self.state.me,
            request.entries.len(),
            peer,
            request_term,
            sent_prev_index
        );

        let call = self.peers[peer].send_append_entries(request);

        ctx.spawn(call.into_actor(self).map(
            move |result, act: &mut RaftActor, ctx: &mut Context<RaftActor>| {
                let response = match result {
                    Ok(response) => response,
                    Err(e) => {
                        // Next heartbeat or agreement retries
                        tracing::debug!(
                            "Node {} append entries to {} failed: {}",
                            act.state.me,
                            act.peers[peer].address(),
                            e
                        );
                        return;
                    }
                };

                let before = act.role_snapshot();
                match handle_append_entries_response(
                    &mut act.state,
                    peer,
                    request_term,
                    sent_last_index,
                    &response,
                ) {
                    ReplicationOutcome::Replicated => act.commit_replicated(ctx),
                    ReplicationOutcome::Rejected => {
                        if let (Some(index), Some(_)) = (upto, sent_prev_index) {
                            tracing::debug!(
                                "Agreement on entry {} rejected by {}, trying previous entry",
                                index,
                                peer
                            );
                            act.replicate(peer, Some(index), ctx);
                        }
                    }
                    ReplicationOutcome::SteppedDown => act.observe_transition(before, ctx),
                    ReplicationOutcome::Stale => {}
                }
            },
        ));
    }

    /// Commit whatever a quorum now holds, apply it and release waiting agreements
    fn commit_replicated(&mut self, ctx: &mut Context<Self>) {
        if advance_commit_index(&mut self.state, self.log_storage.as_ref()) {
            self.apply_committed();
            self.release_agreements(ctx);
        }
    }

    fn apply_committed(&mut self) {
        for msg in take_committed(&mut self.state, self.log_storage.as_ref()) {
            tracing::debug!(
                "Node {} applies entry {} to the sink",
                self.state.me,
                msg.command_index
            );
            self.apply_sink.apply(msg);
        }
    }

    /// Start agreement for every pending index whose predecessor is committed
    fn release_agreements(&mut self, ctx: &mut Context<Self>) {
        loop {
            let Some(index) = self.pending_agreements.first().copied() else {
                break;
            };

            let previous_committed = index == 0 || self.state.is_committed(index - 1);
            if !previous_committed {
                tracing::debug!(
                    "Agreement on entry {} waits for entry {} (commit_index {:?})",
                    index,
                    index - 1,
                    self.state.commit_index
                );
                break;
            }

            self.pending_agreements.remove(&index);

            if !self.state.is_committed(index) {
                self.start_agreement(index, ctx);
            }
        }
    }

    fn start_agreement(&mut self, index: LogIndex, ctx: &mut Context<Self>) {
        tracing::debug!(
            "Leader {} starts agreement on entry {}, next_index {:?}, match_index {:?}",
            self.state.me,
            index,
            self.state.next_index,
            self.state.match_index
        );

        let peer_ids: Vec<NodeId> = self.state.peers().collect();
        for peer in peer_ids {
            self.replicate(peer, Some(index), ctx);
        }
    }
}

// Handler implementations

impl Handler<RequestVote> for RaftActor {
    type Result = MessageResult<RequestVote>;

    fn handle(&mut self, msg: RequestVote, ctx: &mut Context<Self>) -> Self::Result {
        let before = self.role_snapshot();
        let response = handle_request_vote(&mut self.state, self.log_storage.as_ref(), &msg.0);

        self.observe_transition(before, ctx);

        // Reset election timeout if we granted the vote
        if response.vote_granted {
            self.reset_election_timeout(ctx);
        }

        MessageResult(response)
    }
}

impl Handler<AppendEntries> for RaftActor {
    type Result = MessageResult<AppendEntries>;

    fn handle(&mut self, msg: AppendEntries, ctx: &mut Context<Self>) -> Self::Result {
        let before = self.role_snapshot();
        let response =
            handle_append_entries(&mut self.state, self.log_storage.as_mut(), &msg.0);

        if msg.0.term >= before.1 {
            // Heard from the current leader
            self.observe_transition(before, ctx);
            self.reset_election_timeout(ctx);
        }

        self.apply_committed();

        MessageResult(response)
    }
}

impl Handler<ElectionTimeout> for RaftActor {
    type Result = ();

    fn handle(&mut self, _msg: ElectionTimeout, ctx: &mut Context<Self>) -> Self::Result {
        if self.state.is_leader() {
            // Leaders don't start elections
            return;
        }

        tracing::info!("Node {} election timeout, starting election", self.state.me);
        self.start_election(ctx);
    }
}

impl Handler<HeartbeatTimeout> for RaftActor {
    type Result = ();

    fn handle(&mut self, _msg: HeartbeatTimeout, ctx: &mut Context<Self>) -> Self::Result {
        if !self.state.is_leader() {
            self.stop_heartbeat_timer(ctx);
            return;
        }

        tracing::trace!("Leader {} sending heartbeats", self.state.me);
        self.send_heartbeats(ctx);
    }
}

impl Handler<StartCommand> for RaftActor {
    type Result = MessageResult<StartCommand>;

    fn handle(&mut self, msg: StartCommand, ctx: &mut Context<Self>) -> Self::Result {
        let term = self.state.current_term;

        if !self.state.is_leader() {
            return MessageResult(StartResult {
                index: None,
                term,
                is_leader: false,
            });
        }

        let index = self
            .log_storage
            .append(LogEntry::new(term, msg.command));

        tracing::info!(
            "Leader {} appended entry at index {} (term {})",
            self.state.me,
            index,
            term
        );

        self.pending_agreements.insert(index);
        // Commits at once when this node alone is a quorum
        self.commit_replicated(ctx);
        self.release_agreements(ctx);

        MessageResult(StartResult {
            index: Some(index),
            term,
            is_leader: true,
        })
    }
}

impl Handler<Subscribe> for RaftActor {
    type Result = MessageResult<Subscribe>;

    fn handle(&mut self, _msg: Subscribe, _ctx: &mut Context<Self>) -> Self::Result {
        MessageResult(self.state_tx.subscribe())
    }
}

impl Handler<GetState> for RaftActor {
    type Result = RaftStateInfo;

    fn handle(&mut self, _msg: GetState, _ctx: &mut Context<Self>) -> Self::Result {
        RaftStateInfo {
            me: self.state.me,
            state: self.state.state,
            current_term: self.state.current_term,
            voted_for: self.state.voted_for,
            commit_index: self.state.commit_index,
            last_applied: self.state.last_applied,
            last_log_index: self.log_storage.last_index(),
            log: self.log_storage.entries_from(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{PeerTransport, TransportError};
    use crate::raft::apply::ApplyMsg;
    use crate::raft::election::handle_request_vote;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    /// Remote follower running the real follower rules on its own log,
    /// recording `(prev_log_index, success)` for every AppendEntries
    #[derive(Clone)]
    struct ScriptedFollower {
        inner: Arc<Mutex<FollowerNode>>,
    }

    struct FollowerNode {
        state: RaftState,
        log: MemoryLogStorage,
        appends: Vec<(Option<LogIndex>, bool)>,
    }

    impl ScriptedFollower {
        fn new(me: NodeId, cluster_size: usize, log: Vec<LogEntry>) -> Self {
            Self {
                inner: Arc::new(Mutex::new(FollowerNode {
                    state: RaftState::new(me, cluster_size),
                    log: MemoryLogStorage::from(log),
                    appends: Vec::new(),
                })),
            }
        }

        fn appends(&self) -> Vec<(Option<LogIndex>, bool)> {
            self.inner.lock().unwrap().appends.clone()
        }

        fn log(&self) -> Vec<LogEntry> {
            self.inner.lock().unwrap().log.entries().to_vec()
        }
    }

    #[async_trait]
    impl PeerTransport for ScriptedFollower {
        async fn request_vote(
            &self,
            request: RequestVoteRequest,
        ) -> std::result::Result<RequestVoteResponse, TransportError> {
            let mut node = self.inner.lock().unwrap();
            let FollowerNode { state, log, .. } = &mut *node;
            Ok(handle_request_vote(state, &*log, &request))
        }

        async fn append_entries(
            &self,
            request: AppendEntriesRequest,
        ) -> std::result::Result<AppendEntriesResponse, TransportError> {
            let mut node = self.inner.lock().unwrap();
            let FollowerNode {
                state,
                log,
                appends,
            } = &mut *node;
            let response = handle_append_entries(state, log, &request);
            appends.push((request.prev_log_index, response.success));
            Ok(response)
        }
    }

    fn entries(commands: &[&[u8]]) -> Vec<LogEntry> {
        commands
            .iter()
            .map(|command| LogEntry::new(1, command.to_vec()))
            .collect()
    }

    fn peers(followers: &[ScriptedFollower]) -> Vec<Peer> {
        followers
            .iter()
            .enumerate()
            .map(|(i, follower)| {
                Peer::new(
                    "localhost",
                    8544 + i as u16,
                    false,
                    format!("node-{}", i),
                    Arc::new(follower.clone()),
                )
            })
            .collect()
    }

    /// Timers slow enough that only the RPCs under test run
    fn slow_config() -> RaftConfig {
        RaftConfig {
            election_timeout_min_ms: 1000,
            election_timeout_max_ms: 2000,
            heartbeat_interval_ms: 900,
            ..RaftConfig::default()
        }
    }

    async fn wait_for<F>(addr: &Addr<RaftActor>, mut done: F) -> RaftStateInfo
    where
        F: FnMut(&RaftStateInfo) -> bool,
    {
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            let info = addr.send(GetState).await.unwrap();
            if done(&info) {
                return info;
            }
            assert!(Instant::now() < deadline, "timed out in state {:?}", info);
            actix_rt::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[actix_rt::test]
    async fn test_rejected_agreement_backs_off_one_entry_at_a_time() {
        let seeded: &[&[u8]] = &[b"a", b"b", b"c"];

        // Node 0 is the actor under test, node 1 is in sync, node 2 holds only the first entry
        let followers = vec![
            ScriptedFollower::new(0, 3, vec![]),
            ScriptedFollower::new(1, 3, entries(seeded)),
            ScriptedFollower::new(2, 3, entries(&seeded[..1])),
        ];
        let lagging = followers[2].clone();

        let applied: Arc<Mutex<Vec<ApplyMsg>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_log = applied.clone();
        let sink = move |msg: ApplyMsg| sink_log.lock().unwrap().push(msg);

        let addr = RaftActor::new(0, peers(&followers), slow_config(), Box::new(sink))
            .unwrap()
            .with_log_storage(Box::new(MemoryLogStorage::from(entries(seeded))))
            .start();

        addr.send(ElectionTimeout).await.unwrap();

        // The in-sync follower lets the seeded prefix commit
        wait_for(&addr, |info| info.commit_index == Some(2)).await;
        let deadline = Instant::now() + Duration::from_secs(3);
        while lagging.appends().is_empty() {
            assert!(Instant::now() < deadline, "no heartbeat reached the lagging follower");
            actix_rt::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(lagging.appends(), vec![(Some(2), false)]);

        let result = addr
            .send(StartCommand {
                command: b"d".to_vec(),
            })
            .await
            .unwrap();
        assert_eq!(result.index, Some(3));

        let info = wait_for(&addr, |info| info.commit_index == Some(3)).await;

        let deadline = Instant::now() + Duration::from_secs(3);
        while lagging.log() != info.log {
            assert!(Instant::now() < deadline, "lagging follower never caught up");
            actix_rt::time::sleep(Duration::from_millis(10)).await;
        }

        // One entry back per rejection until the logs match at index 0
        assert_eq!(
            lagging.appends()[..3],
            [(Some(2), false), (Some(1), false), (Some(0), true)]
        );
        assert_eq!(lagging.log().len(), 4);

        let indices: Vec<LogIndex> = applied
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.command_index)
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_fixed_election_timeout_is_reused() {
        let followers = vec![
            ScriptedFollower::new(0, 2, vec![]),
            ScriptedFollower::new(1, 2, vec![]),
        ];
        let config = RaftConfig {
            randomize_election_timeout: false,
            ..RaftConfig::default()
        };
        let actor = RaftActor::new(0, peers(&followers), config, Box::new(|_: ApplyMsg| {}))
            .unwrap();

        let first = actor.election_timeout();
        assert_eq!(first, actor.fixed_election_timeout);
        for _ in 0..20 {
            assert_eq!(actor.election_timeout(), first);
        }
        assert!(first >= actor.config.election_timeout_min());
        assert!(first < actor.config.election_timeout_max());
    }

    #[test]
    fn test_randomized_election_timeout_stays_in_range() {
        let followers = vec![
            ScriptedFollower::new(0, 2, vec![]),
            ScriptedFollower::new(1, 2, vec![]),
        ];
        let actor = RaftActor::new(
            0,
            peers(&followers),
            RaftConfig::default(),
            Box::new(|_: ApplyMsg| {}),
        )
        .unwrap();

        for _ in 0..50 {
            let timeout = actor.election_timeout();
            assert!(timeout >= actor.config.election_timeout_min());
            assert!(timeout < actor.config.election_timeout_max());
        }
    }

    #[test]
    fn test_out_of_range_node_is_rejected() {
        let followers = vec![ScriptedFollower::new(0, 1, vec![])];
        let result = RaftActor::new(
            3,
            peers(&followers),
            RaftConfig::default(),
            Box::new(|_: ApplyMsg| {}),
        );
        assert!(matches!(result, Err(RaftError::InvalidConfig(_))));
    }
}
