use actix::Addr;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::codec::RaftCodec;
use super::peer::Peer;
use super::transport::{PeerTransport, TransportError};
use crate::config::PeerConfig;
use crate::raft::actor::{AppendEntries, RaftActor, RequestVote};
use crate::raft::rpc::{
    AppendEntriesRequest, AppendEntriesResponse, RaftMessage, RequestVoteRequest,
    RequestVoteResponse,
};

#[derive(Default)]
struct Registry {
    nodes: HashMap<String, Addr<RaftActor>>,
    isolated: HashSet<String>,
}

/// In-process network: maps instance ids to running nodes and lets callers
/// cut a node off from everyone else.
///
/// Every RPC crossing it goes through [`RaftCodec`] framing in both
/// directions, so what runs here is what a socket transport would carry.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    registry: Arc<Mutex<Registry>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a running node
    pub fn register(&self, instance_id: impl Into<String>, addr: Addr<RaftActor>) {
        self.registry().nodes.insert(instance_id.into(), addr);
    }

    /// Check if a node is registered
    pub fn contains(&self, instance_id: &str) -> bool {
        self.registry().nodes.contains_key(instance_id)
    }

    /// Drop every RPC to or from this node until [`LocalNetwork::heal`]
    pub fn isolate(&self, instance_id: &str) {
        tracing::info!("Isolating {}", instance_id);
        self.registry().isolated.insert(instance_id.to_string());
    }

    pub fn heal(&self, instance_id: &str) {
        tracing::info!("Reconnecting {}", instance_id);
        self.registry().isolated.remove(instance_id);
    }

    pub fn is_isolated(&self, instance_id: &str) -> bool {
        self.registry().isolated.contains(instance_id)
    }

    /// Transport carrying RPCs from `from` to `to`
    pub fn transport(&self, from: &str, to: &str) -> LocalTransport {
        LocalTransport {
            network: self.clone(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Peer handles as seen by node `me`, one per cluster member in order
    pub fn peers_for(&self, me: &str, cluster: &[PeerConfig], rpc_timeout: Duration) -> Vec<Peer> {
        cluster
            .iter()
            .map(|config| {
                let transport = Arc::new(self.transport(me, &config.instance_id));
                Peer::from_config(config, transport).with_rpc_timeout(rpc_timeout)
            })
            .collect()
    }

    /// Address of `to` if the link from `from` is up
    fn route(&self, from: &str, to: &str) -> Result<Addr<RaftActor>, TransportError> {
        let registry = self.registry();
        if registry.isolated.contains(from) || registry.isolated.contains(to) {
            return Err(TransportError::Unreachable(to.to_string()));
        }
        registry
            .nodes
            .get(to)
            .cloned()
            .ok_or_else(|| TransportError::Unreachable(to.to_string()))
    }
}

/// One directed link of a [`LocalNetwork`]
#[derive(Clone)]
pub struct LocalTransport {
    network: LocalNetwork,
    from: String,
    to: String,
}

impl LocalTransport {
    fn link_up(&self) -> Result<Addr<RaftActor>, TransportError> {
        self.network.route(&self.from, &self.to)
    }
}

/// Push a message through the wire codec and back
fn over_wire(message: RaftMessage) -> Result<RaftMessage, TransportError> {
    let frame =
        RaftCodec::encode_frame(&message).map_err(|e| TransportError::Codec(e.to_string()))?;
    RaftCodec::decode_frame(frame).map_err(|e| TransportError::Codec(e.to_string()))
}

fn unexpected(message: &RaftMessage) -> TransportError {
    TransportError::Codec(format!("Unexpected message on the wire: {:?}", message))
}

#[async_trait]
impl PeerTransport for LocalTransport {
    async fn request_vote(
        &self,
        request: RequestVoteRequest,
    ) -> Result<RequestVoteResponse, TransportError> {
        let addr = self.link_up()?;
        let request = match over_wire(RaftMessage::RequestVote(request))? {
            RaftMessage::RequestVote(request) => request,
            other => return Err(unexpected(&other)),
        };

        let response = addr
            .send(RequestVote(request))
            .await
            .map_err(|e| TransportError::Unreachable(format!("{}: {}", self.to, e)))?;

        // The link may have gone down while the request was in flight
        self.link_up()?;
        match over_wire(RaftMessage::RequestVoteResponse(response))? {
            RaftMessage::RequestVoteResponse(response) => Ok(response),
            other => Err(unexpected(&other)),
        }
    }

    async fn append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, TransportError> {
        let addr = self.link_up()?;
        let request = match over_wire(RaftMessage::AppendEntries(request))? {
            RaftMessage::AppendEntries(request) => request,
            other => return Err(unexpected(&other)),
        };

        let response = addr
            .send(AppendEntries(request))
            .await
            .map_err(|e| TransportError::Unreachable(format!("{}: {}", self.to, e)))?;

        self.link_up()?;
        match over_wire(RaftMessage::AppendEntriesResponse(response))? {
            RaftMessage::AppendEntriesResponse(response) => Ok(response),
            other => Err(unexpected(&other)),
        }
    }
}
