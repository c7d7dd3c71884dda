use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

use super::transport::{PeerTransport, TransportError};
use crate::config::PeerConfig;
use crate::raft::rpc::{
    AppendEntriesRequest, AppendEntriesResponse, RequestVoteRequest, RequestVoteResponse,
};

const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_millis(500);

/// A named remote node. Address resolution happens before construction;
/// the handle only delegates RPCs to its transport.
#[derive(Clone)]
pub struct Peer {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub instance_id: String,
    transport: Arc<dyn PeerTransport>,
    rpc_timeout: Duration,
}

impl Peer {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        secure: bool,
        instance_id: impl Into<String>,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            secure,
            instance_id: instance_id.into(),
            transport,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }

    /// Build a peer from a registry record
    pub fn from_config(config: &PeerConfig, transport: Arc<dyn PeerTransport>) -> Self {
        Self::new(
            config.host.clone(),
            config.port,
            config.secure,
            config.instance_id.clone(),
            transport,
        )
    }

    pub fn with_rpc_timeout(mut self, rpc_timeout: Duration) -> Self {
        self.rpc_timeout = rpc_timeout;
        self
    }

    pub fn address(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn send_request_vote(
        &self,
        request: RequestVoteRequest,
    ) -> BoxFuture<'static, Result<RequestVoteResponse, TransportError>> {
        let transport = self.transport.clone();
        let rpc_timeout = self.rpc_timeout;
        Box::pin(async move {
            tokio::time::timeout(rpc_timeout, transport.request_vote(request))
                .await
                .map_err(|_| TransportError::Timeout)?
        })
    }

    pub fn send_append_entries(
        &self,
        request: AppendEntriesRequest,
    ) -> BoxFuture<'static, Result<AppendEntriesResponse, TransportError>> {
        let transport = self.transport.clone();
        let rpc_timeout = self.rpc_timeout;
        Box::pin(async move {
            tokio::time::timeout(rpc_timeout, transport.append_entries(request))
                .await
                .map_err(|_| TransportError::Timeout)?
        })
    }
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("instance_id", &self.instance_id)
            .field("address", &self.address())
            .finish()
    }
}
