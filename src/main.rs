use actix::prelude::*;
use anyhow::Context as _;
use raft_sync::{
    config::Config,
    network::LocalNetwork,
    raft::{GetState, NodeState, RaftActor, StartCommand, Subscribe},
    sync::{SessionData, StorageAction, SyncCommand, SyncStateSink},
};
use serde_json::json;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

const LEADER_POLL_INTERVAL: Duration = Duration::from_millis(100);
const LEADER_WAIT_ATTEMPTS: usize = 50;

#[actix_rt::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path).with_context(|| format!("loading {}", path))?,
        None => Config::default(),
    };

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        "Starting {}-node sync cluster",
        config.cluster.peers.len()
    );

    let network = LocalNetwork::new();
    let mut nodes = Vec::new();

    for (me, peer) in config.cluster.peers.iter().enumerate() {
        let peers = network.peers_for(
            &peer.instance_id,
            &config.cluster.peers,
            config.raft.rpc_timeout(),
        );
        let sink = SyncStateSink::new();
        let actor = RaftActor::new(me, peers, config.raft.clone(), Box::new(sink.clone()))?;
        let addr = actor.start();

        network.register(peer.instance_id.clone(), addr.clone());
        tracing::info!("Node {} listening as {}", me, peer.instance_id);

        let mut changes = addr.send(Subscribe).await?;
        actix_rt::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => tracing::info!(
                        "Node {} is now {} in term {}",
                        change.node,
                        change.state,
                        change.term
                    ),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Dropped {} state changes", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        nodes.push((addr, sink));
    }

    let leader = wait_for_leader(&nodes).await?;
    tracing::info!("Node {} leads the cluster", leader);

    let commands = vec![
        SyncCommand::Session(SessionData {
            sid: "demo-session".to_string(),
            session: json!({"username": "ibmuser"}),
        }),
        SyncCommand::Storage(StorageAction::Set {
            plugin_id: "org.zowe.editor".to_string(),
            key: "theme".to_string(),
            value: json!("dark"),
        }),
    ];

    // Commands enter through the local node and go to the leader when it refuses them
    let local = config.cluster.me;
    for command in commands {
        let bytes = command.encode()?;
        let mut result = nodes[local]
            .0
            .send(StartCommand {
                command: bytes.clone(),
            })
            .await?;

        if !result.is_leader {
            tracing::info!("Node {} is not leader, forwarding to node {}", local, leader);
            result = nodes[leader].0.send(StartCommand { command: bytes }).await?;
        }
        tracing::info!("Submitted {:?}: {:?}", command, result);
    }

    actix_rt::time::sleep(config.raft.election_timeout_max()).await;

    let local_sink = &nodes[local].1;
    tracing::info!(
        "Local node {} applied up to {:?}, snapshot {:?}",
        local,
        local_sink.last_index(),
        local_sink.snapshot_commands()
    );

    for (me, (_, sink)) in nodes.iter().enumerate().filter(|(me, _)| *me != local) {
        tracing::debug!(
            "Node {} applied up to {:?}, {} sessions",
            me,
            sink.last_index(),
            sink.session_count()
        );
    }

    Ok(())
}

async fn wait_for_leader(nodes: &[(Addr<RaftActor>, SyncStateSink)]) -> anyhow::Result<usize> {
    for _ in 0..LEADER_WAIT_ATTEMPTS {
        for (me, (addr, _)) in nodes.iter().enumerate() {
            if addr.send(GetState).await?.state == NodeState::Leader {
                return Ok(me);
            }
        }
        actix_rt::time::sleep(LEADER_POLL_INTERVAL).await;
    }

    anyhow::bail!("no leader elected")
}
