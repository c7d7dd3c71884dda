use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::command::{PluginStorage, SessionData, StorageAction, SyncCommand};
use crate::raft::apply::{ApplyMsg, ApplySink};
use crate::raft::types::LogIndex;

#[derive(Debug, Default)]
struct SyncState {
    sessions: HashMap<String, Value>,
    storage: HashMap<String, PluginStorage>,
    last_index: Option<LogIndex>,
}

/// Shared handle to the state built from committed sync commands.
///
/// Clones share the same state, so one clone can be boxed into the engine
/// while others serve reads.
#[derive(Debug, Clone, Default)]
pub struct SyncStateSink {
    state: Arc<Mutex<SyncState>>,
}

impl SyncStateSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session(&self, sid: &str) -> Option<Value> {
        self.state().sessions.get(sid).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.state().sessions.len()
    }

    pub fn storage_value(&self, plugin_id: &str, key: &str) -> Option<Value> {
        self.state()
            .storage
            .get(plugin_id)
            .and_then(|dict| dict.get(key))
            .cloned()
    }

    pub fn plugin_storage(&self, plugin_id: &str) -> PluginStorage {
        self.state()
            .storage
            .get(plugin_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Index of the last command applied
    pub fn last_index(&self) -> Option<LogIndex> {
        self.state().last_index
    }

    /// Commands that rebuild the current state from scratch, for a client
    /// that connects after the fact
    pub fn snapshot_commands(&self) -> Vec<SyncCommand> {
        let state = self.state();

        let mut sessions: Vec<SessionData> = state
            .sessions
            .iter()
            .map(|(sid, session)| SessionData {
                sid: sid.clone(),
                session: session.clone(),
            })
            .collect();
        sessions.sort_by(|a, b| a.sid.cmp(&b.sid));

        vec![
            SyncCommand::Sessions(sessions),
            SyncCommand::Storage(StorageAction::Init(state.storage.clone())),
        ]
    }

    fn apply_command(state: &mut SyncState, command: SyncCommand) {
        match command {
            SyncCommand::Session(data) => {
                state.sessions.insert(data.sid, data.session);
            }
            SyncCommand::Sessions(all) => {
                for data in all {
                    state.sessions.insert(data.sid, data.session);
                }
            }
            SyncCommand::Storage(action) => Self::apply_storage(state, action),
        }
    }

    fn apply_storage(state: &mut SyncState, action: StorageAction) {
        match action {
            StorageAction::Init(plugins) => {
                for (plugin_id, dict) in plugins {
                    state.storage.insert(plugin_id, dict);
                }
            }
            StorageAction::Set {
                plugin_id,
                key,
                value,
            } => {
                state.storage.entry(plugin_id).or_default().insert(key, value);
            }
            StorageAction::SetAll { plugin_id, dict } => {
                state.storage.insert(plugin_id, dict);
            }
            StorageAction::Delete { plugin_id, key } => {
                if let Some(dict) = state.storage.get_mut(&plugin_id) {
                    dict.remove(&key);
                }
            }
            StorageAction::DeleteAll { plugin_id } => {
                state.storage.insert(plugin_id, PluginStorage::new());
            }
        }
    }
}

impl ApplySink for SyncStateSink {
    fn apply(&mut self, msg: ApplyMsg) {
        let mut state = self.state();
        state.last_index = Some(msg.command_index);

        if !msg.command_valid {
            return;
        }

        match SyncCommand::decode(&msg.command) {
            Ok(command) => {
                tracing::debug!("Applying sync command {} : {:?}", msg.command_index, command);
                Self::apply_command(&mut state, command);
            }
            Err(e) => {
                tracing::warn!(
                    "Skipping undecodable command at index {}: {}",
                    msg.command_index,
                    e
                );
            }
        }
    }
}
