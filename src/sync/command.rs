use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::util::errors::Result;

/// Key/value dictionary of one plugin
pub type PluginStorage = HashMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub sid: String,
    pub session: Value,
}

/// A replicated change, tagged the way sync clients expect it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum SyncCommand {
    /// Upsert a single session
    Session(SessionData),
    /// Upsert many sessions at once
    Sessions(Vec<SessionData>),
    Storage(StorageAction),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum StorageAction {
    /// Replace storage of every listed plugin
    Init(HashMap<String, PluginStorage>),
    #[serde(rename_all = "camelCase")]
    Set {
        plugin_id: String,
        key: String,
        value: Value,
    },
    #[serde(rename_all = "camelCase")]
    SetAll {
        plugin_id: String,
        dict: PluginStorage,
    },
    #[serde(rename_all = "camelCase")]
    Delete { plugin_id: String, key: String },
    #[serde(rename_all = "camelCase")]
    DeleteAll { plugin_id: String },
}

impl SyncCommand {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
