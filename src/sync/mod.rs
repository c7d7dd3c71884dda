//! Apply sink for the session/storage sync service.
//!
//! Committed log entries carry JSON-encoded [`SyncCommand`]s. The consensus
//! engine never looks inside them; [`SyncStateSink`] decodes each one and
//! updates the replicated session store and per-plugin key/value storage.

pub mod command;
pub mod sink;

pub use command::{SessionData, StorageAction, SyncCommand};
pub use sink::SyncStateSink;
