pub mod log_storage;

pub use log_storage::{LogStorage, MemoryLogStorage};
