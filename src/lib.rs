pub mod config;
pub mod network;
pub mod raft;
pub mod storage;
pub mod sync;
pub mod util;
