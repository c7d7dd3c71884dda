pub mod actor;
pub mod apply;
pub mod election;
pub mod log;
pub mod rpc;
pub mod state;
pub mod types;

pub use actor::{
    AppendEntries, GetState, RaftActor, RaftStateInfo, RequestVote, StartCommand, StartResult,
    StateChange, Subscribe,
};
pub use apply::{ApplyMsg, ApplySink};
pub use state::NodeState;
pub use types::{LogEntry, LogIndex, NodeId, Term};
