use super::types::LogIndex;

/// A committed command handed to the apply sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyMsg {
    pub command: Vec<u8>,
    pub command_valid: bool,
    /// Log index of the command (0-based)
    pub command_index: LogIndex,
}

/// Consumer of committed log entries.
///
/// The engine calls [`ApplySink::apply`] once per committed entry, strictly in
/// index order. What a command means is entirely up to the sink.
pub trait ApplySink: Send {
    fn apply(&mut self, msg: ApplyMsg);
}

impl<F> ApplySink for F
where
    F: FnMut(ApplyMsg) + Send,
{
    fn apply(&mut self, msg: ApplyMsg) {
        self(msg)
    }
}
