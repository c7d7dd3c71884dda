pub mod codec;
pub mod local;
pub mod peer;
pub mod transport;

pub use codec::RaftCodec;
pub use local::{LocalNetwork, LocalTransport};
pub use peer::Peer;
pub use transport::{PeerTransport, TransportError};
