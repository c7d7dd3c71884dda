use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::raft::rpc::RaftMessage;
use crate::util::errors::{RaftError, Result};

// Constants for message size management
const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024; // 10MB
const LENGTH_PREFIX: usize = 4;

/// Length-prefixed bincode frames carrying [`RaftMessage`]s.
///
/// Frame layout: 4-byte big-endian payload length, then the payload.
#[derive(Debug, Clone, Default)]
pub struct RaftCodec;

/// Get bincode configuration for consistent encoding/decoding
fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard().with_variable_int_encoding()
}

impl RaftCodec {
    /// Encode a single message into a standalone frame
    pub fn encode_frame(message: &RaftMessage) -> Result<BytesMut> {
        let mut buf = BytesMut::new();
        RaftCodec.encode(message.clone(), &mut buf)?;
        Ok(buf)
    }

    /// Decode exactly one message from a complete frame
    pub fn decode_frame(mut frame: BytesMut) -> Result<RaftMessage> {
        match RaftCodec.decode(&mut frame)? {
            Some(message) if frame.is_empty() => Ok(message),
            Some(_) => Err(RaftError::Framing(
                "Trailing bytes after frame".to_string(),
            )),
            None => Err(RaftError::Framing("Incomplete frame".to_string())),
        }
    }
}

impl Encoder<RaftMessage> for RaftCodec {
    type Error = RaftError;

    fn encode(&mut self, item: RaftMessage, dst: &mut BytesMut) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(&item, bincode_config())?;

        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(RaftError::Framing(format!(
                "Serialized message size {} exceeds maximum",
                bytes.len()
            )));
        }

        dst.reserve(LENGTH_PREFIX + bytes.len());
        dst.put_u32(bytes.len() as u32);
        dst.put_slice(&bytes);
        Ok(())
    }
}

impl Decoder for RaftCodec {
    type Item = RaftMessage;
    type Error = RaftError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RaftMessage>> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let mut len_bytes = [0u8; LENGTH_PREFIX];
        len_bytes.copy_from_slice(&src[..LENGTH_PREFIX]);
        let len = u32::from_be_bytes(len_bytes) as usize;

        if len > MAX_MESSAGE_SIZE {
            return Err(RaftError::Framing(format!(
                "Message size {} exceeds maximum {}",
                len, MAX_MESSAGE_SIZE
            )));
        }

        if len == 0 {
            return Err(RaftError::Framing(
                "Message size cannot be zero".to_string(),
            ));
        }

        if src.len() < LENGTH_PREFIX + len {
            src.reserve(LENGTH_PREFIX + len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX);
        let payload = src.split_to(len);
        let (message, _) =
            bincode::serde::decode_from_slice::<RaftMessage, _>(&payload, bincode_config())?;

        Ok(Some(message))
    }
}
