//! Cast v2 framing: a 4-byte big-endian length followed by a protobuf
//! `CastMessage`.

use prost::Message;
use serde_json::Value;

use crate::errors::{CastError, Result};
use crate::transport::{ChannelRoute, InboundMessage};

/// Largest message body a device accepts.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

const HEADER_LEN: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ProtocolVersion {
    Castv210 = 0,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum PayloadType {
    String = 0,
    Binary = 1,
}

#[derive(Clone, PartialEq, Message)]
pub struct CastMessage {
    #[prost(enumeration = "ProtocolVersion", required, tag = "1")]
    pub protocol_version: i32,
    #[prost(string, required, tag = "2")]
    pub source_id: String,
    #[prost(string, required, tag = "3")]
    pub destination_id: String,
    #[prost(string, required, tag = "4")]
    pub namespace: String,
    #[prost(enumeration = "PayloadType", required, tag = "5")]
    pub payload_type: i32,
    #[prost(string, optional, tag = "6")]
    pub payload_utf8: Option<String>,
    #[prost(bytes = "vec", optional, tag = "7")]
    pub payload_binary: Option<Vec<u8>>,
}

impl CastMessage {
    /// Outbound JSON message on `route`.
    pub fn json(route: &ChannelRoute, payload: &Value) -> Self {
        Self {
            protocol_version: ProtocolVersion::Castv210 as i32,
            source_id: route.sender_id.clone(),
            destination_id: route.receiver_id.clone(),
            namespace: route.namespace.clone(),
            payload_type: PayloadType::String as i32,
            payload_utf8: Some(payload.to_string()),
            payload_binary: None,
        }
    }

    /// Parses the JSON payload. Binary payloads are rejected.
    pub fn into_inbound(self) -> Result<InboundMessage> {
        let text = match (PayloadType::try_from(self.payload_type), self.payload_utf8) {
            (Ok(PayloadType::String), Some(text)) => text,
            _ => {
                return Err(CastError::frame(&format!(
                    "unsupported payload on {}",
                    self.namespace
                )));
            }
        };
        let payload: Value = serde_json::from_str(&text)?;
        Ok(InboundMessage {
            source_id: self.source_id,
            destination_id: self.destination_id,
            namespace: self.namespace,
            payload,
        })
    }
}

/// Prefixes the encoded message with its length.
pub fn encode_frame(message: &CastMessage) -> Result<Vec<u8>> {
    let len = message.encoded_len();
    if len > MAX_FRAME_LEN {
        return Err(CastError::frame(&format!("message too large ({len} bytes)")));
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + len);
    frame.extend_from_slice(&(len as u32).to_be_bytes());
    message
        .encode(&mut frame)
        .map_err(|e| CastError::frame(&e.to_string()))?;
    Ok(frame)
}

/// Accumulates bytes read from the socket and splits them into messages.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete message, or `None` if more bytes are needed.
    pub fn next_message(&mut self) -> Result<Option<CastMessage>> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&self.buffer[..HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_FRAME_LEN {
            return Err(CastError::frame(&format!("frame too large ({len} bytes)")));
        }
        if self.buffer.len() < HEADER_LEN + len {
            return Ok(None);
        }

        let body: Vec<u8> = self.buffer.drain(..HEADER_LEN + len).skip(HEADER_LEN).collect();
        Ok(Some(CastMessage::decode(body.as_slice())?))
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
