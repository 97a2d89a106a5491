//! Serialization of structured response messages.
//!
//! A unit may answer with a structured value instead of text; the executor
//! hands it to the configured [`MessageCodec`] before attaching it as the
//! response body.

use anyhow::Context as _;
use serde_json::Value;

/// Serialized form of a structured message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage {
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

pub trait MessageCodec: Send + Sync {
    fn encode(&self, value: &Value) -> anyhow::Result<EncodedMessage>;
}

/// Compact JSON encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    pub pretty: bool,
}

impl MessageCodec for JsonCodec {
    fn encode(&self, value: &Value) -> anyhow::Result<EncodedMessage> {
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        }
        .context("failed to encode response message as JSON")?;
        Ok(EncodedMessage {
            content_type: "application/json",
            bytes,
        })
    }
}
