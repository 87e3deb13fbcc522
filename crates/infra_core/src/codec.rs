//! JSON encoding of [`InfraMessage`] for the wire.

use infra_api::{BusError, InfraMessage};

const PREVIEW_CHARS: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode message: {input}")]
    Decode {
        input: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<CodecError> for BusError {
    fn from(err: CodecError) -> Self {
        BusError::Codec(err.to_string())
    }
}

/// Converts messages to and from their JSON wire form.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

impl MessageCodec {
    pub fn encode(&self, message: &InfraMessage) -> Result<String, CodecError> {
        serde_json::to_string(message).map_err(CodecError::Encode)
    }

    /// Decodes a message. The error quotes at most the first 200 characters of `json`.
    pub fn decode(&self, json: &str) -> Result<InfraMessage, CodecError> {
        serde_json::from_str(json).map_err(|source| CodecError::Decode {
            input: preview(json),
            source,
        })
    }
}

fn preview(s: &str) -> String {
    match s.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...(truncated)", &s[..cut]),
        None => s.to_string(),
    }
}
