//! The standard message envelope carried over Redis and the realtime channel.
//!
//! The payload stays an opaque string so this crate never has to know the
//! schema of domain messages. `payload_format` tells consumers whether the
//! string holds JSON or plain text.
//!
//! On the wire the envelope is a JSON object with camelCase keys:
//!
//! ```json
//! {
//!   "environment": "prod",
//!   "fromServerId": "village-1",
//!   "type": "party.invite",
//!   "payload": "{\"partyId\":\"p-1\"}",
//!   "payloadFormat": "json",
//!   "meta": { "messageId": "…", "createdAtEpochMillis": 1700000000000, "headers": {} }
//! }
//! ```

use crate::{current_epoch_millis, is_blank, require_not_blank, ContractError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// How the payload string of an [`InfraMessage`] should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PayloadFormat {
    #[default]
    Json,
    Text,
}

impl PayloadFormat {
    /// The lowercase name used on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            PayloadFormat::Json => "json",
            PayloadFormat::Text => "text",
        }
    }

    /// Resolves a wire name leniently.
    ///
    /// Matching trims whitespace and ignores case. Blank or unknown names
    /// fall back to [`PayloadFormat::Json`].
    pub fn from_wire_name(name: &str) -> Self {
        let name = name.trim();
        if name.eq_ignore_ascii_case("text") {
            PayloadFormat::Text
        } else {
            PayloadFormat::Json
        }
    }
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl Serialize for PayloadFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.wire_name())
    }
}

impl<'de> Deserialize<'de> for PayloadFormat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(PayloadFormat::from_wire_name(raw.as_deref().unwrap_or_default()))
    }
}

/// Standard metadata attached to every message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawMeta")]
pub struct MessageMeta {
    message_id: String,
    created_at_epoch_millis: i64,
    headers: BTreeMap<String, String>,
}

impl MessageMeta {
    /// Fresh metadata: a random message id, the current time, no headers.
    pub fn create() -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            created_at_epoch_millis: current_epoch_millis(),
            headers: BTreeMap::new(),
        }
    }

    /// Builds metadata from possibly incomplete parts.
    ///
    /// A blank id is replaced with a random UUID and a non-positive
    /// timestamp with the current time.
    pub fn new(
        message_id: impl Into<String>,
        created_at_epoch_millis: i64,
        headers: BTreeMap<String, String>,
    ) -> Self {
        let message_id = message_id.into();
        Self {
            message_id: if is_blank(&message_id) {
                Uuid::new_v4().to_string()
            } else {
                message_id
            },
            created_at_epoch_millis: if created_at_epoch_millis <= 0 {
                current_epoch_millis()
            } else {
                created_at_epoch_millis
            },
            headers,
        }
    }

    /// Same id and timestamp, headers replaced.
    pub fn with_headers(&self, headers: BTreeMap<String, String>) -> Self {
        Self {
            message_id: self.message_id.clone(),
            created_at_epoch_millis: self.created_at_epoch_millis,
            headers,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn created_at_epoch_millis(&self) -> i64 {
        self.created_at_epoch_millis
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

impl Default for MessageMeta {
    fn default() -> Self {
        Self::create()
    }
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawMeta {
    message_id: Option<String>,
    created_at_epoch_millis: i64,
    headers: Option<BTreeMap<String, String>>,
}

impl From<RawMeta> for MessageMeta {
    fn from(raw: RawMeta) -> Self {
        MessageMeta::new(
            raw.message_id.unwrap_or_default(),
            raw.created_at_epoch_millis,
            raw.headers.unwrap_or_default(),
        )
    }
}

/// The envelope every node publishes and consumes.
///
/// Environment, origin server id and type are always non-blank, both when
/// built in code and when decoded from the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawMessage")]
pub struct InfraMessage {
    environment: String,
    from_server_id: String,
    #[serde(rename = "type")]
    message_type: String,
    payload: String,
    payload_format: PayloadFormat,
    meta: MessageMeta,
}

impl InfraMessage {
    /// Creates a message, validating the identifying fields.
    ///
    /// # Arguments
    ///
    /// * `environment` - Environment the message belongs to
    /// * `from_server_id` - Id of the publishing node
    /// * `message_type` - Type string, usually `<domain>.<action>`
    /// * `payload` - Opaque payload string
    /// * `payload_format` - How to interpret `payload`
    /// * `meta` - Message metadata
    ///
    /// # Returns
    ///
    /// The message, or [`ContractError::Blank`] naming the first blank field.
    pub fn new(
        environment: impl Into<String>,
        from_server_id: impl Into<String>,
        message_type: impl Into<String>,
        payload: impl Into<String>,
        payload_format: PayloadFormat,
        meta: MessageMeta,
    ) -> Result<Self, ContractError> {
        let environment = environment.into();
        let from_server_id = from_server_id.into();
        let message_type = message_type.into();
        require_not_blank(&environment, "environment")?;
        require_not_blank(&from_server_id, "from_server_id")?;
        require_not_blank(&message_type, "type")?;
        Ok(Self {
            environment,
            from_server_id,
            message_type,
            payload: payload.into(),
            payload_format,
            meta,
        })
    }

    /// A message whose payload is a JSON document.
    pub fn json(
        environment: impl Into<String>,
        from_server_id: impl Into<String>,
        message_type: impl Into<String>,
        payload_json: impl Into<String>,
    ) -> Result<Self, ContractError> {
        Self::new(
            environment,
            from_server_id,
            message_type,
            payload_json,
            PayloadFormat::Json,
            MessageMeta::create(),
        )
    }

    /// A message whose payload is plain text.
    pub fn text(
        environment: impl Into<String>,
        from_server_id: impl Into<String>,
        message_type: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<Self, ContractError> {
        Self::new(
            environment,
            from_server_id,
            message_type,
            text,
            PayloadFormat::Text,
            MessageMeta::create(),
        )
    }

    /// Copy of this message with its headers replaced.
    pub fn with_headers(&self, headers: BTreeMap<String, String>) -> Self {
        Self {
            meta: self.meta.with_headers(headers),
            ..self.clone()
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn from_server_id(&self) -> &str {
        &self.from_server_id
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn payload_format(&self) -> PayloadFormat {
        self.payload_format
    }

    pub fn meta(&self) -> &MessageMeta {
        &self.meta
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    #[serde(default)]
    environment: Option<String>,
    #[serde(default)]
    from_server_id: Option<String>,
    #[serde(default, rename = "type")]
    message_type: Option<String>,
    #[serde(default)]
    payload: Option<String>,
    #[serde(default)]
    payload_format: PayloadFormat,
    #[serde(default)]
    meta: Option<MessageMeta>,
}

impl TryFrom<RawMessage> for InfraMessage {
    type Error = ContractError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        InfraMessage::new(
            raw.environment.unwrap_or_default(),
            raw.from_server_id.unwrap_or_default(),
            raw.message_type.unwrap_or_default(),
            raw.payload.unwrap_or_default(),
            raw.payload_format,
            raw.meta.unwrap_or_default(),
        )
    }
}
