use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Metadata key holding the correlation stream name
pub const CORRELATION_STREAM_NAME: &str = "correlationStreamName";
pub const CAUSATION_MESSAGE_STREAM_NAME: &str = "causationMessageStreamName";
pub const CAUSATION_MESSAGE_POSITION: &str = "causationMessagePosition";
pub const CAUSATION_MESSAGE_GLOBAL_POSITION: &str = "causationMessageGlobalPosition";
pub const REPLY_STREAM_NAME: &str = "replyStreamName";
pub const SCHEMA_VERSION: &str = "schemaVersion";

/// Message data for writing to the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteMessage {
    /// Unique identifier; generated on write when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,

    /// Message type (e.g., "Withdrawn", "DepositRequested")
    #[serde(rename = "type")]
    pub message_type: String,

    /// Business data payload
    #[serde(default)]
    pub data: Value,

    /// Infrastructural/mechanical data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl WriteMessage {
    /// Create a new WriteMessage with empty data
    ///
    /// # Example
    ///
    /// ```
    /// use message_store::types::WriteMessage;
    /// use serde_json::json;
    ///
    /// let msg = WriteMessage::new("Withdrawn")
    ///     .with_data(json!({ "amount": 50, "currency": "USD" }))
    ///     .with_metadata(json!({ "correlationStreamName": "withdrawal-xyz" }));
    /// ```
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            id: None,
            message_type: message_type.into(),
            data: Value::Object(Map::new()),
            metadata: None,
        }
    }

    /// Set an explicit id (builder pattern)
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the data payload (builder pattern)
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Set the metadata (builder pattern)
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Build a message caused by `preceding`: records where it came from and
    /// carries the correlation and reply stream names forward.
    pub fn follow(message_type: impl Into<String>, preceding: &Message) -> Self {
        let mut metadata = Map::new();
        metadata.insert(
            CAUSATION_MESSAGE_STREAM_NAME.to_string(),
            Value::String(preceding.stream_name.clone()),
        );
        metadata.insert(
            CAUSATION_MESSAGE_POSITION.to_string(),
            Value::from(preceding.position),
        );
        metadata.insert(
            CAUSATION_MESSAGE_GLOBAL_POSITION.to_string(),
            Value::from(preceding.global_position),
        );
        if let Some(correlation) = preceding.correlation_stream_name() {
            metadata.insert(
                CORRELATION_STREAM_NAME.to_string(),
                Value::String(correlation.to_string()),
            );
        }
        if let Some(reply) = preceding.reply_stream_name() {
            metadata.insert(REPLY_STREAM_NAME.to_string(), Value::String(reply.to_string()));
        }

        Self::new(message_type).with_metadata(Value::Object(metadata))
    }

    /// Id to write, generating one if absent
    pub fn id_or_new(&self) -> Uuid {
        self.id.unwrap_or_else(Uuid::new_v4)
    }

    /// Metadata as written: null-valued keys dropped, empty objects omitted
    pub fn normalized_metadata(&self) -> Option<Value> {
        match &self.metadata {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => {
                let cleaned: Map<String, Value> = map
                    .iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                if cleaned.is_empty() {
                    None
                } else {
                    Some(Value::Object(cleaned))
                }
            }
            Some(other) => Some(other.clone()),
        }
    }
}

/// Message as read from the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for the message
    pub id: Uuid,

    /// Name of the stream containing the message
    pub stream_name: String,

    /// Message type
    #[serde(rename = "type")]
    pub message_type: String,

    /// Business data payload
    pub data: Value,

    /// Infrastructural/mechanical data
    pub metadata: Option<Value>,

    /// Ordinal position in the stream (0-based)
    pub position: i64,

    /// Ordinal position in the entire store
    pub global_position: i64,

    /// UTC timestamp when the message was written
    pub time: DateTime<Utc>,
}

impl Message {
    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .and_then(|v| v.as_str())
    }

    fn metadata_i64(&self, key: &str) -> Option<i64> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .and_then(|v| v.as_i64())
    }

    /// Correlation stream name from metadata, if present
    pub fn correlation_stream_name(&self) -> Option<&str> {
        self.metadata_str(CORRELATION_STREAM_NAME)
    }

    pub fn causation_message_stream_name(&self) -> Option<&str> {
        self.metadata_str(CAUSATION_MESSAGE_STREAM_NAME)
    }

    pub fn causation_message_position(&self) -> Option<i64> {
        self.metadata_i64(CAUSATION_MESSAGE_POSITION)
    }

    pub fn causation_message_global_position(&self) -> Option<i64> {
        self.metadata_i64(CAUSATION_MESSAGE_GLOBAL_POSITION)
    }

    /// Reply stream name from metadata, if present
    pub fn reply_stream_name(&self) -> Option<&str> {
        self.metadata_str(REPLY_STREAM_NAME)
    }

    /// Schema version from metadata, if present
    pub fn schema_version(&self) -> Option<&str> {
        self.metadata_str(SCHEMA_VERSION)
    }
}
