use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::error::{Error, Result};
use crate::store::MessageStore;
use crate::stream_name::{self, COMPOUND_SEPARATOR, ID_SEPARATOR, TYPE_SEPARATOR};
use crate::types::WriteMessage;

/// Stream type marking a position stream
pub const POSITION_TYPE: &str = "position";

/// Message type of a stored position
pub const RECORDED: &str = "Recorded";

/// Joins an entity id and a consumer identifier in a position stream id
pub const CONSUMER_ID_SEPARATOR: char = '_';

/// Derive the position stream for a consumer of `stream_name`.
///
/// The `position` type is appended unless already present. A consumer
/// identifier is appended to the stream's id, or becomes the id when the
/// stream has none.
///
/// # Example
///
/// ```
/// use message_store::consumer::position_stream_name;
///
/// assert_eq!(position_stream_name("account", None).unwrap(), "account:position");
/// assert_eq!(position_stream_name("account", Some("worker")).unwrap(), "account:position-worker");
/// assert_eq!(
///     position_stream_name("account:command-123", Some("worker")).unwrap(),
///     "account:command+position-123_worker"
/// );
/// ```
pub fn position_stream_name(stream_name: &str, consumer_id: Option<&str>) -> Result<String> {
    if let Some(consumer_id) = consumer_id {
        let invalid = consumer_id.is_empty()
            || consumer_id.contains(TYPE_SEPARATOR)
            || consumer_id.contains(COMPOUND_SEPARATOR);
        if invalid {
            return Err(Error::assertion(format!(
                "invalid consumer identifier '{}'",
                consumer_id
            )));
        }
    }

    let mut types = stream_name::get_types(stream_name);
    if !types.contains(&POSITION_TYPE) {
        types.push(POSITION_TYPE);
    }

    let mut name = format!(
        "{}{}{}",
        stream_name::get_entity_name(stream_name),
        TYPE_SEPARATOR,
        types.join(COMPOUND_SEPARATOR.to_string().as_str())
    );

    let id = match (stream_name::get_id(stream_name), consumer_id) {
        (Some(id), Some(consumer_id)) => Some(format!("{}{}{}", id, CONSUMER_ID_SEPARATOR, consumer_id)),
        (Some(id), None) => Some(id.to_string()),
        (None, Some(consumer_id)) => Some(consumer_id.to_string()),
        (None, None) => None,
    };
    if let Some(id) = id {
        name.push(ID_SEPARATOR);
        name.push_str(&id);
    }

    Ok(name)
}

/// Reads and records a consumer's progress as messages on its position stream.
///
/// The stored value is whatever the most recent `Recorded` message says, so
/// recording is append-only.
#[derive(Clone)]
pub struct PositionStore {
    store: Arc<dyn MessageStore>,
    stream_name: String,
}

impl PositionStore {
    pub fn new(
        store: Arc<dyn MessageStore>,
        stream_name: &str,
        consumer_id: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            store,
            stream_name: position_stream_name(stream_name, consumer_id)?,
        })
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Last recorded position, `None` if nothing was recorded yet
    pub async fn get(&self) -> Result<Option<i64>> {
        let Some(message) = self.store.get_last(&self.stream_name).await? else {
            return Ok(None);
        };

        match message.data.get("position").and_then(|v| v.as_i64()) {
            Some(position) => Ok(Some(position)),
            None => Err(Error::assertion(format!(
                "message {} on '{}' carries no position",
                message.id, self.stream_name
            ))),
        }
    }

    /// Record `position`. Returns the position of the record in the position stream.
    pub async fn put(&self, position: i64) -> Result<i64> {
        let message = WriteMessage::new(RECORDED).with_data(json!({ "position": position }));
        let written = self.store.put(message, &self.stream_name, None).await?;
        debug!(stream_name = %self.stream_name, position, "Recorded consumer position");
        Ok(written)
    }
}

impl std::fmt::Debug for PositionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionStore")
            .field("stream_name", &self.stream_name)
            .finish()
    }
}
