//! In-memory message store.
//!
//! Useful for tests and development. Nothing is persisted. Global positions
//! start at 1, like Message DB.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::{CategoryReadOptions, MessageStore, StreamReadOptions};
use crate::stream_name;
use crate::types::{Message, WriteMessage};

#[derive(Debug, Default)]
struct StoreData {
    /// Every message in global order; index `i` holds global position `i + 1`
    messages: Vec<Message>,
    /// Indexes into `messages` per stream, in stream order
    streams: HashMap<String, Vec<usize>>,
    /// Message ids are unique across the whole store
    ids: HashMap<Uuid, (String, i64)>,
}

impl StoreData {
    fn stream_version(&self, stream_name: &str) -> Option<i64> {
        self.streams
            .get(stream_name)
            .map(|indexes| indexes.len() as i64 - 1)
    }

    /// Position of an already stored id, or an error when it belongs to
    /// another stream
    fn position_of(&self, stream_name: &str, id: Uuid) -> Result<Option<i64>> {
        match self.ids.get(&id) {
            Some((existing, position)) if existing == stream_name => Ok(Some(*position)),
            Some((existing, _)) => Err(Error::DuplicateMessageId {
                id,
                stream_name: stream_name.to_string(),
                existing_stream_name: existing.clone(),
            }),
            None => Ok(None),
        }
    }
}

/// A pending append, checked against the current data but not yet applied
struct Staged {
    messages: Vec<Message>,
    last_position: i64,
}

/// An in-memory message store, cheap to clone and share.
#[derive(Clone, Debug, Default)]
pub struct InMemoryMessageStore {
    data: Arc<RwLock<StoreData>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        debug!("Creating a new InMemoryMessageStore");
        Self::default()
    }

    /// Total number of messages in the store
    pub async fn len(&self) -> usize {
        self.data.read().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Check every message of a batch against `data` without mutating it, so
    /// a failure anywhere leaves the store untouched.
    fn stage(
        data: &StoreData,
        messages: Vec<WriteMessage>,
        stream_name: &str,
        expected_version: Option<i64>,
    ) -> Result<Staged> {
        let mut version = data.stream_version(stream_name);
        let mut expected = expected_version;
        let mut next_global = data.messages.len() as i64 + 1;
        let mut staged: Vec<Message> = Vec::with_capacity(messages.len());
        let mut last_position = -1;

        for message in messages {
            if let Some(expected_version) = expected {
                if version.unwrap_or(-1) != expected_version {
                    return Err(Error::ExpectedVersion {
                        stream_name: stream_name.to_string(),
                        expected_version,
                        actual_version: version,
                    });
                }
            }

            let id = message.id_or_new();

            let duplicate = match data.position_of(stream_name, id)? {
                Some(position) => Some(position),
                None => staged.iter().find(|m| m.id == id).map(|m| m.position),
            };
            if let Some(position) = duplicate {
                debug!(stream_name, %id, position, "Ignoring duplicate message id");
                last_position = position;
                continue;
            }

            let position = version.map(|v| v + 1).unwrap_or(0);
            staged.push(Message {
                id,
                stream_name: stream_name.to_string(),
                message_type: message.message_type.clone(),
                metadata: message.normalized_metadata(),
                data: message.data,
                position,
                global_position: next_global,
                time: Utc::now(),
            });

            version = Some(position);
            expected = expected.map(|v| v + 1);
            next_global += 1;
            last_position = position;
        }

        Ok(Staged {
            messages: staged,
            last_position,
        })
    }

    fn apply(data: &mut StoreData, staged: Staged) -> i64 {
        for message in staged.messages {
            debug!(
                stream_name = %message.stream_name,
                position = message.position,
                global_position = message.global_position,
                message_type = %message.message_type,
                "Wrote message"
            );
            let index = data.messages.len();
            data.ids
                .insert(message.id, (message.stream_name.clone(), message.position));
            data.streams
                .entry(message.stream_name.clone())
                .or_default()
                .push(index);
            data.messages.push(message);
        }
        staged.last_position
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn put(
        &self,
        message: WriteMessage,
        stream_name: &str,
        expected_version: Option<i64>,
    ) -> Result<i64> {
        self.write(vec![message], stream_name, expected_version).await
    }

    async fn write(
        &self,
        messages: Vec<WriteMessage>,
        stream_name: &str,
        expected_version: Option<i64>,
    ) -> Result<i64> {
        if messages.is_empty() {
            return Err(Error::assertion("cannot write an empty batch"));
        }

        let mut data = self.data.write().await;
        let staged = Self::stage(&data, messages, stream_name, expected_version)?;
        Ok(Self::apply(&mut data, staged))
    }

    async fn get_stream_messages(&self, options: StreamReadOptions) -> Result<Vec<Message>> {
        options.validate()?;

        let data = self.data.read().await;
        let messages = data
            .streams
            .get(&options.stream_name)
            .map(|indexes| {
                indexes
                    .iter()
                    .skip(options.position as usize)
                    .take(options.batch_size as usize)
                    .map(|&i| data.messages[i].clone())
                    .collect()
            })
            .unwrap_or_default();

        Ok(messages)
    }

    async fn get_category_messages(&self, options: CategoryReadOptions) -> Result<Vec<Message>> {
        options.validate()?;

        let data = self.data.read().await;
        let start = (options.position.max(1) - 1) as usize;
        let mut messages = Vec::new();

        for message in data.messages.iter().skip(start) {
            if messages.len() as i64 >= options.batch_size {
                break;
            }
            if stream_name::get_category(&message.stream_name) != options.category_name {
                continue;
            }
            if options.matches(message)? {
                messages.push(message.clone());
            }
        }

        Ok(messages)
    }

    async fn get_last(&self, stream_name: &str) -> Result<Option<Message>> {
        let data = self.data.read().await;
        Ok(data
            .streams
            .get(stream_name)
            .and_then(|indexes| indexes.last())
            .map(|&i| data.messages[i].clone()))
    }

    async fn stream_version(&self, stream_name: &str) -> Result<Option<i64>> {
        Ok(self.data.read().await.stream_version(stream_name))
    }
}
