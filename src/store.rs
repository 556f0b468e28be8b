//! The message log contract shared by every backend.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::{Error, Result};
use crate::partition;
use crate::stream_name;
use crate::types::{Message, WriteMessage};

/// Default number of messages returned by one read
pub const DEFAULT_BATCH_SIZE: i64 = 1000;

/// Options for reading a single stream
#[derive(Debug, Clone)]
pub struct StreamReadOptions {
    /// Stream to read from
    pub stream_name: String,

    /// Starting position (inclusive, 0-based)
    pub position: i64,

    /// Maximum messages to retrieve
    pub batch_size: i64,
}

impl StreamReadOptions {
    /// Create new stream read options
    pub fn new(stream_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            position: 0,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set the starting position (builder pattern)
    pub fn with_position(mut self, position: i64) -> Self {
        self.position = position;
        self
    }

    /// Set the batch size (builder pattern)
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Reject category names and nonsensical bounds
    pub fn validate(&self) -> Result<()> {
        if stream_name::is_category(&self.stream_name) {
            return Err(Error::assertion(format!(
                "'{}' is a category, not a stream",
                self.stream_name
            )));
        }
        validate_bounds(self.position, self.batch_size)
    }
}

/// Options for reading every stream in a category
#[derive(Debug, Clone)]
pub struct CategoryReadOptions {
    /// Category to read from
    pub category_name: String,

    /// Starting global position (inclusive)
    pub position: i64,

    /// Maximum messages to retrieve
    pub batch_size: i64,

    /// Only messages whose correlation stream belongs to this category
    pub correlation: Option<String>,

    /// Consumer group member ID (0-based)
    pub consumer_group_member: Option<i64>,

    /// Total consumer group size
    pub consumer_group_size: Option<i64>,
}

impl CategoryReadOptions {
    /// Create new category read options
    pub fn new(category_name: impl Into<String>) -> Self {
        Self {
            category_name: category_name.into(),
            position: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            correlation: None,
            consumer_group_member: None,
            consumer_group_size: None,
        }
    }

    /// Set the starting position (builder pattern)
    pub fn with_position(mut self, position: i64) -> Self {
        self.position = position;
        self
    }

    /// Set the batch size (builder pattern)
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the correlation category (builder pattern)
    pub fn with_correlation(mut self, correlation: impl Into<String>) -> Self {
        self.correlation = Some(correlation.into());
        self
    }

    /// Set the consumer group parameters (builder pattern)
    pub fn with_consumer_group(mut self, member: i64, size: i64) -> Self {
        self.consumer_group_member = Some(member);
        self.consumer_group_size = Some(size);
        self
    }

    /// Reject stream names, partial consumer groups and nonsensical bounds
    pub fn validate(&self) -> Result<()> {
        if !stream_name::is_category(&self.category_name) {
            return Err(Error::assertion(format!(
                "'{}' is a stream, not a category",
                self.category_name
            )));
        }
        if let Some(correlation) = &self.correlation {
            if !stream_name::is_category(correlation) {
                return Err(Error::assertion(format!(
                    "correlation '{}' must be a category",
                    correlation
                )));
            }
        }
        match (self.consumer_group_member, self.consumer_group_size) {
            (None, None) => {}
            (Some(member), Some(size)) => {
                if size <= 0 || member < 0 || member >= size {
                    return Err(Error::assertion(format!(
                        "consumer group member {} is out of range for size {}",
                        member, size
                    )));
                }
            }
            _ => {
                return Err(Error::assertion(
                    "consumer group member and size must be given together",
                ))
            }
        }
        validate_bounds(self.position, self.batch_size)
    }

    /// True when a category message passes the correlation and consumer group filters
    pub fn matches(&self, message: &Message) -> Result<bool> {
        if let Some(correlation) = &self.correlation {
            let correlated = message
                .correlation_stream_name()
                .map(|name| stream_name::get_category(name) == correlation)
                .unwrap_or(false);
            if !correlated {
                return Ok(false);
            }
        }

        if let (Some(member), Some(size)) = (self.consumer_group_member, self.consumer_group_size) {
            let assigned = partition::get_consumer_group_member(&message.stream_name, size)?;
            if assigned != Some(member) {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

fn validate_bounds(position: i64, batch_size: i64) -> Result<()> {
    if position < 0 {
        return Err(Error::assertion(format!("position must not be negative, got {}", position)));
    }
    if batch_size <= 0 {
        return Err(Error::assertion(format!("batch size must be positive, got {}", batch_size)));
    }
    Ok(())
}

/// Read options for [`MessageStore::get`], which picks the stream or category
/// variant from the name.
#[derive(Debug, Clone)]
pub struct GetOptions {
    pub position: i64,
    pub batch_size: i64,
    pub correlation: Option<String>,
    pub consumer_group_member: Option<i64>,
    pub consumer_group_size: Option<i64>,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            position: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            correlation: None,
            consumer_group_member: None,
            consumer_group_size: None,
        }
    }
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the starting position (builder pattern)
    pub fn with_position(mut self, position: i64) -> Self {
        self.position = position;
        self
    }

    /// Set the batch size (builder pattern)
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the correlation category (builder pattern)
    pub fn with_correlation(mut self, correlation: impl Into<String>) -> Self {
        self.correlation = Some(correlation.into());
        self
    }

    /// Set the consumer group parameters (builder pattern)
    pub fn with_consumer_group(mut self, member: i64, size: i64) -> Self {
        self.consumer_group_member = Some(member);
        self.consumer_group_size = Some(size);
        self
    }

    fn has_category_filters(&self) -> bool {
        self.correlation.is_some()
            || self.consumer_group_member.is_some()
            || self.consumer_group_size.is_some()
    }
}

/// Append-only message log with optimistic concurrency.
///
/// Positions within a stream are 0-based and gap-free. Global positions give
/// the single total order used by category reads.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append one message. Returns its stream position.
    ///
    /// `expected_version` of `-1` requires the stream to be empty; `N >= 0`
    /// requires the stream's last position to be `N`.
    async fn put(
        &self,
        message: WriteMessage,
        stream_name: &str,
        expected_version: Option<i64>,
    ) -> Result<i64>;

    /// Append a batch atomically. Returns the position of the last message.
    async fn write(
        &self,
        messages: Vec<WriteMessage>,
        stream_name: &str,
        expected_version: Option<i64>,
    ) -> Result<i64>;

    /// Read a single stream from `options.position`
    async fn get_stream_messages(&self, options: StreamReadOptions) -> Result<Vec<Message>>;

    /// Read a category from global position `options.position`
    async fn get_category_messages(&self, options: CategoryReadOptions) -> Result<Vec<Message>>;

    /// Most recent message of an exact stream
    async fn get_last(&self, stream_name: &str) -> Result<Option<Message>>;

    /// Position of the last message, `None` if the stream does not exist
    async fn stream_version(&self, stream_name: &str) -> Result<Option<i64>>;

    /// Read a stream or a category, depending on the name
    async fn get(&self, stream_name: &str, options: GetOptions) -> Result<Vec<Message>> {
        if stream_name::is_category(stream_name) {
            let mut category = CategoryReadOptions::new(stream_name)
                .with_position(options.position)
                .with_batch_size(options.batch_size);
            category.correlation = options.correlation;
            category.consumer_group_member = options.consumer_group_member;
            category.consumer_group_size = options.consumer_group_size;
            self.get_category_messages(category).await
        } else {
            if options.has_category_filters() {
                return Err(Error::assertion(format!(
                    "correlation and consumer group filters need a category, got stream '{}'",
                    stream_name
                )));
            }
            let stream = StreamReadOptions::new(stream_name)
                .with_position(options.position)
                .with_batch_size(options.batch_size);
            self.get_stream_messages(stream).await
        }
    }

    /// Lazily read everything from `options.position` onwards, one batch at a
    /// time, ending at the first batch shorter than `options.batch_size`.
    /// Each call starts a fresh read.
    fn read<'a>(
        &'a self,
        stream_name: &'a str,
        options: GetOptions,
    ) -> BoxStream<'a, Result<Message>> {
        let category = stream_name::is_category(stream_name);
        Box::pin(async_stream::try_stream! {
            let mut options = options;
            loop {
                let batch = self.get(stream_name, options.clone()).await?;
                let exhausted = (batch.len() as i64) < options.batch_size;

                for message in batch {
                    options.position = if category {
                        message.global_position + 1
                    } else {
                        message.position + 1
                    };
                    yield message;
                }

                if exhausted {
                    break;
                }
            }
        })
    }
}
