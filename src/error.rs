use thiserror::Error;
use uuid::Uuid;

/// Boxed error used for wrapped causes (backend failures, handler failures)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for message store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the message store and its consumers
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed configuration or API misuse. Never retried.
    #[error("Assertion failed: {0}")]
    Assertion(String),

    /// Optimistic concurrency violation on write
    #[error(
        "Wrong expected version on stream '{stream_name}': expected {expected_version}, actual {actual_version:?}"
    )]
    ExpectedVersion {
        stream_name: String,
        expected_version: i64,
        actual_version: Option<i64>,
    },

    /// Backend I/O failure, wrapping the underlying cause
    #[error("Store error: {context}")]
    Store {
        context: String,
        #[source]
        source: BoxError,
    },

    /// A message id is already stored on a different stream
    #[error("Message id {id} is already stored on stream '{existing_stream_name}', cannot write it to '{stream_name}'")]
    DuplicateMessageId {
        id: Uuid,
        stream_name: String,
        existing_stream_name: String,
    },

    /// A message handler failed
    #[error("Consumer '{consumer}' failed handling {message_type} message {message_id}")]
    Handler {
        consumer: String,
        message_id: Uuid,
        message_type: String,
        #[source]
        source: BoxError,
    },

    /// Strict consumer received a message type with no registered handler
    #[error("Consumer '{consumer}' has no handler for message type '{message_type}'")]
    UnknownMessageType {
        consumer: String,
        message_type: String,
    },

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn assertion(msg: impl Into<String>) -> Self {
        Error::Assertion(msg.into())
    }

    pub(crate) fn store(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Store {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Only backend failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Store { .. })
    }
}

/// Parse the actual version out of a Message DB concurrency error, e.g.
/// `Wrong expected version: 4 (Stream: account-123, Stream Version: 7)`
fn parse_stream_version(message: &str) -> Option<i64> {
    let (_, tail) = message.split_once("Stream Version:")?;
    tail.trim().trim_end_matches(')').trim().parse().ok()
}

/// Convert tokio-postgres errors to message store errors
impl From<tokio_postgres::Error> for Error {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_error) = err.as_db_error() {
            let message = db_error.message();

            // Message DB raises this from write_message
            if message.contains("Wrong expected version") {
                return Error::ExpectedVersion {
                    stream_name: "unknown".to_string(),
                    expected_version: -1,
                    actual_version: parse_stream_version(message),
                };
            }

            let context = format!("{}: {}", db_error.code().code(), message);
            return Error::store(context, err);
        }

        Error::store("database request failed", err)
    }
}

/// Convert deadpool errors to message store errors
impl From<deadpool_postgres::PoolError> for Error {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Error::store("connection pool error", err)
    }
}

/// Convert deadpool build errors to message store errors
impl From<deadpool_postgres::BuildError> for Error {
    fn from(err: deadpool_postgres::BuildError) -> Self {
        Error::store("failed to build connection pool", err)
    }
}
