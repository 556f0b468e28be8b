use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::BoxError;
use crate::types::Message;

/// What a handler returns
pub type HandlerResult = std::result::Result<(), BoxError>;

/// Type-erased handler: decodes the record, then runs the user's handler
pub(crate) type ErasedHandler =
    Arc<dyn Fn(Message) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// A decoded message handed to a handler, with the record's envelope
#[derive(Debug, Clone, PartialEq)]
pub struct Received<T> {
    pub id: Uuid,
    pub message_type: String,
    pub stream_name: String,
    pub position: i64,
    pub global_position: i64,
    pub metadata: Option<Value>,
    pub time: DateTime<Utc>,
    pub data: T,
}

impl<T> Received<T> {
    fn from_record(record: Message, data: T) -> Self {
        Self {
            id: record.id,
            message_type: record.message_type,
            stream_name: record.stream_name,
            position: record.position,
            global_position: record.global_position,
            metadata: record.metadata,
            time: record.time,
            data,
        }
    }
}

/// A closed set of message kinds, usually an enum with one variant per type.
///
/// The default `decode` expects the enum to be adjacently tagged with
/// `#[serde(tag = "type", content = "data")]`, so the variant is picked by the
/// stored message type.
///
/// ```
/// use message_store::consumer::MessageKind;
/// use serde::Deserialize;
///
/// #[derive(Debug, Deserialize)]
/// struct Amount { amount: i64 }
///
/// #[derive(Debug, Deserialize)]
/// #[serde(tag = "type", content = "data")]
/// enum AccountEvent {
///     Deposited(Amount),
///     Withdrawn(Amount),
/// }
///
/// impl MessageKind for AccountEvent {
///     const MESSAGE_TYPES: &'static [&'static str] = &["Deposited", "Withdrawn"];
/// }
///
/// let event = AccountEvent::decode("Withdrawn", serde_json::json!({ "amount": 5 })).unwrap();
/// assert!(matches!(event, AccountEvent::Withdrawn(Amount { amount: 5 })));
/// ```
pub trait MessageKind: DeserializeOwned + Send + 'static {
    /// Type discriminators this kind handles
    const MESSAGE_TYPES: &'static [&'static str];

    fn decode(message_type: &str, data: Value) -> serde_json::Result<Self> {
        serde_json::from_value(json!({ "type": message_type, "data": data }))
    }
}

/// Maps message type names to handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, ErasedHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one message type, decoding `data` into `T`.
    /// A later registration for the same type replaces the earlier one.
    ///
    /// # Example
    ///
    /// ```
    /// use message_store::consumer::{HandlerRegistry, Received};
    /// use serde::Deserialize;
    ///
    /// #[derive(Deserialize)]
    /// struct Withdrawn { amount: i64 }
    ///
    /// let mut registry = HandlerRegistry::new();
    /// registry.on("Withdrawn", |msg: Received<Withdrawn>| async move {
    ///     println!("withdrew {} from {}", msg.data.amount, msg.stream_name);
    ///     Ok(())
    /// });
    /// assert!(registry.contains("Withdrawn"));
    /// ```
    pub fn on<T, F, Fut>(&mut self, message_type: impl Into<String>, handler: F) -> &mut Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(Received<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: ErasedHandler = Arc::new(move |record: Message| {
            let handler = Arc::clone(&handler);
            async move {
                let data: T = serde_json::from_value(record.data.clone())?;
                handler(Received::from_record(record, data)).await
            }
            .boxed()
        });
        self.handlers.insert(message_type.into(), erased);
        self
    }

    /// Register one handler for every type of a [`MessageKind`]
    pub fn on_kind<K, F, Fut>(&mut self, handler: F) -> &mut Self
    where
        K: MessageKind,
        F: Fn(Received<K>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler = Arc::new(handler);
        for message_type in K::MESSAGE_TYPES {
            let handler = Arc::clone(&handler);
            let erased: ErasedHandler = Arc::new(move |record: Message| {
                let handler = Arc::clone(&handler);
                async move {
                    let data = K::decode(&record.message_type, record.data.clone())?;
                    handler(Received::from_record(record, data)).await
                }
                .boxed()
            });
            self.handlers.insert(message_type.to_string(), erased);
        }
        self
    }

    pub fn contains(&self, message_type: &str) -> bool {
        self.handlers.contains_key(message_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered message types, sorted
    pub fn message_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub(crate) fn get(&self, message_type: &str) -> Option<ErasedHandler> {
        self.handlers.get(message_type).cloned()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("message_types", &self.message_types())
            .finish()
    }
}
