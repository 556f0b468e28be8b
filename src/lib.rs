//! An append-only message log with optimistic concurrency, and polling
//! consumers that read it.
//!
//! - [`store::MessageStore`] is the log: streams addressed by hierarchical
//!   [`stream_name`]s, 0-based stream positions, and a global position giving
//!   the total order used by category reads.
//! - [`memory::InMemoryMessageStore`] and [`message_db::MessageDbClient`] are
//!   its backends.
//! - [`consumer::Consumer`] reads a category in order, dispatches to typed
//!   handlers and records its own position in the log. Consumer groups split a
//!   category between instances with [`partition`].
//! - [`runner::Runner`] is the pausable scheduler a started consumer runs on.
//!
//! ```
//! use std::sync::Arc;
//! use message_store::{
//!     Consumer, ConsumerConfig, HandlerRegistry, InMemoryMessageStore, MessageStore, Received,
//!     WriteMessage,
//! };
//! use serde::Deserialize;
//! use serde_json::json;
//!
//! #[derive(Deserialize)]
//! struct Deposited { amount: i64 }
//!
//! # #[tokio::main]
//! # async fn main() -> message_store::Result<()> {
//! let store = Arc::new(InMemoryMessageStore::new());
//! store
//!     .put(WriteMessage::new("Deposited").with_data(json!({ "amount": 10 })), "account-1", None)
//!     .await?;
//!
//! let mut handlers = HandlerRegistry::new();
//! handlers.on("Deposited", |msg: Received<Deposited>| async move {
//!     println!("{} received {}", msg.stream_name, msg.data.amount);
//!     Ok(())
//! });
//!
//! let runner = Consumer::new(store, ConsumerConfig::new("ledger", "account"), handlers)?.start();
//! runner.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod consumer;
pub mod error;
pub mod memory;
pub mod message_db;
pub mod partition;
pub mod runner;
pub mod store;
pub mod stream_name;
pub mod types;

pub use consumer::{
    Consumer, ConsumerConfig, ErrorStrategy, HandlerRegistry, MessageKind, PositionStore, Received,
    Redispatch,
};
pub use error::{Error, Result};
pub use memory::InMemoryMessageStore;
pub use runner::{Runner, Stats};
pub use store::{CategoryReadOptions, GetOptions, MessageStore, StreamReadOptions};
pub use types::{Message, WriteMessage};
