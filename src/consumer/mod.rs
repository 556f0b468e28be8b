//! Polling consumers.
//!
//! A [`Consumer`] continuously reads a category (or a single stream) from a
//! [`MessageStore`](crate::store::MessageStore) and hands each message to the
//! handler registered for its type:
//!
//! 1. **Resume**: read the last recorded position from the position stream
//! 2. **Fetch**: fill a buffer up to the high water mark, applying the
//!    correlation and consumer group filters
//! 3. **Dispatch**: run handlers one at a time, in position order
//! 4. **Record**: write the position every `position_update_interval` dispatches
//! 5. **Refill**: fetch again once the buffer drops below the low water mark
//!
//! A failing handler pauses the consumer with the failed message left at the
//! head of the buffer; unpausing the runner retries it. An [`ErrorStrategy`]
//! can override that.
//!
//! # Consumer Groups
//!
//! Members of a group each see the streams whose cardinal id hashes to their
//! member number, and record their position on their own stream:
//!
//! ```
//! use message_store::consumer::ConsumerConfig;
//!
//! // 3 instances, each with a unique member (0, 1, 2)
//! let config = ConsumerConfig::new("projector", "account")
//!     .with_consumer_group("projector-0", 0, 3);
//! assert!(config.validate().is_ok());
//! ```

pub mod consumer;
pub mod position;
pub mod registry;

pub use consumer::{Consumer, ConsumerConfig, ErrorStrategy, Redispatch, POLL_TASK};
pub use position::{position_stream_name, PositionStore};
pub use registry::{HandlerRegistry, HandlerResult, MessageKind, Received};
