use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::consumer::position::PositionStore;
use crate::consumer::registry::HandlerRegistry;
use crate::error::{Error, Result};
use crate::runner::Runner;
use crate::store::{GetOptions, MessageStore};
use crate::stream_name;
use crate::types::Message;

/// Name of the runner task that runs one fetch/dispatch sequence
pub const POLL_TASK: &str = "poll";

/// Called when a handler fails. `Ok` counts the message as processed; `Err`
/// pauses the consumer with the message still at the head of its buffer.
pub type ErrorStrategy =
    Arc<dyn Fn(Error, Message, Redispatch) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Configuration for a consumer
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Consumer name, used in logs and errors
    pub name: String,

    /// Category (or single stream) to consume
    pub category: String,

    /// Only messages correlated with this category
    pub correlation: Option<String>,

    /// Distinguishes the position streams of consumer group members
    pub identifier: Option<String>,

    /// Consumer group member ID (0-based)
    pub consumer_group_member: Option<i64>,

    /// Total consumer group size
    pub consumer_group_size: Option<i64>,

    /// Record the position after this many dispatches
    pub position_update_interval: usize,

    /// Delay between poll ticks (milliseconds)
    pub polling_interval_ms: u64,

    /// Upper bound on buffered messages
    pub high_water_mark: usize,

    /// Refill the buffer once it holds fewer messages than this
    pub low_water_mark: usize,

    /// Fail on message types without a handler instead of skipping them
    pub strict: bool,
}

impl ConsumerConfig {
    /// Create a new consumer configuration
    ///
    /// # Example
    ///
    /// ```
    /// use message_store::consumer::ConsumerConfig;
    ///
    /// let config = ConsumerConfig::new("account-projector", "account")
    ///     .with_polling_interval_ms(200)
    ///     .with_water_marks(50, 5)
    ///     .with_consumer_group("projector-0", 0, 3);
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            correlation: None,
            identifier: None,
            consumer_group_member: None,
            consumer_group_size: None,
            position_update_interval: 1,
            polling_interval_ms: 100,
            high_water_mark: 100,
            low_water_mark: 10,
            strict: false,
        }
    }

    /// Set the correlation category (builder pattern)
    pub fn with_correlation(mut self, correlation: impl Into<String>) -> Self {
        self.correlation = Some(correlation.into());
        self
    }

    /// Join a consumer group (builder pattern)
    pub fn with_consumer_group(mut self, identifier: impl Into<String>, member: i64, size: i64) -> Self {
        self.identifier = Some(identifier.into());
        self.consumer_group_member = Some(member);
        self.consumer_group_size = Some(size);
        self
    }

    /// Set the position update interval (builder pattern)
    pub fn with_position_update_interval(mut self, interval: usize) -> Self {
        self.position_update_interval = interval;
        self
    }

    /// Set the polling interval in milliseconds (builder pattern)
    pub fn with_polling_interval_ms(mut self, interval_ms: u64) -> Self {
        self.polling_interval_ms = interval_ms;
        self
    }

    /// Set the high and low water marks (builder pattern)
    pub fn with_water_marks(mut self, high: usize, low: usize) -> Self {
        self.high_water_mark = high;
        self.low_water_mark = low;
        self
    }

    /// Set strict mode (builder pattern)
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Reject incomplete or contradictory configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::assertion("consumer name is required"));
        }
        if self.category.is_empty() {
            return Err(Error::assertion(format!(
                "consumer '{}' needs a category to consume",
                self.name
            )));
        }

        let consumes_category = stream_name::is_category(&self.category);

        match (
            &self.identifier,
            self.consumer_group_member,
            self.consumer_group_size,
        ) {
            (None, None, None) => {}
            (Some(_), Some(member), Some(size)) => {
                if size <= 0 || member < 0 || member >= size {
                    return Err(Error::assertion(format!(
                        "consumer '{}': group member {} is out of range for size {}",
                        self.name, member, size
                    )));
                }
                if !consumes_category {
                    return Err(Error::assertion(format!(
                        "consumer '{}': consumer groups need a category, got stream '{}'",
                        self.name, self.category
                    )));
                }
            }
            _ => {
                return Err(Error::assertion(format!(
                    "consumer '{}': identifier, group member and group size must be given together",
                    self.name
                )))
            }
        }

        if let Some(correlation) = &self.correlation {
            if !consumes_category {
                return Err(Error::assertion(format!(
                    "consumer '{}': correlation needs a category, got stream '{}'",
                    self.name, self.category
                )));
            }
            if !stream_name::is_category(correlation) {
                return Err(Error::assertion(format!(
                    "consumer '{}': correlation '{}' must be a category",
                    self.name, correlation
                )));
            }
        }

        if self.position_update_interval == 0 {
            return Err(Error::assertion("position update interval must be at least 1"));
        }
        if self.polling_interval_ms == 0 {
            return Err(Error::assertion("polling interval must be positive"));
        }
        if self.low_water_mark == 0 || self.low_water_mark > self.high_water_mark {
            return Err(Error::assertion(format!(
                "water marks must satisfy 1 <= low ({}) <= high ({})",
                self.low_water_mark, self.high_water_mark
            )));
        }

        Ok(())
    }
}

/// Re-runs decoding and the handler for one message. Handed to an
/// [`ErrorStrategy`].
#[derive(Clone)]
pub struct Redispatch {
    handlers: Arc<HandlerRegistry>,
    consumer: String,
    strict: bool,
    record: Message,
}

impl Redispatch {
    pub fn record(&self) -> &Message {
        &self.record
    }

    pub async fn run(&self) -> Result<()> {
        dispatch(&self.handlers, &self.consumer, self.strict, self.record.clone()).await
    }
}

/// Look up the handler for `record` and run it
async fn dispatch(
    handlers: &HandlerRegistry,
    consumer: &str,
    strict: bool,
    record: Message,
) -> Result<()> {
    let Some(handler) = handlers.get(&record.message_type) else {
        if strict {
            return Err(Error::UnknownMessageType {
                consumer: consumer.to_string(),
                message_type: record.message_type,
            });
        }
        debug!(
            consumer,
            message_type = %record.message_type,
            message_id = %record.id,
            "No handler registered, skipping message"
        );
        return Ok(());
    };

    let message_id = record.id;
    let message_type = record.message_type.clone();
    handler(record).await.map_err(|source| Error::Handler {
        consumer: consumer.to_string(),
        message_id,
        message_type,
        source,
    })
}

/// Polls a category (or stream), buffering between two water marks, and
/// dispatches each message to its handler strictly in order.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use message_store::consumer::{Consumer, ConsumerConfig, HandlerRegistry, Received};
/// use message_store::message_db::{MessageDbClient, MessageDbConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = MessageDbClient::new(MessageDbConfig::from_env()?).await?;
///
///     let mut handlers = HandlerRegistry::new();
///     handlers.on("Withdrawn", |msg: Received<serde_json::Value>| async move {
///         println!("withdrawal on {}: {}", msg.stream_name, msg.data);
///         Ok(())
///     });
///
///     let consumer = Consumer::new(
///         Arc::new(client),
///         ConsumerConfig::new("account-projector", "account"),
///         handlers,
///     )?;
///
///     let runner = consumer.start();
///     tokio::signal::ctrl_c().await?;
///     runner.stop().await;
///     Ok(())
/// }
/// ```
pub struct Consumer {
    store: Arc<dyn MessageStore>,
    config: ConsumerConfig,
    handlers: Arc<HandlerRegistry>,
    positions: PositionStore,
    error_strategy: Option<ErrorStrategy>,
}

impl Consumer {
    /// Validate the configuration and build a consumer. Nothing is read
    /// until [`Consumer::start`].
    pub fn new(
        store: Arc<dyn MessageStore>,
        config: ConsumerConfig,
        handlers: HandlerRegistry,
    ) -> Result<Self> {
        config.validate()?;
        if handlers.is_empty() {
            return Err(Error::assertion(format!(
                "consumer '{}' has no handlers registered",
                config.name
            )));
        }

        let positions = PositionStore::new(
            Arc::clone(&store),
            &config.category,
            config.identifier.as_deref(),
        )?;

        Ok(Self {
            store,
            config,
            handlers: Arc::new(handlers),
            positions,
            error_strategy: None,
        })
    }

    /// Replace the default crash-stop behaviour on handler failure (builder pattern)
    pub fn with_error_strategy<F, Fut>(mut self, strategy: F) -> Self
    where
        F: Fn(Error, Message, Redispatch) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let erased: ErrorStrategy =
            Arc::new(move |err: Error, record: Message, redispatch: Redispatch| {
                strategy(err, record, redispatch).boxed()
            });
        self.error_strategy = Some(erased);
        self
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn position_stream_name(&self) -> &str {
        self.positions.stream_name()
    }

    /// Start polling. The returned runner pauses, resumes and stops the
    /// consumer; polling ends for good once it is stopped.
    pub fn start(self) -> Runner<()> {
        let interval = Duration::from_millis(self.config.polling_interval_ms);
        let name = self.config.name.clone();

        info!(
            consumer = %name,
            stream_name = %self.config.category,
            position_stream = %self.positions.stream_name(),
            "Starting consumer"
        );

        let sequence = Arc::new(Sequence {
            category_read: stream_name::is_category(&self.config.category),
            store: self.store,
            config: self.config,
            handlers: self.handlers,
            positions: self.positions,
            error_strategy: self.error_strategy,
            state: Mutex::new(PollState::default()),
        });

        let runner: Runner<()> = Runner::builder()
            .task(POLL_TASK, move |runner: Runner<()>, _: ()| {
                let sequence = Arc::clone(&sequence);
                async move { sequence.poll(runner).await }
            })
            .build();

        let ticker = runner.clone();
        tokio::spawn(async move {
            while !ticker.is_stopped() {
                // While paused, one queued tick is enough to resume
                if ticker.stats().queued == 0 {
                    if let Err(err) = ticker.trigger(POLL_TASK, ()) {
                        error!(consumer = %name, err = %err, "Failed to schedule poll");
                        break;
                    }
                }
                tokio::time::sleep(interval).await;
            }
            info!(consumer = %name, "Consumer stopped");
        });

        runner
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("config", &self.config)
            .field("position_stream", &self.positions.stream_name())
            .field("handlers", &self.handlers)
            .finish()
    }
}

#[derive(Debug, Default)]
struct PollState {
    /// Fetched, not yet dispatched
    buffer: VecDeque<Message>,
    /// Where the next fetch starts; `None` until the stored position is read
    next_position: Option<i64>,
    /// Size of the most recent fetch
    last_fetched: usize,
    last_dispatched: Option<i64>,
    /// Dispatches since the position was last recorded
    unsaved: usize,
}

/// What a started consumer shares with its poll task
struct Sequence {
    store: Arc<dyn MessageStore>,
    config: ConsumerConfig,
    handlers: Arc<HandlerRegistry>,
    positions: PositionStore,
    error_strategy: Option<ErrorStrategy>,
    category_read: bool,
    state: Mutex<PollState>,
}

impl Sequence {
    /// One fetch/dispatch sequence. Returns early when another sequence is
    /// still running.
    async fn poll(&self, runner: Runner<()>) -> Result<()> {
        let Ok(mut state) = self.state.try_lock() else {
            return Ok(());
        };

        if state.next_position.is_none() {
            match self.positions.get().await {
                Ok(stored) => {
                    let start = stored.map(|position| position + 1).unwrap_or(0);
                    info!(
                        consumer = %self.config.name,
                        stream_name = %self.config.category,
                        position = start,
                        "Starting from position"
                    );
                    state.next_position = Some(start);
                }
                Err(err) => {
                    warn!(
                        consumer = %self.config.name,
                        stream_name = %self.config.category,
                        err = %err,
                        "Failed to read consumer position, retrying next tick"
                    );
                    return Ok(());
                }
            }
        }

        if state.buffer.len() < self.config.low_water_mark {
            self.fetch(&mut state).await;
        }

        while runner.is_running() {
            let Some(record) = state.buffer.front().cloned() else {
                break;
            };

            if let Err(err) = self.handle(&record).await {
                error!(
                    consumer = %self.config.name,
                    stream_name = %record.stream_name,
                    position = record.position,
                    global_position = record.global_position,
                    message_type = %record.message_type,
                    message_id = %record.id,
                    err = %err,
                    "Message handling failed, pausing consumer"
                );
                // Awaiting here would wait on this very invocation
                let _ = runner.pause();
                break;
            }

            state.buffer.pop_front();
            self.record_dispatch(&mut state, &record).await;

            if state.buffer.len() < self.config.low_water_mark && state.last_fetched > 0 {
                self.fetch(&mut state).await;
            }
        }

        let idle = state.buffer.is_empty() && state.last_fetched == 0;
        if (idle || runner.is_stopped()) && state.unsaved > 0 {
            self.save(&mut state).await;
        }

        Ok(())
    }

    fn position_of(&self, record: &Message) -> i64 {
        if self.category_read {
            record.global_position
        } else {
            record.position
        }
    }

    /// Fill the buffer up to the high water mark. Failures are logged and
    /// count as an empty fetch.
    async fn fetch(&self, state: &mut PollState) {
        let Some(position) = state.next_position else {
            return;
        };
        let wanted = self.config.high_water_mark.saturating_sub(state.buffer.len());
        if wanted == 0 {
            return;
        }

        let mut options = GetOptions::new()
            .with_position(position)
            .with_batch_size(wanted as i64);
        if let Some(correlation) = &self.config.correlation {
            options = options.with_correlation(correlation.clone());
        }
        if let (Some(member), Some(size)) = (
            self.config.consumer_group_member,
            self.config.consumer_group_size,
        ) {
            options = options.with_consumer_group(member, size);
        }

        match self.store.get(&self.config.category, options).await {
            Ok(batch) => {
                debug!(
                    consumer = %self.config.name,
                    stream_name = %self.config.category,
                    position,
                    count = batch.len(),
                    "Fetched messages"
                );
                if let Some(last) = batch.last() {
                    state.next_position = Some(self.position_of(last) + 1);
                }
                state.last_fetched = batch.len();
                state.buffer.extend(batch);
            }
            Err(err) => {
                warn!(
                    consumer = %self.config.name,
                    stream_name = %self.config.category,
                    position,
                    err = %err,
                    "Failed to fetch messages, retrying next tick"
                );
                state.last_fetched = 0;
            }
        }
    }

    /// Dispatch, falling back to the error strategy when a handler fails
    async fn handle(&self, record: &Message) -> Result<()> {
        let result = dispatch(
            &self.handlers,
            &self.config.name,
            self.config.strict,
            record.clone(),
        )
        .await;

        match (result, &self.error_strategy) {
            (Err(err @ Error::Handler { .. }), Some(strategy)) => {
                warn!(
                    consumer = %self.config.name,
                    message_id = %record.id,
                    message_type = %record.message_type,
                    err = %err,
                    "Handler failed, applying error strategy"
                );
                let redispatch = Redispatch {
                    handlers: Arc::clone(&self.handlers),
                    consumer: self.config.name.clone(),
                    strict: self.config.strict,
                    record: record.clone(),
                };
                strategy(err, record.clone(), redispatch).await
            }
            (result, _) => result,
        }
    }

    async fn record_dispatch(&self, state: &mut PollState, record: &Message) {
        state.last_dispatched = Some(self.position_of(record));
        state.unsaved += 1;
        if state.unsaved >= self.config.position_update_interval {
            self.save(state).await;
        }
    }

    /// Record the last dispatched position. On failure the dispatches stay
    /// unsaved and the next attempt retries.
    async fn save(&self, state: &mut PollState) {
        let Some(position) = state.last_dispatched else {
            return;
        };
        match self.positions.put(position).await {
            Ok(_) => state.unsaved = 0,
            Err(err) => warn!(
                consumer = %self.config.name,
                position,
                err = %err,
                "Failed to record consumer position"
            ),
        }
    }
}
