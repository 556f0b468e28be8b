//! Pausable, stoppable task scheduler.
//!
//! A [`Runner`] owns a fixed set of named tasks. [`Runner::trigger`] runs a
//! task immediately while the runner is running, queues a [`Command`] while it
//! is paused and does nothing once it is stopped. Queued commands are replayed
//! in order on [`Runner::unpause`].
//!
//! [`Runner::pause`] and [`Runner::stop`] take effect immediately and return a
//! future that resolves once every in-flight invocation has settled. In-flight
//! work is never aborted.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A named unit of work. It receives the runner that scheduled it, so it can
/// pause or inspect its own scheduler.
pub type Task<A> = Arc<dyn Fn(Runner<A>, A) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A deferred invocation: task name plus arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command<A> {
    pub task: String,
    pub args: A,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Running,
    Paused,
    /// Terminal
    Stopped,
}

/// Snapshot of a runner's load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Invocations currently in flight
    pub active: usize,
    /// Commands waiting for unpause
    pub queued: usize,
    pub paused: bool,
    pub stopped: bool,
}

struct Control<A> {
    state: RunnerState,
    queue: VecDeque<Command<A>>,
}

struct Inner<A> {
    tasks: HashMap<String, Task<A>>,
    control: Mutex<Control<A>>,
    active: Arc<watch::Sender<usize>>,
}

/// Decrements the in-flight count when an invocation ends, even by panic
struct ActiveGuard(Arc<watch::Sender<usize>>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Builder registering the tasks a [`Runner`] can trigger
pub struct RunnerBuilder<A> {
    tasks: HashMap<String, Task<A>>,
}

impl<A: Send + 'static> RunnerBuilder<A> {
    /// Register a task (builder pattern)
    pub fn task<F, Fut>(mut self, name: impl Into<String>, task: F) -> Self
    where
        F: Fn(Runner<A>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let erased: Task<A> =
            Arc::new(move |runner: Runner<A>, args: A| task(runner, args).boxed());
        self.tasks.insert(name.into(), erased);
        self
    }

    pub fn build(self) -> Runner<A> {
        let (active, _) = watch::channel(0usize);
        Runner {
            inner: Arc::new(Inner {
                tasks: self.tasks,
                control: Mutex::new(Control {
                    state: RunnerState::Running,
                    queue: VecDeque::new(),
                }),
                active: Arc::new(active),
            }),
        }
    }
}

/// Handle to a scheduler; clones share the same state.
pub struct Runner<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for Runner<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Send + 'static> Runner<A> {
    /// Start registering tasks
    ///
    /// # Example
    ///
    /// ```
    /// use message_store::runner::Runner;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> message_store::Result<()> {
    /// let runner = Runner::builder()
    ///     .task("greet", |_runner, name: String| async move {
    ///         println!("hello {}", name);
    ///         Ok(())
    ///     })
    ///     .build();
    ///
    /// runner.trigger("greet", "world".to_string())?;
    /// runner.stop().await;
    /// # Ok(())
    /// # }
    /// ```
    pub fn builder() -> RunnerBuilder<A> {
        RunnerBuilder {
            tasks: HashMap::new(),
        }
    }

    fn control(&self) -> MutexGuard<'_, Control<A>> {
        // The lock is never held across user code, so a poisoned lock still
        // guards consistent data.
        self.inner
            .control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run, queue or drop an invocation depending on the runner's state.
    ///
    /// Fails only when no task is registered under `task`.
    pub fn trigger(&self, task: &str, args: A) -> Result<()> {
        let Some(work) = self.inner.tasks.get(task).cloned() else {
            return Err(Error::assertion(format!("unknown runner task '{}'", task)));
        };

        {
            let mut control = self.control();
            match control.state {
                RunnerState::Stopped => return Ok(()),
                RunnerState::Paused => {
                    control.queue.push_back(Command {
                        task: task.to_string(),
                        args,
                    });
                    return Ok(());
                }
                RunnerState::Running => {
                    // Counted before the lock is released so a concurrent
                    // pause() waits for this invocation too.
                    self.inner.active.send_modify(|n| *n += 1);
                }
            }
        }

        let guard = ActiveGuard(Arc::clone(&self.inner.active));
        let future = work(self.clone(), args);
        let name = task.to_string();

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(err) = future.await {
                warn!(task = %name, err = %err, "Runner task failed");
            }
        });

        Ok(())
    }

    /// Stop starting new invocations; queue them instead. The returned future
    /// resolves once in-flight invocations have settled.
    pub fn pause(&self) -> impl Future<Output = ()> + Send + 'static {
        {
            let mut control = self.control();
            if control.state == RunnerState::Running {
                debug!("Runner paused");
                control.state = RunnerState::Paused;
            }
        }
        self.settled()
    }

    /// Resume and replay queued commands in their original order
    pub fn unpause(&self) {
        let queued: Vec<Command<A>> = {
            let mut control = self.control();
            if control.state == RunnerState::Stopped {
                return;
            }
            control.state = RunnerState::Running;
            control.queue.drain(..).collect()
        };

        debug!(queued = queued.len(), "Runner unpaused");

        for command in queued {
            // Tasks were validated when queued
            if let Err(err) = self.trigger(&command.task, command.args) {
                warn!(err = %err, "Failed to replay queued command");
            }
        }
    }

    /// Stop for good, dropping queued commands. The returned future resolves
    /// once in-flight invocations have settled.
    pub fn stop(&self) -> impl Future<Output = ()> + Send + 'static {
        {
            let mut control = self.control();
            if control.state != RunnerState::Stopped {
                debug!(dropped = control.queue.len(), "Runner stopped");
            }
            control.state = RunnerState::Stopped;
            control.queue.clear();
        }
        self.settled()
    }

    /// Resolves when no invocation is in flight
    pub fn settled(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut active = self.inner.active.subscribe();
        async move {
            // A closed channel means the runner is gone, so nothing is in flight
            let _ = active.wait_for(|n| *n == 0).await;
        }
    }

    pub fn state(&self) -> RunnerState {
        self.control().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunnerState::Running
    }

    pub fn is_paused(&self) -> bool {
        self.state() == RunnerState::Paused
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == RunnerState::Stopped
    }

    pub fn stats(&self) -> Stats {
        let control = self.control();
        Stats {
            active: *self.inner.active.borrow(),
            queued: control.queue.len(),
            paused: control.state == RunnerState::Paused,
            stopped: control.state == RunnerState::Stopped,
        }
    }
}
