//! Reactive Runtime
//!
//! The runtime is the microtask queue shared by every observable of one
//! reactive graph. It provides the only suspension point of the system: the
//! microtask boundary at which batched notifications are flushed.
//!
//! # How It Works
//!
//! 1. A write notifies its observable. The observable queues the key and, if
//!    no flush is pending, queues a flush microtask on the runtime.
//!
//! 2. Draining the runtime (`run_microtasks`, `Observable::tick`, or
//!    awaiting a [`NextTick`]) runs microtasks in FIFO order until the queue
//!    is empty. Microtasks queued while draining run in the same drain.
//!
//! 3. A flush delivers every pending key to the observable's watchers.
//!    Effects whose dependencies changed queue their re-run as another
//!    microtask, which therefore also runs before the drain returns.
//!
//! # Thread Safety
//!
//! Handles are `Send + Sync`, but the runtime assumes one logical thread of
//! execution. No lock is held while a microtask runs, so microtasks may
//! freely read, write, and notify.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::observable::Observable;
use crate::error::Result;

/// What happens when a watcher or microtask panics during a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Catch the panic, log it, and keep delivering.
    #[default]
    Isolate,

    /// Let the panic unwind to whoever drained the queue.
    Propagate,
}

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Handling of panicking watchers, effects, and tick callbacks.
    pub failure_policy: FailurePolicy,

    /// Upper bound on microtasks run by a single drain. Whatever is left
    /// stays queued for the next drain.
    pub max_microtasks_per_drain: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::Isolate,
            max_microtasks_per_drain: 10_000,
        }
    }
}

impl RuntimeConfig {
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_max_microtasks_per_drain(mut self, max: usize) -> Self {
        self.max_microtasks_per_drain = max;
        self
    }
}

type Microtask = Box<dyn FnOnce() + Send>;

struct RuntimeInner {
    config: RuntimeConfig,
    microtasks: Mutex<VecDeque<Microtask>>,
    draining: AtomicBool,
}

/// Handle to a microtask queue shared by a graph of observables.
///
/// Cloning the handle shares the queue.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// A runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                microtasks: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Make `store` observable on this runtime.
    pub fn observable(&self, store: JsonValue) -> Result<Observable> {
        Observable::with_runtime(self.clone(), store)
    }

    /// Queue `task` to run at the next microtask boundary.
    pub fn queue_microtask(&self, task: impl FnOnce() + Send + 'static) {
        self.inner.microtasks.lock().push_back(Box::new(task));
    }

    /// Number of microtasks waiting to run.
    pub fn pending_microtasks(&self) -> usize {
        self.inner.microtasks.lock().len()
    }

    /// Drain the microtask queue and return how many microtasks ran.
    ///
    /// Calling this from inside a microtask is a no-op: the outer drain
    /// already picks up everything queued meanwhile.
    pub fn run_microtasks(&self) -> usize {
        if self.inner.draining.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let _reset = DrainReset(&self.inner.draining);

        let budget = self.inner.config.max_microtasks_per_drain;
        let mut ran = 0;
        loop {
            if ran >= budget {
                tracing::warn!(
                    ran,
                    remaining = self.pending_microtasks(),
                    "microtask budget exhausted, deferring the rest to the next drain"
                );
                break;
            }
            // Pop under the lock, run without it.
            let Some(task) = self.inner.microtasks.lock().pop_front() else {
                break;
            };
            self.run_one(task);
            ran += 1;
        }
        ran
    }

    fn run_one(&self, task: Microtask) {
        match self.inner.config.failure_policy {
            FailurePolicy::Propagate => task(),
            FailurePolicy::Isolate => {
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    tracing::error!("microtask panicked, continuing drain");
                }
            }
        }
    }

    /// A future that resolves after the next microtask boundary.
    ///
    /// `callback` runs as a microtask queued behind everything already
    /// pending. Polling the future drains the queue.
    pub fn next_tick(&self, callback: Option<Box<dyn FnOnce() + Send>>) -> NextTick {
        let done = Arc::new(AtomicBool::new(false));
        let marker = done.clone();
        self.queue_microtask(move || {
            if let Some(callback) = callback {
                callback();
            }
            marker.store(true, Ordering::SeqCst);
        });
        NextTick {
            runtime: self.clone(),
            done,
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("pending_microtasks", &self.pending_microtasks())
            .finish()
    }
}

/// Clears the draining flag, also when a microtask unwinds.
struct DrainReset<'a>(&'a AtomicBool);

impl Drop for DrainReset<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Future returned by [`Runtime::next_tick`] and `Observable::next_tick`.
#[must_use = "the tick callback still runs at the next drain, but nothing waits for it"]
pub struct NextTick {
    runtime: Runtime,
    done: Arc<AtomicBool>,
}

impl NextTick {
    /// Whether the tick's marker microtask has run.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

impl Future for NextTick {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.runtime.run_microtasks();
        if self.is_done() {
            Poll::Ready(())
        } else {
            // Budget ran out before reaching our marker.
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}
