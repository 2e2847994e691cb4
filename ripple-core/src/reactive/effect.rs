//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs whenever one of
//! the keys it read last time changes.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs once inside a tracking frame to record
//!    its initial dependencies.
//!
//! 2. It subscribes a catch-all watcher on the asynchronous channel. When a
//!    flushed key is one of its dependencies, a re-run is queued as a
//!    microtask.
//!
//! 3. The re-run happens inside a fresh tracking frame and replaces the
//!    dependency set for the next round.
//!
//! At most one re-run is pending at a time, so an effect runs once per flush
//! cycle no matter how many of its dependencies changed in that cycle.
//!
//! # Differences from Computed Properties
//!
//! - Computed properties return a value; effects do not.
//! - Computed properties are lazy (compute on read); effects are eager.
//! - Computed properties invalidate synchronously; effects re-run at the
//!   microtask boundary.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::observable::Observable;
use super::subscriber::{Watch, WatchTarget, WatcherId};
use super::Key;

/// Effect closure type.
pub(crate) type EffectFn = Arc<dyn Fn(&Observable) + Send + Sync>;

struct EffectState {
    run: EffectFn,
    dependencies: Mutex<Vec<Key>>,
    rerun_pending: AtomicBool,
    disposed: AtomicBool,
    run_count: AtomicUsize,
    watcher: Mutex<Option<WatcherId>>,
}

impl EffectState {
    fn execute(&self, owner: &Observable) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let ((), dependencies) = owner.tracker().track_with(|| (self.run)(owner));
        *self.dependencies.lock() = dependencies;
        self.run_count.fetch_add(1, Ordering::SeqCst);
    }

    fn depends_on(&self, key: &str) -> bool {
        self.dependencies.lock().iter().any(|dep| dep == key)
    }
}

/// Handle to a registered effect.
///
/// Dropping the handle does not stop the effect; call [`dispose`] for that.
///
/// [`dispose`]: EffectHandle::dispose
#[derive(Clone)]
pub struct EffectHandle {
    state: Arc<EffectState>,
    owner: Observable,
}

impl EffectHandle {
    /// Run `run` once and keep re-running it when its dependencies change.
    pub(crate) fn register(owner: &Observable, run: EffectFn) -> Self {
        let state = Arc::new(EffectState {
            run,
            dependencies: Mutex::new(Vec::new()),
            rerun_pending: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
            watcher: Mutex::new(None),
        });

        state.execute(owner);

        let weak_owner = owner.downgrade();
        let weak_state = Arc::downgrade(&state);
        let id = owner.watch(WatchTarget::All, move |key: Option<&str>| {
            let (Some(owner), Some(state)) = (weak_owner.upgrade(), weak_state.upgrade()) else {
                return Watch::Stop;
            };
            if state.disposed.load(Ordering::SeqCst) {
                return Watch::Stop;
            }
            let Some(key) = key else {
                return Watch::Continue;
            };
            if state.depends_on(key) && !state.rerun_pending.swap(true, Ordering::SeqCst) {
                tracing::debug!(key, "effect dependency changed, scheduling re-run");
                let weak_owner = owner.downgrade();
                let state = state.clone();
                owner.runtime().queue_microtask(move || {
                    state.rerun_pending.store(false, Ordering::SeqCst);
                    if let Some(owner) = weak_owner.upgrade() {
                        state.execute(&owner);
                    }
                });
            }
            Watch::Continue
        });
        *state.watcher.lock() = Some(id);

        Self {
            state,
            owner: owner.clone(),
        }
    }

    /// Stop the effect. It never runs again and its watcher is removed.
    pub fn dispose(&self) {
        self.state.disposed.store(true, Ordering::SeqCst);
        if let Some(id) = self.state.watcher.lock().take() {
            self.owner.unwatch(id);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.state.disposed.load(Ordering::SeqCst)
    }

    /// Number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.state.run_count.load(Ordering::SeqCst)
    }

    /// Keys read by the most recent run.
    pub fn dependencies(&self) -> Vec<Key> {
        self.state.dependencies.lock().clone()
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("run_count", &self.run_count())
            .field("dependencies", &self.dependencies())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicI64;

    #[test]
    fn effect_runs_on_creation() {
        let obs = Observable::new(json!({ "foo": 1 })).unwrap();
        let effect = obs.effect(|obs| {
            obs.get("foo").unwrap();
        });

        assert_eq!(effect.run_count(), 1);
        assert_eq!(effect.dependencies(), vec!["foo"]);
    }

    #[test]
    fn effect_reruns_once_per_flush() {
        let obs = Observable::new(json!({ "a": 0, "b": 0 })).unwrap();
        let sum = Arc::new(AtomicI64::new(-1));
        let s = sum.clone();
        let effect = obs.effect(move |obs| {
            let a = obs.get("a").unwrap().as_i64().unwrap_or(0);
            let b = obs.get("b").unwrap().as_i64().unwrap_or(0);
            s.store(a + b, Ordering::SeqCst);
        });

        obs.set("a", 1).unwrap();
        obs.set("b", 2).unwrap();
        obs.set("a", 3).unwrap();
        assert_eq!(effect.run_count(), 1);

        obs.tick();
        assert_eq!(effect.run_count(), 2);
        assert_eq!(sum.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn effect_ignores_unrelated_keys() {
        let obs = Observable::new(json!({ "foo": 0, "bar": 0 })).unwrap();
        let effect = obs.effect(|obs| {
            obs.get("foo").unwrap();
        });

        obs.set("bar", 1).unwrap();
        obs.tick();
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn disposed_effect_does_not_run() {
        let obs = Observable::new(json!({ "foo": 0 })).unwrap();
        let effect = obs.effect(|obs| {
            obs.get("foo").unwrap();
        });

        effect.dispose();
        assert!(effect.is_disposed());

        obs.set("foo", 1).unwrap();
        obs.tick();
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_refreshes_dependencies() {
        let obs = Observable::new(json!({ "flag": true, "a": 0, "b": 0 })).unwrap();
        let effect = obs.effect(|obs| {
            if obs.get("flag").unwrap().as_bool() == Some(true) {
                obs.get("a").unwrap();
            } else {
                obs.get("b").unwrap();
            }
        });
        assert_eq!(effect.dependencies(), vec!["flag", "a"]);

        obs.set("flag", false).unwrap();
        obs.tick();
        assert_eq!(effect.dependencies(), vec!["flag", "b"]);

        obs.set("a", 1).unwrap();
        obs.tick();
        assert_eq!(effect.run_count(), 2);
    }
}
