//! Multicast listener lists.
//!
//! An [`Actions`] holds an ordered list of callbacks that are all invoked, in
//! registration order, every time the list fires. Every event point in the crate
//! (transport close/error/text/binary, server transport creation) is one `Actions`.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use tracing::warn;

/// A registered callback.
pub type Action<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Behaviour switches for an [`Actions`] list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionsOptions {
    /// Fire at most once. Later calls to [`Actions::fire`] are ignored.
    pub once: bool,
    /// Remember the fired value and hand it to actions added afterwards.
    /// Ignored unless `once` is also set.
    pub memory: bool,
}

impl ActionsOptions {
    /// Options for one-shot events whose late listeners still run, e.g. close.
    #[must_use]
    pub fn once_with_memory() -> Self {
        Self {
            once: true,
            memory: true,
        }
    }
}

struct State<T> {
    actions: Vec<Action<T>>,
    fired: bool,
    disabled: bool,
    memory: Option<Arc<T>>,
}

/// An ordered, thread-safe multicast list.
///
/// The internal lock is never held while actions run, so an action may add to or fire
/// any list, including its own.
pub struct Actions<T> {
    options: ActionsOptions,
    state: RwLock<State<T>>,
}

impl<T> Actions<T> {
    /// Create a list that fires every time.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(ActionsOptions::default())
    }

    /// Create a list with the given options.
    #[must_use]
    pub fn with_options(options: ActionsOptions) -> Self {
        Self {
            options,
            state: RwLock::new(State {
                actions: Vec::new(),
                fired: false,
                disabled: false,
                memory: None,
            }),
        }
    }

    /// Append an action.
    ///
    /// On a `once` list that already fired, the action either runs right away with the
    /// remembered value (`memory`) or is dropped, since it could never run.
    pub fn add<F>(&self, action: F) -> &Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.add_action(Arc::new(action))
    }

    /// Append an already shared action.
    pub fn add_action(&self, action: Action<T>) -> &Self {
        let replay = {
            let mut state = self.lock();
            if state.disabled {
                return self;
            }
            if self.options.once && state.fired {
                state.memory.clone()
            } else {
                state.actions.push(action.clone());
                None
            }
        };

        if let Some(value) = replay {
            invoke(&action, &value);
        }
        self
    }

    /// Invoke every registered action with `value`.
    ///
    /// Returns `false` if nothing fired because the list is disabled or is a `once`
    /// list that already fired.
    pub fn fire(&self, value: T) -> bool {
        let value = Arc::new(value);
        let snapshot = {
            let mut state = self.lock();
            if state.disabled || (self.options.once && state.fired) {
                return false;
            }
            state.fired = true;
            if self.options.once && self.options.memory {
                state.memory = Some(value.clone());
            }
            if self.options.once {
                std::mem::take(&mut state.actions)
            } else {
                state.actions.clone()
            }
        };

        for action in &snapshot {
            invoke(action, &value);
        }
        true
    }

    /// Drop every action and ignore further adds and fires.
    pub fn disable(&self) {
        let mut state = self.lock();
        state.disabled = true;
        state.actions.clear();
    }

    /// Whether the list has fired at least once.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.state.read().map_or_else(|e| e.into_inner().fired, |s| s.fired)
    }

    /// Number of registered actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .read()
            .map_or_else(|e| e.into_inner().actions.len(), |s| s.actions.len())
    }

    /// Whether no action is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Actions never run under the lock, so a poisoned lock still holds a consistent list.
    fn lock(&self) -> RwLockWriteGuard<'_, State<T>> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T> Default for Actions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Actions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Actions")
            .field("options", &self.options)
            .field("len", &self.len())
            .field("fired", &self.has_fired())
            .finish()
    }
}

fn invoke<T>(action: &Action<T>, value: &T) {
    if panic::catch_unwind(AssertUnwindSafe(|| action(value))).is_err() {
        warn!("Listener panicked; continuing with remaining listeners");
    }
}
