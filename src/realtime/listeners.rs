#![expect(
    clippy::module_name_repetitions,
    reason = "Listener types deliberately include the module name for clarity"
)]

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use serde_json::Value;

/// Callback invoked with a message's `data` payload.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync + 'static>;

/// Which listener list a callback belongs to.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ListenerKind {
    Alert,
    Notification,
}

/// Ordered alert and notification callbacks.
///
/// Callbacks run in registration order. A callback that panics is logged and
/// skipped; the remaining callbacks still receive the payload.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    alerts: RwLock<Vec<(u64, Listener)>>,
    notifications: RwLock<Vec<(u64, Listener)>>,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("alerts", &self.len(ListenerKind::Alert))
            .field("notifications", &self.len(ListenerKind::Notification))
            .finish_non_exhaustive()
    }
}

impl ListenerRegistry {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append `listener` to the `kind` list.
    pub fn register(self: &Arc<Self>, kind: ListenerKind, listener: Listener) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.list(kind)
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));

        ListenerHandle {
            registry: Arc::downgrade(self),
            kind,
            id,
        }
    }

    /// Invoke every `kind` listener with `payload`.
    ///
    /// Returns how many listeners completed without panicking.
    pub fn dispatch(&self, kind: ListenerKind, payload: &Value) -> usize {
        // Snapshot so callbacks may register or remove listeners while running.
        let listeners: Vec<Listener> = self
            .list(kind)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        let mut completed = 0;
        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(payload))) {
                Ok(()) => completed += 1,
                Err(panic) => {
                    tracing::error!(
                        %kind,
                        panic = panic_message(panic.as_ref()),
                        "Error in {kind} listener"
                    );
                }
            }
        }
        completed
    }

    #[must_use]
    pub fn len(&self, kind: ListenerKind) -> usize {
        self.list(kind)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len(ListenerKind::Alert) == 0 && self.len(ListenerKind::Notification) == 0
    }

    fn remove(&self, kind: ListenerKind, id: u64) -> bool {
        let mut listeners = self
            .list(kind)
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn list(&self, kind: ListenerKind) -> &RwLock<Vec<(u64, Listener)>> {
        match kind {
            ListenerKind::Alert => &self.alerts,
            ListenerKind::Notification => &self.notifications,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Registration returned by `on_alert` / `on_notification`.
///
/// Call [`remove`](Self::remove) when the owner goes away. Dropping the handle
/// without removing it keeps the listener registered for the client's lifetime.
#[must_use = "dropping the handle keeps the listener registered forever; call `remove` on teardown"]
#[derive(Debug)]
pub struct ListenerHandle {
    registry: Weak<ListenerRegistry>,
    kind: ListenerKind,
    id: u64,
}

impl ListenerHandle {
    #[must_use]
    pub const fn kind(&self) -> ListenerKind {
        self.kind
    }

    /// Unregister the listener. Returns `false` if it was already gone.
    pub fn remove(self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.remove(self.kind, self.id))
    }
}
