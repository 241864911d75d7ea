// ── In-memory live store ──
//
// A JSON tree with listener registration. Listener callbacks are always
// invoked after the state lock is released, so a callback may call back
// into the store (including `off`) without deadlocking.

use std::collections::HashSet;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, trace};
use url::Url;

use super::tree;
use crate::Result;
use crate::backend::{SnapshotListener, StoreBackend};
use crate::error::Error;
use crate::types::{DataSnapshot, EventType};

struct Registration {
    path: String,
    event: EventType,
    listener: SnapshotListener,
}

#[derive(Default)]
struct StoreState {
    root: Value,
    listeners: Vec<Registration>,
    denied: HashSet<String>,
    registered_paths: Vec<String>,
    registrations: u64,
    deregistrations: u64,
}

/// In-memory implementation of [`StoreBackend`].
///
/// `value` listeners receive the current value on registration and on every
/// change to their location, an ancestor, or a descendant. Child listeners
/// receive per-key added / changed / removed notifications.
pub struct MemoryStore {
    origin: Option<Url>,
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            origin: None,
            state: Mutex::new(StoreState {
                root: Value::Object(Map::new()),
                ..StoreState::default()
            }),
        }
    }

    /// A store that only resolves URLs with the same origin as `database_url`.
    pub fn with_origin(database_url: Url) -> Self {
        Self {
            origin: Some(database_url),
            ..Self::new()
        }
    }

    // ── Data ─────────────────────────────────────────────────────────

    pub fn get(&self, path: &str) -> Option<Value> {
        tree::get(&self.state.lock().root, &tree::normalize(path))
    }

    pub fn set(&self, path: &str, value: Value) {
        self.write(path, Some(value));
    }

    pub fn remove(&self, path: &str) {
        self.write(path, None);
    }

    fn write(&self, path: &str, value: Option<Value>) {
        let key = tree::normalize(path);
        let notifications = {
            let mut state = self.state.lock();

            let affected: Vec<(SnapshotListener, String, EventType, Option<Value>)> = state
                .listeners
                .iter()
                .filter(|r| tree::related(&r.path, &key))
                .map(|r| {
                    let before = tree::get(&state.root, &r.path);
                    (r.listener.clone(), r.path.clone(), r.event, before)
                })
                .collect();

            tree::write(&mut state.root, &key, value);

            let mut out = Vec::new();
            for (listener, path, event, before) in affected {
                let after = tree::get(&state.root, &path);
                if event == EventType::Value {
                    if before != after {
                        out.push((listener, DataSnapshot::new(tree::last_key(&path), after)));
                    }
                } else {
                    for snap in tree::child_events(event, before.as_ref(), after.as_ref()) {
                        out.push((listener.clone(), snap));
                    }
                }
            }
            out
        };

        trace!(path = %key, notifications = notifications.len(), "write applied");
        for (listener, snapshot) in notifications {
            listener.notify(snapshot);
        }
    }

    // ── Failure injection ────────────────────────────────────────────

    /// Reject future listeners at `path` with [`Error::PermissionDenied`].
    pub fn deny(&self, path: &str) {
        self.state.lock().denied.insert(tree::normalize(path));
    }

    pub fn allow(&self, path: &str) {
        self.state.lock().denied.remove(&tree::normalize(path));
    }

    /// Cancel and drop every listener at `path`, as a backend does when
    /// read access is revoked.
    pub fn revoke(&self, path: &str, err: &Error) {
        let key = tree::normalize(path);
        let revoked: Vec<SnapshotListener> = {
            let mut state = self.state.lock();
            let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.listeners)
                .into_iter()
                .partition(|r| r.path == key);
            state.listeners = kept;
            gone.into_iter().map(|r| r.listener).collect()
        };
        debug!(path = %key, count = revoked.len(), "revoking listeners");
        for listener in revoked {
            listener.cancel(err.clone());
        }
    }

    // ── Introspection ────────────────────────────────────────────────

    /// Live listeners for `event` at `path`.
    pub fn listener_count(&self, path: &str, event: EventType) -> usize {
        let key = tree::normalize(path);
        self.state
            .lock()
            .listeners
            .iter()
            .filter(|r| r.path == key && r.event == event)
            .count()
    }

    pub fn total_listeners(&self) -> usize {
        self.state.lock().listeners.len()
    }

    /// Paths exactly as they were passed to [`on`](StoreBackend::on), in order.
    pub fn registered_paths(&self) -> Vec<String> {
        self.state.lock().registered_paths.clone()
    }

    pub fn registrations(&self) -> u64 {
        self.state.lock().registrations
    }

    pub fn deregistrations(&self) -> u64 {
        self.state.lock().deregistrations
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreBackend for MemoryStore {
    fn on(&self, path: &str, event: EventType, listener: SnapshotListener) -> SnapshotListener {
        let key = tree::normalize(path);

        let initial = {
            let mut state = self.state.lock();
            state.registered_paths.push(path.to_owned());
            if state.denied.contains(&key) {
                None
            } else {
                state.registrations += 1;
                state.listeners.push(Registration {
                    path: key.clone(),
                    event,
                    listener: listener.clone(),
                });
                let current = tree::get(&state.root, &key);
                Some(match event {
                    EventType::Value => vec![DataSnapshot::new(tree::last_key(&key), current)],
                    EventType::ChildAdded => {
                        tree::child_events(EventType::ChildAdded, None, current.as_ref())
                    }
                    _ => Vec::new(),
                })
            }
        };

        match initial {
            Some(snapshots) => {
                debug!(path = %key, %event, "listener registered");
                for snapshot in snapshots {
                    listener.notify(snapshot);
                }
            }
            None => {
                debug!(path = %key, %event, "listener rejected");
                listener.cancel(Error::PermissionDenied { path: key });
            }
        }
        listener
    }

    fn off(&self, path: &str, event: EventType, listener: &SnapshotListener) {
        let key = tree::normalize(path);
        let mut state = self.state.lock();
        let position = state
            .listeners
            .iter()
            .position(|r| r.path == key && r.event == event && r.listener.is(listener));
        if let Some(index) = position {
            state.listeners.remove(index);
            state.deregistrations += 1;
            debug!(path = %key, %event, "listener removed");
        }
    }

    fn resolve_url(&self, url: &Url) -> Result<String> {
        if let Some(origin) = &self.origin {
            if origin.origin() != url.origin() {
                return Err(Error::InvalidUrl(format!(
                    "{url} is not a location in database {origin}"
                )));
            }
        }
        Ok(tree::normalize(url.path()))
    }
}
