// ── Reference stream factory ──
//
// `Reference` is a plain value (path + shared store handle). Streams are
// built on demand by `events`, and only talk to the backend while they
// have subscribers.

mod path;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use rtdb_api::{EventType, SnapshotListener, StoreBackend};

use crate::config::{DriverOptions, ListenerErrorPolicy};
use crate::error::CoreError;
use crate::stream::{LiveStream, Producer, Sink, Teardown};

pub(crate) use path::join_path;

/// Entry point into the live store of one app session.
#[derive(Clone)]
pub struct Database {
    store: Arc<dyn StoreBackend>,
    policy: ListenerErrorPolicy,
}

impl Database {
    pub(crate) fn new(store: Arc<dyn StoreBackend>, options: &DriverOptions) -> Self {
        Self {
            store,
            policy: options.listener_errors,
        }
    }

    /// Reference to `path`. Nothing is registered until a stream built from
    /// it is subscribed.
    pub fn reference(&self, path: impl Into<String>) -> Reference {
        Reference {
            path: path.into(),
            store: Arc::clone(&self.store),
            policy: self.policy,
        }
    }

    /// Reference to the location an absolute database URL points at.
    pub fn reference_from_url(&self, url: &str) -> Result<Reference, CoreError> {
        let parsed = Url::parse(url).map_err(|e| CoreError::InvalidUrl {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;
        let path = self
            .store
            .resolve_url(&parsed)
            .map_err(|e| match CoreError::from(e) {
                CoreError::InvalidUrl { reason, .. } => CoreError::InvalidUrl {
                    url: url.to_owned(),
                    reason,
                },
                other => other,
            })?;
        Ok(self.reference(path))
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

// ── Reference ────────────────────────────────────────────────────────

/// An addressable location in the live store.
///
/// Equal when the paths are equal and both point into the same store.
#[derive(Clone)]
pub struct Reference {
    path: String,
    store: Arc<dyn StoreBackend>,
    policy: ListenerErrorPolicy,
}

impl Reference {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Reference to `path` below this one: `"{self}/{path}"` with doubled
    /// separators collapsed once. The join is textual and not validated.
    #[must_use]
    pub fn child(&self, path: &str) -> Reference {
        Reference {
            path: join_path(&self.path, path),
            store: Arc::clone(&self.store),
            policy: self.policy,
        }
    }

    /// A new memory-bearing stream of `event` notifications at this location.
    ///
    /// Every call builds a separate stream instance with its own backend
    /// registration. Notifications without data are not emitted.
    pub fn events(&self, event: EventType) -> LiveStream<Value> {
        LiveStream::new(
            format!("{event} /{}", self.path),
            ReferenceProducer {
                store: Arc::clone(&self.store),
                path: self.path.clone(),
                event,
                policy: self.policy,
            },
        )
    }

    /// Shorthand for `events(EventType::Value)`.
    pub fn value(&self) -> LiveStream<Value> {
        self.events(EventType::Value)
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && Arc::ptr_eq(&self.store, &other.store)
    }
}

impl Eq for Reference {}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reference")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

// ── Producer ─────────────────────────────────────────────────────────

struct ReferenceProducer {
    store: Arc<dyn StoreBackend>,
    path: String,
    event: EventType,
    policy: ListenerErrorPolicy,
}

impl Producer<Value> for ReferenceProducer {
    fn start(&self, sink: Sink<Value>) -> Teardown {
        let on_snapshot = {
            let sink = sink.clone();
            move |snapshot: rtdb_api::DataSnapshot| {
                if let Some(value) = snapshot.into_value() {
                    sink.next(value);
                }
            }
        };

        let on_cancel = {
            let path = self.path.clone();
            let event = self.event;
            let policy = self.policy;
            move |err: rtdb_api::Error| match policy {
                ListenerErrorPolicy::Swallow => {
                    warn!(path = %path, %event, error = %err, "listener cancelled");
                }
                ListenerErrorPolicy::Propagate => sink.error(CoreError::Listener {
                    path: path.clone(),
                    event: event.to_string(),
                    message: err.to_string(),
                }),
            }
        };

        debug!(path = %self.path, event = %self.event, "registering listener");
        let handle = self.store.on(
            &self.path,
            self.event,
            SnapshotListener::with_cancel(on_snapshot, on_cancel),
        );

        let store = Arc::clone(&self.store);
        let path = self.path.clone();
        let event = self.event;
        Teardown::new(move || {
            debug!(path = %path, %event, "deregistering listener");
            store.off(&path, event, &handle);
        })
    }
}
