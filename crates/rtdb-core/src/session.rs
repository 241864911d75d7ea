// ── Session registry ──
//
// Explicit map from session id to the single backend app initialized for
// it. A session id is live from `initialize` until `release`.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use rtdb_api::{AppHandle, AuthBackend, Backend, StoreBackend};

use crate::config::ConnectionConfig;
use crate::error::CoreError;

/// One initialized backend app, shared read-only by every stream derived
/// from it.
pub struct App {
    name: String,
    config: ConnectionConfig,
    handle: Arc<dyn AppHandle>,
}

impl App {
    /// The session id this app was initialized under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn auth(&self) -> Arc<dyn AuthBackend> {
        self.handle.auth()
    }

    pub fn database(&self) -> Arc<dyn StoreBackend> {
        self.handle.database()
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("name", &self.name)
            .field("project_id", &self.config.project_id)
            .finish_non_exhaustive()
    }
}

/// Session id → app handle.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<App>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize the backend app for `name`.
    ///
    /// Fails with [`CoreError::SessionInUse`] while `name` is registered,
    /// without calling the backend.
    pub fn initialize(
        &self,
        backend: &dyn Backend,
        config: &ConnectionConfig,
        name: &str,
    ) -> Result<Arc<App>, CoreError> {
        match self.sessions.entry(name.to_owned()) {
            Entry::Occupied(_) => Err(CoreError::SessionInUse {
                name: name.to_owned(),
            }),
            Entry::Vacant(slot) => {
                let handle = backend.initialize_app(&config.app_options(), name)?;
                let app = Arc::new(App {
                    name: name.to_owned(),
                    config: config.clone(),
                    handle,
                });
                slot.insert(Arc::clone(&app));
                info!(session = name, project = %config.project_id, "session initialized");
                Ok(app)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<App>> {
        self.sessions.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    /// Drop the session and delete its backend app. Returns `false` if
    /// `name` was not registered.
    pub fn release(&self, name: &str) -> bool {
        match self.sessions.remove(name) {
            Some((_, app)) => {
                app.handle.delete();
                debug!(session = name, "session released");
                true
            }
            None => false,
        }
    }

    /// Release `app`'s session, but only if it is still the registered one.
    pub(crate) fn release_app(&self, app: &Arc<App>) -> bool {
        let removed = self
            .sessions
            .remove_if(&app.name, |_, current| Arc::ptr_eq(current, app));
        if removed.is_some() {
            app.handle.delete();
            debug!(session = %app.name, "session released");
        }
        removed.is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
