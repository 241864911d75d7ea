// ── In-memory backend ──
//
// A complete, process-local implementation of the backend traits. Used as
// the test double for the driver and as a local backend for demos.

mod auth;
mod store;
mod tree;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

pub use auth::MemoryAuth;
pub use store::MemoryStore;

use crate::Result;
use crate::backend::{AppHandle, AuthBackend, Backend, StoreBackend};
use crate::error::Error;
use crate::types::AppOptions;

type AppTable = Mutex<HashMap<String, Arc<MemoryApp>>>;

/// In-memory [`Backend`]. Cheaply cloneable; clones share the app table.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    apps: Arc<AppTable>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live app called `name`, for driving its auth and store directly.
    pub fn app(&self, name: &str) -> Option<Arc<MemoryApp>> {
        self.apps.lock().get(name).cloned()
    }

    pub fn app_count(&self) -> usize {
        self.apps.lock().len()
    }
}

impl Backend for MemoryBackend {
    fn initialize_app(&self, options: &AppOptions, name: &str) -> Result<Arc<dyn AppHandle>> {
        let mut apps = self.apps.lock();
        if apps.contains_key(name) {
            return Err(Error::DuplicateApp {
                name: name.to_owned(),
            });
        }
        let app = Arc::new(MemoryApp {
            name: name.to_owned(),
            options: options.clone(),
            auth: Arc::new(MemoryAuth::new()),
            store: Arc::new(MemoryStore::with_origin(options.database_url.clone())),
            apps: Arc::downgrade(&self.apps),
            deleted: AtomicBool::new(false),
        });
        apps.insert(name.to_owned(), Arc::clone(&app));
        debug!(app = name, "app initialized");
        Ok(app)
    }
}

/// One app inside a [`MemoryBackend`].
pub struct MemoryApp {
    name: String,
    options: AppOptions,
    auth: Arc<MemoryAuth>,
    store: Arc<MemoryStore>,
    apps: Weak<AppTable>,
    deleted: AtomicBool,
}

impl MemoryApp {
    pub fn options(&self) -> &AppOptions {
        &self.options
    }

    pub fn memory_auth(&self) -> &Arc<MemoryAuth> {
        &self.auth
    }

    pub fn memory_store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }
}

impl AppHandle for MemoryApp {
    fn name(&self) -> &str {
        &self.name
    }

    fn auth(&self) -> Arc<dyn AuthBackend> {
        Arc::clone(&self.auth) as Arc<dyn AuthBackend>
    }

    fn database(&self) -> Arc<dyn StoreBackend> {
        Arc::clone(&self.store) as Arc<dyn StoreBackend>
    }

    fn delete(&self) {
        if self.deleted.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(apps) = self.apps.upgrade() {
            apps.lock().remove(&self.name);
        }
        debug!(app = %self.name, "app deleted");
    }
}
