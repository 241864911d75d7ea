// ── Backend seam ──
//
// The callback-style surface a realtime backend exposes. The driver in
// `rtdb-core` only ever talks to these traits; a network client and the
// in-memory backend both implement them.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use url::Url;

use crate::Result;
use crate::error::Error;
use crate::types::{AppOptions, DataSnapshot, EventType, User, UserCredential};

// ── Auth observers ───────────────────────────────────────────────────

type UserFn = dyn Fn(Option<Arc<User>>) + Send + Sync;
type ErrorFn = dyn Fn(Error) + Send + Sync;
type CompleteFn = dyn Fn() + Send + Sync;

/// Callback triple registered with the auth backend.
///
/// Registration is process-lifetime: the auth traits expose no way to
/// remove an observer.
#[derive(Clone)]
pub struct AuthObserver {
    next: Arc<UserFn>,
    error: Arc<ErrorFn>,
    complete: Arc<CompleteFn>,
}

impl AuthObserver {
    pub fn new(
        next: impl Fn(Option<Arc<User>>) + Send + Sync + 'static,
        error: impl Fn(Error) + Send + Sync + 'static,
        complete: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            next: Arc::new(next),
            error: Arc::new(error),
            complete: Arc::new(complete),
        }
    }

    pub fn next(&self, user: Option<Arc<User>>) {
        (self.next)(user);
    }

    pub fn error(&self, err: Error) {
        (self.error)(err);
    }

    pub fn complete(&self) {
        (self.complete)();
    }
}

impl fmt::Debug for AuthObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthObserver").finish_non_exhaustive()
    }
}

// ── Snapshot listeners ───────────────────────────────────────────────

struct ListenerFns {
    on_snapshot: Box<dyn Fn(DataSnapshot) + Send + Sync>,
    on_cancel: Option<Box<dyn Fn(Error) + Send + Sync>>,
}

/// A data listener, and at the same time the handle used to remove it.
///
/// Backends match listeners structurally: [`StoreBackend::off`] removes the
/// registration whose listener [`is`](Self::is) the one passed in. Clones
/// share identity.
#[derive(Clone)]
pub struct SnapshotListener {
    fns: Arc<ListenerFns>,
}

impl SnapshotListener {
    pub fn new(on_snapshot: impl Fn(DataSnapshot) + Send + Sync + 'static) -> Self {
        Self {
            fns: Arc::new(ListenerFns {
                on_snapshot: Box::new(on_snapshot),
                on_cancel: None,
            }),
        }
    }

    /// Attach a cancel callback, invoked when the backend revokes the
    /// listener (permission change, connection loss).
    pub fn with_cancel(
        on_snapshot: impl Fn(DataSnapshot) + Send + Sync + 'static,
        on_cancel: impl Fn(Error) + Send + Sync + 'static,
    ) -> Self {
        Self {
            fns: Arc::new(ListenerFns {
                on_snapshot: Box::new(on_snapshot),
                on_cancel: Some(Box::new(on_cancel)),
            }),
        }
    }

    pub fn notify(&self, snapshot: DataSnapshot) {
        (self.fns.on_snapshot)(snapshot);
    }

    /// Deliver a cancellation. Returns `false` if no cancel callback is set.
    pub fn cancel(&self, err: Error) -> bool {
        match &self.fns.on_cancel {
            Some(on_cancel) => {
                on_cancel(err);
                true
            }
            None => false,
        }
    }

    /// Structural identity: `true` if both handles refer to the same listener.
    pub fn is(&self, other: &SnapshotListener) -> bool {
        Arc::ptr_eq(&self.fns, &other.fns)
    }
}

impl fmt::Debug for SnapshotListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotListener")
            .field("cancellable", &self.fns.on_cancel.is_some())
            .finish_non_exhaustive()
    }
}

// ── Traits ───────────────────────────────────────────────────────────

/// Live hierarchical key-value store.
pub trait StoreBackend: Send + Sync {
    /// Register `listener` for `event` at `path`. Returns the handle that
    /// must later be passed to [`off`](Self::off).
    fn on(&self, path: &str, event: EventType, listener: SnapshotListener) -> SnapshotListener;

    /// Remove a listener previously returned by [`on`](Self::on).
    /// Unknown handles are ignored.
    fn off(&self, path: &str, event: EventType, listener: &SnapshotListener);

    /// Resolve an absolute URL into a path inside this store.
    fn resolve_url(&self, url: &Url) -> Result<String> {
        Ok(url.path().trim_start_matches('/').to_owned())
    }
}

/// Authentication service.
pub trait AuthBackend: Send + Sync {
    /// Observe sign-in / sign-out transitions.
    fn on_auth_state_changed(&self, observer: AuthObserver);

    /// Observe ID token changes (sign-in, sign-out, token refresh).
    fn on_id_token_changed(&self, observer: AuthObserver);

    /// The user the backend currently considers signed in.
    fn current_user(&self) -> Option<Arc<User>>;

    /// Sign-in methods registered for `email`.
    fn fetch_providers_for_email(&self, email: &str) -> BoxFuture<'static, Result<Vec<String>>>;

    /// Result of a pending redirect sign-in, if any.
    fn get_redirect_result(&self) -> BoxFuture<'static, Result<UserCredential>>;
}

/// One initialized app: a named session owning one auth and one store handle.
pub trait AppHandle: Send + Sync {
    fn name(&self) -> &str;
    fn auth(&self) -> Arc<dyn AuthBackend>;
    fn database(&self) -> Arc<dyn StoreBackend>;
    /// Release the app. Its name becomes available again.
    fn delete(&self);
}

/// Entry point of a backend implementation.
pub trait Backend: Send + Sync {
    /// Initialize the app called `name`. Fails with
    /// [`Error::DuplicateApp`] if that name is already live.
    fn initialize_app(&self, options: &AppOptions, name: &str) -> Result<Arc<dyn AppHandle>>;
}
