// ── Driver ──
//
// Owns one app session and wires it into a `Source` per action stream.
// Every pump started by `run` is tied to the driver's cancellation token.

use std::fmt;
use std::sync::Arc;

use futures_core::Stream;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use rtdb_api::Backend;

use crate::auth::AuthSource;
use crate::config::{ConnectionConfig, DriverOptions};
use crate::database::Database;
use crate::error::CoreError;
use crate::responses::{Action, ActionHandler, ResponseRouter, ResponseStream};
use crate::session::{App, SessionRegistry};

/// A driver bound to one initialized app session.
///
/// The session stays registered until [`shutdown`](Self::shutdown) is
/// called; dropping the driver does not release it.
pub struct Driver<H> {
    app: Arc<App>,
    registry: Arc<SessionRegistry>,
    options: DriverOptions,
    handler: H,
    runtime: Handle,
    cancel: CancellationToken,
}

impl<H> Driver<H> {
    /// Initialize the session `session` and build the action handler from
    /// the resulting app.
    ///
    /// Must be called from within a Tokio runtime; background work runs on
    /// that runtime.
    pub fn new(
        registry: &Arc<SessionRegistry>,
        backend: &dyn Backend,
        config: &ConnectionConfig,
        session: &str,
        make_handler: impl FnOnce(&App) -> H,
    ) -> Result<Self, CoreError> {
        Self::with_options(
            registry,
            backend,
            config,
            session,
            DriverOptions::default(),
            make_handler,
        )
    }

    pub fn with_options(
        registry: &Arc<SessionRegistry>,
        backend: &dyn Backend,
        config: &ConnectionConfig,
        session: &str,
        options: DriverOptions,
        make_handler: impl FnOnce(&App) -> H,
    ) -> Result<Self, CoreError> {
        let runtime = Handle::try_current().map_err(|_| CoreError::NoRuntime)?;
        let app = registry.initialize(backend, config, session)?;
        let handler = make_handler(&app);
        info!(session, listener_errors = %options.listener_errors, "driver created");
        Ok(Self {
            app,
            registry: Arc::clone(registry),
            options,
            handler,
            runtime,
            cancel: CancellationToken::new(),
        })
    }

    pub fn app(&self) -> &Arc<App> {
        &self.app
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// Wire `actions` into a new [`Source`].
    ///
    /// The action stream is drained in the background from this point on,
    /// whether or not anything reads [`Source::responses`].
    pub fn run<P, S>(&self, actions: S) -> Source
    where
        P: Send + 'static,
        S: Stream<Item = Action<P>> + Send + 'static,
        H: ActionHandler<P> + Clone,
    {
        let auth = AuthSource::new(self.app.auth(), self.runtime.clone());
        let router = ResponseRouter::spawn(
            &self.runtime,
            actions,
            self.handler.clone(),
            self.cancel.child_token(),
        );
        let database = Database::new(self.app.database(), &self.options);
        info!(session = %self.app.name(), "driver running");
        Source {
            inner: Arc::new(SourceInner {
                auth,
                database,
                router,
            }),
        }
    }

    /// Stop every pump started by [`run`](Self::run) and release the session.
    ///
    /// Open response queries end. Live data and auth streams already handed
    /// out keep working until dropped.
    pub fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.registry.release_app(&self.app);
        info!(session = %self.app.name(), "driver shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl<H> fmt::Debug for Driver<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("app", &self.app)
            .field("options", &self.options)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

/// Function-style alias for [`Driver::new`].
pub fn make_driver<H>(
    registry: &Arc<SessionRegistry>,
    backend: &dyn Backend,
    config: &ConnectionConfig,
    session: &str,
    make_handler: impl FnOnce(&App) -> H,
) -> Result<Driver<H>, CoreError> {
    Driver::new(registry, backend, config, session, make_handler)
}

// ── Source ───────────────────────────────────────────────────────────

struct SourceInner {
    auth: AuthSource,
    database: Database,
    router: ResponseRouter,
}

/// Everything a driver exposes for one action stream. Cheap to clone.
#[derive(Clone)]
pub struct Source {
    inner: Arc<SourceInner>,
}

impl Source {
    pub fn auth(&self) -> &AuthSource {
        &self.inner.auth
    }

    pub fn database(&self) -> &Database {
        &self.inner.database
    }

    /// Results of every action named `name` dispatched from now on,
    /// merged in arrival order. Ends after the action stream and all of its
    /// `name` result streams have ended.
    pub fn responses(&self, name: &str) -> ResponseStream {
        self.inner.router.responses(name)
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("database", &self.inner.database)
            .finish_non_exhaustive()
    }
}
