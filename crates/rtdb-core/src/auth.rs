// ── Auth stream bundle ──
//
// Observer streams (auth state, ID token, current user) relay a single
// process-lifetime backend registration. One-shot lookups run on the
// driver's runtime and complete after their only value.

use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use rtdb_api::{AuthBackend, AuthObserver, User, UserCredential};

use crate::error::CoreError;
use crate::stream::{LiveStream, Producer, Sink, Teardown};

/// The signed-in user, or `None` when signed out.
pub type MaybeUser = Option<Arc<User>>;

/// Auth streams of one app session.
///
/// The observer streams are built once and shared; subscribing to the same
/// accessor twice shares one backend registration.
#[derive(Clone)]
pub struct AuthSource {
    backend: Arc<dyn AuthBackend>,
    runtime: Handle,
    auth_state: LiveStream<MaybeUser>,
    id_token: LiveStream<MaybeUser>,
    current_user: LiveStream<MaybeUser>,
    redirect_result: LiveStream<UserCredential>,
}

impl AuthSource {
    pub(crate) fn new(backend: Arc<dyn AuthBackend>, runtime: Handle) -> Self {
        let observe = |kind: ObserverKind| {
            LiveStream::new(kind.label(), ObserverProducer::new(&backend, kind))
        };
        let redirect_result = {
            let backend = Arc::clone(&backend);
            LiveStream::new(
                "auth redirect_result",
                LookupProducer::new(runtime.clone(), move || backend.get_redirect_result()),
            )
        };
        Self {
            auth_state: observe(ObserverKind::AuthState),
            id_token: observe(ObserverKind::IdToken),
            current_user: observe(ObserverKind::CurrentUser),
            redirect_result,
            backend,
            runtime,
        }
    }

    /// Every sign-in / sign-out transition, emitted verbatim.
    pub fn auth_state(&self) -> LiveStream<MaybeUser> {
        self.auth_state.clone()
    }

    /// Every ID token change (including refreshes), emitted verbatim.
    pub fn id_token(&self) -> LiveStream<MaybeUser> {
        self.id_token.clone()
    }

    /// The backend's current user, re-read on every ID token change and
    /// emitted only when it is a different `Arc` than the last emission.
    pub fn current_user(&self) -> LiveStream<MaybeUser> {
        self.current_user.clone()
    }

    /// Sign-in methods registered for `email`. Emits once and completes.
    pub fn providers_for_email(&self, email: impl Into<String>) -> LiveStream<Vec<String>> {
        let email = email.into();
        let backend = Arc::clone(&self.backend);
        LiveStream::new(
            format!("auth providers_for_email {email}"),
            LookupProducer::new(self.runtime.clone(), move || {
                backend.fetch_providers_for_email(&email)
            }),
        )
    }

    /// Result of a pending redirect sign-in. Emits once and completes.
    pub fn redirect_result(&self) -> LiveStream<UserCredential> {
        self.redirect_result.clone()
    }
}

impl std::fmt::Debug for AuthSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSource").finish_non_exhaustive()
    }
}

// ── Observer relay ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObserverKind {
    AuthState,
    IdToken,
    CurrentUser,
}

impl ObserverKind {
    fn label(self) -> &'static str {
        match self {
            Self::AuthState => "auth auth_state",
            Self::IdToken => "auth id_token",
            Self::CurrentUser => "auth current_user",
        }
    }
}

enum Terminal {
    Failed(CoreError),
    Completed,
}

#[derive(Default)]
struct RelayState {
    sink: Option<Sink<MaybeUser>>,
    /// Last value forwarded; meaningful once `seen` is set.
    latest: MaybeUser,
    seen: bool,
    registered: bool,
    terminal: Option<Terminal>,
}

/// Bridges one backend observer registration to successive activations of
/// a stream. The sink is never called with the relay lock held.
struct ObserverProducer {
    backend: Arc<dyn AuthBackend>,
    kind: ObserverKind,
    relay: Arc<Mutex<RelayState>>,
}

impl ObserverProducer {
    fn new(backend: &Arc<dyn AuthBackend>, kind: ObserverKind) -> Self {
        Self {
            backend: Arc::clone(backend),
            kind,
            relay: Arc::new(Mutex::new(RelayState::default())),
        }
    }

    fn observer(&self) -> AuthObserver {
        let kind = self.kind;
        let backend: Weak<dyn AuthBackend> = Arc::downgrade(&self.backend);

        let relay = Arc::clone(&self.relay);
        let next = move |user: MaybeUser| {
            let user = if kind == ObserverKind::CurrentUser {
                match backend.upgrade() {
                    Some(backend) => backend.current_user(),
                    None => return,
                }
            } else {
                user
            };
            let sink = {
                let mut state = relay.lock();
                let unchanged = state.seen && same_user(&state.latest, &user);
                if kind == ObserverKind::CurrentUser && unchanged {
                    return;
                }
                state.latest = user.clone();
                state.seen = true;
                state.sink.clone()
            };
            if let Some(sink) = sink {
                sink.next(user);
            }
        };

        let relay_err = Arc::clone(&self.relay);
        let error = move |err: rtdb_api::Error| {
            warn!(stream = kind.label(), error = %err, "auth observer failed");
            let err = CoreError::from(err);
            let sink = {
                let mut state = relay_err.lock();
                state.terminal = Some(Terminal::Failed(err.clone()));
                state.sink.take()
            };
            if let Some(sink) = sink {
                sink.error(err);
            }
        };

        let relay_done = Arc::clone(&self.relay);
        let complete = move || {
            let sink = {
                let mut state = relay_done.lock();
                state.terminal = Some(Terminal::Completed);
                state.sink.take()
            };
            if let Some(sink) = sink {
                sink.complete();
            }
        };

        AuthObserver::new(next, error, complete)
    }
}

impl Producer<MaybeUser> for ObserverProducer {
    fn start(&self, sink: Sink<MaybeUser>) -> Teardown {
        let (register, replay) = {
            let mut state = self.relay.lock();
            let ended = match &state.terminal {
                Some(Terminal::Failed(err)) => Some(Some(err.clone())),
                Some(Terminal::Completed) => Some(None),
                None => None,
            };
            if let Some(failure) = ended {
                drop(state);
                match failure {
                    Some(err) => sink.error(err),
                    None => sink.complete(),
                }
                return Teardown::noop();
            }
            state.sink = Some(sink.clone());
            let register = !state.registered;
            state.registered = true;
            let replay = state.seen.then(|| state.latest.clone());
            (register, replay)
        };

        if register {
            debug!(stream = self.kind.label(), "registering auth observer");
            let observer = self.observer();
            match self.kind {
                ObserverKind::AuthState => self.backend.on_auth_state_changed(observer),
                ObserverKind::IdToken | ObserverKind::CurrentUser => {
                    self.backend.on_id_token_changed(observer);
                }
            }
        } else if let Some(user) = replay {
            sink.next(user);
        }

        // The backend registration outlives this activation; only detach.
        let relay = Arc::clone(&self.relay);
        let epoch = sink.epoch();
        Teardown::new(move || {
            let mut state = relay.lock();
            if state.sink.as_ref().is_some_and(|s| s.epoch() == epoch) {
                state.sink = None;
            }
        })
    }
}

fn same_user(a: &MaybeUser, b: &MaybeUser) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

// ── One-shot lookups ─────────────────────────────────────────────────

type Lookup<T> = dyn Fn() -> BoxFuture<'static, rtdb_api::Result<T>> + Send + Sync;

/// Runs one backend lookup per activation: emits the value then completes,
/// or ends with the backend's error.
struct LookupProducer<T> {
    runtime: Handle,
    lookup: Box<Lookup<T>>,
}

impl<T> LookupProducer<T> {
    fn new(
        runtime: Handle,
        lookup: impl Fn() -> BoxFuture<'static, rtdb_api::Result<T>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            runtime,
            lookup: Box::new(lookup),
        }
    }
}

impl<T: Clone + Send + 'static> Producer<T> for LookupProducer<T> {
    fn start(&self, sink: Sink<T>) -> Teardown {
        let pending = (self.lookup)();
        self.runtime.spawn(async move {
            match pending.await {
                Ok(value) => {
                    sink.next(value);
                    sink.complete();
                }
                Err(err) => sink.error(err.into()),
            }
        });
        Teardown::noop()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures_util::{FutureExt, StreamExt};
    use pretty_assertions::assert_eq;
    use rtdb_api::{Error, MemoryAuth};

    fn setup() -> (Arc<MemoryAuth>, AuthSource) {
        let memory = Arc::new(MemoryAuth::new());
        let source = AuthSource::new(
            Arc::clone(&memory) as Arc<dyn AuthBackend>,
            Handle::current(),
        );
        (memory, source)
    }

    fn uid(item: Option<Result<MaybeUser, CoreError>>) -> Option<String> {
        item.unwrap().unwrap().map(|u| u.uid.clone())
    }

    #[tokio::test]
    async fn auth_state_emits_every_transition() {
        let (memory, source) = setup();
        let mut sub = source.auth_state().subscribe();
        assert_eq!(uid(sub.next().await), None);

        let u1 = Arc::new(User::new("u1"));
        memory.emit_auth_state(Some(Arc::clone(&u1)));
        memory.emit_auth_state(Some(Arc::clone(&u1)));
        memory.emit_auth_state(None);

        assert_eq!(uid(sub.next().await), Some("u1".into()));
        assert_eq!(uid(sub.next().await), Some("u1".into()));
        assert_eq!(uid(sub.next().await), None);
        assert!(sub.next().now_or_never().is_none());
    }

    #[tokio::test]
    async fn current_user_dedups_by_reference() {
        let (memory, source) = setup();
        let mut current = source.current_user().subscribe();
        let mut tokens = source.id_token().subscribe();
        assert_eq!(uid(current.next().await), None);

        let u1 = memory.sign_in(User::new("u1"));
        memory.refresh_token();
        memory.sign_out();

        assert_eq!(uid(current.next().await), Some("u1".into()));
        assert_eq!(uid(current.next().await), None);
        assert!(current.next().now_or_never().is_none());

        // The raw token stream sees all four callbacks.
        for expected in [None, Some("u1"), Some("u1"), None] {
            assert_eq!(uid(tokens.next().await), expected.map(String::from));
        }
        drop(u1);
    }

    #[tokio::test]
    async fn equal_but_distinct_users_are_both_emitted() {
        let (memory, source) = setup();
        let mut current = source.current_user().subscribe();
        let _ = current.next().await;

        memory.sign_in(User::new("same"));
        memory.sign_in(User::new("same"));
        assert_eq!(uid(current.next().await), Some("same".into()));
        assert_eq!(uid(current.next().await), Some("same".into()));
    }

    #[tokio::test]
    async fn resubscribing_reuses_the_registration() {
        let (memory, source) = setup();
        let stream = source.auth_state();

        let first = stream.subscribe();
        memory.sign_in(User::new("u1"));
        drop(first);
        assert!(!stream.is_active());

        let mut second = stream.subscribe();
        assert_eq!(memory.auth_state_observers(), 1);
        assert_eq!(uid(second.next().await), Some("u1".into()));
    }

    #[tokio::test]
    async fn observer_errors_are_terminal() {
        let (memory, source) = setup();
        let mut sub = source.auth_state().subscribe();
        let _ = sub.next().await;

        memory.fail_observers(&Error::auth("auth/network-request-failed", "offline"));
        assert_eq!(
            sub.next().await,
            Some(Err(CoreError::Backend {
                code: "auth/network-request-failed".into(),
                message: "offline".into(),
            }))
        );
        assert_eq!(sub.next().await, None);

        let mut late = source.auth_state().subscribe();
        assert!(matches!(late.next().await, Some(Err(CoreError::Backend { .. }))));
    }

    #[tokio::test]
    async fn providers_for_email_emits_then_completes() {
        let (memory, source) = setup();
        memory.register_providers("ada@example.com", &["password", "google.com"]);

        let mut sub = source.providers_for_email("ada@example.com").subscribe();
        assert_eq!(
            sub.next().await,
            Some(Ok(vec!["password".to_string(), "google.com".to_string()]))
        );
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn failed_lookup_is_a_stream_error() {
        let (memory, source) = setup();
        memory.fail_lookups(Some(Error::auth("auth/invalid-email", "bad email")));

        let mut sub = source.redirect_result().subscribe();
        assert_eq!(
            sub.next().await,
            Some(Err(CoreError::Backend {
                code: "auth/invalid-email".into(),
                message: "bad email".into(),
            }))
        );
        assert_eq!(sub.next().await, None);
    }
}
