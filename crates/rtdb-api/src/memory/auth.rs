// ── In-memory auth service ──
//
// Scripted auth state. Tests drive transitions with `sign_in` /
// `sign_out` / `refresh_token`, or fire raw observer notifications with
// the `emit_*` methods.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use parking_lot::Mutex;
use tracing::debug;

use crate::Result;
use crate::backend::{AuthBackend, AuthObserver};
use crate::error::Error;
use crate::types::{User, UserCredential};

#[derive(Default)]
struct AuthState {
    current: Option<Arc<User>>,
    state_observers: Vec<AuthObserver>,
    token_observers: Vec<AuthObserver>,
    providers: HashMap<String, Vec<String>>,
    redirect: Option<UserCredential>,
    lookup_failure: Option<Error>,
}

/// In-memory implementation of [`AuthBackend`].
///
/// Like a real auth service, a newly registered observer is immediately
/// told the current user.
#[derive(Default)]
pub struct MemoryAuth {
    state: Mutex<AuthState>,
}

impl MemoryAuth {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Sign `user` in and notify both observer lists.
    pub fn sign_in(&self, user: User) -> Arc<User> {
        let user = Arc::new(user);
        self.sign_in_as(Arc::clone(&user));
        user
    }

    /// Sign in with an existing handle, keeping its identity.
    pub fn sign_in_as(&self, user: Arc<User>) {
        let (state, token) = {
            let mut st = self.state.lock();
            st.current = Some(Arc::clone(&user));
            (st.state_observers.clone(), st.token_observers.clone())
        };
        debug!(uid = %user.uid, "signed in");
        notify(&state, Some(&user));
        notify(&token, Some(&user));
    }

    pub fn sign_out(&self) {
        let (state, token) = {
            let mut st = self.state.lock();
            st.current = None;
            (st.state_observers.clone(), st.token_observers.clone())
        };
        debug!("signed out");
        notify(&state, None);
        notify(&token, None);
    }

    /// Rotate the ID token of the current user. Only token observers fire,
    /// and they see the same user handle as before.
    pub fn refresh_token(&self) {
        let (token, current) = {
            let st = self.state.lock();
            (st.token_observers.clone(), st.current.clone())
        };
        notify(&token, current.as_ref());
    }

    /// Replace the current user without notifying anyone.
    pub fn set_current_user(&self, user: Option<Arc<User>>) {
        self.state.lock().current = user;
    }

    // ── Raw notifications ────────────────────────────────────────────

    /// Fire auth-state observers with `user`, leaving the current user as is.
    pub fn emit_auth_state(&self, user: Option<Arc<User>>) {
        let observers = self.state.lock().state_observers.clone();
        notify(&observers, user.as_ref());
    }

    /// Fire ID-token observers with `user`, leaving the current user as is.
    pub fn emit_id_token(&self, user: Option<Arc<User>>) {
        let observers = self.state.lock().token_observers.clone();
        notify(&observers, user.as_ref());
    }

    /// Deliver `err` to every observer and drop them.
    pub fn fail_observers(&self, err: &Error) {
        let observers = self.take_observers();
        for observer in observers {
            observer.error(err.clone());
        }
    }

    /// Complete every observer and drop them.
    pub fn complete_observers(&self) {
        for observer in self.take_observers() {
            observer.complete();
        }
    }

    fn take_observers(&self) -> Vec<AuthObserver> {
        let mut st = self.state.lock();
        let mut all = std::mem::take(&mut st.state_observers);
        all.append(&mut st.token_observers);
        all
    }

    // ── Lookup data ──────────────────────────────────────────────────

    pub fn register_providers(&self, email: &str, providers: &[&str]) {
        self.state.lock().providers.insert(
            email.to_owned(),
            providers.iter().map(|p| (*p).to_owned()).collect(),
        );
    }

    pub fn set_redirect_result(&self, credential: UserCredential) {
        self.state.lock().redirect = Some(credential);
    }

    /// Make every one-shot lookup fail with `err` (`None` restores success).
    pub fn fail_lookups(&self, err: Option<Error>) {
        self.state.lock().lookup_failure = err;
    }

    // ── Introspection ────────────────────────────────────────────────

    pub fn auth_state_observers(&self) -> usize {
        self.state.lock().state_observers.len()
    }

    pub fn id_token_observers(&self) -> usize {
        self.state.lock().token_observers.len()
    }
}

fn notify(observers: &[AuthObserver], user: Option<&Arc<User>>) {
    for observer in observers {
        observer.next(user.cloned());
    }
}

impl AuthBackend for MemoryAuth {
    fn on_auth_state_changed(&self, observer: AuthObserver) {
        let current = {
            let mut st = self.state.lock();
            st.state_observers.push(observer.clone());
            st.current.clone()
        };
        observer.next(current);
    }

    fn on_id_token_changed(&self, observer: AuthObserver) {
        let current = {
            let mut st = self.state.lock();
            st.token_observers.push(observer.clone());
            st.current.clone()
        };
        observer.next(current);
    }

    fn current_user(&self) -> Option<Arc<User>> {
        self.state.lock().current.clone()
    }

    fn fetch_providers_for_email(&self, email: &str) -> BoxFuture<'static, Result<Vec<String>>> {
        let result = {
            let st = self.state.lock();
            match &st.lookup_failure {
                Some(err) => Err(err.clone()),
                None => Ok(st.providers.get(email).cloned().unwrap_or_default()),
            }
        };
        future::ready(result).boxed()
    }

    fn get_redirect_result(&self) -> BoxFuture<'static, Result<UserCredential>> {
        let result = {
            let st = self.state.lock();
            match &st.lookup_failure {
                Some(err) => Err(err.clone()),
                None => Ok(st.redirect.clone().unwrap_or_default()),
            }
        };
        future::ready(result).boxed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn collect_users(auth: &MemoryAuth, token: bool) -> Arc<Mutex<Vec<Option<String>>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer = AuthObserver::new(
            move |user: Option<Arc<User>>| sink.lock().push(user.map(|u| u.uid.clone())),
            |_| {},
            || {},
        );
        if token {
            auth.on_id_token_changed(observer);
        } else {
            auth.on_auth_state_changed(observer);
        }
        seen
    }

    #[test]
    fn observers_see_initial_state_then_transitions() {
        let auth = MemoryAuth::new();
        let state = collect_users(&auth, false);
        let token = collect_users(&auth, true);

        auth.sign_in(User::new("u1"));
        auth.refresh_token();
        auth.sign_out();

        assert_eq!(*state.lock(), vec![None, Some("u1".into()), None]);
        assert_eq!(
            *token.lock(),
            vec![None, Some("u1".into()), Some("u1".into()), None]
        );
    }

    #[test]
    fn refresh_keeps_user_identity() {
        let auth = MemoryAuth::new();
        let user = auth.sign_in(User::new("u1"));
        auth.refresh_token();
        assert!(Arc::ptr_eq(&auth.current_user().unwrap(), &user));
    }

    #[test]
    fn lookups_resolve_and_fail() {
        use tokio_test::block_on;

        let auth = MemoryAuth::new();
        auth.register_providers("a@b.c", &["password", "google.com"]);

        let providers = block_on(auth.fetch_providers_for_email("a@b.c")).unwrap();
        assert_eq!(providers, vec!["password", "google.com"]);
        assert!(block_on(auth.fetch_providers_for_email("x@y.z")).unwrap().is_empty());
        assert!(block_on(auth.get_redirect_result()).unwrap().user.is_none());

        auth.fail_lookups(Some(Error::auth("auth/network-request-failed", "offline")));
        assert!(block_on(auth.get_redirect_result()).is_err());
    }

    #[test]
    fn failing_observers_drops_them() {
        let auth = MemoryAuth::new();
        let errors = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&errors);
        auth.on_auth_state_changed(AuthObserver::new(
            |_| {},
            move |_| *sink.lock() += 1,
            || {},
        ));
        auth.fail_observers(&Error::Other("down".into()));
        assert_eq!(*errors.lock(), 1);
        assert_eq!(auth.auth_state_observers(), 0);
    }
}
