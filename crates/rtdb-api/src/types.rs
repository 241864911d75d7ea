// ── Wire-level types shared by all backends ──
//
// Payloads delivered through backend callbacks. Values are untyped JSON;
// typing them is left to consumers of the streams.

use std::sync::Arc;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use url::Url;

// ── AppOptions ───────────────────────────────────────────────────────

/// Credentials and endpoints an app is initialized with.
///
/// Opaque to the driver: it is built once from the connection config and
/// handed to [`Backend::initialize_app`](crate::Backend::initialize_app)
/// unchanged.
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub api_key: SecretString,
    pub auth_domain: String,
    pub database_url: Url,
    pub messaging_sender_id: String,
    pub project_id: String,
    pub storage_bucket: String,
}

// ── EventType ────────────────────────────────────────────────────────

/// Kinds of change notification a store listener can register for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, EnumIter, Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// The full value at the location, on registration and on every change.
    Value,
    ChildAdded,
    ChildChanged,
    ChildRemoved,
    ChildMoved,
}

impl EventType {
    pub fn is_child_event(self) -> bool {
        !matches!(self, Self::Value)
    }
}

// ── DataSnapshot ─────────────────────────────────────────────────────

/// Immutable copy of the data at a location, as delivered to a listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSnapshot {
    /// Last path segment of the location (`None` at the root).
    pub key: Option<String>,
    /// The data, or `None` when nothing is stored there.
    pub value: Option<Value>,
}

impl DataSnapshot {
    pub fn new(key: Option<String>, value: Option<Value>) -> Self {
        Self { key, value }
    }

    /// Whether the location holds any data. JSON `null` counts as absent.
    pub fn exists(&self) -> bool {
        self.value.as_ref().is_some_and(|v| !v.is_null())
    }

    /// Borrow the stored value, treating JSON `null` as absent.
    pub fn val(&self) -> Option<&Value> {
        self.value.as_ref().filter(|v| !v.is_null())
    }

    /// Take the stored value, treating JSON `null` as absent.
    pub fn into_value(self) -> Option<Value> {
        self.value.filter(|v| !v.is_null())
    }
}

// ── Users ────────────────────────────────────────────────────────────

/// A signed-in account as reported by the auth backend.
///
/// Backends hand these out as `Arc<User>`; the pointer identity of the
/// `Arc` is what "the same current user" means.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub is_anonymous: bool,
    /// Sign-in providers linked to this account (e.g. `"password"`).
    #[serde(default)]
    pub provider_ids: Vec<String>,
}

impl User {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            display_name: None,
            photo_url: None,
            email_verified: false,
            is_anonymous: false,
            provider_ids: Vec::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Provider-side credential returned alongside a sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCredential {
    pub provider_id: String,
    pub sign_in_method: String,
}

/// Outcome of a sign-in flow, e.g. the result of a redirect sign-in.
///
/// When no redirect sign-in happened, `user` is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCredential {
    pub user: Option<Arc<User>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<AuthCredential>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<String>,
    /// Provider profile data, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_user_info: Option<Value>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_type_wire_names() {
        assert_eq!(EventType::ChildAdded.to_string(), "child_added");
        assert_eq!("value".parse::<EventType>().unwrap(), EventType::Value);
        assert_eq!(
            serde_json::to_value(EventType::ChildRemoved).unwrap(),
            json!("child_removed")
        );
        assert!("bogus".parse::<EventType>().is_err());
    }

    #[test]
    fn snapshot_null_is_absent() {
        let snap = DataSnapshot::new(Some("a".into()), Some(Value::Null));
        assert!(!snap.exists());
        assert!(snap.val().is_none());
        assert!(snap.into_value().is_none());

        let snap = DataSnapshot::new(None, Some(json!(0)));
        assert!(snap.exists());
        assert_eq!(snap.into_value(), Some(json!(0)));
    }

    #[test]
    fn user_serializes_camel_case() {
        let user = User::new("u1").with_email("a@b.c");
        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["uid"], "u1");
        assert_eq!(value["emailVerified"], false);
        assert!(value.get("displayName").is_none());
    }
}
