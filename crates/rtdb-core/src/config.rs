// ── Runtime connection configuration ──
//
// These types describe *which* backend app to open and how the driver
// treats backend failures. They carry credential data but never touch
// disk; `rtdb-config` builds them from profiles.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use url::Url;

use rtdb_api::AppOptions;

/// Credentials and endpoints of one backend project.
///
/// Immutable once handed to the driver, and forwarded verbatim to the
/// backend's app initializer.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub api_key: SecretString,
    pub auth_domain: String,
    /// Root URL of the live database (e.g. `https://demo.example.com`).
    pub database_url: Url,
    pub messaging_sender_id: String,
    pub project_id: String,
    pub storage_bucket: String,
}

impl ConnectionConfig {
    pub(crate) fn app_options(&self) -> AppOptions {
        AppOptions {
            api_key: self.api_key.clone(),
            auth_domain: self.auth_domain.clone(),
            database_url: self.database_url.clone(),
            messaging_sender_id: self.messaging_sender_id.clone(),
            project_id: self.project_id.clone(),
            storage_bucket: self.storage_bucket.clone(),
        }
    }
}

/// What a data stream does when the backend cancels its listener.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ListenerErrorPolicy {
    /// Log the failure and go quiet. The stream stays open but never emits again.
    #[default]
    Swallow,
    /// End the stream with [`CoreError::Listener`](crate::CoreError::Listener).
    Propagate,
}

/// Behavioural switches for a driver instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverOptions {
    pub listener_errors: ListenerErrorPolicy,
}
