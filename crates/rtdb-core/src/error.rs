// ── Core error types ──
//
// User-facing errors from rtdb-core. Stream consumers never see raw
// backend errors; the `From<rtdb_api::Error>` impl translates them into
// domain-appropriate variants.
//
// `Clone` because one failure is delivered to every subscriber of a stream.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    // ── Session errors ───────────────────────────────────────────────
    #[error("Session '{name}' is already initialized")]
    SessionInUse { name: String },

    #[error("No Tokio runtime available: the driver must be created inside a runtime")]
    NoRuntime,

    // ── Stream errors ────────────────────────────────────────────────
    #[error("Backend error ({code}): {message}")]
    Backend { code: String, message: String },

    #[error("Listener for '{event}' at /{path} was cancelled: {message}")]
    Listener {
        path: String,
        event: String,
        message: String,
    },

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    // ── Action errors ────────────────────────────────────────────────
    /// Reported by action handlers through their result streams.
    #[error("Action failed: {message}")]
    Action { message: String },
}

impl CoreError {
    /// Shorthand for an [`Action`](Self::Action) error.
    pub fn action(message: impl Into<String>) -> Self {
        Self::Action {
            message: message.into(),
        }
    }
}

// ── Conversion from backend errors ───────────────────────────────────

impl From<rtdb_api::Error> for CoreError {
    fn from(err: rtdb_api::Error) -> Self {
        match err {
            rtdb_api::Error::DuplicateApp { name } => CoreError::SessionInUse { name },
            rtdb_api::Error::InvalidUrl(reason) => CoreError::InvalidUrl {
                url: String::new(),
                reason,
            },
            rtdb_api::Error::Auth { code, message } => CoreError::Backend { code, message },
            other => CoreError::Backend {
                code: other.code().to_owned(),
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_keep_code_and_message() {
        let err: CoreError = rtdb_api::Error::auth("auth/invalid-email", "bad email").into();
        assert_eq!(
            err,
            CoreError::Backend {
                code: "auth/invalid-email".into(),
                message: "bad email".into(),
            }
        );
    }

    #[test]
    fn duplicate_app_becomes_session_in_use() {
        let err: CoreError = rtdb_api::Error::DuplicateApp { name: "s".into() }.into();
        assert_eq!(err, CoreError::SessionInUse { name: "s".into() });
    }

    #[test]
    fn other_backend_errors_carry_code() {
        let err: CoreError = rtdb_api::Error::PermissionDenied { path: "a".into() }.into();
        let CoreError::Backend { code, message } = err else {
            panic!("expected Backend error");
        };
        assert_eq!(code, "database/permission-denied");
        assert_eq!(message, "Permission denied at /a");
    }
}
