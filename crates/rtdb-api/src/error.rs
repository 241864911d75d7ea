use thiserror::Error;

/// Top-level error type for the `rtdb-api` crate.
///
/// Covers every failure a backend can report through the seam traits:
/// authentication, data access, URL resolution, and app lifecycle.
/// `rtdb-core` maps these into user-facing diagnostics.
///
/// `Clone` so a single backend failure can be fanned out to every
/// subscriber of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// An auth operation was rejected (bad credentials, disabled user, etc.)
    #[error("Authentication failed ({code}): {message}")]
    Auth { code: String, message: String },

    // ── Data access ─────────────────────────────────────────────────
    /// Security rules rejected a read at `path`.
    #[error("Permission denied at /{path}")]
    PermissionDenied { path: String },

    /// The backend could not be reached.
    #[error("Backend unavailable: {message}")]
    Unavailable { message: String },

    /// A URL does not point into this backend's database.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    // ── App lifecycle ───────────────────────────────────────────────
    /// An app with this name is already initialized.
    #[error("App named '{name}' already exists")]
    DuplicateApp { name: String },

    /// The app was deleted and can no longer be used.
    #[error("App '{name}' has been deleted")]
    AppDeleted { name: String },

    // ── Catch-all ───────────────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable code, in the backend's `area/reason` style.
    pub fn code(&self) -> &str {
        match self {
            Self::Auth { code, .. } => code,
            Self::PermissionDenied { .. } => "database/permission-denied",
            Self::Unavailable { .. } => "database/unavailable",
            Self::InvalidUrl(_) => "database/invalid-url",
            Self::DuplicateApp { .. } => "app/duplicate-app",
            Self::AppDeleted { .. } => "app/app-deleted",
            Self::Other(_) => "unknown",
        }
    }

    /// Shorthand for an [`Auth`](Self::Auth) error.
    pub fn auth(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_code_is_passed_through() {
        let err = Error::auth("auth/user-disabled", "disabled");
        assert_eq!(err.code(), "auth/user-disabled");
        assert_eq!(
            err.to_string(),
            "Authentication failed (auth/user-disabled): disabled"
        );
    }

    #[test]
    fn fixed_codes() {
        assert_eq!(
            Error::PermissionDenied { path: "a".into() }.code(),
            "database/permission-denied"
        );
        assert_eq!(
            Error::DuplicateApp { name: "x".into() }.code(),
            "app/duplicate-app"
        );
    }
}
