//! Error kinds surfaced to callers of the settings runtime.
//!
//! `Miss` is deliberately not part of this enum: it is an internal signal the
//! query engine and the manager's two-phase resolve loop use to decide
//! whether to retry, and it is only converted into `SettingsError::Resolve`
//! once no default is available (see `manager.rs`).

use thiserror::Error;

/// Errors the settings runtime can return from a public entry point.
#[derive(Debug, Error, Clone)]
pub enum SettingsError {
    /// A section registration was rejected (reserved root, duplicate
    /// incompatible declaration, map-with-children, field/child collision).
    #[error("settings registration error at '{path}': {reason}")]
    Registration { path: String, reason: String },

    /// The schema validator rejected the reprojected effective view.
    #[error("settings validation error at '{path}': {message}")]
    Validation { path: String, message: String },

    /// A resolve request could not be satisfied and no default was given.
    #[error("settings resolve error for '{target}': {reason}")]
    Resolve { target: String, reason: String },

    /// The runtime's own configuration is invalid (bad env prefix, a
    /// non-mapping top-level settings file, conflicting re-init).
    #[error("settings configuration error: {reason}")]
    Configuration { reason: String },
}

impl SettingsError {
    pub fn registration(path: impl Into<String>, reason: impl Into<String>) -> Self {
        SettingsError::Registration {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        SettingsError::Validation {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn resolve(target: impl Into<String>, reason: impl Into<String>) -> Self {
        SettingsError::Resolve {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        SettingsError::Configuration {
            reason: reason.into(),
        }
    }
}

/// Internal "not found yet" signal. Never crosses a public function
/// boundary unconverted — see `SettingsManager::resolve_request`.
#[derive(Debug, Clone)]
pub(crate) struct Miss(pub String);

impl Miss {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Miss(reason.into())
    }
}

impl std::fmt::Display for Miss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) type MissResult<T> = Result<T, Miss>;
