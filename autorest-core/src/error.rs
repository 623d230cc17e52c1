// Copyright 2025 The Drasi Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types for the AutoRest core.
//!
//! Public entrypoints return [`Result<T>`] with a structured [`AutorestError`]
//! so callers (the HTTP layer, the MQTT plugins) can map variants to their own
//! responses. Internal plumbing may use `anyhow` and convert through
//! [`AutorestError::Internal`].

use thiserror::Error;

/// Main error type for AutoRest operations.
#[derive(Error, Debug)]
pub enum AutorestError {
    /// Malformed backend definition or unknown datasource/destination type.
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// A document violates its model schema.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// Backend, model, rule, destination or document is absent.
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    /// Unique index violation on create or update.
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Broker unreachable. Only ever logged by background supervisors.
    #[error("Connection to '{target}' failed: {reason}")]
    Connectivity { target: String, reason: String },

    /// The requested transformation rule is not registered for the backend.
    #[error("Rule '{rule}' is not defined for backend '{backend}'")]
    RuleNotDefined { backend: String, rule: String },

    /// Opaque failure reported by the storage collaborator.
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Internal error, preserving the underlying chain.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AutorestError {
    pub fn config(message: impl Into<String>) -> Self {
        AutorestError::Config {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AutorestError::Validation {
            message: message.into(),
        }
    }

    /// Create a not found error.
    ///
    /// # Example
    /// ```ignore
    /// AutorestError::not_found("backend", "sensors")
    /// ```
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        AutorestError::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        AutorestError::Conflict {
            message: message.into(),
        }
    }

    pub fn connectivity(target: impl Into<String>, reason: impl Into<String>) -> Self {
        AutorestError::Connectivity {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn rule_not_defined(backend: impl Into<String>, rule: impl Into<String>) -> Self {
        AutorestError::RuleNotDefined {
            backend: backend.into(),
            rule: rule.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        AutorestError::Storage {
            message: message.into(),
        }
    }

    /// True for [`AutorestError::NotFound`] of any kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AutorestError::NotFound { .. })
    }

    /// Failures that may succeed when the same call is repeated.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AutorestError::Connectivity { .. }
                | AutorestError::Storage { .. }
                | AutorestError::Internal(_)
        )
    }
}

impl From<serde_json::Error> for AutorestError {
    fn from(e: serde_json::Error) -> Self {
        AutorestError::Internal(anyhow::Error::new(e).context("JSON processing failed"))
    }
}

/// Result type for AutoRest operations.
pub type Result<T> = std::result::Result<T, AutorestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = AutorestError::not_found("destination", "sensors.alertSink");
        assert_eq!(err.to_string(), "destination 'sensors.alertSink' not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_rule_not_defined_display() {
        let err = AutorestError::rule_not_defined("mcs", "tasmotaTemp");
        assert_eq!(
            err.to_string(),
            "Rule 'tasmotaTemp' is not defined for backend 'mcs'"
        );
    }

    #[test]
    fn test_validation_display() {
        let err = AutorestError::validation("field 'value' is mandatory");
        assert_eq!(
            err.to_string(),
            "Validation failed: field 'value' is mandatory"
        );
        assert!(!err.is_not_found());
        assert!(!err.is_transient());
        assert!(AutorestError::storage("timeout").is_transient());
    }

    #[test]
    fn test_internal_from_anyhow() {
        let err: AutorestError = anyhow::anyhow!("broken pipe").into();
        assert!(matches!(err, AutorestError::Internal(_)));
        assert!(err.to_string().contains("broken pipe"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: AutorestError = parse.into();
        assert!(matches!(err, AutorestError::Internal(_)));
    }
}
