//! Error taxonomy shared by the cache, the store adapters and the providers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::{IdentKey, NamespacedName};

/// Failure reported by a backing-store client.
///
/// `NotFound` is kept apart from everything else: retry helpers swallow it,
/// all other variants are surfaced.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {kind} {key}")]
    NotFound { kind: String, key: NamespacedName },
    #[error("already exists: {kind} {key}")]
    AlreadyExists { kind: String, key: NamespacedName },
    #[error("conflict on {kind} {key}: {message}")]
    Conflict { kind: String, key: NamespacedName, message: String },
    #[error("invalid object: {0}")]
    Invalid(String),
    #[error("api error ({code}): {message}")]
    Api { code: u16, message: String },
    #[error("transport: {0}")]
    Transport(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// One entry that the backing store refused during a batch apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyFailure {
    pub ident: IdentKey,
    pub name: NamespacedName,
    pub reason: String,
}

impl fmt::Display for ApplyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.ident, self.name, self.reason)
    }
}

fn join_failures(failures: &[ApplyFailure]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {ident}{}", .name.as_ref().map(|n| format!(" {n}")).unwrap_or_default())]
    NotFound { ident: String, name: Option<NamespacedName> },

    #[error("type mismatch on {ident}: registered {expected}, got {found}")]
    TypeMismatch { ident: String, expected: String, found: String },

    #[error("cardinality violation on {ident}: {reason}")]
    CardinalityViolation { ident: String, reason: &'static str },

    #[error("{} of the staged resources failed to apply: {}", .failures.len(), join_failures(.failures))]
    UpstreamApply { failures: Vec<ApplyFailure> },

    #[error("{resource} not ready after {attempts} attempts: {last_state}")]
    ReadinessTimeout { resource: String, attempts: u32, last_state: String },

    #[error("fetching {resource} gave up after {attempts} attempts{}", .last_error.as_ref().map(|e| format!(": {e}")).unwrap_or_default())]
    FetchTimeout { resource: String, attempts: u32, last_error: Option<StoreError> },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("incomplete config section {section}: {field} is not populated")]
    IncompleteConfig { section: &'static str, field: &'static str },

    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether a later reconcile pass may succeed without any code or spec change.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::NotFound { .. }
            | Error::UpstreamApply { .. }
            | Error::ReadinessTimeout { .. }
            | Error::FetchTimeout { .. } => true,
            Error::Store(e) => !matches!(e, StoreError::Invalid(_)),
            Error::TypeMismatch { .. }
            | Error::CardinalityViolation { .. }
            | Error::IncompleteConfig { .. }
            | Error::InvalidSpec(_)
            | Error::Serialization(_) => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Store(e) => e.is_not_found(),
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Cardinality;

    #[test]
    fn retry_classification() {
        let nf = Error::Store(StoreError::NotFound { kind: "Kafka".into(), key: NamespacedName::new("kafka", "kafka") });
        assert!(nf.is_retryable());
        assert!(nf.is_not_found());
        assert!(!Error::InvalidSpec("x".into()).is_retryable());
        assert!(!Error::CardinalityViolation { ident: "a/b".into(), reason: "r" }.is_retryable());
        assert!(!Error::Store(StoreError::Invalid("bad".into())).is_retryable());
        assert!(Error::ReadinessTimeout { resource: "k".into(), attempts: 3, last_state: "s".into() }.is_retryable());
    }

    #[test]
    fn upstream_apply_lists_every_failure() {
        let ident = IdentKey { provider: "TEST".into(), purpose: "MAIN".into(), cardinality: Cardinality::Single };
        let e = Error::UpstreamApply {
            failures: vec![
                ApplyFailure { ident: ident.clone(), name: NamespacedName::new("ns", "a"), reason: "denied".into() },
                ApplyFailure { ident, name: NamespacedName::new("ns", "b"), reason: "invalid".into() },
            ],
        };
        let msg = e.to_string();
        assert!(msg.starts_with("2 of the staged resources failed"), "{msg}");
        assert!(msg.contains("ns/a: denied"), "{msg}");
        assert!(msg.contains("ns/b: invalid"), "{msg}");
    }

    #[test]
    fn fetch_timeout_carries_last_error() {
        let e = Error::FetchTimeout {
            resource: "v1/Secret default/x".into(),
            attempts: 2,
            last_error: Some(StoreError::NotFound { kind: "Secret".into(), key: NamespacedName::new("default", "x") }),
        };
        assert_eq!(e.to_string(), "fetching v1/Secret default/x gave up after 2 attempts: not found: Secret default/x");
    }
}
