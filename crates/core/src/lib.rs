//! Corral core types: identity keys for staged state, the error taxonomy
//! shared by every crate, and retry/polling configuration.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod identity;

pub use config::{OperatorConfig, RetryPolicy};
pub use error::{ApplyFailure, Error, Result, StoreError};
pub use identity::{CacheObject, Cardinality, IdentKey, NamespacedName, ResourceIdent, TypeDescriptor};
