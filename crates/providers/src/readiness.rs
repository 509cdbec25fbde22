//! Waiting on resources another controller reconciles.
//!
//! Each attempt fetches the resource and classifies what it sees. Only a
//! `Ready=True` condition (plus, for `Kafka`, a published bootstrap address)
//! ends the wait; everything else is retried until the policy runs out.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use corral_core::{Error, NamespacedName, Result, RetryPolicy, StoreError};
use corral_kubehub::wait::{poll, Attempt, PollError};
use corral_kubehub::{ClusterStore, TypedStore};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::strimzi::{is_ready, Kafka, KafkaConnect, ListenerStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapAddress {
    pub host: String,
    pub port: Option<i32>,
}

impl fmt::Display for BootstrapAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => f.write_str(&self.host),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessState<T> {
    /// Never fetched successfully.
    Unobserved { reason: String },
    ObservedNotReady { reason: String },
    ObservedReady(T),
    TimedOut,
}

impl<T> fmt::Display for ReadinessState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessState::Unobserved { reason } => write!(f, "unobserved ({reason})"),
            ReadinessState::ObservedNotReady { reason } => write!(f, "not ready ({reason})"),
            ReadinessState::ObservedReady(_) => f.write_str("ready"),
            ReadinessState::TimedOut => f.write_str("timed out"),
        }
    }
}

/// A fetch failure, before or after the resource was first seen.
fn unavailable<T>(err: &StoreError, seen: bool) -> ReadinessState<T> {
    let reason = if err.is_not_found() { "not found".to_string() } else { err.to_string() };
    if seen {
        ReadinessState::ObservedNotReady { reason }
    } else {
        ReadinessState::Unobserved { reason }
    }
}

/// Pick the listener apps should use: name or type equal to `wanted`, else the
/// first one publishing an address.
pub fn bootstrap_address(listeners: &[ListenerStatus], wanted: &str) -> Option<BootstrapAddress> {
    let to_addr = |l: &ListenerStatus| {
        l.addresses
            .iter()
            .find_map(|a| a.host.as_ref().filter(|h| !h.is_empty()).map(|h| BootstrapAddress { host: h.clone(), port: a.port }))
    };
    listeners
        .iter()
        .filter(|l| l.name.as_deref() == Some(wanted) || l.type_.as_deref() == Some(wanted))
        .find_map(to_addr)
        .or_else(|| listeners.iter().find_map(to_addr))
}

/// Classify one fetch of a `Kafka` cluster.
pub fn observe_kafka(fetched: std::result::Result<Kafka, StoreError>, listener: &str, seen: bool) -> ReadinessState<BootstrapAddress> {
    let kafka = match fetched {
        Ok(k) => k,
        Err(e) => return unavailable(&e, seen),
    };
    let Some(status) = kafka.status else {
        return ReadinessState::ObservedNotReady { reason: "no status".into() };
    };
    if !is_ready(&status.conditions) {
        return ReadinessState::ObservedNotReady { reason: "Ready condition not true".into() };
    }
    match bootstrap_address(&status.listeners, listener) {
        Some(addr) => ReadinessState::ObservedReady(addr),
        None => ReadinessState::ObservedNotReady { reason: "no listener address published".into() },
    }
}

/// Classify one fetch of a `KafkaConnect` cluster.
pub fn observe_connect(fetched: std::result::Result<KafkaConnect, StoreError>, seen: bool) -> ReadinessState<()> {
    match fetched {
        Err(e) => unavailable(&e, seen),
        Ok(c) => match c.status {
            Some(s) if is_ready(&s.conditions) => ReadinessState::ObservedReady(()),
            Some(_) => ReadinessState::ObservedNotReady { reason: "Ready condition not true".into() },
            None => ReadinessState::ObservedNotReady { reason: "no status".into() },
        },
    }
}

async fn await_ready<K, T, F>(
    store: &dyn ClusterStore,
    key: &NamespacedName,
    kind: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    observe: F,
) -> Result<T>
where
    K: corral_core::CacheObject,
    T: Send,
    F: Fn(std::result::Result<K, StoreError>, bool) -> ReadinessState<T> + Sync,
{
    let resource = format!("{kind} {key}");
    let seen_flag = AtomicBool::new(false);
    let (seen, observe) = (&seen_flag, &observe);
    let res = poll(&resource, policy, cancel, move |_| async move {
        let fetched = store.get_as::<K>(key).await;
        if fetched.is_ok() {
            seen.store(true, Ordering::Relaxed);
        }
        match observe(fetched, seen.load(Ordering::Relaxed)) {
            ReadinessState::ObservedReady(v) => Attempt::Done(v),
            other => Attempt::Retry(other.to_string()),
        }
    })
    .await;
    match res {
        Ok(v) => {
            info!(resource = %resource, "ready");
            Ok(v)
        }
        Err(PollError::Aborted(e)) => Err(e),
        Err(PollError::GaveUp { attempts, last, cause }) => Err(Error::ReadinessTimeout {
            resource,
            attempts,
            last_state: format!(
                "{} after {:?}: {}",
                ReadinessState::<T>::TimedOut,
                cause,
                last.unwrap_or_else(|| "never attempted".to_string())
            ),
        }),
    }
}

/// Wait until the `Kafka` cluster at `key` is ready and return its bootstrap address.
pub async fn await_cluster_ready(
    store: &dyn ClusterStore,
    key: &NamespacedName,
    listener: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<BootstrapAddress> {
    await_ready::<Kafka, _, _>(store, key, "Kafka", policy, cancel, |fetched, seen| observe_kafka(fetched, listener, seen)).await
}

pub async fn await_connect_ready(
    store: &dyn ClusterStore,
    key: &NamespacedName,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<()> {
    await_ready::<KafkaConnect, _, _>(store, key, "KafkaConnect", policy, cancel, observe_connect).await
}
