//! Bounded, cancellable polling against eventually-consistent state.
//!
//! [`poll`] is the one loop everything else is built on: at most
//! `max_attempts` tries, `interval` apart, under an overall deadline, with the
//! cancellation token and the deadline raced against both the attempt and the
//! sleep between attempts.

use std::fmt::Debug;
use std::future::Future;

use corral_core::{CacheObject, Error, NamespacedName, RetryPolicy, StoreError, TypeDescriptor};
use metrics::counter;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{ClusterStore, TypedStore};

/// Outcome of a single polling attempt.
#[derive(Debug)]
pub enum Attempt<T, P> {
    /// Converged; stop with this value.
    Done(T),
    /// Not there yet; `P` describes what was observed.
    Retry(P),
    /// Give up right away.
    Abort(Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUp {
    Exhausted,
    Deadline,
    Cancelled,
}

#[derive(Debug)]
pub enum PollError<P> {
    Aborted(Error),
    GaveUp { attempts: u32, last: Option<P>, cause: GiveUp },
}

pub async fn poll<T, P, F, Fut>(what: &str, policy: &RetryPolicy, cancel: &CancellationToken, mut attempt: F) -> Result<T, PollError<P>>
where
    P: Debug,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, P>>,
{
    let deadline = Instant::now() + policy.deadline;
    let mut last: Option<P> = None;
    let mut n: u32 = 0;
    while n < policy.max_attempts {
        n += 1;
        counter!("wait_attempts", 1u64);
        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PollError::GaveUp { attempts: n, last, cause: GiveUp::Cancelled }),
            _ = sleep_until(deadline) => return Err(PollError::GaveUp { attempts: n, last, cause: GiveUp::Deadline }),
            r = attempt(n) => r,
        };
        match step {
            Attempt::Done(v) => return Ok(v),
            Attempt::Abort(e) => return Err(PollError::Aborted(e)),
            Attempt::Retry(p) => {
                debug!(what, attempt = n, max = policy.max_attempts, observed = ?p, "not converged yet");
                last = Some(p);
            }
        }
        if n >= policy.max_attempts {
            break;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PollError::GaveUp { attempts: n, last, cause: GiveUp::Cancelled }),
            _ = sleep_until(deadline) => return Err(PollError::GaveUp { attempts: n, last, cause: GiveUp::Deadline }),
            _ = sleep(policy.interval) => {}
        }
    }
    counter!("wait_exhausted", 1u64);
    Err(PollError::GaveUp { attempts: n, last, cause: GiveUp::Exhausted })
}

/// Fetch `key` until it exists. Not-found is retried, any other store error
/// aborts. Running out of attempts, time or patience yields `FetchTimeout`.
pub async fn fetch_with_retry<K, S>(store: &S, key: &NamespacedName, policy: &RetryPolicy, cancel: &CancellationToken) -> Result<K, Error>
where
    K: CacheObject,
    S: ClusterStore + ?Sized,
{
    let resource = format!("{} {}", TypeDescriptor::of::<K>(), key);
    let res = poll(&resource, policy, cancel, move |_| async move {
        match store.get_as::<K>(key).await {
            Ok(obj) => Attempt::Done(obj),
            Err(e) if e.is_not_found() => Attempt::Retry(e),
            Err(e) => Attempt::Abort(Error::Store(e)),
        }
    })
    .await;
    res.map_err(|e| match e {
        PollError::Aborted(e) => e,
        PollError::GaveUp { attempts, last, cause } => {
            debug!(resource = %resource, attempts, ?cause, "fetch gave up");
            Error::FetchTimeout { resource: resource.clone(), attempts, last_error: last }
        }
    })
}

/// Single fetch that reports a missing object as `None` instead of an error.
pub async fn fetch_opt<K, S>(store: &S, key: &NamespacedName) -> Result<Option<K>, StoreError>
where
    K: CacheObject,
    S: ClusterStore + ?Sized,
{
    match store.get_as::<K>(key).await {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
