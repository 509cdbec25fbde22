//! Corral apply: per-object upsert (create-if-absent, else update-in-place)
//! and the diff helpers used to decide whether an update is needed.

#![forbid(unsafe_code)]

use corral_core::StoreError;
use corral_kubehub::{gvk_of, key_of, ClusterStore};
use kube::core::DynamicObject;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertAction {
    Created,
    Updated,
    /// Live object already carries every declared field.
    Unchanged,
}

/// Create `desired` if absent, otherwise update it when any declared field differs.
pub async fn upsert<S: ClusterStore + ?Sized>(store: &S, desired: &DynamicObject) -> Result<UpsertAction, StoreError> {
    let t0 = std::time::Instant::now();
    counter!("apply_attempts", 1u64);
    let gvk = gvk_of(desired)?;
    let key = key_of(desired)?;
    let action = match store.get(&gvk, &key).await {
        Ok(live) => update_if_needed(store, desired, &live).await?,
        Err(e) if e.is_not_found() => match store.create(desired).await {
            Ok(_) => UpsertAction::Created,
            // Lost a race with another writer; fall through to an update.
            Err(StoreError::AlreadyExists { .. }) => {
                let live = store.get(&gvk, &key).await?;
                update_if_needed(store, desired, &live).await?
            }
            Err(e) => return Err(e),
        },
        Err(e) => return Err(e),
    };
    histogram!("apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
    debug!(kind = %gvk.kind, key = %key, ?action, "upsert");
    Ok(action)
}

async fn update_if_needed<S: ClusterStore + ?Sized>(
    store: &S,
    desired: &DynamicObject,
    live: &DynamicObject,
) -> Result<UpsertAction, StoreError> {
    let target = strip_noisy(to_json(desired)?);
    let current = strip_noisy(to_json(live)?);
    if contains_desired(&target, &current) {
        return Ok(UpsertAction::Unchanged);
    }
    debug!(fields = ?drifted_fields(&target, &current), "live object drifted");
    store.update(desired).await?;
    Ok(UpsertAction::Updated)
}

fn to_json(obj: &DynamicObject) -> Result<Json, StoreError> {
    serde_json::to_value(obj).map_err(|e| StoreError::Invalid(format!("serializing object: {e}")))
}

/// Remove server-populated fields that never take part in a comparison.
pub fn strip_noisy(mut v: Json) -> Json {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
            obj.remove("resourceVersion");
            obj.remove("generation");
            obj.remove("creationTimestamp");
            obj.remove("uid");
        }
    }
    // Status is owned by whoever reconciles the object, not by us.
    if let Some(obj) = v.as_object_mut() { obj.remove("status"); }
    v
}

/// True when every field declared in `target` has the same value in `live`.
/// Extra fields in `live` (server defaults, other managers) are ignored.
pub fn contains_desired(target: &Json, live: &Json) -> bool {
    match (target, live) {
        (Json::Object(t), Json::Object(l)) => t.iter().all(|(k, tv)| match l.get(k) {
            Some(lv) => contains_desired(tv, lv),
            None => tv.is_null(),
        }),
        (Json::Array(t), Json::Array(l)) => t.len() == l.len() && t.iter().zip(l).all(|(a, b)| contains_desired(a, b)),
        (t, l) => t == l,
    }
}

/// Top-level fields of `target` whose declared value `live` does not carry.
pub fn drifted_fields(target: &Json, live: &Json) -> Vec<String> {
    let Json::Object(t) = target else {
        return Vec::new();
    };
    t.iter()
        .filter(|(k, tv)| match live.get(k.as_str()) {
            Some(lv) => !contains_desired(tv, lv),
            None => !tv.is_null(),
        })
        .map(|(k, _)| k.clone())
        .collect()
}
