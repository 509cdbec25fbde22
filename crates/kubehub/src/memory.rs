//! In-memory [`ClusterStore`] with API-server-like bookkeeping.
//!
//! - `create`/`update` never touch `status`; only `update_status` does.
//! - `update` merges the submitted object into the live one, so fields the
//!   caller does not mention survive (the way server-side apply keeps fields
//!   owned by other managers).
//! - `resourceVersion` only moves when the stored object actually changes.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use corral_core::identity::gvk_key;
use corral_core::{NamespacedName, StoreError};
use kube::core::{DynamicObject, GroupVersionKind};
use serde_json::Value as Json;
use tracing::debug;

use crate::{gvk_of, key_of, ClusterStore, ListSelector};

type Slot = (String, NamespacedName);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Slot, Json>,
    next_rv: u64,
    rejected: BTreeMap<Slot, String>,
    writes: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every create/update of `kind_key` (`v1/Service`, ...) at `key` fail.
    pub fn reject_writes(&self, kind_key: &str, key: NamespacedName, message: impl Into<String>) {
        self.lock().rejected.insert((kind_key.to_string(), key), message.into());
    }

    /// Number of successful writes that changed stored state.
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn to_json(obj: &DynamicObject) -> Result<Json, StoreError> {
    serde_json::to_value(obj).map_err(|e| StoreError::Invalid(e.to_string()))
}

fn from_json(v: &Json) -> Result<DynamicObject, StoreError> {
    serde_json::from_value(v.clone()).map_err(|e| StoreError::Invalid(e.to_string()))
}

fn slot_of(obj: &DynamicObject) -> Result<(Slot, GroupVersionKind), StoreError> {
    let gvk = gvk_of(obj)?;
    Ok(((gvk_key(&gvk), key_of(obj)?), gvk))
}

fn meta_mut(v: &mut Json) -> Option<&mut serde_json::Map<String, Json>> {
    v.as_object_mut()?
        .entry("metadata")
        .or_insert_with(|| Json::Object(Default::default()))
        .as_object_mut()
}

/// Recursive merge: objects merge key by key, everything else is replaced.
fn merge(live: &mut Json, desired: &Json) {
    match (live, desired) {
        (Json::Object(l), Json::Object(d)) => {
            for (k, dv) in d {
                match l.get_mut(k) {
                    Some(lv) => merge(lv, dv),
                    None => {
                        l.insert(k.clone(), dv.clone());
                    }
                }
            }
        }
        (l, d) => *l = d.clone(),
    }
}

const SERVER_META: [&str; 5] = ["resourceVersion", "uid", "creationTimestamp", "generation", "managedFields"];

impl Inner {
    fn bump(&mut self, v: &mut Json) {
        self.next_rv += 1;
        self.writes += 1;
        if let Some(meta) = meta_mut(v) {
            meta.insert("resourceVersion".into(), Json::String(self.next_rv.to_string()));
        }
    }

    fn check_rejected(&self, slot: &Slot) -> Result<(), StoreError> {
        match self.rejected.get(slot) {
            Some(msg) => Err(StoreError::Api { code: 403, message: msg.clone() }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get(&self, gvk: &GroupVersionKind, key: &NamespacedName) -> Result<DynamicObject, StoreError> {
        let inner = self.lock();
        match inner.objects.get(&(gvk_key(gvk), key.clone())) {
            Some(v) => from_json(v),
            None => Err(StoreError::NotFound { kind: gvk.kind.clone(), key: key.clone() }),
        }
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let (slot, gvk) = slot_of(obj)?;
        let mut inner = self.lock();
        inner.check_rejected(&slot)?;
        if inner.objects.contains_key(&slot) {
            return Err(StoreError::AlreadyExists { kind: gvk.kind, key: slot.1 });
        }
        let mut v = to_json(obj)?;
        if let Some(o) = v.as_object_mut() {
            o.remove("status");
        }
        let uid = format!("00000000-0000-0000-0000-{:012}", inner.next_rv + 1);
        if let Some(meta) = meta_mut(&mut v) {
            for k in SERVER_META {
                meta.remove(k);
            }
            meta.insert("uid".into(), Json::String(uid));
            meta.insert("generation".into(), Json::from(1));
        }
        inner.bump(&mut v);
        debug!(kind = %gvk.kind, key = %slot.1, "memory store create");
        inner.objects.insert(slot, v.clone());
        from_json(&v)
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let (slot, gvk) = slot_of(obj)?;
        let mut inner = self.lock();
        inner.check_rejected(&slot)?;
        let Some(live) = inner.objects.get(&slot).cloned() else {
            return Err(StoreError::NotFound { kind: gvk.kind, key: slot.1 });
        };
        let mut desired = to_json(obj)?;
        if let Some(o) = desired.as_object_mut() {
            o.remove("status");
        }
        if let Some(meta) = meta_mut(&mut desired) {
            for k in SERVER_META {
                meta.remove(k);
            }
        }
        let mut next = live.clone();
        merge(&mut next, &desired);
        if next == live {
            return from_json(&live);
        }
        inner.bump(&mut next);
        debug!(kind = %gvk.kind, key = %slot.1, "memory store update");
        inner.objects.insert(slot, next.clone());
        from_json(&next)
    }

    async fn update_status(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let (slot, gvk) = slot_of(obj)?;
        let mut inner = self.lock();
        let Some(live) = inner.objects.get(&slot).cloned() else {
            return Err(StoreError::NotFound { kind: gvk.kind, key: slot.1 });
        };
        let mut next = live.clone();
        match obj.data.get("status") {
            Some(s) => next["status"] = s.clone(),
            None => {
                if let Some(o) = next.as_object_mut() {
                    o.remove("status");
                }
            }
        }
        if next == live {
            return from_json(&live);
        }
        inner.bump(&mut next);
        inner.objects.insert(slot, next.clone());
        from_json(&next)
    }

    async fn list(&self, gvk: &GroupVersionKind, selector: &ListSelector) -> Result<Vec<DynamicObject>, StoreError> {
        let kind = gvk_key(gvk);
        let inner = self.lock();
        let mut out = Vec::new();
        for ((k, _), v) in inner.objects.iter() {
            if *k != kind {
                continue;
            }
            let obj = from_json(v)?;
            if selector.matches(&obj.metadata) {
                out.push(obj);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{to_dynamic, TypedStore};
    use k8s_openapi::api::core::v1::{ConfigMap, Service, ServicePort, ServiceSpec, ServiceStatus};
    use kube::api::ObjectMeta;

    fn svc(name: &str, port: i32) -> Service {
        Service {
            metadata: ObjectMeta { name: Some(name.into()), namespace: Some("default".into()), ..Default::default() },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort { name: Some("p".into()), port, ..Default::default() }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get_as::<Service>(&NamespacedName::new("default", "nope")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn create_then_conflicting_create() {
        let store = MemoryStore::new();
        let created = store.create_as(&svc("a", 80)).await.unwrap();
        assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));
        assert!(created.metadata.uid.is_some());
        let err = store.create_as(&svc("a", 80)).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn update_keeps_status_and_only_bumps_on_change() {
        let store = MemoryStore::new();
        store.create_as(&svc("a", 80)).await.unwrap();
        let mut with_status = store.get_as::<Service>(&NamespacedName::new("default", "a")).await.unwrap();
        with_status.status = Some(ServiceStatus { conditions: None, load_balancer: None });
        store.update_status_as(&with_status).await.unwrap();
        let rv_before = store.write_count();

        // Same desired state: no write.
        store.update(&to_dynamic(&svc("a", 80)).unwrap()).await.unwrap();
        assert_eq!(store.write_count(), rv_before);

        let updated: Service = crate::from_dynamic(store.update(&to_dynamic(&svc("a", 81)).unwrap()).await.unwrap()).unwrap();
        assert_eq!(updated.spec.unwrap().ports.unwrap()[0].port, 81);
        assert!(updated.status.is_some());
        assert_eq!(store.write_count(), rv_before + 1);
    }

    #[tokio::test]
    async fn update_preserves_fields_owned_elsewhere() {
        let store = MemoryStore::new();
        let mut cm = ConfigMap {
            metadata: ObjectMeta { name: Some("c".into()), namespace: Some("ns".into()), ..Default::default() },
            data: Some([("ours".to_string(), "1".to_string()), ("theirs".to_string(), "x".to_string())].into()),
            ..Default::default()
        };
        store.create_as(&cm).await.unwrap();
        cm.data = Some([("ours".to_string(), "2".to_string())].into());
        store.update(&to_dynamic(&cm).unwrap()).await.unwrap();
        let live = store.get_as::<ConfigMap>(&NamespacedName::new("ns", "c")).await.unwrap();
        let data = live.data.unwrap();
        assert_eq!(data["ours"], "2");
        assert_eq!(data["theirs"], "x");
    }

    #[tokio::test]
    async fn rejected_writes_fail_with_api_error() {
        let store = MemoryStore::new();
        store.reject_writes("v1/Service", NamespacedName::new("default", "a"), "quota exceeded");
        let err = store.create_as(&svc("a", 80)).await.unwrap_err();
        assert_eq!(err, StoreError::Api { code: 403, message: "quota exceeded".into() });
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn list_filters_kind_namespace_and_labels() {
        let store = MemoryStore::new();
        let mut labelled = svc("a", 80);
        labelled.metadata.labels = Some([("app".to_string(), "x".to_string())].into());
        store.create_as(&labelled).await.unwrap();
        store.create_as(&svc("b", 80)).await.unwrap();
        let cm = ConfigMap {
            metadata: ObjectMeta { name: Some("a".into()), namespace: Some("default".into()), ..Default::default() },
            ..Default::default()
        };
        store.create_as(&cm).await.unwrap();

        let all: Vec<Service> = store.list_as(&ListSelector::namespaced("default")).await.unwrap();
        assert_eq!(all.len(), 2);
        let sel: Vec<Service> = store.list_as(&ListSelector::all().with_label("app", "x")).await.unwrap();
        assert_eq!(sel.len(), 1);
        assert_eq!(sel[0].metadata.name.as_deref(), Some("a"));
    }
}
