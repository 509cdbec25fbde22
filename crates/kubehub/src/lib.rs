//! Corral kubehub: the backing-store contract and its implementations.
//!
//! [`ClusterStore`] is untyped (it moves [`DynamicObject`]s) so it can be held
//! as `Arc<dyn ClusterStore>`; [`TypedStore`] layers typed helpers on top.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use async_trait::async_trait;
use corral_core::{CacheObject, NamespacedName, StoreError, TypeDescriptor};
use kube::api::ObjectMeta;
use kube::core::{DynamicObject, GroupVersionKind};
use serde::de::DeserializeOwned;
use serde::Serialize;

mod kube_store;
mod memory;
pub mod wait;

pub use kube_store::{get_kube_client, KubeStore};
pub use memory::MemoryStore;

/// Namespace + label equality selector for `list`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListSelector {
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl ListSelector {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn namespaced(ns: impl Into<String>) -> Self {
        Self { namespace: Some(ns.into()), labels: BTreeMap::new() }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Rendered as `k=v,k2=v2`, or `None` when no labels are set.
    pub fn label_selector(&self) -> Option<String> {
        if self.labels.is_empty() {
            return None;
        }
        Some(self.labels.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(","))
    }

    pub fn matches(&self, meta: &ObjectMeta) -> bool {
        if let Some(ns) = &self.namespace {
            if meta.namespace.as_deref() != Some(ns.as_str()) {
                return false;
            }
        }
        let labels = meta.labels.as_ref();
        self.labels.iter().all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
    }
}

/// Backing-store client. Every error distinguishes "not found" from the rest.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get(&self, gvk: &GroupVersionKind, key: &NamespacedName) -> Result<DynamicObject, StoreError>;

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    /// Update in place. Fields this client does not declare are left to their owners.
    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    /// Write only the `status` of `obj`.
    async fn update_status(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    async fn list(&self, gvk: &GroupVersionKind, selector: &ListSelector) -> Result<Vec<DynamicObject>, StoreError>;
}

/// Typed convenience layer over any [`ClusterStore`].
#[async_trait]
pub trait TypedStore {
    async fn get_as<K: CacheObject>(&self, key: &NamespacedName) -> Result<K, StoreError>;
    async fn list_as<K: CacheObject>(&self, selector: &ListSelector) -> Result<Vec<K>, StoreError>;
    async fn create_as<K: CacheObject>(&self, obj: &K) -> Result<K, StoreError>;
    async fn update_status_as<K: CacheObject>(&self, obj: &K) -> Result<K, StoreError>;
}

#[async_trait]
impl<S: ClusterStore + ?Sized> TypedStore for S {
    async fn get_as<K: CacheObject>(&self, key: &NamespacedName) -> Result<K, StoreError> {
        let gvk = TypeDescriptor::of::<K>().gvk().clone();
        from_dynamic(self.get(&gvk, key).await?)
    }

    async fn list_as<K: CacheObject>(&self, selector: &ListSelector) -> Result<Vec<K>, StoreError> {
        let gvk = TypeDescriptor::of::<K>().gvk().clone();
        self.list(&gvk, selector).await?.into_iter().map(from_dynamic).collect()
    }

    async fn create_as<K: CacheObject>(&self, obj: &K) -> Result<K, StoreError> {
        from_dynamic(self.create(&to_dynamic(obj)?).await?)
    }

    async fn update_status_as<K: CacheObject>(&self, obj: &K) -> Result<K, StoreError> {
        from_dynamic(self.update_status(&to_dynamic(obj)?).await?)
    }
}

pub fn to_dynamic<K: Serialize>(obj: &K) -> Result<DynamicObject, StoreError> {
    let v = serde_json::to_value(obj).map_err(|e| StoreError::Invalid(format!("serializing object: {e}")))?;
    serde_json::from_value(v).map_err(|e| StoreError::Invalid(format!("converting to DynamicObject: {e}")))
}

pub fn from_dynamic<K: DeserializeOwned>(obj: DynamicObject) -> Result<K, StoreError> {
    let v = serde_json::to_value(&obj).map_err(|e| StoreError::Invalid(format!("serializing DynamicObject: {e}")))?;
    serde_json::from_value(v).map_err(|e| StoreError::Invalid(format!("decoding {}: {e}", type_label(&obj))))
}

fn type_label(obj: &DynamicObject) -> String {
    obj.types.as_ref().map(|t| format!("{}/{}", t.api_version, t.kind)).unwrap_or_else(|| "object".to_string())
}

/// GVK of a dynamic object, from its `apiVersion`/`kind`.
pub fn gvk_of(obj: &DynamicObject) -> Result<GroupVersionKind, StoreError> {
    let types = obj.types.as_ref().ok_or_else(|| StoreError::Invalid("object missing apiVersion/kind".into()))?;
    let (group, version) = match types.api_version.split_once('/') {
        Some((g, v)) => (g, v),
        None => ("", types.api_version.as_str()),
    };
    Ok(GroupVersionKind::gvk(group, version, &types.kind))
}

pub fn key_of(obj: &DynamicObject) -> Result<NamespacedName, StoreError> {
    let name = obj.metadata.name.clone().ok_or_else(|| StoreError::Invalid("object missing metadata.name".into()))?;
    Ok(NamespacedName { namespace: obj.metadata.namespace.clone().unwrap_or_default(), name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;

    #[test]
    fn selector_matches_namespace_and_labels() {
        let mut meta = ObjectMeta { namespace: Some("ns".into()), ..Default::default() };
        meta.labels = Some([("app".to_string(), "a".to_string()), ("x".to_string(), "y".to_string())].into());
        assert!(ListSelector::namespaced("ns").with_label("app", "a").matches(&meta));
        assert!(!ListSelector::namespaced("other").matches(&meta));
        assert!(!ListSelector::all().with_label("app", "b").matches(&meta));
        assert_eq!(ListSelector::all().label_selector(), None);
        assert_eq!(
            ListSelector::all().with_label("b", "2").with_label("a", "1").label_selector().as_deref(),
            Some("a=1,b=2")
        );
    }

    #[test]
    fn dynamic_round_trip_keeps_type_meta() {
        let cm = ConfigMap {
            metadata: ObjectMeta { name: Some("c".into()), namespace: Some("ns".into()), ..Default::default() },
            data: Some([("k".to_string(), "v".to_string())].into()),
            ..Default::default()
        };
        let dynobj = to_dynamic(&cm).unwrap();
        let gvk = gvk_of(&dynobj).unwrap();
        assert_eq!((gvk.group.as_str(), gvk.version.as_str(), gvk.kind.as_str()), ("", "v1", "ConfigMap"));
        assert_eq!(key_of(&dynobj).unwrap(), NamespacedName::new("ns", "c"));
        let back: ConfigMap = from_dynamic(dynobj).unwrap();
        assert_eq!(back, cm);
    }
}
