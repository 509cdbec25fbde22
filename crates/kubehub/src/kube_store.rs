//! kube-rs backed [`ClusterStore`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use corral_core::identity::gvk_key;
use corral_core::{NamespacedName, StoreError};
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::discovery::{Discovery, Scope};
use kube::Client;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use crate::{gvk_of, key_of, ClusterStore, ListSelector};

static CLIENT: OnceCell<Client> = OnceCell::const_new();

/// Process-wide client built from the current kubeconfig / in-cluster env.
pub async fn get_kube_client() -> anyhow::Result<Client> {
    CLIENT
        .get_or_try_init(|| async { Client::try_default().await.context("building kube client") })
        .await
        .cloned()
}

/// Kinds not served at the last discovery are not looked up again until this
/// much time has passed, so polling for a missing CRD stays cheap.
const MISSING_KIND_TTL: Duration = Duration::from_secs(30);

#[derive(Default)]
struct Discovered {
    served: HashMap<String, (ApiResource, bool)>,
    refreshed: Option<Instant>,
}

impl Discovered {
    /// Whether a miss for an unknown kind should trigger another discovery run.
    fn stale(&self, now: Instant) -> bool {
        match self.refreshed {
            Some(at) => now.duration_since(at) >= MISSING_KIND_TTL,
            None => true,
        }
    }
}

pub struct KubeStore {
    client: Client,
    field_manager: String,
    resources: Mutex<Discovered>,
}

impl KubeStore {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self { client, field_manager: field_manager.into(), resources: Mutex::new(Discovered::default()) }
    }

    async fn find_api_resource(&self, gvk: &GroupVersionKind) -> Result<(ApiResource, bool), StoreError> {
        let key = gvk_key(gvk);
        let mut cache = self.resources.lock().await;
        if let Some(found) = cache.served.get(&key) {
            return Ok(found.clone());
        }
        if !cache.stale(Instant::now()) {
            return Err(StoreError::Invalid(format!("GVK not served: {key}")));
        }
        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(|e| StoreError::Transport(format!("discovery failed: {e}")))?;
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                cache.served.insert(gvk_key(&GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind)), (ar, namespaced));
            }
        }
        cache.refreshed = Some(Instant::now());
        info!(kinds = cache.served.len(), "api discovery refreshed");
        cache.served.get(&key).cloned().ok_or_else(|| StoreError::Invalid(format!("GVK not served: {key}")))
    }

    async fn api(&self, gvk: &GroupVersionKind, namespace: Option<&str>) -> Result<Api<DynamicObject>, StoreError> {
        let (ar, namespaced) = self.find_api_resource(gvk).await?;
        Ok(match (namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            (true, None) => Api::all_with(self.client.clone(), &ar),
            (false, _) => Api::all_with(self.client.clone(), &ar),
        })
    }
}

fn map_kube_err(e: kube::Error, kind: &str, key: &NamespacedName) -> StoreError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound { kind: kind.to_string(), key: key.clone() },
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            StoreError::AlreadyExists { kind: kind.to_string(), key: key.clone() }
        }
        kube::Error::Api(ae) if ae.code == 409 => {
            StoreError::Conflict { kind: kind.to_string(), key: key.clone(), message: ae.message }
        }
        kube::Error::Api(ae) if ae.code == 422 => StoreError::Invalid(ae.message),
        kube::Error::Api(ae) => StoreError::Api { code: ae.code, message: ae.message },
        other => StoreError::Transport(other.to_string()),
    }
}

/// Drop server-owned metadata so the payload is a clean apply configuration.
fn apply_payload(obj: &DynamicObject) -> DynamicObject {
    let mut out = obj.clone();
    out.metadata.managed_fields = None;
    out.metadata.resource_version = None;
    out.metadata.uid = None;
    out.metadata.creation_timestamp = None;
    out.metadata.generation = None;
    if let Some(data) = out.data.as_object_mut() {
        data.remove("status");
    }
    out
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get(&self, gvk: &GroupVersionKind, key: &NamespacedName) -> Result<DynamicObject, StoreError> {
        let api = self.api(gvk, key.namespace()).await?;
        api.get(&key.name).await.map_err(|e| map_kube_err(e, &gvk.kind, key))
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let gvk = gvk_of(obj)?;
        let key = key_of(obj)?;
        let api = self.api(&gvk, key.namespace()).await?;
        let pp = PostParams { field_manager: Some(self.field_manager.clone()), ..Default::default() };
        let created = api.create(&pp, &apply_payload(obj)).await.map_err(|e| map_kube_err(e, &gvk.kind, &key))?;
        debug!(kind = %gvk.kind, key = %key, "created");
        Ok(created)
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let gvk = gvk_of(obj)?;
        let key = key_of(obj)?;
        let api = self.api(&gvk, key.namespace()).await?;
        let pp = PatchParams::apply(&self.field_manager).force();
        let applied = api
            .patch(&key.name, &pp, &Patch::Apply(&apply_payload(obj)))
            .await
            .map_err(|e| map_kube_err(e, &gvk.kind, &key))?;
        debug!(kind = %gvk.kind, key = %key, rv = ?applied.metadata.resource_version, "applied");
        Ok(applied)
    }

    async fn update_status(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let gvk = gvk_of(obj)?;
        let key = key_of(obj)?;
        let api = self.api(&gvk, key.namespace()).await?;
        let status = obj.data.get("status").cloned().unwrap_or(serde_json::Value::Null);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_err(e, &gvk.kind, &key))
    }

    async fn list(&self, gvk: &GroupVersionKind, selector: &ListSelector) -> Result<Vec<DynamicObject>, StoreError> {
        let api = self.api(gvk, selector.namespace.as_deref()).await?;
        let mut lp = ListParams::default();
        if let Some(labels) = selector.label_selector() {
            lp = lp.labels(&labels);
        }
        let list = api
            .list(&lp)
            .await
            .map_err(|e| map_kube_err(e, &gvk.kind, &NamespacedName::new(selector.namespace.clone().unwrap_or_default(), "")))?;
        Ok(list.items)
    }
}
