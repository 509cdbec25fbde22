//! Corral providers: each one turns a slice of the declared specs into staged
//! objects in the pass's [`ObjectCache`] and, for app passes, into a section of
//! the app's [`AppConfig`].
//!
//! Providers never talk to each other. Ordering between them is fixed by
//! [`default_providers`]; a provider that needs another's output reads it
//! back from the cache or the config.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use corral_cache::ObjectCache;
use corral_core::{NamespacedName, OperatorConfig, Result};
use corral_kubehub::ClusterStore;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;
use tokio_util::sync::CancellationToken;

pub mod appconfig;
pub mod configsecret;
pub mod crd;
pub mod database;
pub mod deployment;
pub mod featureflags;
pub mod inmemorydb;
pub mod kafka;
pub mod logging;
pub mod objectstore;
pub mod readiness;
pub mod reconcile;
pub mod service;
pub mod strimzi;

mod secrets;

pub use appconfig::AppConfig;
pub use crd::{CorralApp, CorralAppSpec, CorralAppStatus, CorralEnvironment, CorralEnvironmentSpec};
pub use reconcile::Reconciler;

/// Mount point of the config secret inside app containers.
pub const CONFIG_MOUNT_PATH: &str = "/corral/";

/// Everything an environment pass can see.
pub struct EnvContext<'a> {
    pub env: &'a CorralEnvironment,
    pub cache: &'a mut ObjectCache,
    pub settings: &'a OperatorConfig,
    pub cancel: &'a CancellationToken,
}

impl EnvContext<'_> {
    pub fn owner_ref(&self) -> Option<OwnerReference> {
        self.env.controller_owner_ref(&())
    }
}

/// Everything an app pass can see.
pub struct AppContext<'a> {
    pub env: &'a CorralEnvironment,
    pub app: &'a CorralApp,
    pub cache: &'a mut ObjectCache,
    pub config: &'a mut AppConfig,
    pub settings: &'a OperatorConfig,
    pub cancel: &'a CancellationToken,
}

impl AppContext<'_> {
    pub fn app_name(&self) -> String {
        self.app.metadata.name.clone().unwrap_or_default()
    }

    pub fn namespace(&self) -> String {
        self.app.metadata.namespace.clone().unwrap_or_default()
    }

    /// Namespace holding environment-wide inputs; the app namespace if unset.
    pub fn target_namespace(&self) -> String {
        match self.env.spec.target_namespace.as_str() {
            "" => self.namespace(),
            ns => ns.to_string(),
        }
    }

    /// `<app>-<suffix>` in the app namespace.
    pub fn child_name(&self, suffix: &str) -> NamespacedName {
        NamespacedName::new(self.namespace(), format!("{}-{}", self.app_name(), suffix))
    }

    pub fn store(&self) -> Arc<dyn ClusterStore> {
        Arc::clone(self.cache.store())
    }

    pub fn owner_ref(&self) -> Option<OwnerReference> {
        self.app.controller_owner_ref(&())
    }

    /// `{app, pod}` labels shared by a component's objects and its pods.
    pub fn labels(&self, component: &str) -> BTreeMap<String, String> {
        let name = self.app_name();
        BTreeMap::from([("app".to_string(), name.clone()), ("pod".to_string(), format!("{name}-{component}"))])
    }

    /// Metadata for an object owned by the app.
    pub fn owned_meta(&self, labels: BTreeMap<String, String>) -> ObjectMeta {
        ObjectMeta {
            labels: Some(labels),
            owner_references: self.owner_ref().map(|o| vec![o]),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Stage environment-wide objects. Most providers have none.
    async fn provide_environment(&self, _ctx: &mut EnvContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Stage the app's objects and fill the provider's section of the app config.
    async fn provide_app(&self, ctx: &mut AppContext<'_>) -> Result<()>;
}

/// All providers in run order. The config secret comes last so it sees every section.
pub fn default_providers() -> Vec<Box<dyn Provider>> {
    vec![
        Box::new(logging::LoggingProvider),
        Box::new(database::DatabaseProvider),
        Box::new(objectstore::ObjectStoreProvider),
        Box::new(inmemorydb::InMemoryDbProvider),
        Box::new(featureflags::FeatureFlagsProvider),
        Box::new(kafka::KafkaProvider),
        Box::new(service::ServiceProvider),
        Box::new(deployment::DeploymentProvider),
        Box::new(configsecret::ConfigSecretProvider),
    ]
}
