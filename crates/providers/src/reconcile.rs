//! One reconcile pass: fresh cache, providers in order, one batch apply.

use std::sync::Arc;

use corral_cache::{ApplyReport, ObjectCache};
use corral_core::{NamespacedName, OperatorConfig, Result};
use corral_kubehub::{ClusterStore, ListSelector, TypedStore};
use k8s_openapi::api::apps::v1::Deployment;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::appconfig::AppConfig;
use crate::crd::{AppCondition, CorralApp, CorralAppStatus, CorralEnvironment};
use crate::{default_providers, AppContext, EnvContext, Provider};

pub struct Reconciler {
    store: Arc<dyn ClusterStore>,
    settings: OperatorConfig,
    providers: Vec<Box<dyn Provider>>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ClusterStore>, settings: OperatorConfig) -> Self {
        Self::with_providers(store, settings, default_providers())
    }

    pub fn with_providers(store: Arc<dyn ClusterStore>, settings: OperatorConfig, providers: Vec<Box<dyn Provider>>) -> Self {
        Self { store, settings, providers }
    }

    /// Stage and apply environment-wide objects.
    pub async fn reconcile_environment(&self, env: &CorralEnvironment, cancel: &CancellationToken) -> Result<ApplyReport> {
        let name = env.metadata.name.clone().unwrap_or_default();
        let mut cache = ObjectCache::new(Arc::clone(&self.store));
        {
            let mut ctx = EnvContext { env, cache: &mut cache, settings: &self.settings, cancel };
            for p in &self.providers {
                if let Err(e) = p.provide_environment(&mut ctx).await {
                    counter!("reconcile_err", 1u64);
                    warn!(env = %name, provider = p.name(), error = %e, "environment provider failed");
                    return Err(e);
                }
            }
        }
        let report = self.apply(&cache).await?;
        info!(env = %name, staged = cache.len(), created = report.created(), updated = report.updated(), "environment reconciled");
        Ok(report)
    }

    /// Run the app providers, apply what they staged and refresh the app's status.
    pub async fn reconcile_app(&self, app: &CorralApp, cancel: &CancellationToken) -> Result<ApplyReport> {
        let key = NamespacedName::of(app);
        let env_key = NamespacedName::new("", app.spec.env_name.clone());
        let env: CorralEnvironment = self.store.get_as(&env_key).await?;

        let mut cache = ObjectCache::new(Arc::clone(&self.store));
        let mut config = AppConfig::default();
        {
            let mut ctx = AppContext {
                env: &env,
                app,
                cache: &mut cache,
                config: &mut config,
                settings: &self.settings,
                cancel,
            };
            for p in &self.providers {
                if let Err(e) = p.provide_app(&mut ctx).await {
                    counter!("reconcile_err", 1u64);
                    warn!(app = %key, provider = p.name(), error = %e, "app provider failed");
                    return Err(e);
                }
            }
        }
        let report = self.apply(&cache).await?;
        self.update_status(app).await?;
        info!(
            app = %key,
            env = %app.spec.env_name,
            staged = cache.len(),
            created = report.created(),
            updated = report.updated(),
            unchanged = report.unchanged(),
            "app reconciled"
        );
        Ok(report)
    }

    /// Resolve `key` and its environment, then run both passes.
    pub async fn reconcile_app_by_name(&self, key: &NamespacedName, cancel: &CancellationToken) -> Result<ApplyReport> {
        let app: CorralApp = self.store.get_as(key).await?;
        let env: CorralEnvironment = self.store.get_as(&NamespacedName::new("", app.spec.env_name.clone())).await?;
        self.reconcile_environment(&env, cancel).await?;
        self.reconcile_app(&app, cancel).await
    }

    async fn apply(&self, cache: &ObjectCache) -> Result<ApplyReport> {
        match cache.apply_all().await {
            Ok(report) => {
                counter!("reconcile_ok", 1u64);
                Ok(report)
            }
            Err(e) => {
                counter!("reconcile_err", 1u64);
                Err(e)
            }
        }
    }

    async fn update_status(&self, app: &CorralApp) -> Result<()> {
        let ns = app.metadata.namespace.clone().unwrap_or_default();
        let name = app.metadata.name.clone().unwrap_or_default();
        let selector = ListSelector::namespaced(ns).with_label("app", name.clone());
        let deployments: Vec<Deployment> = self.store.list_as(&selector).await?;
        let status = app_status(app, &deployments);

        let mut patch = CorralApp::new(&name, app.spec.clone());
        patch.metadata.namespace = app.metadata.namespace.clone();
        patch.status = Some(status);
        self.store.update_status_as(&patch).await?;
        Ok(())
    }
}

/// Status derived from the app's declared deployments and what is running.
pub fn app_status(app: &CorralApp, deployments: &[Deployment]) -> CorralAppStatus {
    let app_name = app.metadata.name.clone().unwrap_or_default();
    let managed = app.spec.deployments.len() as i32;
    let ready = app
        .spec
        .deployments
        .iter()
        .filter(|d| {
            let want = format!("{app_name}-{}", d.name);
            deployments.iter().any(|live| live.metadata.name.as_deref() == Some(want.as_str()) && deployment_ready(live))
        })
        .count() as i32;
    let all_ready = ready == managed;
    let condition = AppCondition {
        type_: "Ready".into(),
        status: if all_ready { "True" } else { "False" }.into(),
        reason: Some(if all_ready { "DeploymentsReady" } else { "DeploymentsNotReady" }.into()),
        message: Some(format!("{ready}/{managed} deployments ready")),
    };
    CorralAppStatus { ready: all_ready, managed_deployments: managed, ready_deployments: ready, conditions: vec![condition] }
}

fn deployment_ready(d: &Deployment) -> bool {
    let want = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let have = d.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
    have >= want
}
