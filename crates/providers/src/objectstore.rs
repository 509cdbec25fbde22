use async_trait::async_trait;
use corral_core::{NamespacedName, Result};
use corral_kubehub::wait::fetch_with_retry;
use k8s_openapi::api::core::v1::Secret;

use crate::appconfig::{ObjectStoreBucket, ObjectStoreConfig};
use crate::crd::ObjectStoreMode;
use crate::{secrets, AppContext, Provider};

const DEFAULT_ENDPOINT: &str = "s3.amazonaws.com";

/// Bucket credentials from per-bucket secrets in the target namespace.
pub struct ObjectStoreProvider;

#[async_trait]
impl Provider for ObjectStoreProvider {
    fn name(&self) -> &'static str {
        "objectstore"
    }

    async fn provide_app(&self, ctx: &mut AppContext<'_>) -> Result<()> {
        if ctx.env.spec.providers.object_store.mode == ObjectStoreMode::None || ctx.app.spec.object_store.is_empty() {
            return Ok(());
        }
        let store = ctx.store();
        let ns = ctx.target_namespace();
        let mut buckets = Vec::with_capacity(ctx.app.spec.object_store.len());
        let mut endpoint = None;
        for requested in &ctx.app.spec.object_store {
            let key = NamespacedName::new(ns.clone(), requested.clone());
            let secret: Secret = fetch_with_retry(store.as_ref(), &key, &ctx.settings.fetch, ctx.cancel).await?;
            if endpoint.is_none() {
                endpoint = secrets::value(&secret, "endpoint");
            }
            buckets.push(ObjectStoreBucket {
                access_key: secrets::required(&secret, "objectStore", "aws_access_key_id")?,
                secret_key: secrets::required(&secret, "objectStore", "aws_secret_access_key")?,
                region: secrets::value(&secret, "aws_region").unwrap_or_default(),
                requested_name: requested.clone(),
                name: secrets::value(&secret, "bucket").unwrap_or_else(|| requested.clone()),
            });
        }
        ctx.config.object_store = Some(ObjectStoreConfig {
            buckets,
            hostname: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            port: 443,
            tls: true,
        });
        Ok(())
    }
}
