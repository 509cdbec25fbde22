use std::collections::BTreeMap;

use async_trait::async_trait;
use corral_core::{NamespacedName, ResourceIdent, Result};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use tracing::debug;

use crate::appconfig::CONFIG_KEY;
use crate::{AppContext, Provider};

pub fn config_secret() -> ResourceIdent {
    ResourceIdent::single::<Secret>("config", "secret")
}

/// Serializes the finished app config into the secret `<app>` that deployments mount.
pub struct ConfigSecretProvider;

#[async_trait]
impl Provider for ConfigSecretProvider {
    fn name(&self) -> &'static str {
        "config-secret"
    }

    async fn provide_app(&self, ctx: &mut AppContext<'_>) -> Result<()> {
        let bytes = ctx.config.to_json_bytes()?;
        let name = NamespacedName::new(ctx.namespace(), ctx.app_name());
        let labels = BTreeMap::from([("app".to_string(), ctx.app_name())]);
        let secret = Secret {
            metadata: ctx.owned_meta(labels),
            data: Some([(CONFIG_KEY.to_string(), ByteString(bytes))].into()),
            type_: Some("Opaque".into()),
            ..Default::default()
        };
        ctx.cache.create(&config_secret(), &name, &secret)?;
        debug!(secret = %name, "staged app config");
        Ok(())
    }
}
