use async_trait::async_trait;
use corral_core::{NamespacedName, Result};
use corral_kubehub::wait::fetch_with_retry;
use k8s_openapi::api::core::v1::Secret;
use tracing::debug;

use crate::appconfig::{CloudWatchConfig, LoggingConfig};
use crate::crd::LoggingMode;
use crate::{secrets, AppContext, Provider};

pub const CLOUDWATCH_SECRET: &str = "cloudwatch";

/// CloudWatch credentials from the environment's `cloudwatch` secret, or a null logger.
pub struct LoggingProvider;

#[async_trait]
impl Provider for LoggingProvider {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn provide_app(&self, ctx: &mut AppContext<'_>) -> Result<()> {
        match ctx.env.spec.providers.logging.mode {
            LoggingMode::None => {
                ctx.config.logging = LoggingConfig { type_: "null".into(), cloudwatch: None };
            }
            LoggingMode::AppInterface => {
                let key = NamespacedName::new(ctx.target_namespace(), CLOUDWATCH_SECRET);
                let store = ctx.store();
                let secret: Secret = fetch_with_retry(store.as_ref(), &key, &ctx.settings.fetch, ctx.cancel).await?;
                let cloudwatch = CloudWatchConfig {
                    access_key_id: secrets::required(&secret, "logging", "aws_access_key_id")?,
                    secret_access_key: secrets::required(&secret, "logging", "aws_secret_access_key")?,
                    log_group: secrets::required(&secret, "logging", "log_group_name")?,
                    region: secrets::required(&secret, "logging", "aws_region")?,
                };
                debug!(secret = %key, group = %cloudwatch.log_group, "cloudwatch logging");
                ctx.config.logging = LoggingConfig { type_: "cloudwatch".into(), cloudwatch: Some(cloudwatch) };
            }
        }
        Ok(())
    }
}
