use async_trait::async_trait;
use corral_core::Result;

use crate::appconfig::FeatureFlagsConfig;
use crate::crd::FeatureFlagsMode;
use crate::{AppContext, Provider};

/// Points apps that ask for feature flags at the environment's flag server.
pub struct FeatureFlagsProvider;

#[async_trait]
impl Provider for FeatureFlagsProvider {
    fn name(&self) -> &'static str {
        "featureflags"
    }

    async fn provide_app(&self, ctx: &mut AppContext<'_>) -> Result<()> {
        let ff = &ctx.env.spec.providers.feature_flags;
        if ff.mode == FeatureFlagsMode::None || !ctx.app.spec.feature_flags {
            return Ok(());
        }
        ctx.config.feature_flags =
            Some(FeatureFlagsConfig { hostname: ff.hostname.clone(), port: ff.port, scheme: ff.scheme.clone() });
        Ok(())
    }
}
