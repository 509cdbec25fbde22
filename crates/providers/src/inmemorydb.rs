use async_trait::async_trait;
use corral_core::{ResourceIdent, Result};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, PodSpec, Service};

use crate::appconfig::InMemoryDbConfig;
use crate::crd::InMemoryDbMode;
use crate::deployment::{container_port, deployment};
use crate::service::{cluster_service, port};
use crate::{AppContext, Provider};

pub const REDIS_PORT: i32 = 6379;
pub const REDIS_IMAGE: &str = "quay.io/cloudservices/redis:6";

pub fn redis_deployment() -> ResourceIdent {
    ResourceIdent::single::<Deployment>("inmemorydb", "deployment")
}

pub fn redis_service() -> ResourceIdent {
    ResourceIdent::single::<Service>("inmemorydb", "service")
}

/// Per-app redis when the app asks for an in-memory database.
pub struct InMemoryDbProvider;

#[async_trait]
impl Provider for InMemoryDbProvider {
    fn name(&self) -> &'static str {
        "inmemorydb"
    }

    async fn provide_app(&self, ctx: &mut AppContext<'_>) -> Result<()> {
        if ctx.env.spec.providers.in_memory_db.mode == InMemoryDbMode::None || !ctx.app.spec.in_memory_db {
            return Ok(());
        }
        let name = ctx.child_name("redis");
        let labels = ctx.labels("redis");
        let pod = PodSpec {
            containers: vec![Container {
                name: "redis".into(),
                image: Some(REDIS_IMAGE.into()),
                ports: Some(vec![container_port("redis", REDIS_PORT)]),
                ..Default::default()
            }],
            ..Default::default()
        };
        let dep = deployment(ctx.owned_meta(labels.clone()), &labels, pod);
        let svc = cluster_service(ctx.owned_meta(labels.clone()), &labels, vec![port("redis", REDIS_PORT)]);
        ctx.cache.create(&redis_deployment(), &name, &dep)?;
        ctx.cache.create(&redis_service(), &name, &svc)?;

        ctx.config.in_memory_db =
            Some(InMemoryDbConfig { hostname: format!("{}.{}.svc", name.name, name.namespace), port: REDIS_PORT });
        Ok(())
    }
}
