use std::collections::BTreeMap;

use async_trait::async_trait;
use corral_core::{ResourceIdent, Result};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;

use crate::{AppContext, Provider};

pub fn app_services() -> ResourceIdent {
    ResourceIdent::multi::<Service>("service", "deployments")
}

pub(crate) fn port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        protocol: Some("TCP".into()),
        ..Default::default()
    }
}

/// ClusterIP service selecting pods by their `pod` label.
pub(crate) fn cluster_service(metadata: ObjectMeta, pod_labels: &BTreeMap<String, String>, ports: Vec<ServicePort>) -> Service {
    let selector = pod_labels.get("pod").map(|p| BTreeMap::from([("pod".to_string(), p.clone())]));
    Service {
        metadata,
        spec: Some(ServiceSpec { selector, ports: Some(ports), type_: Some("ClusterIP".into()), ..Default::default() }),
        ..Default::default()
    }
}

/// One service per app deployment: the metrics port, plus the web port for web deployments.
pub struct ServiceProvider;

#[async_trait]
impl Provider for ServiceProvider {
    fn name(&self) -> &'static str {
        "service"
    }

    async fn provide_app(&self, ctx: &mut AppContext<'_>) -> Result<()> {
        let web = ctx.env.spec.providers.web.clone();
        let metrics = ctx.env.spec.providers.metrics.clone();
        ctx.config.metrics_port = metrics.port;
        ctx.config.metrics_path = metrics.path.clone();

        let app = ctx.app;
        for dep in &app.spec.deployments {
            let labels = ctx.labels(&dep.name);
            let mut ports = vec![port("metrics", metrics.port)];
            if dep.web {
                ports.push(port("web", web.port));
                ctx.config.web_port = Some(web.port);
            }
            let svc = cluster_service(ctx.owned_meta(labels.clone()), &labels, ports);
            let name = ctx.child_name(&dep.name);
            ctx.cache.create(&app_services(), &name, &svc)?;
        }
        Ok(())
    }
}
