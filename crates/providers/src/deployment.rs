use std::collections::BTreeMap;

use async_trait::async_trait;
use corral_core::{ResourceIdent, Result};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, ContainerPort, EnvVar, PodAffinityTerm, PodAntiAffinity, PodSpec, PodTemplateSpec,
    SecretVolumeSource, Volume, VolumeMount, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;

use crate::appconfig::CONFIG_KEY;
use crate::crd::AppDeployment;
use crate::{AppContext, Provider, CONFIG_MOUNT_PATH};

pub const CONFIG_VOLUME: &str = "config-secret";

pub fn app_deployments() -> ResourceIdent {
    ResourceIdent::multi::<Deployment>("deployment", "deployments")
}

pub(crate) fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort { name: Some(name.to_string()), container_port: port, protocol: Some("TCP".into()), ..Default::default() }
}

/// One-replica deployment whose pods carry `labels` and are selected by the `pod` label.
pub(crate) fn deployment(metadata: ObjectMeta, labels: &BTreeMap<String, String>, pod: PodSpec) -> Deployment {
    let selector = labels.get("pod").map(|p| BTreeMap::from([("pod".to_string(), p.clone())]));
    Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector { match_labels: selector, ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(labels.clone()), ..Default::default() }),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Prefer spreading replicas across zones first, then across nodes.
fn anti_affinity(pod_label: &str) -> Affinity {
    let term = |weight: i32, topology: &str| WeightedPodAffinityTerm {
        weight,
        pod_affinity_term: PodAffinityTerm {
            label_selector: Some(LabelSelector {
                match_labels: Some(BTreeMap::from([("pod".to_string(), pod_label.to_string())])),
                ..Default::default()
            }),
            topology_key: topology.to_string(),
            ..Default::default()
        },
    };
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                term(100, "topology.kubernetes.io/zone"),
                term(99, "kubernetes.io/hostname"),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn app_pod(ctx: &AppContext<'_>, dep: &AppDeployment, pod_label: &str) -> PodSpec {
    let mut ports = vec![container_port("metrics", ctx.env.spec.providers.metrics.port)];
    if dep.web {
        ports.push(container_port("web", ctx.env.spec.providers.web.port));
    }
    let mut env = dep.pod_spec.env.clone();
    env.push(EnvVar {
        name: "CORRAL_CONFIG".into(),
        value: Some(format!("{CONFIG_MOUNT_PATH}{CONFIG_KEY}")),
        ..Default::default()
    });
    let non_empty = |v: &Vec<String>| if v.is_empty() { None } else { Some(v.clone()) };

    PodSpec {
        containers: vec![Container {
            name: dep.name.clone(),
            image: Some(dep.pod_spec.image.clone()),
            command: non_empty(&dep.pod_spec.command),
            args: non_empty(&dep.pod_spec.args),
            env: Some(env),
            ports: Some(ports),
            volume_mounts: Some(vec![VolumeMount {
                name: CONFIG_VOLUME.into(),
                mount_path: CONFIG_MOUNT_PATH.into(),
                read_only: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        }],
        volumes: Some(vec![Volume {
            name: CONFIG_VOLUME.into(),
            secret: Some(SecretVolumeSource { secret_name: Some(ctx.app_name()), ..Default::default() }),
            ..Default::default()
        }]),
        affinity: Some(anti_affinity(pod_label)),
        ..Default::default()
    }
}

/// `<app>-<deployment>` for each declared deployment, with the config secret mounted.
pub struct DeploymentProvider;

#[async_trait]
impl Provider for DeploymentProvider {
    fn name(&self) -> &'static str {
        "deployment"
    }

    async fn provide_app(&self, ctx: &mut AppContext<'_>) -> Result<()> {
        let app = ctx.app;
        for dep in &app.spec.deployments {
            let labels = ctx.labels(&dep.name);
            let name = ctx.child_name(&dep.name);
            let pod = app_pod(ctx, dep, &name.name);
            let obj = deployment(ctx.owned_meta(labels.clone()), &labels, pod);
            ctx.cache.create(&app_deployments(), &name, &obj)?;
        }
        Ok(())
    }
}
