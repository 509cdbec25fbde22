//! Kafka through strimzi.
//!
//! The environment pass stages the `Kafka` (and optional `KafkaConnect`)
//! cluster when corral owns it. The app pass waits for the cluster to report
//! ready, stages one `KafkaTopic` per requested topic and fills the app's
//! kafka section with the published bootstrap address.

use std::collections::BTreeMap;

use async_trait::async_trait;
use corral_core::{Error, NamespacedName, ResourceIdent, Result};
use kube::api::ObjectMeta;
use serde_json::json;
use tracing::info;

use crate::appconfig::{BrokerConfig, KafkaConfig, TopicConfig};
use crate::crd::{KafkaClusterConfig, KafkaMode, KafkaProviderConfig, TopicSpec};
use crate::readiness::{await_cluster_ready, await_connect_ready};
use crate::strimzi::{
    GenericListener, Kafka, KafkaClusterSpec, KafkaConnect, KafkaConnectSpec, KafkaSpec, KafkaTopic, KafkaTopicSpec,
    ZookeeperSpec, CLUSTER_LABEL,
};
use crate::{AppContext, EnvContext, Provider};

pub const PLAIN_PORT: i32 = 9092;

pub fn cluster_ident() -> ResourceIdent {
    ResourceIdent::single::<Kafka>("kafka", "cluster")
}

pub fn connect_ident() -> ResourceIdent {
    ResourceIdent::single::<KafkaConnect>("kafka", "connect")
}

pub fn topics_ident() -> ResourceIdent {
    ResourceIdent::multi::<KafkaTopic>("kafka", "topics")
}

/// Where the cluster lives; both name and namespace are required.
pub fn cluster_key(cfg: &KafkaProviderConfig) -> Result<NamespacedName> {
    if cfg.cluster.name.is_empty() {
        return Err(Error::InvalidSpec("kafka.cluster.name is required".into()));
    }
    if cfg.cluster.namespace.is_empty() {
        return Err(Error::InvalidSpec("kafka.cluster.namespace is required".into()));
    }
    Ok(NamespacedName::new(cfg.cluster.namespace.clone(), cfg.cluster.name.clone()))
}

/// Partitions and replicas for a requested topic. Unset values fall back to the
/// cluster's topic defaults; replicas never exceed the broker count.
pub fn topic_sizing(topic: &TopicSpec, cluster: &KafkaClusterConfig) -> (i32, i32) {
    let partitions = topic.partitions.unwrap_or(cluster.topic_defaults.partitions);
    let replicas = topic.replicas.unwrap_or(cluster.topic_defaults.replicas);
    (partitions, replicas.min(cluster.replicas.max(1)))
}

fn ephemeral() -> serde_json::Value {
    json!({ "type": "ephemeral" })
}

fn cluster_labels(cluster: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(CLUSTER_LABEL.to_string(), cluster.to_string())])
}

fn kafka_cluster(cfg: &KafkaClusterConfig) -> Kafka {
    let min_isr = cfg.replicas.clamp(1, 2);
    Kafka::new(
        &cfg.name,
        KafkaSpec {
            kafka: KafkaClusterSpec {
                replicas: cfg.replicas,
                version: cfg.version.clone(),
                listeners: vec![GenericListener { name: "plain".into(), port: PLAIN_PORT, type_: "internal".into(), tls: false }],
                storage: ephemeral(),
                config: BTreeMap::from([
                    ("offsets.topic.replication.factor".to_string(), json!(cfg.replicas)),
                    ("min.insync.replicas".to_string(), json!(min_isr)),
                ]),
            },
            zookeeper: Some(ZookeeperSpec { replicas: cfg.replicas.min(3), storage: ephemeral() }),
            entity_operator: Some(json!({ "topicOperator": {} })),
        },
    )
}

pub struct KafkaProvider;

#[async_trait]
impl Provider for KafkaProvider {
    fn name(&self) -> &'static str {
        "kafka"
    }

    async fn provide_environment(&self, ctx: &mut EnvContext<'_>) -> Result<()> {
        let env = ctx.env;
        let cfg = &env.spec.providers.kafka;
        if cfg.mode != KafkaMode::Operator {
            return Ok(());
        }
        let key = cluster_key(cfg)?;
        let owner = ctx.owner_ref().map(|o| vec![o]);

        let mut cluster = kafka_cluster(&cfg.cluster);
        cluster.metadata.owner_references = owner.clone();
        ctx.cache.create(&cluster_ident(), &key, &cluster)?;

        if cfg.connect.enabled {
            let mut connect = KafkaConnect::new(
                &key.name,
                KafkaConnectSpec {
                    replicas: cfg.connect.replicas,
                    bootstrap_servers: format!("{}-kafka-bootstrap.{}.svc:{}", key.name, key.namespace, PLAIN_PORT),
                    version: cfg.cluster.version.clone(),
                    config: BTreeMap::from([("group.id".to_string(), json!("connect-cluster"))]),
                },
            );
            connect.metadata.owner_references = owner;
            ctx.cache.create(&connect_ident(), &key, &connect)?;
        }
        info!(cluster = %key, connect = cfg.connect.enabled, "staged kafka cluster");
        Ok(())
    }

    async fn provide_app(&self, ctx: &mut AppContext<'_>) -> Result<()> {
        let env = ctx.env;
        let cfg = &env.spec.providers.kafka;
        let app = ctx.app;
        if cfg.mode == KafkaMode::None || app.spec.kafka_topics.is_empty() {
            return Ok(());
        }
        let key = cluster_key(cfg)?;
        let store = ctx.store();

        let bootstrap = await_cluster_ready(store.as_ref(), &key, &cfg.listener, &ctx.settings.readiness, ctx.cancel).await?;
        if cfg.connect.enabled {
            await_connect_ready(store.as_ref(), &key, &ctx.settings.readiness, ctx.cancel).await?;
        }

        let mut topics = Vec::with_capacity(app.spec.kafka_topics.len());
        for topic in &app.spec.kafka_topics {
            let (partitions, replicas) = topic_sizing(topic, &cfg.cluster);
            let obj = KafkaTopic {
                metadata: ObjectMeta { labels: Some(cluster_labels(&key.name)), ..Default::default() },
                spec: KafkaTopicSpec {
                    partitions,
                    replicas,
                    topic_name: Some(topic.topic_name.clone()),
                    config: topic.config.clone(),
                },
                status: None,
            };
            let topic_key = NamespacedName::new(key.namespace.clone(), topic.topic_name.clone());
            ctx.cache.create(&topics_ident(), &topic_key, &obj)?;
            topics.push(TopicConfig { requested_name: topic.topic_name.clone(), name: topic.topic_name.clone() });
        }

        ctx.config.kafka = Some(KafkaConfig {
            brokers: vec![BrokerConfig { hostname: bootstrap.host.clone(), port: bootstrap.port }],
            topics,
        });
        info!(app = %ctx.app_name(), bootstrap = %bootstrap, topics = app.spec.kafka_topics.len(), "kafka configured");
        Ok(())
    }
}
