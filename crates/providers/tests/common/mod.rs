#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use corral_core::{NamespacedName, OperatorConfig, RetryPolicy};
use corral_kubehub::{MemoryStore, TypedStore};
use corral_providers::crd::{
    AppDatabase, AppDeployment, AppPodSpec, CorralApp, CorralAppSpec, CorralEnvironment, CorralEnvironmentSpec,
    DatabaseMode, DatabaseProviderConfig, InMemoryDbMode, InMemoryDbProviderConfig, KafkaClusterConfig, KafkaConnectConfig,
    KafkaMode, KafkaProviderConfig, LoggingMode, LoggingProviderConfig, ObjectStoreMode, ObjectStoreProviderConfig,
    ProvidersConfig, TopicSpec,
};
use corral_providers::strimzi::{Condition, Kafka, KafkaConnect, KafkaConnectStatus, KafkaStatus, ListenerAddress, ListenerStatus};
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use tokio::task::JoinHandle;

pub const BOOTSTRAP_HOST: &str = "kafka-bootstrap.kafka.svc";

pub fn fast_settings() -> OperatorConfig {
    OperatorConfig {
        fetch: RetryPolicy::new(20, Duration::from_millis(10), Duration::from_secs(5)),
        readiness: RetryPolicy::new(200, Duration::from_millis(10), Duration::from_secs(10)),
        ..Default::default()
    }
}

pub fn cluster_key() -> NamespacedName {
    NamespacedName::new("kafka", "kafka")
}

pub fn kafka_env(name: &str, connect: bool) -> CorralEnvironment {
    CorralEnvironment::new(
        name,
        CorralEnvironmentSpec {
            target_namespace: "default".into(),
            providers: ProvidersConfig {
                kafka: KafkaProviderConfig {
                    mode: KafkaMode::Operator,
                    cluster: KafkaClusterConfig {
                        name: "kafka".into(),
                        namespace: "kafka".into(),
                        replicas: 5,
                        ..Default::default()
                    },
                    connect: KafkaConnectConfig { enabled: connect, replicas: 1 },
                    ..Default::default()
                },
                ..Default::default()
            },
        },
    )
}

/// The environment the end-to-end pass runs against: every provider switched on
/// except feature flags.
pub fn full_env(name: &str) -> CorralEnvironment {
    let mut env = kafka_env(name, true);
    let p = &mut env.spec.providers;
    p.database = DatabaseProviderConfig { mode: DatabaseMode::Local, ..Default::default() };
    p.logging = LoggingProviderConfig { mode: LoggingMode::AppInterface };
    p.object_store = ObjectStoreProviderConfig { mode: ObjectStoreMode::AppInterface };
    p.in_memory_db = InMemoryDbProviderConfig { mode: InMemoryDbMode::Redis };
    env
}

pub fn topics() -> Vec<TopicSpec> {
    vec![
        TopicSpec { topic_name: "inventory".into(), partitions: Some(5), replicas: Some(32), ..Default::default() },
        TopicSpec { topic_name: "inventory-default-values".into(), ..Default::default() },
    ]
}

pub fn app(name: &str, ns: &str, env: &str) -> CorralApp {
    let mut app = CorralApp::new(
        name,
        CorralAppSpec {
            env_name: env.into(),
            deployments: vec![AppDeployment {
                name: "testpod".into(),
                pod_spec: AppPodSpec { image: "test:test".into(), ..Default::default() },
                web: false,
            }],
            kafka_topics: topics(),
            database: AppDatabase { name: Some("test".into()), version: Some(12) },
            ..Default::default()
        },
    );
    app.metadata.namespace = Some(ns.into());
    app
}

/// Store the declared specs the way a user would, returning the stored copies.
pub async fn seed(store: &MemoryStore, env: &CorralEnvironment, app: &CorralApp) -> (CorralEnvironment, CorralApp) {
    let env = store.create_as(env).await.unwrap();
    let app = store.create_as(app).await.unwrap();
    (env, app)
}

pub async fn seed_cloudwatch(store: &MemoryStore) -> Vec<(String, String)> {
    let data: Vec<(String, String)> = [
        ("aws_access_key_id", "key_id"),
        ("aws_secret_access_key", "secret"),
        ("log_group_name", "default"),
        ("aws_region", "us-east-1"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    let secret = Secret {
        metadata: ObjectMeta { name: Some("cloudwatch".into()), namespace: Some("default".into()), ..Default::default() },
        string_data: Some(data.iter().cloned().collect()),
        ..Default::default()
    };
    store.create_as(&secret).await.unwrap();
    data
}

/// Credentials secret for one object-store bucket in the target namespace.
pub async fn seed_bucket(store: &MemoryStore, bucket: &str) {
    let secret = Secret {
        metadata: ObjectMeta { name: Some(bucket.into()), namespace: Some("default".into()), ..Default::default() },
        string_data: Some(
            [("aws_access_key_id", "bucket-key"), ("aws_secret_access_key", "bucket-secret"), ("aws_region", "us-east-1")]
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
        ..Default::default()
    };
    store.create_as(&secret).await.unwrap();
}

/// Stands in for the strimzi operator: once the cluster objects show up, mark
/// them ready and publish a plain listener.
pub fn spawn_strimzi(store: Arc<MemoryStore>, with_connect: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let key = cluster_key();
        let mut kafka_done = false;
        let mut connect_done = !with_connect;
        for _ in 0..1000 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if !kafka_done {
                if let Ok(mut k) = store.get_as::<Kafka>(&key).await {
                    k.status = Some(KafkaStatus {
                        conditions: vec![Condition::ready()],
                        listeners: vec![ListenerStatus {
                            type_: Some("plain".into()),
                            addresses: vec![ListenerAddress { host: Some(BOOTSTRAP_HOST.into()), port: Some(9092) }],
                            ..Default::default()
                        }],
                    });
                    kafka_done = store.update_status_as(&k).await.is_ok();
                }
            }
            if !connect_done {
                if let Ok(mut c) = store.get_as::<KafkaConnect>(&key).await {
                    c.status = Some(KafkaConnectStatus { conditions: vec![Condition::ready()] });
                    connect_done = store.update_status_as(&c).await.is_ok();
                }
            }
            if kafka_done && connect_done {
                return;
            }
        }
    })
}
