//! Declared specs: `CorralEnvironment` (cluster-scoped, one per environment)
//! and `CorralApp` (namespaced, one per application).

use k8s_openapi::api::core::v1::EnvVar;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize)]
#[kube(group = "corral.dev", version = "v1alpha1", kind = "CorralEnvironment", schema = "disabled")]
#[serde(rename_all = "camelCase")]
pub struct CorralEnvironmentSpec {
    /// Namespace holding environment-wide secrets (cloudwatch, buckets).
    #[serde(default)]
    pub target_namespace: String,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    pub kafka: KafkaProviderConfig,
    pub database: DatabaseProviderConfig,
    pub logging: LoggingProviderConfig,
    pub object_store: ObjectStoreProviderConfig,
    pub in_memory_db: InMemoryDbProviderConfig,
    pub web: WebProviderConfig,
    pub metrics: MetricsProviderConfig,
    pub feature_flags: FeatureFlagsProviderConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KafkaMode {
    /// Corral owns the `Kafka` CR; a strimzi operator runs it.
    Operator,
    /// The cluster is managed elsewhere; corral only waits for it and provisions topics.
    AppInterface,
    #[default]
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KafkaProviderConfig {
    pub mode: KafkaMode,
    pub cluster: KafkaClusterConfig,
    pub connect: KafkaConnectConfig,
    /// Listener whose address is handed to apps, matched on name or type.
    pub listener: String,
}

impl Default for KafkaProviderConfig {
    fn default() -> Self {
        Self {
            mode: KafkaMode::None,
            cluster: KafkaClusterConfig::default(),
            connect: KafkaConnectConfig::default(),
            listener: "plain".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KafkaClusterConfig {
    pub name: String,
    pub namespace: String,
    pub replicas: i32,
    pub version: Option<String>,
    pub topic_defaults: TopicDefaults,
}

impl Default for KafkaClusterConfig {
    fn default() -> Self {
        Self { name: String::new(), namespace: String::new(), replicas: 3, version: None, topic_defaults: TopicDefaults::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TopicDefaults {
    pub partitions: i32,
    pub replicas: i32,
}

impl Default for TopicDefaults {
    fn default() -> Self {
        Self { partitions: 3, replicas: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KafkaConnectConfig {
    pub enabled: bool,
    pub replicas: i32,
}

impl Default for KafkaConnectConfig {
    fn default() -> Self {
        Self { enabled: false, replicas: 1 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatabaseMode {
    /// One postgres deployment per app, in the app namespace.
    Local,
    #[default]
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseProviderConfig {
    pub mode: DatabaseMode,
    pub image: String,
}

impl Default for DatabaseProviderConfig {
    fn default() -> Self {
        Self { mode: DatabaseMode::None, image: "quay.io/cloudservices/postgresql-rds".to_string() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoggingMode {
    AppInterface,
    #[default]
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingProviderConfig {
    pub mode: LoggingMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObjectStoreMode {
    AppInterface,
    #[default]
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectStoreProviderConfig {
    pub mode: ObjectStoreMode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InMemoryDbMode {
    Redis,
    #[default]
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InMemoryDbProviderConfig {
    pub mode: InMemoryDbMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebProviderConfig {
    pub port: i32,
    pub mode: String,
}

impl Default for WebProviderConfig {
    fn default() -> Self {
        Self { port: 8000, mode: "none".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsProviderConfig {
    pub port: i32,
    pub path: String,
    pub mode: String,
}

impl Default for MetricsProviderConfig {
    fn default() -> Self {
        Self { port: 9000, path: "/metrics".to_string(), mode: "none".to_string() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeatureFlagsMode {
    AppInterface,
    #[default]
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeatureFlagsProviderConfig {
    pub mode: FeatureFlagsMode,
    pub hostname: String,
    pub port: i32,
    pub scheme: String,
}

impl Default for FeatureFlagsProviderConfig {
    fn default() -> Self {
        Self { mode: FeatureFlagsMode::None, hostname: String::new(), port: 4242, scheme: "http".to_string() }
    }
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize)]
#[kube(
    group = "corral.dev",
    version = "v1alpha1",
    kind = "CorralApp",
    namespaced,
    status = "CorralAppStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct CorralAppSpec {
    pub env_name: String,
    #[serde(default)]
    pub deployments: Vec<AppDeployment>,
    #[serde(default)]
    pub kafka_topics: Vec<TopicSpec>,
    #[serde(default)]
    pub database: AppDatabase,
    /// Bucket names; each maps to a secret of the same name in the target namespace.
    #[serde(default)]
    pub object_store: Vec<String>,
    #[serde(default)]
    pub in_memory_db: bool,
    #[serde(default)]
    pub feature_flags: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDeployment {
    pub name: String,
    pub pod_spec: AppPodSpec,
    #[serde(default)]
    pub web: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppPodSpec {
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: Vec<EnvVar>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSpec {
    pub topic_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default)]
    pub config: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppDatabase {
    pub name: Option<String>,
    pub version: Option<i32>,
}

impl AppDatabase {
    pub fn requested(&self) -> bool {
        self.name.is_some() || self.version.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CorralAppStatus {
    pub ready: bool,
    pub managed_deployments: i32,
    pub ready_deployments: i32,
    pub conditions: Vec<AppCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_defaults_fill_unset_fields() {
        let env: CorralEnvironmentSpec = serde_json::from_value(serde_json::json!({
            "targetNamespace": "default",
            "providers": {
                "kafka": { "mode": "operator", "cluster": { "name": "kafka", "namespace": "kafka", "replicas": 5 } },
                "logging": { "mode": "app-interface" }
            }
        }))
        .unwrap();
        let kafka = &env.providers.kafka;
        assert_eq!(kafka.mode, KafkaMode::Operator);
        assert_eq!(kafka.cluster.replicas, 5);
        assert_eq!(kafka.cluster.topic_defaults, TopicDefaults { partitions: 3, replicas: 3 });
        assert_eq!(kafka.listener, "plain");
        assert_eq!(env.providers.logging.mode, LoggingMode::AppInterface);
        assert_eq!(env.providers.metrics.port, 9000);
        assert_eq!(env.providers.database.mode, DatabaseMode::None);
    }

    #[test]
    fn app_topics_keep_missing_sizes_unset() {
        let spec: CorralAppSpec = serde_json::from_value(serde_json::json!({
            "envName": "env",
            "kafkaTopics": [ { "topicName": "a", "partitions": 5 }, { "topicName": "b" } ],
            "database": { "name": "db" }
        }))
        .unwrap();
        assert_eq!(spec.kafka_topics[0].partitions, Some(5));
        assert_eq!(spec.kafka_topics[0].replicas, None);
        assert_eq!(spec.kafka_topics[1].partitions, None);
        assert!(spec.database.requested());
        assert!(!spec.in_memory_db);
    }
}
