//! The subset of the strimzi `kafka.strimzi.io/v1beta2` API corral writes and reads.
//!
//! `Kafka` and `KafkaConnect` are reconciled by the strimzi operator; corral
//! only stages their spec and reads back `status`.

use std::collections::BTreeMap;

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

pub const CLUSTER_LABEL: &str = "strimzi.io/cluster";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize)]
#[kube(
    group = "kafka.strimzi.io",
    version = "v1beta2",
    kind = "Kafka",
    namespaced,
    status = "KafkaStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct KafkaSpec {
    pub kafka: KafkaClusterSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zookeeper: Option<ZookeeperSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_operator: Option<Json>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KafkaClusterSpec {
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub listeners: Vec<GenericListener>,
    #[serde(default)]
    pub storage: Json,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, Json>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericListener {
    pub name: String,
    pub port: i32,
    #[serde(rename = "type")]
    pub type_: String,
    pub tls: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZookeeperSpec {
    pub replicas: i32,
    #[serde(default)]
    pub storage: Json,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Condition {
    pub fn ready() -> Self {
        Self { type_: Some("Ready".into()), status: Some("True".into()), ..Default::default() }
    }
}

/// True when a `Ready` condition reports `status: "True"`.
pub fn is_ready(conditions: &[Condition]) -> bool {
    conditions.iter().any(|c| c.type_.as_deref() == Some("Ready") && c.status.as_deref() == Some("True"))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KafkaStatus {
    pub conditions: Vec<Condition>,
    pub listeners: Vec<ListenerStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListenerStatus {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub addresses: Vec<ListenerAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap_servers: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListenerAddress {
    pub host: Option<String>,
    pub port: Option<i32>,
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize)]
#[kube(
    group = "kafka.strimzi.io",
    version = "v1beta2",
    kind = "KafkaConnect",
    namespaced,
    status = "KafkaConnectStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct KafkaConnectSpec {
    pub replicas: i32,
    pub bootstrap_servers: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, Json>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KafkaConnectStatus {
    pub conditions: Vec<Condition>,
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize)]
#[kube(
    group = "kafka.strimzi.io",
    version = "v1beta2",
    kind = "KafkaTopic",
    namespaced,
    status = "KafkaTopicStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct KafkaTopicSpec {
    pub partitions: i32,
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_name: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KafkaTopicStatus {
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_decodes_from_operator_output() {
        let status: KafkaStatus = serde_json::from_value(serde_json::json!({
            "conditions": [ { "type": "Ready", "status": "True", "lastTransitionTime": "2024-01-01T00:00:00Z" } ],
            "listeners": [ { "type": "plain", "addresses": [ { "host": "kafka-bootstrap.kafka.svc", "port": 9092 } ] } ],
            "observedGeneration": 2
        }))
        .unwrap();
        assert!(is_ready(&status.conditions));
        assert_eq!(status.listeners[0].addresses[0].port, Some(9092));
    }

    #[test]
    fn only_a_true_ready_condition_counts() {
        let not_ready = Condition { type_: Some("Ready".into()), status: Some("False".into()), ..Default::default() };
        let other = Condition { type_: Some("NotReady".into()), status: Some("True".into()), ..Default::default() };
        assert!(!is_ready(&[not_ready, other]));
        assert!(!is_ready(&[]));
        assert!(is_ready(&[Condition::ready()]));
    }
}
