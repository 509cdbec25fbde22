//! The configuration document handed to every app through its config secret.
//!
//! Providers fill the sections they own during a pass; an absent section means
//! the app gets no such dependency. A present section must be complete before
//! it is serialized.

use corral_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Key of the serialized document inside the config secret.
pub const CONFIG_KEY: &str = "appconfig.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_port: Option<i32>,
    pub metrics_port: i32,
    pub metrics_path: String,
    pub logging: LoggingConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kafka: Option<KafkaConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_store: Option<ObjectStoreConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_memory_db: Option<InMemoryDbConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_flags: Option<FeatureFlagsConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloudwatch: Option<CloudWatchConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudWatchConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub log_group: String,
    pub region: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KafkaConfig {
    pub brokers: Vec<BrokerConfig>,
    pub topics: Vec<TopicConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerConfig {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicConfig {
    /// Name the app asked for.
    pub requested_name: String,
    /// Name of the provisioned topic.
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    pub name: String,
    pub username: String,
    pub password: String,
    pub hostname: String,
    pub port: i32,
    pub admin_username: String,
    pub admin_password: String,
    pub ssl_mode: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreConfig {
    pub buckets: Vec<ObjectStoreBucket>,
    pub hostname: String,
    pub port: i32,
    pub tls: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreBucket {
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub requested_name: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InMemoryDbConfig {
    pub hostname: String,
    pub port: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlagsConfig {
    pub hostname: String,
    pub port: i32,
    pub scheme: String,
}

fn require(section: &'static str, field: &'static str, ok: bool) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(Error::IncompleteConfig { section, field })
    }
}

impl AppConfig {
    /// Every present section is fully populated.
    pub fn validate(&self) -> Result<()> {
        require("metrics", "port", self.metrics_port > 0)?;
        require("metrics", "path", !self.metrics_path.is_empty())?;
        require("logging", "type", !self.logging.type_.is_empty())?;
        if let Some(cw) = &self.logging.cloudwatch {
            require("logging", "cloudwatch.accessKeyId", !cw.access_key_id.is_empty())?;
            require("logging", "cloudwatch.secretAccessKey", !cw.secret_access_key.is_empty())?;
            require("logging", "cloudwatch.logGroup", !cw.log_group.is_empty())?;
            require("logging", "cloudwatch.region", !cw.region.is_empty())?;
        }
        if let Some(kafka) = &self.kafka {
            require("kafka", "brokers", !kafka.brokers.is_empty())?;
            require("kafka", "brokers.hostname", kafka.brokers.iter().all(|b| !b.hostname.is_empty()))?;
            require("kafka", "topics.name", kafka.topics.iter().all(|t| !t.name.is_empty()))?;
        }
        if let Some(db) = &self.database {
            require("database", "name", !db.name.is_empty())?;
            require("database", "username", !db.username.is_empty())?;
            require("database", "password", !db.password.is_empty())?;
            require("database", "hostname", !db.hostname.is_empty())?;
            require("database", "port", db.port > 0)?;
        }
        if let Some(os) = &self.object_store {
            require("objectStore", "buckets.name", os.buckets.iter().all(|b| !b.name.is_empty()))?;
            require("objectStore", "buckets.accessKey", os.buckets.iter().all(|b| !b.access_key.is_empty()))?;
            require("objectStore", "hostname", !os.hostname.is_empty())?;
        }
        if let Some(mem) = &self.in_memory_db {
            require("inMemoryDb", "hostname", !mem.hostname.is_empty())?;
        }
        if let Some(ff) = &self.feature_flags {
            require("featureFlags", "hostname", !ff.hostname.is_empty())?;
        }
        Ok(())
    }

    /// Validate, then serialize to the JSON stored under [`CONFIG_KEY`].
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        self.validate()?;
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> AppConfig {
        AppConfig {
            metrics_port: 9000,
            metrics_path: "/metrics".into(),
            logging: LoggingConfig { type_: "null".into(), cloudwatch: None },
            ..Default::default()
        }
    }

    #[test]
    fn absent_sections_are_not_serialized() {
        let v: serde_json::Value = serde_json::from_slice(&minimal().to_json_bytes().unwrap()).unwrap();
        assert_eq!(v["metricsPort"], 9000);
        assert_eq!(v["logging"]["type"], "null");
        assert!(v.get("kafka").is_none());
        assert!(v.get("database").is_none());
    }

    #[test]
    fn kafka_section_without_brokers_is_incomplete() {
        let mut cfg = minimal();
        cfg.kafka = Some(KafkaConfig { brokers: vec![], topics: vec![] });
        match cfg.to_json_bytes() {
            Err(Error::IncompleteConfig { section, field }) => {
                assert_eq!(section, "kafka");
                assert_eq!(field, "brokers");
            }
            other => panic!("unexpected {other:?}"),
        }

        cfg.kafka = Some(KafkaConfig {
            brokers: vec![BrokerConfig { hostname: "kafka-bootstrap".into(), port: Some(9092) }],
            topics: vec![TopicConfig { requested_name: "a".into(), name: "a".into() }],
        });
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_cloudwatch_is_incomplete() {
        let mut cfg = minimal();
        cfg.logging = LoggingConfig {
            type_: "cloudwatch".into(),
            cloudwatch: Some(CloudWatchConfig { access_key_id: "id".into(), ..Default::default() }),
        };
        assert!(matches!(cfg.validate(), Err(Error::IncompleteConfig { section: "logging", .. })));
    }

    #[test]
    fn decodes_what_it_writes() {
        let mut cfg = minimal();
        cfg.database = Some(DatabaseConfig {
            name: "app".into(),
            username: "u".into(),
            password: "p".into(),
            hostname: "app-db.ns.svc".into(),
            port: 5432,
            admin_username: "postgres".into(),
            admin_password: "a".into(),
            ssl_mode: "disable".into(),
        });
        let bytes = cfg.to_json_bytes().unwrap();
        let back: AppConfig = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, cfg);
    }
}
