#![forbid(unsafe_code)]

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use corral_cache::ObjectCache;
use corral_core::{Error, NamespacedName, OperatorConfig, RetryPolicy, StoreError};
use corral_kubehub::{ClusterStore, ListSelector, MemoryStore, TypedStore};
use corral_providers::kafka::KafkaProvider;
use corral_providers::readiness::await_cluster_ready;
use corral_providers::strimzi::{Condition, Kafka, KafkaStatus, KafkaTopic, ListenerAddress, ListenerStatus};
use kube::core::{DynamicObject, GroupVersionKind};
use corral_providers::{AppConfig, AppContext, Provider, Reconciler};
use tokio_util::sync::CancellationToken;

fn impatient() -> OperatorConfig {
    OperatorConfig { readiness: RetryPolicy::new(3, Duration::from_millis(10), Duration::from_secs(5)), ..common::fast_settings() }
}

#[tokio::test]
async fn topics_follow_the_cluster_becoming_ready() {
    let store = Arc::new(MemoryStore::new());
    let (env, app) = common::seed(&store, &common::kafka_env("env", false), &common::app("test", "default", "env")).await;
    let reconciler = Reconciler::with_providers(store.clone(), common::fast_settings(), vec![Box::new(KafkaProvider)]);
    let cancel = CancellationToken::new();

    reconciler.reconcile_environment(&env, &cancel).await.unwrap();
    assert!(store.get_as::<Kafka>(&common::cluster_key()).await.is_ok());

    let operator = common::spawn_strimzi(store.clone(), false);
    reconciler.reconcile_app(&app, &cancel).await.unwrap();
    operator.await.unwrap();

    let explicit: KafkaTopic = store.get_as(&NamespacedName::new("kafka", "inventory")).await.unwrap();
    assert_eq!((explicit.spec.partitions, explicit.spec.replicas), (5, 5));
    let defaulted: KafkaTopic = store.get_as(&NamespacedName::new("kafka", "inventory-default-values")).await.unwrap();
    assert_eq!((defaulted.spec.partitions, defaulted.spec.replicas), (3, 3));
    assert_eq!(
        defaulted.metadata.labels.unwrap().get("strimzi.io/cluster").map(String::as_str),
        Some("kafka")
    );
}

#[tokio::test]
async fn never_ready_times_out_without_a_kafka_section() {
    let store = Arc::new(MemoryStore::new());
    let (env, app) = common::seed(&store, &common::kafka_env("env", false), &common::app("test", "default", "env")).await;
    let settings = impatient();
    let cancel = CancellationToken::new();

    let mut cache = ObjectCache::new(store.clone());
    let mut config = AppConfig::default();
    let mut ctx = AppContext { env: &env, app: &app, cache: &mut cache, config: &mut config, settings: &settings, cancel: &cancel };
    let err = KafkaProvider.provide_app(&mut ctx).await.unwrap_err();

    match err {
        Error::ReadinessTimeout { attempts, ref last_state, .. } => {
            assert_eq!(attempts, 3);
            assert!(last_state.contains("unobserved"), "{last_state}");
        }
        ref other => panic!("unexpected {other:?}"),
    }
    assert!(err.is_retryable());
    assert!(config.kafka.is_none());
    assert!(cache.is_empty());
}

#[tokio::test]
async fn status_without_ready_condition_keeps_waiting() {
    let store = Arc::new(MemoryStore::new());
    let (env, app) = common::seed(&store, &common::kafka_env("env", false), &common::app("test", "default", "env")).await;
    let reconciler = Reconciler::with_providers(store.clone(), impatient(), vec![Box::new(KafkaProvider)]);
    let cancel = CancellationToken::new();
    reconciler.reconcile_environment(&env, &cancel).await.unwrap();

    let mut kafka: Kafka = store.get_as(&common::cluster_key()).await.unwrap();
    kafka.status = Some(KafkaStatus::default());
    store.update_status_as(&kafka).await.unwrap();

    match reconciler.reconcile_app(&app, &cancel).await {
        Err(Error::ReadinessTimeout { last_state, .. }) => assert!(last_state.contains("not ready"), "{last_state}"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(store.get_as::<KafkaTopic>(&NamespacedName::new("kafka", "inventory")).await.is_err());
}

/// Store whose first `failures` reads fail with an API error.
struct Flaky {
    inner: MemoryStore,
    failures: AtomicU32,
}

#[async_trait]
impl ClusterStore for Flaky {
    async fn get(&self, gvk: &GroupVersionKind, key: &NamespacedName) -> Result<DynamicObject, StoreError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Api { code: 503, message: "apiserver unavailable".into() });
        }
        self.inner.get(gvk, key).await
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        self.inner.create(obj).await
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        self.inner.update(obj).await
    }

    async fn update_status(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        self.inner.update_status(obj).await
    }

    async fn list(&self, gvk: &GroupVersionKind, selector: &ListSelector) -> Result<Vec<DynamicObject>, StoreError> {
        self.inner.list(gvk, selector).await
    }
}

#[tokio::test]
async fn api_errors_while_waiting_are_retried() {
    let store = Arc::new(Flaky { inner: MemoryStore::new(), failures: AtomicU32::new(0) });
    let env = store.create_as(&common::kafka_env("env", false)).await.unwrap();
    let reconciler = Reconciler::with_providers(store.clone(), common::fast_settings(), vec![Box::new(KafkaProvider)]);
    reconciler.reconcile_environment(&env, &CancellationToken::new()).await.unwrap();

    let mut kafka: Kafka = store.get_as(&common::cluster_key()).await.unwrap();
    kafka.status = Some(KafkaStatus {
        conditions: vec![Condition::ready()],
        listeners: vec![ListenerStatus {
            type_: Some("plain".into()),
            addresses: vec![ListenerAddress { host: Some(common::BOOTSTRAP_HOST.into()), port: Some(9092) }],
            ..Default::default()
        }],
    });
    store.update_status_as(&kafka).await.unwrap();
    store.failures.store(3, Ordering::SeqCst);

    let settings = common::fast_settings();
    let addr = await_cluster_ready(store.as_ref(), &common::cluster_key(), "plain", &settings.readiness, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(addr.host, common::BOOTSTRAP_HOST);
    assert_eq!(store.failures.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn connect_that_never_becomes_ready_times_out() {
    let store = Arc::new(MemoryStore::new());
    let (env, app) = common::seed(&store, &common::kafka_env("env", true), &common::app("test", "default", "env")).await;
    let reconciler = Reconciler::with_providers(store.clone(), impatient(), vec![Box::new(KafkaProvider)]);
    let cancel = CancellationToken::new();
    reconciler.reconcile_environment(&env, &cancel).await.unwrap();

    // Only the cluster is marked ready; connect keeps no status.
    common::spawn_strimzi(store.clone(), false).await.unwrap();

    match reconciler.reconcile_app(&app, &cancel).await {
        Err(Error::ReadinessTimeout { resource, attempts, last_state }) => {
            assert_eq!(resource, "KafkaConnect kafka/kafka");
            assert_eq!(attempts, 3);
            assert!(last_state.contains("not ready"), "{last_state}");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(store.get_as::<KafkaTopic>(&NamespacedName::new("kafka", "inventory")).await.is_err());
}

#[tokio::test]
async fn cancellation_ends_the_wait() {
    let store = Arc::new(MemoryStore::new());
    let (_, app) = common::seed(&store, &common::kafka_env("env", false), &common::app("test", "default", "env")).await;
    let slow = OperatorConfig {
        readiness: RetryPolicy::new(1000, Duration::from_secs(1), Duration::from_secs(600)),
        ..common::fast_settings()
    };
    let reconciler = Reconciler::with_providers(store.clone(), slow, vec![Box::new(KafkaProvider)]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = reconciler.reconcile_app(&app, &cancel).await.unwrap_err();
    assert!(matches!(err, Error::ReadinessTimeout { .. }), "{err:?}");
    assert!(started.elapsed() < Duration::from_secs(5));
}
