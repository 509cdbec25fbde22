//! kube-runtime controllers driving the reconciler.

use std::sync::Arc;

use corral_core::{Error, OperatorConfig};
use corral_providers::{CorralApp, CorralEnvironment, Reconciler};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::controller::Action;
use kube::runtime::{watcher, Controller};
use kube::{Api, Client, Resource, ResourceExt};
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct State {
    pub reconciler: Reconciler,
    pub settings: OperatorConfig,
    pub cancel: CancellationToken,
}

async fn reconcile_environment(env: Arc<CorralEnvironment>, state: Arc<State>) -> Result<Action, Error> {
    if env.meta().deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }
    state.reconciler.reconcile_environment(&env, &state.cancel).await?;
    Ok(Action::requeue(state.settings.requeue))
}

async fn reconcile_app(app: Arc<CorralApp>, state: Arc<State>) -> Result<Action, Error> {
    if app.meta().deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }
    state.reconciler.reconcile_app(&app, &state.cancel).await?;
    Ok(Action::requeue(state.settings.requeue))
}

/// Retryable failures come back soon; anything else needs a spec or code change,
/// so it is logged loudly and retried slowly.
fn error_policy<K: Resource>(obj: Arc<K>, err: &Error, state: Arc<State>) -> Action {
    counter!("controller_errors", 1u64);
    if err.is_retryable() {
        warn!(name = %obj.name_any(), error = %err, "reconcile failed; will retry");
        Action::requeue(state.settings.error_requeue)
    } else {
        error!(name = %obj.name_any(), error = %err, "reconcile failed");
        Action::requeue(state.settings.requeue * 10)
    }
}

/// Run both controllers until a shutdown signal arrives.
pub async fn run(client: Client, state: Arc<State>) {
    let envs = Controller::new(Api::<CorralEnvironment>::all(client.clone()), watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile_environment, error_policy, Arc::clone(&state))
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(env = %obj.name, "environment reconciled"),
                Err(e) => warn!(error = %e, "environment controller"),
            }
        });

    let apps = Controller::new(Api::<CorralApp>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Deployment>::all(client), watcher::Config::default().labels("app"))
        .shutdown_on_signal()
        .run(reconcile_app, error_policy, Arc::clone(&state))
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(app = %obj.name, ns = ?obj.namespace, "app reconciled"),
                Err(e) => warn!(error = %e, "app controller"),
            }
        });

    info!("controllers started");
    tokio::join!(envs, apps);
    state.cancel.cancel();
    info!("controllers stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_kubehub::MemoryStore;
    use corral_providers::CorralAppSpec;

    fn state() -> Arc<State> {
        let settings = OperatorConfig::default();
        let reconciler = Reconciler::new(Arc::new(MemoryStore::new()), settings.clone());
        Arc::new(State { reconciler, settings, cancel: CancellationToken::new() })
    }

    fn app() -> Arc<CorralApp> {
        Arc::new(CorralApp::new("test", CorralAppSpec::default()))
    }

    #[test]
    fn retryable_errors_come_back_soon() {
        let st = state();
        let err = Error::ReadinessTimeout { resource: "Kafka kafka/kafka".into(), attempts: 3, last_state: "x".into() };
        assert_eq!(error_policy(app(), &err, Arc::clone(&st)), Action::requeue(st.settings.error_requeue));
    }

    #[test]
    fn permanent_errors_back_off() {
        let st = state();
        let err = Error::InvalidSpec("kafka.cluster.name is required".into());
        assert_eq!(error_policy(app(), &err, Arc::clone(&st)), Action::requeue(st.settings.requeue * 10));
    }
}
