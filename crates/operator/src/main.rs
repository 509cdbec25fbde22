use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use corral_core::{NamespacedName, OperatorConfig};
use corral_kubehub::{get_kube_client, KubeStore};
use corral_providers::{CorralApp, CorralEnvironment, Reconciler};
use kube::CustomResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod controller;

#[derive(Parser, Debug)]
#[command(name = "corral", version, about = "Corral operator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch environments and apps and reconcile them until interrupted
    Run,
    /// Reconcile one app and its environment, then exit
    Once {
        /// Namespace of the app
        #[arg(long = "ns", env = "CORRAL_NAMESPACE", default_value = "default")]
        namespace: String,
        /// App name
        app: String,
    },
    /// Print the CustomResourceDefinitions corral serves
    Crds,
}

fn init_tracing() {
    let env = std::env::var("CORRAL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("CORRAL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid CORRAL_METRICS_ADDR; expected host:port");
        }
    }
}

/// Cancelled on ctrl-c so in-flight waits unwind promptly.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
        }
        trigger.cancel();
    });
    token
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    if let Commands::Crds = cli.command {
        for crd in [CorralEnvironment::crd(), CorralApp::crd()] {
            println!("{}", serde_json::to_string_pretty(&crd)?);
        }
        return Ok(());
    }

    init_metrics();
    let settings = OperatorConfig::from_env();
    let client = get_kube_client().await?;
    let store = Arc::new(KubeStore::new(client.clone(), settings.field_manager.clone()));
    let reconciler = Reconciler::new(store, settings.clone());
    let cancel = shutdown_token();

    match cli.command {
        Commands::Run => {
            let state = Arc::new(controller::State { reconciler, settings, cancel });
            controller::run(client, state).await;
        }
        Commands::Once { namespace, app } => {
            let key = NamespacedName::new(namespace, app);
            let report = reconciler
                .reconcile_app_by_name(&key, &cancel)
                .await
                .with_context(|| format!("reconciling {key}"))?;
            info!(
                app = %key,
                created = report.created(),
                updated = report.updated(),
                unchanged = report.unchanged(),
                "reconciled once"
            );
        }
        Commands::Crds => {}
    }
    Ok(())
}
