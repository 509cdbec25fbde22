use async_trait::async_trait;
use corral_core::{ResourceIdent, Result};
use corral_kubehub::wait::fetch_opt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, EnvVar, EnvVarSource, PodSpec, Secret, SecretKeySelector, Service};
use tracing::debug;
use uuid::Uuid;

use crate::appconfig::DatabaseConfig;
use crate::crd::DatabaseMode;
use crate::deployment::{container_port, deployment};
use crate::service::{cluster_service, port};
use crate::{secrets, AppContext, Provider};

pub const DB_PORT: i32 = 5432;
const DEFAULT_VERSION: i32 = 12;

pub fn db_secret() -> ResourceIdent {
    ResourceIdent::single::<Secret>("database", "secret")
}

pub fn db_deployment() -> ResourceIdent {
    ResourceIdent::single::<Deployment>("database", "deployment")
}

pub fn db_service() -> ResourceIdent {
    ResourceIdent::single::<Service>("database", "service")
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Credentials {
    username: String,
    password: String,
    admin_password: String,
}

impl Credentials {
    fn generate() -> Self {
        let token = || Uuid::new_v4().simple().to_string();
        Self { username: format!("user{}", &token()[..8]), password: token(), admin_password: token() }
    }

    /// Reuse what an earlier pass stored, so the running database keeps working.
    fn from_secret(secret: &Secret) -> Option<Self> {
        Some(Self {
            username: secrets::value(secret, "username")?,
            password: secrets::value(secret, "password")?,
            admin_password: secrets::value(secret, "pgPass")?,
        })
    }
}

fn from_secret(secret: &str, key: &str, env: &str) -> EnvVar {
    EnvVar {
        name: env.into(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector { name: Some(secret.into()), key: key.into(), ..Default::default() }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Local postgres per app: credentials secret, deployment and service named `<app>-db`.
pub struct DatabaseProvider;

#[async_trait]
impl Provider for DatabaseProvider {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn provide_app(&self, ctx: &mut AppContext<'_>) -> Result<()> {
        let provider = ctx.env.spec.providers.database.clone();
        let requested = ctx.app.spec.database.clone();
        if provider.mode == DatabaseMode::None || !requested.requested() {
            return Ok(());
        }
        let name = ctx.child_name("db");
        let db_name = requested.name.clone().unwrap_or_else(|| ctx.app_name());
        let hostname = format!("{}.{}.svc", name.name, name.namespace);

        let store = ctx.store();
        let creds = match fetch_opt::<Secret, _>(store.as_ref(), &name).await? {
            Some(live) => Credentials::from_secret(&live),
            None => None,
        };
        let creds = creds.unwrap_or_else(|| {
            debug!(secret = %name, "generating database credentials");
            Credentials::generate()
        });

        let labels = ctx.labels("db");
        let secret = Secret {
            metadata: ctx.owned_meta(labels.clone()),
            data: Some(secrets::data([
                ("name", db_name.clone()),
                ("username", creds.username.clone()),
                ("password", creds.password.clone()),
                ("pgPass", creds.admin_password.clone()),
                ("hostname", hostname.clone()),
                ("port", DB_PORT.to_string()),
            ])),
            type_: Some("Opaque".into()),
            ..Default::default()
        };

        let version = requested.version.unwrap_or(DEFAULT_VERSION);
        let pod = PodSpec {
            containers: vec![Container {
                name: "postgres".into(),
                image: Some(format!("{}:{}", provider.image, version)),
                env: Some(vec![
                    from_secret(&name.name, "username", "POSTGRESQL_USER"),
                    from_secret(&name.name, "password", "POSTGRESQL_PASSWORD"),
                    from_secret(&name.name, "pgPass", "POSTGRESQL_MASTER_PASSWORD"),
                    from_secret(&name.name, "name", "POSTGRESQL_DATABASE"),
                ]),
                ports: Some(vec![container_port("postgres", DB_PORT)]),
                ..Default::default()
            }],
            ..Default::default()
        };
        let dep = deployment(ctx.owned_meta(labels.clone()), &labels, pod);
        let svc = cluster_service(ctx.owned_meta(labels.clone()), &labels, vec![port("postgres", DB_PORT)]);

        ctx.cache.create(&db_secret(), &name, &secret)?;
        ctx.cache.create(&db_deployment(), &name, &dep)?;
        ctx.cache.create(&db_service(), &name, &svc)?;

        ctx.config.database = Some(DatabaseConfig {
            name: db_name,
            username: creds.username,
            password: creds.password,
            hostname,
            port: DB_PORT,
            admin_username: "postgres".into(),
            admin_password: creds.admin_password,
            ssl_mode: "disable".into(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_credentials_are_distinct_and_reusable() {
        let a = Credentials::generate();
        let b = Credentials::generate();
        assert_ne!(a.password, b.password);
        assert!(a.username.starts_with("user") && a.username.len() == 12);

        let stored = Secret {
            data: Some(secrets::data([
                ("username", a.username.clone()),
                ("password", a.password.clone()),
                ("pgPass", a.admin_password.clone()),
            ])),
            ..Default::default()
        };
        assert_eq!(Credentials::from_secret(&stored), Some(a));
        assert_eq!(Credentials::from_secret(&Secret::default()), None);
    }
}
