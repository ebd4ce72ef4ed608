//! Database access: connection pool plus one module per table.
//!
//! Every function takes an `AsyncPgConnection` and returns `anyhow::Result`.
//! Functions touching agent-owned rows take the agent id and filter on it, so
//! a caller can never reach another agent's data. Scoped mutations return
//! `Option`, with `None` meaning "no such row for this agent".

use anyhow::Context;
use diesel_async::{
    pooled_connection::{
        deadpool::{Object, Pool},
        AsyncDieselConnectionManager, ManagerConfig,
    },
    AsyncPgConnection,
};

pub mod agents;
pub mod calendar_settings;
pub mod checklist;
pub mod clients;
pub mod meetings;
pub mod notes;
pub mod reports;
pub mod sync_logs;

pub type DbPool = Pool<AsyncPgConnection>;
pub type DbConn = Object<AsyncPgConnection>;

async fn establish_tls_connection(config: String) -> diesel::ConnectionResult<AsyncPgConnection> {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

    let (client, connection) = tokio_postgres::connect(&config, tls)
        .await
        .map_err(|e| diesel::ConnectionError::BadConnection(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Connection error: {}", e);
        }
    });

    AsyncPgConnection::try_from(client).await
}

/// Build the connection pool. TLS is used unless `require_tls` is false
/// (local development against a plain Postgres).
pub fn establish_connection_pool(
    database_url: &str,
    max_size: usize,
    require_tls: bool,
) -> anyhow::Result<DbPool> {
    let manager = if require_tls {
        let mut manager_config = ManagerConfig::default();
        manager_config.custom_setup =
            Box::new(|url| Box::pin(establish_tls_connection(url.to_string())));
        AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(
            database_url,
            manager_config,
        )
    } else {
        AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url)
    };

    let pool = Pool::builder(manager)
        .max_size(max_size)
        .build()
        .context("Failed to create database pool")?;

    Ok(pool)
}

/// Check out a pooled connection.
pub async fn get_conn(pool: &DbPool) -> anyhow::Result<DbConn> {
    pool.get().await.context("Failed to get DB connection")
}
