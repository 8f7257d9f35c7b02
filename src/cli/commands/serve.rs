use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Args;

use crate::app::app;
use crate::collaborators::{
    build_storage, ArchiveSink, AuditSink, MemoryArchiveSink, PgArchiveSink, PgAuditSink, TracingAuditSink,
};
use crate::config::{self, AppConfig};
use crate::database::{DatabaseManager, FeeStore, MemoryStore, PgFeeStore};
use crate::state::AppState;

#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    #[arg(long, help = "Use the in-memory store instead of PostgreSQL")]
    pub memory: bool,

    #[arg(long, help = "Port override (defaults to PORT or the environment preset)")]
    pub port: Option<u16>,
}

/// Wire the store and collaborators for the configured environment
pub async fn build_state(config: &AppConfig, memory: bool) -> anyhow::Result<AppState> {
    let storage = build_storage(&config.storage).context("object storage is misconfigured")?;

    let (store, audit, archive): (Arc<dyn FeeStore>, Arc<dyn AuditSink>, Arc<dyn ArchiveSink>) = if memory {
        tracing::warn!("Using the in-memory store; nothing survives a restart");
        (
            Arc::new(MemoryStore::new()),
            Arc::new(TracingAuditSink),
            Arc::new(MemoryArchiveSink::new()),
        )
    } else {
        let pool = DatabaseManager::connect(&config.database).await?;
        DatabaseManager::migrate(&pool).await?;
        (
            Arc::new(PgFeeStore::new(pool.clone())),
            Arc::new(PgAuditSink::new(pool.clone())),
            Arc::new(PgArchiveSink::new(pool)),
        )
    };

    Ok(AppState::new(store, storage, audit, archive, config))
}

pub async fn handle(args: ServeArgs) -> anyhow::Result<()> {
    let config = config::config();
    if config.security.jwt_secret.is_empty() {
        bail!("JWT_SECRET must be set outside development");
    }
    tracing::info!("Starting School Fees API in {:?} mode", config.environment);

    let state = build_state(config, args.memory).await?;
    let router = app(state, config);

    let port = args.port.unwrap_or(config.api.port);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("School Fees API listening on http://{}", bind_addr);
    axum::serve(listener, router).await.context("server error")?;
    Ok(())
}
