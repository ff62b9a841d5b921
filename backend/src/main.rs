use axum::http::Method;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod database;
mod error;
mod handlers;
mod jobs;
mod notifications;
mod store;
mod validation;
mod workflows;

pub use error::{ApiError, ApiResult, AppError};

#[cfg(test)]
mod tests;

use notifications::{EmailDispatcher, EmailService, LogDispatcher, NotificationDispatcher, WebhookDispatcher};
use store::{ExecutionStore, PgStore};
use workflows::WorkflowEngine;

pub struct AppState {
    pub engine: WorkflowEngine,
    pub store: Arc<dyn ExecutionStore>,
    /// Recent background job runs, reported by `/health`
    pub jobs: jobs::JobLog,
}

/// SMTP when configured, then the webhook channel, then log-only
fn select_dispatcher(config: &config::Config) -> Arc<dyn NotificationDispatcher> {
    if config.smtp.is_configured() {
        match EmailService::new(&config.smtp) {
            Ok(service) => {
                tracing::info!("Notifications via SMTP ({})", config.smtp.host);
                return Arc::new(EmailDispatcher::new(service));
            }
            Err(e) => tracing::error!("SMTP transport unavailable, falling back: {}", e),
        }
    }

    if let Some(url) = &config.notify_webhook_url {
        tracing::info!("Notifications via webhook");
        Arc::new(WebhookDispatcher::new(url.clone()))
    } else {
        tracing::warn!("No notification channel configured; notifications are only logged");
        Arc::new(LogDispatcher)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url, database::PoolConfig::from_env()).await?;

    database::migrate(&db_pool).await?;

    let pg_store = Arc::new(PgStore::new(db_pool));
    let store: Arc<dyn ExecutionStore> = pg_store.clone();
    let engine = WorkflowEngine::new(
        pg_store,
        store.clone(),
        select_dispatcher(&config),
        config.engine_config(),
    );

    let mut scheduler = jobs::JobScheduler::new(
        store.clone(),
        jobs::JobConfig {
            approval_sweep_cron: config.approval_sweep_cron.clone(),
        },
    )
    .await?;
    scheduler.start().await?;

    let app_state = Arc::new(AppState {
        engine,
        store,
        jobs: scheduler.log(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = handlers::api_router(app_state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors),
    );

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    scheduler.shutdown().await?;

    Ok(())
}
