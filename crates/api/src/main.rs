use anyhow::Context;

use kontor_api::app::{build_app, services::AppServices};
use kontor_infra::{config::AppConfig, db};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kontor_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    let pool = match config.database_url.as_deref() {
        Some(url) => {
            let pool = db::connect(url).await.context("failed to connect to Postgres")?;
            db::migrate(&pool).await.context("failed to run migrations")?;
            tracing::info!("number schemes and audit log stored in Postgres");
            Some(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; all data is kept in memory");
            None
        }
    };

    let bind_addr = config.bind_addr.clone();
    let services = AppServices::build(config, pool).context("failed to start services")?;
    let app = build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    services.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
