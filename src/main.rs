use tasksync::{
    application::task_sync::TaskSync,
    config::{self, Config},
    domain::store::TaskStore,
    http::routing::{self, AppState},
    infrastructure::sqlite_store::SqliteTaskStore,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    config::prepare_sqlite_file(&config.database_url)?;
    let store = SqliteTaskStore::connect(&config.database_url).await?;
    store.init().await?;
    let sync = TaskSync::new(store);
    let router = routing::app(AppState { sync: sync.clone() });

    let addr = config.bind_addr;
    tracing::info!(%addr, "listening");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    sync.sign_out().await;
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::ctrl_c;
    let _ = ctrl_c().await;
    tracing::info!("shutdown");
}
