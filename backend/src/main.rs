use std::net::SocketAddr;
use std::sync::Arc;

use scrapx_backend::app::{self, AppState};
use scrapx_backend::config::AppConfig;
use scrapx_backend::store::{MarketStore, MemoryStore, PgStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    let config = AppConfig::load()?;
    log::info!("Loaded config: {:?}", config);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let store: Arc<dyn MarketStore> = match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url, config.database_pool_size)?;
            store.run_migrations()?;
            log::info!("Using Postgres storage");
            Arc::new(store)
        }
        None => {
            log::warn!("DATABASE_URL not set; using in-memory storage");
            Arc::new(MemoryStore::new())
        }
    };

    let state = AppState::new(config, store)?;
    let app = app::router(state);

    log::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
