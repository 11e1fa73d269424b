use std::sync::Arc;

use tokio::net::TcpListener;

use trellis::config::Settings;
use trellis::engine::Engine;
use trellis::http;
use trellis::registry::default_registry;
use trellis::store::SqliteGraphStore;
use trellis::telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env();
    telemetry::init(&settings.log_filter);

    let store = SqliteGraphStore::connect(&settings.store_url, settings.pool_size).await?;
    let engine = Arc::new(Engine::new(
        Arc::new(store),
        Arc::new(default_registry()),
    ));

    let router = http::router(engine);
    let addr = settings.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, store = %settings.store_url, "serving session API");
    axum::serve(listener, router).await?;

    Ok(())
}
