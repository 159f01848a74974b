use std::sync::Arc;

use axum::serve;
use dynapi::api::create_router;
use dynapi::config::AppConfig;
use dynapi::logic::EngineContext;
use dynapi::source::{ReadOnlyPgSource, ReqwestCaller};
use dynapi::store::PostgresStore;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging with explicit filter to suppress sqlx debug logs
    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info) // Default to Info for everything
        .filter_module("sqlx", LevelFilter::Warn) // Suppress sqlx Debug logs
        .init();

    println!("dynapi: Dynamic API Definition Engine");

    // Load configuration
    let config = AppConfig::load()?;
    println!(
        "Configuration loaded: server={}:{}",
        config.server.host, config.server.port
    );

    println!("Connecting to PostgreSQL...");
    let database_url = config.database_url()?;
    let postgres_store = PostgresStore::new(&database_url).await?;

    println!("Running database migrations...");
    postgres_store.migrate().await?;
    println!("Definition store ready");

    // Execution-path pool runs with read-only sessions
    let readonly_url = config.readonly_database_url()?;
    let query_source = ReadOnlyPgSource::new(&readonly_url).await?;
    let call_source = ReqwestCaller::new()?;

    let engine = Arc::new(EngineContext::new(
        Arc::new(postgres_store),
        Arc::new(query_source),
        Arc::new(call_source),
        &config.engine,
    ));

    let app = create_router().with_state(engine);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    println!("dynapi server running on http://{}", bind_address);

    serve(listener, app).await?;

    Ok(())
}
