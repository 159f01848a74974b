pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod source;
pub mod store;

// Export API types
pub use api::create_router;
pub use api::AppState;

// Export engine types
pub use error::{EngineError, FieldViolation};
pub use logic::{
    DefinitionOps, EngineContext, Execution, LogicExecutor, RequestValidator, RouteResolver,
    SecurityGuard,
};

// Export all model types
pub use model::*;

// Export store and source types
pub use source::{CallSource, QuerySource, ReadOnlyPgSource, ReqwestCaller};
pub use store::{DefinitionStore, MemoryStore, PostgresStore};

use std::sync::Arc;

// Function for integration testing
pub async fn run_server() -> anyhow::Result<()> {
    use axum::serve;
    use tokio::net::TcpListener;

    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging with INFO level only (suppress DEBUG logs)
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    // Load configuration
    let config = crate::config::AppConfig::load()?;

    // Connect to PostgreSQL: one store pool for definitions, one read-only
    // pool for executing stored queries
    let database_url = config.database_url()?;
    let postgres_store = crate::store::PostgresStore::new(&database_url).await?;
    postgres_store.migrate().await?;

    let readonly_url = config.readonly_database_url()?;
    let query_source = crate::source::ReadOnlyPgSource::new(&readonly_url).await?;
    let call_source = crate::source::ReqwestCaller::new()?;

    let engine = Arc::new(crate::logic::EngineContext::new(
        Arc::new(postgres_store),
        Arc::new(query_source),
        Arc::new(call_source),
        &config.engine,
    ));

    // Create router with state
    let app = crate::api::create_router().with_state(engine);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;

    serve(listener, app).await?;

    Ok(())
}
