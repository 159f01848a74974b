pub mod execute;
pub mod guard;
pub mod refs;
pub mod resolve;
pub mod respond;
pub mod route_ops;
pub mod validate;

pub use execute::{Execution, LogicExecutor};
pub use guard::{is_sensitive_field, redact_sensitive, SecurityGuard};
pub use resolve::RouteResolver;
pub use respond::map_response;
pub use route_ops::DefinitionOps;
pub use validate::RequestValidator;

use std::sync::Arc;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::HttpMethod;
use crate::source::{CallSource, QuerySource};
use crate::store::{DefinitionCache, DefinitionStore};

/// The wired-up engine: resolver → validator → executor → mapper on the read
/// path, definition operations on the write path. One instance is shared by
/// all request tasks; everything inside is read-mostly.
pub struct EngineContext<S> {
    pub resolver: RouteResolver<S>,
    pub validator: RequestValidator,
    pub executor: LogicExecutor,
    pub ops: DefinitionOps<S>,
    pub store: Arc<S>,
}

impl<S: DefinitionStore> EngineContext<S> {
    pub fn new(
        store: Arc<S>,
        query_source: Arc<dyn QuerySource>,
        call_source: Arc<dyn CallSource>,
        config: &EngineConfig,
    ) -> Self {
        let cache = Arc::new(DefinitionCache::new(Duration::from_secs(
            config.cache_ttl_secs,
        )));
        let guard = SecurityGuard::from_config(config);
        Self {
            resolver: RouteResolver::new(store.clone(), cache.clone()),
            validator: RequestValidator::new(config.strict_params),
            executor: LogicExecutor::new(query_source, call_source, guard.clone()),
            ops: DefinitionOps::new(store.clone(), cache, guard),
            store,
        }
    }

    /// The one operation invoked on every end-user request: resolve the
    /// definition, validate parameters, execute the logic, map the response.
    /// `pinned_version` serves a specific version instead of the current one.
    pub async fn dispatch(
        &self,
        path: &str,
        method: HttpMethod,
        raw_params: serde_json::Map<String, serde_json::Value>,
        pinned_version: Option<i32>,
    ) -> Result<(u16, serde_json::Value), EngineError> {
        let definition = match pinned_version {
            Some(version_no) => self.resolver.resolve_pinned(path, method, version_no).await?,
            None => self.resolver.resolve(path, method).await?,
        };

        let params = self
            .validator
            .validate(&definition.version.request_spec, &raw_params)?;

        let execution = self
            .executor
            .execute(
                &definition.version.logic,
                &definition.version.logic_config,
                &params,
            )
            .await?;

        Ok(map_response(&execution, &definition.version, &params))
    }
}
