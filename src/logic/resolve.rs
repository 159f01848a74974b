use std::sync::Arc;

use crate::error::EngineError;
use crate::model::HttpMethod;
use crate::store::{DefinitionCache, DefinitionStore, ResolvedDefinition};

/// Hot-path lookup: (path, method) → active route → current version.
///
/// Cache-fronted so the per-request cost is one map read when warm; misses
/// fall through to the store and populate the cache. A route that exists but
/// is inactive or deleted resolves exactly like a missing one.
pub struct RouteResolver<S> {
    store: Arc<S>,
    cache: Arc<DefinitionCache>,
}

impl<S: DefinitionStore> RouteResolver<S> {
    pub fn new(store: Arc<S>, cache: Arc<DefinitionCache>) -> Self {
        Self { store, cache }
    }

    pub async fn resolve(
        &self,
        path: &str,
        method: HttpMethod,
    ) -> Result<ResolvedDefinition, EngineError> {
        if let Some(definition) = self.cache.get(path, method).await {
            return Ok(definition);
        }

        let definition = self.resolve_uncached(path, method).await?;
        self.cache.put(definition.clone()).await;
        Ok(definition)
    }

    /// Resolve a pinned version number, bypassing the cache. Pinned lookups
    /// never affect which version is current.
    pub async fn resolve_pinned(
        &self,
        path: &str,
        method: HttpMethod,
        version_no: i32,
    ) -> Result<ResolvedDefinition, EngineError> {
        let route = self.lookup_route(path, method).await?;
        let version = self
            .store
            .get_version(&route.id, version_no)
            .await?
            .ok_or_else(|| {
                EngineError::not_found("version", format!("{} v{}", route.path, version_no))
            })?;
        Ok(ResolvedDefinition { route, version })
    }

    async fn resolve_uncached(
        &self,
        path: &str,
        method: HttpMethod,
    ) -> Result<ResolvedDefinition, EngineError> {
        let route = self.lookup_route(path, method).await?;

        // The one-current invariant makes this lookup infallible in healthy
        // data; check anyway and refuse to serve if it is violated.
        let version = self.store.current_version(&route.id).await?.ok_or_else(|| {
            log::error!(
                "data integrity fault: route {} ({} [{}]) has no current version",
                route.id,
                route.path,
                route.method
            );
            EngineError::not_found("version", format!("current version of {}", route.path))
        })?;

        Ok(ResolvedDefinition { route, version })
    }

    async fn lookup_route(
        &self,
        path: &str,
        method: HttpMethod,
    ) -> Result<crate::model::Route, EngineError> {
        let identity = format!("{} /api/{}", method, path);
        let route = self
            .store
            .find_route(path, method)
            .await?
            .ok_or_else(|| EngineError::not_found("route", identity.clone()))?;

        if !route.is_servable() {
            return Err(EngineError::not_found("route", identity));
        }
        Ok(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ActorContext, LogicSpec, NewRoute, RouteStatusUpdate, VersionDraft,
    };
    use crate::store::MemoryStore;
    use std::time::Duration;

    async fn store_with_route() -> (Arc<MemoryStore>, String) {
        let store = Arc::new(MemoryStore::new());
        let (route, _) = store
            .create_route(
                crate::model::Route::new(
                    NewRoute {
                        path: "user-info".to_string(),
                        method: HttpMethod::Get,
                        name: None,
                        description: None,
                        tags: None,
                        require_auth: false,
                        allowed_origins: vec![],
                        rate_limit_per_min: 100,
                    },
                    None,
                ),
                VersionDraft {
                    logic: LogicSpec::StaticResponse {
                        body: serde_json::json!({"ok": true}),
                    },
                    ..Default::default()
                },
                &ActorContext::system(),
            )
            .await
            .unwrap();
        (store, route.id)
    }

    #[tokio::test]
    async fn cold_then_warm_resolution() {
        let (store, _) = store_with_route().await;
        let cache = Arc::new(DefinitionCache::new(Duration::from_secs(60)));
        let resolver = RouteResolver::new(store, cache.clone());

        let cold = resolver.resolve("user-info", HttpMethod::Get).await.unwrap();
        assert_eq!(cold.version.version_no, 1);
        // warm path serves from cache
        assert!(cache.get("user-info", HttpMethod::Get).await.is_some());
        let warm = resolver.resolve("user-info", HttpMethod::Get).await.unwrap();
        assert_eq!(warm, cold);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let (store, _) = store_with_route().await;
        let resolver = RouteResolver::new(
            store,
            Arc::new(DefinitionCache::new(Duration::from_secs(60))),
        );
        let err = resolver.resolve("missing", HttpMethod::Get).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { kind: "route", .. }));
    }

    #[tokio::test]
    async fn deactivated_route_resolves_like_missing() {
        let (store, route_id) = store_with_route().await;
        store
            .set_route_status(
                &route_id,
                RouteStatusUpdate {
                    is_active: Some(false),
                    is_deleted: None,
                },
                &ActorContext::system(),
            )
            .await
            .unwrap();
        let resolver = RouteResolver::new(
            store,
            Arc::new(DefinitionCache::new(Duration::from_secs(60))),
        );
        let err = resolver
            .resolve("user-info", HttpMethod::Get)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }
}
