use std::sync::Arc;

use crate::error::EngineError;
use crate::logic::guard::SecurityGuard;
use crate::model::{
    ActorContext, Id, NewRoute, Route, RouteStatusUpdate, Version, VersionDraft,
};
use crate::store::{DefinitionCache, DefinitionStore};

/// Definition-management operations: the engine's only write path.
///
/// Every operation screens incoming logic payloads, delegates the atomic
/// entity-plus-audit write to the store, and invalidates the resolver cache
/// for affected endpoints. Versions are append-only; the explicit rejection
/// methods below are the answer to every update/delete attempt.
pub struct DefinitionOps<S> {
    store: Arc<S>,
    cache: Arc<DefinitionCache>,
    guard: SecurityGuard,
}

impl<S: DefinitionStore> DefinitionOps<S> {
    pub fn new(store: Arc<S>, cache: Arc<DefinitionCache>, guard: SecurityGuard) -> Self {
        Self {
            store,
            cache,
            guard,
        }
    }

    /// Create a route with its initial version (number 1, current). A live
    /// (path, method) collision is a DuplicateError; a soft-deleted one is
    /// revived with the supplied draft appended and activated.
    pub async fn create_route(
        &self,
        mut new_route: NewRoute,
        draft: VersionDraft,
        actor: &ActorContext,
    ) -> Result<(Route, Version), EngineError> {
        new_route.path = normalize_path(&new_route.path);
        if new_route.path.is_empty() {
            return Err(EngineError::Validation {
                violations: vec![crate::error::FieldViolation::new(
                    "path",
                    "path must not be empty",
                )],
            });
        }
        self.guard.screen_logic(&draft.logic)?;

        if let Some(existing) = self
            .store
            .find_route_any(&new_route.path, new_route.method)
            .await?
        {
            if !existing.is_deleted {
                return Err(EngineError::Duplicate {
                    kind: "route",
                    identity: format!("{} [{}]", new_route.path, new_route.method),
                });
            }

            // Revive the soft-deleted row instead of creating a competitor.
            let revived = self
                .store
                .set_route_status(
                    &existing.id,
                    RouteStatusUpdate {
                        is_active: Some(true),
                        is_deleted: Some(false),
                    },
                    actor,
                )
                .await?
                .ok_or_else(|| EngineError::not_found("route", existing.id.clone()))?;
            let version = self
                .store
                .append_version(&revived.id, draft, actor)
                .await?
                .ok_or_else(|| EngineError::not_found("route", revived.id.clone()))?;
            let version = self
                .store
                .activate_version(&revived.id, version.version_no, actor)
                .await?
                .ok_or_else(|| EngineError::not_found("route", revived.id.clone()))?;
            self.cache.invalidate(&revived.path, revived.method).await;
            return Ok((revived, version));
        }

        let route = Route::new(new_route, actor.actor.clone());
        let created = self.store.create_route(route, draft, actor).await?;
        Ok(created)
    }

    /// Append the next version of a route. Never touches the current flag;
    /// serving it requires a separate activation.
    pub async fn create_version(
        &self,
        route_id: &Id,
        draft: VersionDraft,
        actor: &ActorContext,
    ) -> Result<Version, EngineError> {
        self.guard.screen_logic(&draft.logic)?;
        self.store
            .append_version(route_id, draft, actor)
            .await?
            .ok_or_else(|| EngineError::not_found("route", route_id.clone()))
    }

    pub async fn activate_version(
        &self,
        route_id: &Id,
        version_no: i32,
        actor: &ActorContext,
    ) -> Result<Version, EngineError> {
        let route = self
            .store
            .get_route(route_id)
            .await?
            .ok_or_else(|| EngineError::not_found("route", route_id.clone()))?;
        let version = self
            .store
            .activate_version(route_id, version_no, actor)
            .await?
            .ok_or_else(|| {
                EngineError::not_found("version", format!("{} v{}", route.path, version_no))
            })?;
        self.cache.invalidate(&route.path, route.method).await;
        Ok(version)
    }

    /// Roll back by copying the target version's payload into a fresh version
    /// and activating it. History is preserved; nothing is rewritten.
    pub async fn rollback(
        &self,
        route_id: &Id,
        target_no: i32,
        actor: &ActorContext,
    ) -> Result<Version, EngineError> {
        let route = self
            .store
            .get_route(route_id)
            .await?
            .ok_or_else(|| EngineError::not_found("route", route_id.clone()))?;
        let version = self
            .store
            .rollback_to_version(route_id, target_no, actor)
            .await?
            .ok_or_else(|| {
                EngineError::not_found("version", format!("{} v{}", route.path, target_no))
            })?;
        self.cache.invalidate(&route.path, route.method).await;
        Ok(version)
    }

    pub async fn set_route_status(
        &self,
        route_id: &Id,
        update: RouteStatusUpdate,
        actor: &ActorContext,
    ) -> Result<Route, EngineError> {
        if update.is_empty() {
            return Err(EngineError::Validation {
                violations: vec![crate::error::FieldViolation::new(
                    "status",
                    "no status flags supplied",
                )],
            });
        }
        let route = self
            .store
            .set_route_status(route_id, update, actor)
            .await?
            .ok_or_else(|| EngineError::not_found("route", route_id.clone()))?;
        self.cache.invalidate(&route.path, route.method).await;
        Ok(route)
    }

    /// Versions are immutable once persisted. Any update attempt is refused,
    /// unconditionally.
    pub fn update_version(&self, _route_id: &Id, _version_no: i32) -> Result<Version, EngineError> {
        Err(EngineError::ImmutablePolicy {
            action: "update",
            resource: "version",
        })
    }

    /// Versions are never deleted; history is the point.
    pub fn delete_version(&self, _route_id: &Id, _version_no: i32) -> Result<(), EngineError> {
        Err(EngineError::ImmutablePolicy {
            action: "delete",
            resource: "version",
        })
    }

    /// A route's path and method are frozen at creation.
    pub fn update_route_identity(&self, _route_id: &Id) -> Result<Route, EngineError> {
        Err(EngineError::ImmutablePolicy {
            action: "update",
            resource: "route",
        })
    }

    /// Hard deletion is refused; soft delete through `set_route_status`.
    pub fn delete_route(&self, _route_id: &Id) -> Result<(), EngineError> {
        Err(EngineError::ImmutablePolicy {
            action: "delete",
            resource: "route",
        })
    }
}

fn normalize_path(path: &str) -> String {
    path.trim().trim_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::model::{HttpMethod, LogicSpec};
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn ops(store: Arc<MemoryStore>) -> DefinitionOps<MemoryStore> {
        DefinitionOps::new(
            store,
            Arc::new(DefinitionCache::new(Duration::from_secs(60))),
            SecurityGuard::from_config(&EngineConfig::default()),
        )
    }

    fn new_route(path: &str) -> NewRoute {
        NewRoute {
            path: path.to_string(),
            method: HttpMethod::Get,
            name: None,
            description: None,
            tags: None,
            require_auth: false,
            allowed_origins: vec![],
            rate_limit_per_min: 100,
        }
    }

    fn static_draft() -> VersionDraft {
        VersionDraft {
            logic: LogicSpec::StaticResponse {
                body: serde_json::json!({"ok": true}),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn duplicate_route_is_a_conflict() {
        let store = Arc::new(MemoryStore::new());
        let ops = ops(store);
        ops.create_route(new_route("users"), static_draft(), &ActorContext::system())
            .await
            .unwrap();
        let err = ops
            .create_route(new_route("/users/"), static_draft(), &ActorContext::system())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn recreating_deleted_route_revives_it() {
        let store = Arc::new(MemoryStore::new());
        let ops = ops(store.clone());
        let (route, _) = ops
            .create_route(new_route("users"), static_draft(), &ActorContext::system())
            .await
            .unwrap();
        ops.set_route_status(
            &route.id,
            RouteStatusUpdate {
                is_active: None,
                is_deleted: Some(true),
            },
            &ActorContext::system(),
        )
        .await
        .unwrap();

        let (revived, version) = ops
            .create_route(new_route("users"), static_draft(), &ActorContext::system())
            .await
            .unwrap();
        assert_eq!(revived.id, route.id);
        assert!(revived.is_servable());
        assert_eq!(version.version_no, 2);
        assert!(version.is_current);
    }

    #[tokio::test]
    async fn malicious_definition_is_rejected_at_write_time() {
        let store = Arc::new(MemoryStore::new());
        let ops = ops(store.clone());
        let draft = VersionDraft {
            logic: LogicSpec::SingleQuery {
                sql: "SELECT * FROM t; DROP TABLE t;--".to_string(),
            },
            ..Default::default()
        };
        let err = ops
            .create_route(new_route("evil"), draft, &ActorContext::system())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Security { .. }));
        assert!(store
            .find_route_any("evil", HttpMethod::Get)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn every_mutation_path_on_versions_is_refused() {
        let store = Arc::new(MemoryStore::new());
        let ops = ops(store);
        let id = "route-1".to_string();
        assert!(matches!(
            ops.update_version(&id, 1),
            Err(EngineError::ImmutablePolicy { .. })
        ));
        assert!(matches!(
            ops.delete_version(&id, 1),
            Err(EngineError::ImmutablePolicy { .. })
        ));
        assert!(matches!(
            ops.update_route_identity(&id),
            Err(EngineError::ImmutablePolicy { .. })
        ));
        assert!(matches!(
            ops.delete_route(&id),
            Err(EngineError::ImmutablePolicy { .. })
        ));
    }
}
