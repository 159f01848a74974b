use std::collections::HashMap;

use anyhow::Result;
use parking_lot::Mutex;

use crate::model::{
    now_rfc3339, ActorContext, AuditAction, AuditEntry, AuditTarget, HttpMethod, Id, Route,
    RouteStatusUpdate, Version, VersionDraft,
};
use crate::store::traits::DefinitionStore;

#[derive(Default)]
struct Inner {
    routes: HashMap<Id, Route>,
    /// route id → versions ordered by version_no ascending
    versions: HashMap<Id, Vec<Version>>,
    audit: Vec<AuditEntry>,
}

/// In-memory `DefinitionStore` with the same transactional semantics as the
/// Postgres store: one mutex guards all state, so every write (entity plus
/// audit rows) is atomic and concurrent activations serialize.
///
/// Used by the test suite and for running without Postgres.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn audit_snapshot<T: serde::Serialize>(value: &T) -> Option<serde_json::Value> {
    serde_json::to_value(value).ok()
}

#[async_trait::async_trait]
impl DefinitionStore for MemoryStore {
    async fn get_route(&self, id: &Id) -> Result<Option<Route>> {
        Ok(self.inner.lock().routes.get(id).cloned())
    }

    async fn find_route(&self, path: &str, method: HttpMethod) -> Result<Option<Route>> {
        Ok(self
            .inner
            .lock()
            .routes
            .values()
            .find(|r| r.path == path && r.method == method && !r.is_deleted)
            .cloned())
    }

    async fn find_route_any(&self, path: &str, method: HttpMethod) -> Result<Option<Route>> {
        Ok(self
            .inner
            .lock()
            .routes
            .values()
            .find(|r| r.path == path && r.method == method)
            .cloned())
    }

    async fn list_routes(&self, include_inactive: bool) -> Result<Vec<Route>> {
        let inner = self.inner.lock();
        let mut routes: Vec<Route> = inner
            .routes
            .values()
            .filter(|r| !r.is_deleted && (include_inactive || r.is_active))
            .cloned()
            .collect();
        routes.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(routes)
    }

    async fn get_version(&self, route_id: &Id, version_no: i32) -> Result<Option<Version>> {
        Ok(self
            .inner
            .lock()
            .versions
            .get(route_id)
            .and_then(|vs| vs.iter().find(|v| v.version_no == version_no))
            .cloned())
    }

    async fn current_version(&self, route_id: &Id) -> Result<Option<Version>> {
        Ok(self
            .inner
            .lock()
            .versions
            .get(route_id)
            .and_then(|vs| vs.iter().find(|v| v.is_current))
            .cloned())
    }

    async fn list_versions(&self, route_id: &Id) -> Result<Vec<Version>> {
        let mut versions = self
            .inner
            .lock()
            .versions
            .get(route_id)
            .cloned()
            .unwrap_or_default();
        versions.sort_by(|a, b| b.version_no.cmp(&a.version_no));
        Ok(versions)
    }

    async fn list_audit_entries(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let inner = self.inner.lock();
        Ok(inner.audit.iter().rev().take(limit).cloned().collect())
    }

    async fn create_route(
        &self,
        route: Route,
        first_version: VersionDraft,
        actor: &ActorContext,
    ) -> Result<(Route, Version)> {
        let mut inner = self.inner.lock();
        anyhow::ensure!(
            !inner.routes.contains_key(&route.id),
            "route id collision: {}",
            route.id
        );

        let version = Version::from_draft(
            route.id.clone(),
            1,
            true,
            first_version,
            actor.actor.clone(),
        );

        inner.audit.push(AuditEntry::new(
            AuditTarget::Route,
            route.id.clone(),
            AuditAction::Create,
            None,
            audit_snapshot(&route),
            format!("route created: {} [{}]", route.path, route.method),
            actor,
        ));
        inner.audit.push(AuditEntry::new(
            AuditTarget::Version,
            version.id.clone(),
            AuditAction::Create,
            None,
            audit_snapshot(&version),
            format!("version created: {} v1", route.path),
            actor,
        ));

        inner
            .versions
            .insert(route.id.clone(), vec![version.clone()]);
        inner.routes.insert(route.id.clone(), route.clone());
        Ok((route, version))
    }

    async fn append_version(
        &self,
        route_id: &Id,
        draft: VersionDraft,
        actor: &ActorContext,
    ) -> Result<Option<Version>> {
        let mut inner = self.inner.lock();
        let Some(route) = inner.routes.get(route_id).cloned() else {
            return Ok(None);
        };

        let versions = inner.versions.entry(route_id.clone()).or_default();
        let next_no = versions.iter().map(|v| v.version_no).max().unwrap_or(0) + 1;
        let version = Version::from_draft(
            route_id.clone(),
            next_no,
            false,
            draft,
            actor.actor.clone(),
        );
        versions.push(version.clone());

        inner.audit.push(AuditEntry::new(
            AuditTarget::Version,
            version.id.clone(),
            AuditAction::Create,
            None,
            audit_snapshot(&version),
            format!("version created: {} v{}", route.path, next_no),
            actor,
        ));
        Ok(Some(version))
    }

    async fn activate_version(
        &self,
        route_id: &Id,
        version_no: i32,
        actor: &ActorContext,
    ) -> Result<Option<Version>> {
        let mut inner = self.inner.lock();
        let Some(versions) = inner.versions.get_mut(route_id) else {
            return Ok(None);
        };
        let Some(target_index) = versions.iter().position(|v| v.version_no == version_no) else {
            return Ok(None);
        };

        let old_current = versions.iter().find(|v| v.is_current).cloned();
        for v in versions.iter_mut() {
            v.is_current = v.version_no == version_no;
        }
        let new_current = versions[target_index].clone();

        inner.audit.push(AuditEntry::new(
            AuditTarget::Version,
            new_current.id.clone(),
            AuditAction::SetCurrent,
            old_current.as_ref().and_then(|v| {
                audit_snapshot(&serde_json::json!({"version_id": v.id, "version_no": v.version_no}))
            }),
            audit_snapshot(&serde_json::json!({
                "version_id": new_current.id,
                "version_no": new_current.version_no
            })),
            format!(
                "current version changed: v{} -> v{}",
                old_current.map(|v| v.version_no).unwrap_or(0),
                version_no
            ),
            actor,
        ));
        Ok(Some(new_current))
    }

    async fn rollback_to_version(
        &self,
        route_id: &Id,
        target_no: i32,
        actor: &ActorContext,
    ) -> Result<Option<Version>> {
        let mut inner = self.inner.lock();
        let Some(route) = inner.routes.get(route_id).cloned() else {
            return Ok(None);
        };
        let Some(versions) = inner.versions.get_mut(route_id) else {
            return Ok(None);
        };
        let Some(target) = versions.iter().find(|v| v.version_no == target_no).cloned() else {
            return Ok(None);
        };

        let old_current_no = versions
            .iter()
            .find(|v| v.is_current)
            .map(|v| v.version_no);
        let next_no = versions.iter().map(|v| v.version_no).max().unwrap_or(0) + 1;

        let mut draft = target.to_draft();
        draft.change_note = Some(format!(
            "rollback to v{} (previously current: v{})",
            target_no,
            old_current_no.unwrap_or(0)
        ));
        let mut version =
            Version::from_draft(route_id.clone(), next_no, false, draft, actor.actor.clone());
        for v in versions.iter_mut() {
            v.is_current = false;
        }
        version.is_current = true;
        versions.push(version.clone());

        inner.audit.push(AuditEntry::new(
            AuditTarget::Version,
            version.id.clone(),
            AuditAction::Create,
            None,
            audit_snapshot(&version),
            format!("version created: {} v{}", route.path, next_no),
            actor,
        ));
        inner.audit.push(AuditEntry::new(
            AuditTarget::Version,
            version.id.clone(),
            AuditAction::Rollback,
            audit_snapshot(&serde_json::json!({"from_version": old_current_no})),
            audit_snapshot(
                &serde_json::json!({"to_version": target_no, "new_version": next_no}),
            ),
            format!("rolled back to v{} as v{}", target_no, next_no),
            actor,
        ));
        Ok(Some(version))
    }

    async fn set_route_status(
        &self,
        route_id: &Id,
        update: RouteStatusUpdate,
        actor: &ActorContext,
    ) -> Result<Option<Route>> {
        let mut inner = self.inner.lock();
        let Some(route) = inner.routes.get_mut(route_id) else {
            return Ok(None);
        };

        let old = route.clone();
        if let Some(active) = update.is_active {
            route.is_active = active;
        }
        if let Some(deleted) = update.is_deleted {
            route.is_deleted = deleted;
            route.deleted_at = if deleted { Some(now_rfc3339()) } else { None };
            if deleted {
                route.is_active = false;
            }
        }
        route.updated_at = now_rfc3339();
        route.updated_by = actor.actor.clone();
        let updated = route.clone();

        let action = if updated.is_servable() {
            AuditAction::Activate
        } else {
            AuditAction::Deactivate
        };
        inner.audit.push(AuditEntry::new(
            AuditTarget::Route,
            updated.id.clone(),
            action,
            audit_snapshot(&old),
            audit_snapshot(&updated),
            format!(
                "route status changed: {} [{}] active={} deleted={}",
                updated.path, updated.method, updated.is_active, updated.is_deleted
            ),
            actor,
        ));
        Ok(Some(updated))
    }
}
