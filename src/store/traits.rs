use anyhow::Result;

use crate::model::{
    ActorContext, AuditEntry, HttpMethod, Id, Route, RouteStatusUpdate, Version, VersionDraft,
};

/// Persistence contract for routes, versions and the audit trail.
///
/// Reads return already-committed, immutable rows and need no locking. Every
/// mutating operation is transactional and writes its audit entries in the
/// same transaction as the entity change; version numbering and the
/// single-current invariant are enforced here, at the storage boundary.
#[async_trait::async_trait]
pub trait DefinitionStore: Send + Sync {
    async fn get_route(&self, id: &Id) -> Result<Option<Route>>;
    /// Lookup among non-deleted routes only; this is the resolver's path.
    async fn find_route(&self, path: &str, method: HttpMethod) -> Result<Option<Route>>;
    /// Lookup including soft-deleted rows, for duplicate checks and revival.
    async fn find_route_any(&self, path: &str, method: HttpMethod) -> Result<Option<Route>>;
    async fn list_routes(&self, include_inactive: bool) -> Result<Vec<Route>>;

    async fn get_version(&self, route_id: &Id, version_no: i32) -> Result<Option<Version>>;
    async fn current_version(&self, route_id: &Id) -> Result<Option<Version>>;
    /// All versions of a route, newest first.
    async fn list_versions(&self, route_id: &Id) -> Result<Vec<Version>>;

    /// Most recent audit entries, newest first.
    async fn list_audit_entries(&self, limit: usize) -> Result<Vec<AuditEntry>>;

    /// Insert a route together with its version 1 (marked current) and one
    /// CREATE audit entry per created entity, atomically.
    async fn create_route(
        &self,
        route: Route,
        first_version: VersionDraft,
        actor: &ActorContext,
    ) -> Result<(Route, Version)>;

    /// Insert the next version of a route. The gapless version number is
    /// assigned inside the transaction under a route-level lock. The new
    /// version is not current. Returns None when the route does not exist.
    async fn append_version(
        &self,
        route_id: &Id,
        draft: VersionDraft,
        actor: &ActorContext,
    ) -> Result<Option<Version>>;

    /// Atomically make `version_no` the route's current version, clearing the
    /// previous current flag in the same statement, and record SET_CURRENT.
    /// Returns None when the version does not belong to the route.
    async fn activate_version(
        &self,
        route_id: &Id,
        version_no: i32,
        actor: &ActorContext,
    ) -> Result<Option<Version>>;

    /// Copy the target version's payload into a fresh version, activate it
    /// and record ROLLBACK, all in one transaction. Returns None when the
    /// target version does not exist.
    async fn rollback_to_version(
        &self,
        route_id: &Id,
        target_no: i32,
        actor: &ActorContext,
    ) -> Result<Option<Version>>;

    /// Toggle active/deleted flags; the only permitted route mutation.
    async fn set_route_status(
        &self,
        route_id: &Id,
        update: RouteStatusUpdate,
        actor: &ActorContext,
    ) -> Result<Option<Route>>;
}
