use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Row, Transaction};

use crate::model::now_rfc3339;
use crate::model::{
    ActorContext, AuditAction, AuditEntry, AuditTarget, HttpMethod, Id, Route, RouteStatusUpdate,
    Version, VersionDraft,
};
use crate::store::traits::DefinitionStore;

/// Definition store backed by PostgreSQL.
///
/// All mutating operations run in a transaction that also writes the audit
/// rows; the single-current invariant is additionally enforced by a partial
/// unique index so no code path can commit two current versions.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

const SCHEMA_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS api_routes (
    id TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    method TEXT NOT NULL,
    name TEXT,
    description TEXT,
    tags TEXT,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
    require_auth BOOLEAN NOT NULL DEFAULT FALSE,
    allowed_origins JSONB NOT NULL DEFAULT '[]'::jsonb,
    rate_limit_per_min INTEGER NOT NULL DEFAULT 100,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT,
    created_by TEXT,
    updated_by TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_api_routes_path_method
    ON api_routes (path, method) WHERE NOT is_deleted;

CREATE TABLE IF NOT EXISTS api_versions (
    id TEXT PRIMARY KEY,
    route_id TEXT NOT NULL REFERENCES api_routes (id) ON DELETE RESTRICT,
    version_no INTEGER NOT NULL,
    is_current BOOLEAN NOT NULL DEFAULT FALSE,
    request_spec JSONB NOT NULL DEFAULT '{}'::jsonb,
    logic JSONB NOT NULL,
    logic_config JSONB NOT NULL DEFAULT '{}'::jsonb,
    response_spec JSONB,
    status_codes JSONB,
    sample_params JSONB,
    change_note TEXT,
    created_at TEXT NOT NULL,
    created_by TEXT,
    UNIQUE (route_id, version_no)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_api_versions_current
    ON api_versions (route_id) WHERE is_current;

CREATE TABLE IF NOT EXISTS api_audit_log (
    id TEXT PRIMARY KEY,
    target_type TEXT NOT NULL,
    target_id TEXT NOT NULL,
    action TEXT NOT NULL,
    old_value JSONB,
    new_value JSONB,
    description TEXT,
    actor TEXT,
    actor_ip TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_api_audit_target
    ON api_audit_log (target_type, target_id);
"#;

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Create the schema if it does not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA_DDL.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to run schema migration")?;
        }
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn route_from_row(row: &sqlx::postgres::PgRow) -> Result<Route> {
    let method: String = row.get("method");
    let origins: serde_json::Value = row.get("allowed_origins");
    Ok(Route {
        id: row.get("id"),
        path: row.get("path"),
        method: HttpMethod::parse(&method)
            .with_context(|| format!("unknown HTTP method in store: {}", method))?,
        name: row.get("name"),
        description: row.get("description"),
        tags: row.get("tags"),
        is_active: row.get("is_active"),
        is_deleted: row.get("is_deleted"),
        require_auth: row.get("require_auth"),
        allowed_origins: serde_json::from_value(origins)
            .context("Failed to decode allowed_origins")?,
        rate_limit_per_min: row.get::<i32, _>("rate_limit_per_min") as u32,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        deleted_at: row.get("deleted_at"),
        created_by: row.get("created_by"),
        updated_by: row.get("updated_by"),
    })
}

fn version_from_row(row: &sqlx::postgres::PgRow) -> Result<Version> {
    let request_spec: serde_json::Value = row.get("request_spec");
    let logic: serde_json::Value = row.get("logic");
    let logic_config: serde_json::Value = row.get("logic_config");
    let response_spec: Option<serde_json::Value> = row.get("response_spec");
    let status_codes: Option<serde_json::Value> = row.get("status_codes");
    Ok(Version {
        id: row.get("id"),
        route_id: row.get("route_id"),
        version_no: row.get("version_no"),
        is_current: row.get("is_current"),
        request_spec: serde_json::from_value(request_spec)
            .context("Failed to decode request_spec")?,
        logic: serde_json::from_value(logic).context("Failed to decode logic payload")?,
        logic_config: serde_json::from_value(logic_config)
            .context("Failed to decode logic_config")?,
        response_spec: response_spec
            .map(serde_json::from_value)
            .transpose()
            .context("Failed to decode response_spec")?,
        status_codes: status_codes
            .map(serde_json::from_value)
            .transpose()
            .context("Failed to decode status_codes")?,
        sample_params: row.get("sample_params"),
        change_note: row.get("change_note"),
        created_at: row.get("created_at"),
        created_by: row.get("created_by"),
    })
}

fn audit_from_row(row: &sqlx::postgres::PgRow) -> Result<AuditEntry> {
    let target: String = row.get("target_type");
    let action: String = row.get("action");
    Ok(AuditEntry {
        id: row.get("id"),
        target: serde_json::from_value(serde_json::Value::String(target))
            .context("Failed to decode audit target")?,
        target_id: row.get("target_id"),
        action: serde_json::from_value(serde_json::Value::String(action))
            .context("Failed to decode audit action")?,
        old_value: row.get("old_value"),
        new_value: row.get("new_value"),
        description: row.get("description"),
        actor: row.get("actor"),
        actor_ip: row.get("actor_ip"),
        created_at: row.get("created_at"),
    })
}

const VERSION_COLUMNS: &str = "id, route_id, version_no, is_current, request_spec, logic, \
     logic_config, response_spec, status_codes, sample_params, change_note, created_at, created_by";

const ROUTE_COLUMNS: &str = "id, path, method, name, description, tags, is_active, is_deleted, \
     require_auth, allowed_origins, rate_limit_per_min, created_at, updated_at, deleted_at, \
     created_by, updated_by";

async fn insert_version_tx(tx: &mut Transaction<'_, Postgres>, version: &Version) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO api_versions
            (id, route_id, version_no, is_current, request_spec, logic, logic_config,
             response_spec, status_codes, sample_params, change_note, created_at, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(&version.id)
    .bind(&version.route_id)
    .bind(version.version_no)
    .bind(version.is_current)
    .bind(serde_json::to_value(&version.request_spec)?)
    .bind(serde_json::to_value(&version.logic)?)
    .bind(serde_json::to_value(&version.logic_config)?)
    .bind(
        version
            .response_spec
            .as_ref()
            .map(|s| serde_json::Value::Object(s.clone())),
    )
    .bind(
        version
            .status_codes
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?,
    )
    .bind(&version.sample_params)
    .bind(&version.change_note)
    .bind(&version.created_at)
    .bind(&version.created_by)
    .execute(&mut **tx)
    .await
    .context("Failed to insert version")?;
    Ok(())
}

async fn insert_audit_tx(tx: &mut Transaction<'_, Postgres>, entry: &AuditEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO api_audit_log
            (id, target_type, target_id, action, old_value, new_value,
             description, actor, actor_ip, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(&entry.id)
    .bind(entry.target.as_str())
    .bind(&entry.target_id)
    .bind(entry.action.as_str())
    .bind(&entry.old_value)
    .bind(&entry.new_value)
    .bind(&entry.description)
    .bind(&entry.actor)
    .bind(&entry.actor_ip)
    .bind(&entry.created_at)
    .execute(&mut **tx)
    .await
    .context("Failed to insert audit entry")?;
    Ok(())
}

/// Take a route-level lock so version numbering and activation serialize per
/// route. Returns false when the route does not exist.
async fn lock_route_tx(tx: &mut Transaction<'_, Postgres>, route_id: &Id) -> Result<bool> {
    let row = sqlx::query("SELECT id FROM api_routes WHERE id = $1 FOR UPDATE")
        .bind(route_id)
        .fetch_optional(&mut **tx)
        .await
        .context("Failed to lock route row")?;
    Ok(row.is_some())
}

async fn next_version_no_tx(tx: &mut Transaction<'_, Postgres>, route_id: &Id) -> Result<i32> {
    let row = sqlx::query(
        "SELECT COALESCE(MAX(version_no), 0) AS max_no FROM api_versions WHERE route_id = $1",
    )
    .bind(route_id)
    .fetch_one(&mut **tx)
    .await
    .context("Failed to compute next version number")?;
    Ok(row.get::<i32, _>("max_no") + 1)
}

/// Flip the current flag in one statement: the target becomes current and
/// every other version of the route stops being current atomically.
async fn flip_current_tx(
    tx: &mut Transaction<'_, Postgres>,
    route_id: &Id,
    version_no: i32,
) -> Result<()> {
    sqlx::query("UPDATE api_versions SET is_current = (version_no = $2) WHERE route_id = $1")
        .bind(route_id)
        .bind(version_no)
        .execute(&mut **tx)
        .await
        .context("Failed to flip current version flag")?;
    Ok(())
}

fn audit_snapshot<T: serde::Serialize>(value: &T) -> Option<serde_json::Value> {
    serde_json::to_value(value).ok()
}

#[async_trait::async_trait]
impl DefinitionStore for PostgresStore {
    async fn get_route(&self, id: &Id) -> Result<Option<Route>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM api_routes WHERE id = $1",
            ROUTE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch route")?;
        row.as_ref().map(route_from_row).transpose()
    }

    async fn find_route(&self, path: &str, method: HttpMethod) -> Result<Option<Route>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM api_routes WHERE path = $1 AND method = $2 AND NOT is_deleted",
            ROUTE_COLUMNS
        ))
        .bind(path)
        .bind(method.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch route by path and method")?;
        row.as_ref().map(route_from_row).transpose()
    }

    async fn find_route_any(&self, path: &str, method: HttpMethod) -> Result<Option<Route>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM api_routes WHERE path = $1 AND method = $2",
            ROUTE_COLUMNS
        ))
        .bind(path)
        .bind(method.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch route by path and method")?;
        row.as_ref().map(route_from_row).transpose()
    }

    async fn list_routes(&self, include_inactive: bool) -> Result<Vec<Route>> {
        let sql = if include_inactive {
            format!(
                "SELECT {} FROM api_routes WHERE NOT is_deleted ORDER BY created_at",
                ROUTE_COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM api_routes WHERE is_active AND NOT is_deleted ORDER BY created_at",
                ROUTE_COLUMNS
            )
        };
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list routes")?;
        rows.iter().map(route_from_row).collect()
    }

    async fn get_version(&self, route_id: &Id, version_no: i32) -> Result<Option<Version>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM api_versions WHERE route_id = $1 AND version_no = $2",
            VERSION_COLUMNS
        ))
        .bind(route_id)
        .bind(version_no)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch version")?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn current_version(&self, route_id: &Id) -> Result<Option<Version>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM api_versions WHERE route_id = $1 AND is_current",
            VERSION_COLUMNS
        ))
        .bind(route_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch current version")?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn list_versions(&self, route_id: &Id) -> Result<Vec<Version>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM api_versions WHERE route_id = $1 ORDER BY version_no DESC",
            VERSION_COLUMNS
        ))
        .bind(route_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list versions")?;
        rows.iter().map(version_from_row).collect()
    }

    async fn list_audit_entries(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT id, target_type, target_id, action, old_value, new_value, description, \
             actor, actor_ip, created_at FROM api_audit_log ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list audit entries")?;
        rows.iter().map(audit_from_row).collect()
    }

    async fn create_route(
        &self,
        route: Route,
        first_version: VersionDraft,
        actor: &ActorContext,
    ) -> Result<(Route, Version)> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        sqlx::query(
            r#"
            INSERT INTO api_routes
                (id, path, method, name, description, tags, is_active, is_deleted,
                 require_auth, allowed_origins, rate_limit_per_min, created_at, updated_at,
                 deleted_at, created_by, updated_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(&route.id)
        .bind(&route.path)
        .bind(route.method.as_str())
        .bind(&route.name)
        .bind(&route.description)
        .bind(&route.tags)
        .bind(route.is_active)
        .bind(route.is_deleted)
        .bind(route.require_auth)
        .bind(serde_json::to_value(&route.allowed_origins)?)
        .bind(route.rate_limit_per_min as i32)
        .bind(&route.created_at)
        .bind(&route.updated_at)
        .bind(&route.deleted_at)
        .bind(&route.created_by)
        .bind(&route.updated_by)
        .execute(&mut *tx)
        .await
        .context("Failed to insert route")?;

        let version = Version::from_draft(
            route.id.clone(),
            1,
            true,
            first_version,
            actor.actor.clone(),
        );
        insert_version_tx(&mut tx, &version).await?;

        insert_audit_tx(
            &mut tx,
            &AuditEntry::new(
                AuditTarget::Route,
                route.id.clone(),
                AuditAction::Create,
                None,
                audit_snapshot(&route),
                format!("route created: {} [{}]", route.path, route.method),
                actor,
            ),
        )
        .await?;
        insert_audit_tx(
            &mut tx,
            &AuditEntry::new(
                AuditTarget::Version,
                version.id.clone(),
                AuditAction::Create,
                None,
                audit_snapshot(&version),
                format!("version created: {} v1", route.path),
                actor,
            ),
        )
        .await?;

        tx.commit()
            .await
            .context("Failed to commit route creation")?;
        Ok((route, version))
    }

    async fn append_version(
        &self,
        route_id: &Id,
        draft: VersionDraft,
        actor: &ActorContext,
    ) -> Result<Option<Version>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        if !lock_route_tx(&mut tx, route_id).await? {
            return Ok(None);
        }

        let next_no = next_version_no_tx(&mut tx, route_id).await?;
        let version =
            Version::from_draft(route_id.clone(), next_no, false, draft, actor.actor.clone());
        insert_version_tx(&mut tx, &version).await?;

        insert_audit_tx(
            &mut tx,
            &AuditEntry::new(
                AuditTarget::Version,
                version.id.clone(),
                AuditAction::Create,
                None,
                audit_snapshot(&version),
                format!("version created: v{}", next_no),
                actor,
            ),
        )
        .await?;

        tx.commit()
            .await
            .context("Failed to commit version creation")?;
        Ok(Some(version))
    }

    async fn activate_version(
        &self,
        route_id: &Id,
        version_no: i32,
        actor: &ActorContext,
    ) -> Result<Option<Version>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        if !lock_route_tx(&mut tx, route_id).await? {
            return Ok(None);
        }

        let target = sqlx::query(&format!(
            "SELECT {} FROM api_versions WHERE route_id = $1 AND version_no = $2",
            VERSION_COLUMNS
        ))
        .bind(route_id)
        .bind(version_no)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to fetch target version")?;
        let Some(target) = target else {
            return Ok(None);
        };
        let mut target = version_from_row(&target)?;

        let old_current = sqlx::query(
            "SELECT id, version_no FROM api_versions WHERE route_id = $1 AND is_current",
        )
        .bind(route_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to fetch previous current version")?;
        let old_current =
            old_current.map(|row| (row.get::<String, _>("id"), row.get::<i32, _>("version_no")));

        flip_current_tx(&mut tx, route_id, version_no).await?;
        target.is_current = true;

        insert_audit_tx(
            &mut tx,
            &AuditEntry::new(
                AuditTarget::Version,
                target.id.clone(),
                AuditAction::SetCurrent,
                old_current
                    .as_ref()
                    .map(|(id, no)| serde_json::json!({"version_id": id, "version_no": no})),
                Some(serde_json::json!({
                    "version_id": target.id,
                    "version_no": target.version_no
                })),
                format!(
                    "current version changed: v{} -> v{}",
                    old_current.as_ref().map(|(_, no)| *no).unwrap_or(0),
                    version_no
                ),
                actor,
            ),
        )
        .await?;

        tx.commit().await.context("Failed to commit activation")?;
        Ok(Some(target))
    }

    async fn rollback_to_version(
        &self,
        route_id: &Id,
        target_no: i32,
        actor: &ActorContext,
    ) -> Result<Option<Version>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        if !lock_route_tx(&mut tx, route_id).await? {
            return Ok(None);
        }

        let target = sqlx::query(&format!(
            "SELECT {} FROM api_versions WHERE route_id = $1 AND version_no = $2",
            VERSION_COLUMNS
        ))
        .bind(route_id)
        .bind(target_no)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to fetch rollback target")?;
        let Some(target) = target else {
            return Ok(None);
        };
        let target = version_from_row(&target)?;

        let old_current_no =
            sqlx::query("SELECT version_no FROM api_versions WHERE route_id = $1 AND is_current")
                .bind(route_id)
                .fetch_optional(&mut *tx)
                .await
                .context("Failed to fetch previous current version")?
                .map(|row| row.get::<i32, _>("version_no"));

        let next_no = next_version_no_tx(&mut tx, route_id).await?;
        let mut draft = target.to_draft();
        draft.change_note = Some(format!(
            "rollback to v{} (previously current: v{})",
            target_no,
            old_current_no.unwrap_or(0)
        ));
        let mut version =
            Version::from_draft(route_id.clone(), next_no, false, draft, actor.actor.clone());
        insert_version_tx(&mut tx, &version).await?;
        flip_current_tx(&mut tx, route_id, next_no).await?;
        version.is_current = true;

        insert_audit_tx(
            &mut tx,
            &AuditEntry::new(
                AuditTarget::Version,
                version.id.clone(),
                AuditAction::Create,
                None,
                audit_snapshot(&version),
                format!("version created: v{}", next_no),
                actor,
            ),
        )
        .await?;
        insert_audit_tx(
            &mut tx,
            &AuditEntry::new(
                AuditTarget::Version,
                version.id.clone(),
                AuditAction::Rollback,
                Some(serde_json::json!({"from_version": old_current_no})),
                Some(serde_json::json!({"to_version": target_no, "new_version": next_no})),
                format!("rolled back to v{} as v{}", target_no, next_no),
                actor,
            ),
        )
        .await?;

        tx.commit().await.context("Failed to commit rollback")?;
        Ok(Some(version))
    }

    async fn set_route_status(
        &self,
        route_id: &Id,
        update: RouteStatusUpdate,
        actor: &ActorContext,
    ) -> Result<Option<Route>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM api_routes WHERE id = $1 FOR UPDATE",
            ROUTE_COLUMNS
        ))
        .bind(route_id)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to lock route row")?;
        let Some(row) = row else {
            return Ok(None);
        };
        let old = route_from_row(&row)?;

        let mut updated = old.clone();
        if let Some(active) = update.is_active {
            updated.is_active = active;
        }
        if let Some(deleted) = update.is_deleted {
            updated.is_deleted = deleted;
            updated.deleted_at = if deleted { Some(now_rfc3339()) } else { None };
            if deleted {
                updated.is_active = false;
            }
        }
        updated.updated_at = now_rfc3339();
        updated.updated_by = actor.actor.clone();

        sqlx::query(
            r#"
            UPDATE api_routes
            SET is_active = $2, is_deleted = $3, deleted_at = $4,
                updated_at = $5, updated_by = $6
            WHERE id = $1
            "#,
        )
        .bind(route_id)
        .bind(updated.is_active)
        .bind(updated.is_deleted)
        .bind(&updated.deleted_at)
        .bind(&updated.updated_at)
        .bind(&updated.updated_by)
        .execute(&mut *tx)
        .await
        .context("Failed to update route status")?;

        let action = if updated.is_servable() {
            AuditAction::Activate
        } else {
            AuditAction::Deactivate
        };
        insert_audit_tx(
            &mut tx,
            &AuditEntry::new(
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
            ),
        )
        .await?;

        tx.commit().await.context("Failed to commit status change")?;
        Ok(Some(updated))
    }
}
