use serde::{Deserialize, Serialize};

use crate::model::{generate_id, now_rfc3339, HttpMethod, Id};

/// One dynamically defined endpoint identity: the (path, method) pair plus
/// display metadata and status flags.
///
/// Path and method are frozen at creation; only the flags and metadata ever
/// change afterwards. The executable behavior lives in [`crate::model::Version`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: Id,
    /// Path under the dynamic prefix, without a leading slash (e.g. "user-info").
    pub path: String,
    pub method: HttpMethod,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Comma-separated tags for admin listings.
    pub tags: Option<String>,
    pub is_active: bool,
    pub is_deleted: bool,
    pub require_auth: bool,
    /// Origins allowed by the CORS layer in front of the engine.
    pub allowed_origins: Vec<String>,
    pub rate_limit_per_min: u32,
    pub created_at: String, // ISO 8601 timestamp
    pub updated_at: String, // ISO 8601 timestamp
    pub deleted_at: Option<String>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

impl Route {
    pub fn new(input: NewRoute, created_by: Option<String>) -> Self {
        let now = now_rfc3339();
        Self {
            id: generate_id(),
            path: input.path,
            method: input.method,
            name: input.name,
            description: input.description,
            tags: input.tags,
            is_active: true,
            is_deleted: false,
            require_auth: input.require_auth,
            allowed_origins: input.allowed_origins,
            rate_limit_per_min: input.rate_limit_per_min,
            created_at: now.clone(),
            updated_at: now,
            deleted_at: None,
            created_by: created_by.clone(),
            updated_by: created_by,
        }
    }

    /// Whether the route may serve live traffic.
    pub fn is_servable(&self) -> bool {
        self.is_active && !self.is_deleted
    }
}

fn default_rate_limit() -> u32 {
    100
}

/// Creation input for a route.
#[derive(Debug, Clone, Deserialize)]
pub struct NewRoute {
    pub path: String,
    pub method: HttpMethod,
    pub name: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
    #[serde(default)]
    pub require_auth: bool,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_min: u32,
}

/// Status-flag update. These are the only route fields that may change after
/// creation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteStatusUpdate {
    pub is_active: Option<bool>,
    pub is_deleted: Option<bool>,
}

impl RouteStatusUpdate {
    pub fn is_empty(&self) -> bool {
        self.is_active.is_none() && self.is_deleted.is_none()
    }
}
