use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::model::{HttpMethod, Route, Version};

/// A route joined with its current version, as served on the hot path.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDefinition {
    pub route: Route,
    pub version: Version,
}

#[derive(Clone, Debug)]
struct CacheEntry {
    definition: ResolvedDefinition,
    cached_at: Instant,
}

/// Read-mostly cache of resolved (path, method) definitions with TTL.
///
/// Definition-management operations invalidate affected keys eagerly; the TTL
/// bounds staleness for changes made by other processes. A window of at most
/// `ttl` between activation and visibility is the documented trade-off for
/// keeping the per-request lookup O(1).
#[derive(Debug)]
pub struct DefinitionCache {
    entries: RwLock<HashMap<(String, HttpMethod), CacheEntry>>,
    ttl: Duration,
}

impl DefinitionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Get a definition if present and not expired.
    pub async fn get(&self, path: &str, method: HttpMethod) -> Option<ResolvedDefinition> {
        let key = (path.to_string(), method);
        {
            let entries = self.entries.read().await;
            match entries.get(&key) {
                Some(entry) if entry.cached_at.elapsed() <= self.ttl => {
                    return Some(entry.definition.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: drop the stale entry.
        self.entries.write().await.remove(&key);
        None
    }

    pub async fn put(&self, definition: ResolvedDefinition) {
        let key = (definition.route.path.clone(), definition.route.method);
        let mut entries = self.entries.write().await;
        entries.insert(
            key,
            CacheEntry {
                definition,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drop the entry for one endpoint, forcing the next request to re-read
    /// committed state. Called after activation and status changes.
    pub async fn invalidate(&self, path: &str, method: HttpMethod) {
        self.entries
            .write()
            .await
            .remove(&(path.to_string(), method));
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LogicSpec, NewRoute, Version, VersionDraft};

    fn sample_definition() -> ResolvedDefinition {
        let route = Route::new(
            NewRoute {
                path: "orders".to_string(),
                method: HttpMethod::Get,
                name: None,
                description: None,
                tags: None,
                require_auth: false,
                allowed_origins: vec![],
                rate_limit_per_min: 100,
            },
            None,
        );
        let version = Version::from_draft(
            route.id.clone(),
            1,
            true,
            VersionDraft {
                logic: LogicSpec::StaticResponse {
                    body: serde_json::json!({}),
                },
                ..Default::default()
            },
            None,
        );
        ResolvedDefinition { route, version }
    }

    #[tokio::test]
    async fn warm_hit_and_invalidate() {
        let cache = DefinitionCache::new(Duration::from_secs(60));
        let def = sample_definition();
        assert!(cache.get("orders", HttpMethod::Get).await.is_none());

        cache.put(def.clone()).await;
        assert_eq!(cache.get("orders", HttpMethod::Get).await, Some(def));

        cache.invalidate("orders", HttpMethod::Get).await;
        assert!(cache.get("orders", HttpMethod::Get).await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_dropped() {
        let cache = DefinitionCache::new(Duration::from_millis(0));
        cache.put(sample_definition()).await;
        assert!(cache.get("orders", HttpMethod::Get).await.is_none());
    }
}
