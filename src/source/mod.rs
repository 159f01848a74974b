pub mod http;
pub mod memory;
pub mod postgres;

use std::collections::BTreeMap;

use anyhow::Result;

pub use http::ReqwestCaller;
pub use memory::{MemoryCaller, MemorySource};
pub use postgres::ReadOnlyPgSource;

/// One result row, column name → JSON value.
pub type SourceRow = serde_json::Map<String, serde_json::Value>;

/// Read-only query primitive the dispatcher executes against. Adapters must
/// be backed by read-only credentials or sessions; the engine never opens a
/// write-capable connection.
#[async_trait::async_trait]
pub trait QuerySource: Send + Sync {
    /// Execute one parameterized read statement. `sql` uses positional `$n`
    /// placeholders; `binds` supplies the values in order.
    async fn execute_read(&self, sql: &str, binds: &[serde_json::Value]) -> Result<Vec<SourceRow>>;
}

/// Fully templated outbound HTTP request, ready to issue.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub status: u16,
    pub body: serde_json::Value,
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound call primitive for EXTERNAL_CALL. Transport failures surface as
/// errors; non-2xx responses come back as outcomes so the dispatcher decides
/// how to report them.
#[async_trait::async_trait]
pub trait CallSource: Send + Sync {
    async fn call(&self, request: OutboundRequest) -> Result<CallOutcome>;
}
