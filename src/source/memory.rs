use std::collections::VecDeque;
use std::time::Duration;

use anyhow::Result;
use parking_lot::Mutex;

use crate::source::{CallOutcome, CallSource, OutboundRequest, QuerySource, SourceRow};

/// Executed query as recorded by [`MemorySource`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedQuery {
    pub sql: String,
    pub binds: Vec<serde_json::Value>,
}

/// Query adapter serving queued canned results, recording every call.
///
/// Results are handed out in FIFO order, one batch per executed query; an
/// empty queue yields empty result sets. An optional artificial delay makes
/// timeout behavior testable.
#[derive(Default)]
pub struct MemorySource {
    results: Mutex<VecDeque<Vec<SourceRow>>>,
    calls: Mutex<Vec<RecordedQuery>>,
    delay: Option<Duration>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    /// Queue the rows returned by the next executed query.
    pub fn queue_result(&self, rows: Vec<serde_json::Value>) {
        let rows = rows
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.results.lock().push_back(rows);
    }

    pub fn calls(&self) -> Vec<RecordedQuery> {
        self.calls.lock().clone()
    }
}

#[async_trait::async_trait]
impl QuerySource for MemorySource {
    async fn execute_read(&self, sql: &str, binds: &[serde_json::Value]) -> Result<Vec<SourceRow>> {
        self.calls.lock().push(RecordedQuery {
            sql: sql.to_string(),
            binds: binds.to_vec(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.results.lock().pop_front().unwrap_or_default())
    }
}

/// Call adapter serving queued canned outcomes, recording every request.
#[derive(Default)]
pub struct MemoryCaller {
    outcomes: Mutex<VecDeque<CallOutcome>>,
    requests: Mutex<Vec<OutboundRequest>>,
    delay: Option<Duration>,
}

impl MemoryCaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn queue_outcome(&self, status: u16, body: serde_json::Value) {
        self.outcomes.lock().push_back(CallOutcome { status, body });
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait::async_trait]
impl CallSource for MemoryCaller {
    async fn call(&self, request: OutboundRequest) -> Result<CallOutcome> {
        self.requests.lock().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.outcomes.lock().pop_front().unwrap_or(CallOutcome {
            status: 200,
            body: serde_json::json!({}),
        }))
    }
}
