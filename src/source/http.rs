use std::time::Duration;

use anyhow::{Context, Result};

use crate::source::{CallOutcome, CallSource, OutboundRequest};

/// Outbound HTTP adapter for EXTERNAL_CALL, one request per invocation.
///
/// The dispatcher owns the per-step deadline; the client's connect timeout
/// only stops a dead upstream from tying up a connection slot.
#[derive(Debug, Clone)]
pub struct ReqwestCaller {
    client: reqwest::Client,
}

impl ReqwestCaller {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl CallSource for ReqwestCaller {
    async fn call(&self, request: OutboundRequest) -> Result<CallOutcome> {
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .with_context(|| format!("unsupported HTTP method: {}", request.method))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.context("Outbound call failed")?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .context("Failed to read upstream response body")?;
        let body = serde_json::from_str(&text)
            .unwrap_or_else(|_| serde_json::Value::String(text));

        Ok(CallOutcome { status, body })
    }
}
