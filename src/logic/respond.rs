use std::collections::BTreeMap;

use crate::logic::execute::Execution;
use crate::logic::guard::redact_sensitive;
use crate::logic::refs::{resolve_template, RefContext};
use crate::model::{ParamMap, Version};

/// Shape the raw execution result into the response body and status code.
///
/// The template may reference `$result`, `$result_count`, `$result.<path>`
/// and `$params.<name>`; without a template the default envelope is returned.
/// Sensitive fields are redacted here, at the last boundary before the
/// caller, so intermediate steps saw the real values.
pub fn map_response(
    execution: &Execution,
    version: &Version,
    params: &ParamMap,
) -> (u16, serde_json::Value) {
    let mut bindings: BTreeMap<String, serde_json::Value> = BTreeMap::new();
    bindings.insert("result".to_string(), execution.result.clone());
    bindings.insert(
        "result_count".to_string(),
        serde_json::Value::from(execution.result_count),
    );
    let ctx = RefContext::new(params, &bindings);

    let mut body = match &version.response_spec {
        Some(spec) => {
            let mut shaped = serde_json::Map::new();
            for (key, template) in spec {
                shaped.insert(key.clone(), resolve_template(&ctx, template));
            }
            serde_json::Value::Object(shaped)
        }
        None => serde_json::json!({
            "success": true,
            "data": execution.result,
            "count": execution.result_count,
        }),
    };

    redact_sensitive(&mut body);

    let status = match &version.status_codes {
        Some(codes) if execution.result_count > 0 => codes.success.unwrap_or(200),
        Some(codes) => codes.not_found.unwrap_or(200),
        None => 200,
    };

    (status, body)
}
