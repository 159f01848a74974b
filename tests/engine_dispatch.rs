use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use dynapi::api::{create_router, AppState};
use dynapi::config::EngineConfig;
use dynapi::logic::EngineContext;
use dynapi::source::{MemoryCaller, MemorySource};
use dynapi::store::MemoryStore;

struct Harness {
    app: Router,
    source: Arc<MemorySource>,
    caller: Arc<MemoryCaller>,
}

fn harness() -> Harness {
    harness_with(MemorySource::new(), EngineConfig::default())
}

fn harness_with(source: MemorySource, config: EngineConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let source = Arc::new(source);
    let caller = Arc::new(MemoryCaller::new());
    let state: AppState<MemoryStore> = Arc::new(EngineContext::new(
        store,
        source.clone(),
        caller.clone(),
        &config,
    ));
    Harness {
        app: create_router().with_state(state),
        source,
        caller,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-actor", "test-admin");
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn greeting_route(path: &str) -> Value {
    json!({
        "path": path,
        "method": "GET",
        "name": "greeting",
        "version": {
            "request_spec": {
                "name": {"type": "string", "required": false, "default": "World"}
            },
            "logic": {
                "kind": "STATIC_RESPONSE",
                "body": {"message": "Hello, $params.name"}
            }
        }
    })
}

#[tokio::test]
async fn static_response_with_default_parameter() {
    let h = harness();
    let (status, _) = send(&h.app, "POST", "/admin/routes", Some(greeting_route("greet"))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&h.app, "GET", "/api/greet", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "Hello, World"}));

    let (_, body) = send(&h.app, "GET", "/api/greet?name=Rust", None).await;
    assert_eq!(body, json!({"message": "Hello, Rust"}));
}

#[tokio::test]
async fn unknown_route_is_a_structured_404() {
    let h = harness();
    let (status, body) = send(&h.app, "GET", "/api/nothing-here", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"], json!("NOT_FOUND"));
}

#[tokio::test]
async fn validation_reports_every_violating_field() {
    let h = harness();
    let route = json!({
        "path": "orders",
        "method": "GET",
        "version": {
            "request_spec": {
                "cmpny_id": {"type": "int", "required": true},
                "user_id": {"type": "int", "required": true}
            },
            "logic": {"kind": "STATIC_RESPONSE", "body": {"ok": true}}
        }
    });
    send(&h.app, "POST", "/admin/routes", Some(route)).await;

    let (status, body) = send(&h.app, "GET", "/api/orders", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("VALIDATION_ERROR"));
    let violations = body["details"]["violations"].as_array().unwrap();
    assert_eq!(violations.len(), 2);
}

#[tokio::test]
async fn malicious_definition_is_rejected_with_a_generic_message() {
    let h = harness();
    let route = json!({
        "path": "evil",
        "method": "GET",
        "version": {
            "logic": {
                "kind": "SINGLE_QUERY",
                "sql": "SELECT * FROM x WHERE id = 1; DROP TABLE x;--"
            }
        }
    });
    let (status, body) = send(&h.app, "POST", "/admin/routes", Some(route)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("SECURITY_ERROR"));
    // detail stays server-side
    assert!(!body["message"].as_str().unwrap().contains("DROP"));

    let (status, _) = send(&h.app, "GET", "/api/evil", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(h.source.calls().is_empty());
}

#[tokio::test]
async fn multi_query_feeds_named_results_forward() {
    let h = harness();
    h.source.queue_result(vec![
        json!({"user_id": 1, "cmpny_id": 42}),
        json!({"user_id": 2, "cmpny_id": 43}),
    ]);
    h.source
        .queue_result(vec![json!({"cmpny_id": 42, "cmpny_nm": "Acme"})]);

    let route = json!({
        "path": "user-with-company",
        "method": "GET",
        "version": {
            "logic": {
                "kind": "MULTI_QUERY",
                "queries": [
                    {"name": "users", "sql": "SELECT user_id, cmpny_id FROM app_user_l"},
                    {
                        "name": "company",
                        "sql": "SELECT cmpny_id, cmpny_nm FROM app_cmpny_l WHERE cmpny_id = :cmpny_id",
                        "params": {"cmpny_id": "$users[0].cmpny_id"}
                    }
                ]
            }
        }
    });
    send(&h.app, "POST", "/admin/routes", Some(route)).await;

    let (status, body) = send(&h.app, "GET", "/api/user-with-company", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["users"].as_array().unwrap().len(), 2);
    assert_eq!(body["data"]["company"][0]["cmpny_nm"], json!("Acme"));

    let calls = h.source.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].binds, vec![json!(42)]);
}

#[tokio::test(start_paused = true)]
async fn pipeline_timeout_returns_timeout_error_not_partial_response() {
    let h = harness_with(
        MemorySource::with_delay(Duration::from_secs(5)),
        EngineConfig::default(),
    );
    let route = json!({
        "path": "report",
        "method": "GET",
        "version": {
            "logic": {
                "kind": "PIPELINE",
                "steps": [
                    {"output": "header", "logic": {"kind": "STATIC_RESPONSE", "body": {"title": "report"}}},
                    {"output": "rows", "timeout_secs": 1,
                     "logic": {"kind": "SINGLE_QUERY", "sql": "SELECT id FROM t"}},
                    {"output": "footer", "logic": {"kind": "SINGLE_QUERY", "sql": "SELECT id FROM u"}}
                ]
            }
        }
    });
    send(&h.app, "POST", "/admin/routes", Some(route)).await;

    let (status, body) = send(&h.app, "GET", "/api/report", None).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"], json!("TIMEOUT_ERROR"));
    // step 3 never ran
    assert_eq!(h.source.calls().len(), 1);
}

#[tokio::test]
async fn activation_switches_served_version_and_rollback_restores() {
    let h = harness();
    let (_, created) = send(&h.app, "POST", "/admin/routes", Some(greeting_route("hello"))).await;
    let route_id = created["route"]["id"].as_str().unwrap().to_string();

    let v2 = json!({
        "logic": {"kind": "STATIC_RESPONSE", "body": {"message": "Hi from v2"}},
        "change_note": "second take"
    });
    let (status, version) = send(
        &h.app,
        "POST",
        &format!("/admin/routes/{}/versions", route_id),
        Some(v2),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(version["version_no"], json!(2));
    assert_eq!(version["is_current"], json!(false));

    // v1 still serves until activation
    let (_, body) = send(&h.app, "GET", "/api/hello", None).await;
    assert_eq!(body, json!({"message": "Hello, World"}));

    let (status, _) = send(
        &h.app,
        "POST",
        &format!("/admin/routes/{}/versions/2/activate", route_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&h.app, "GET", "/api/hello", None).await;
    assert_eq!(body, json!({"message": "Hi from v2"}));

    // pinning still reaches v1 without changing the current pointer
    let (_, body) = send(&h.app, "GET", "/api/hello?_version=1", None).await;
    assert_eq!(body, json!({"message": "Hello, World"}));

    // rollback creates v3 with v1's payload and serves it
    let (status, rolled) = send(
        &h.app,
        "POST",
        &format!("/admin/routes/{}/rollback/1", route_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rolled["version_no"], json!(3));
    let (_, body) = send(&h.app, "GET", "/api/hello", None).await;
    assert_eq!(body, json!({"message": "Hello, World"}));
}

#[tokio::test]
async fn sensitive_columns_are_redacted_in_responses() {
    let h = harness();
    h.source.queue_result(vec![json!({
        "user_id": 1,
        "user_nm": "kim",
        "password_hash": "bcrypt$abc",
        "api_token": "tok_123"
    })]);
    let route = json!({
        "path": "accounts",
        "method": "GET",
        "version": {
            "logic": {"kind": "SINGLE_QUERY", "sql": "SELECT * FROM app_user_l"}
        }
    });
    send(&h.app, "POST", "/admin/routes", Some(route)).await;

    let (_, body) = send(&h.app, "GET", "/api/accounts", None).await;
    assert_eq!(body["data"][0]["password_hash"], json!("***"));
    assert_eq!(body["data"][0]["api_token"], json!("***"));
    assert_eq!(body["data"][0]["user_nm"], json!("kim"));
}

#[tokio::test]
async fn external_call_with_response_mapping_and_status_codes() {
    let h = harness();
    h.caller.queue_outcome(200, json!({"company": "Acme", "headcount": 12}));
    let route = json!({
        "path": "company-lookup",
        "method": "GET",
        "version": {
            "request_spec": {"cmpny_id": {"type": "int", "required": true}},
            "logic": {
                "kind": "EXTERNAL_CALL",
                "method": "GET",
                "url": "https://registry.example/companies/$params.cmpny_id"
            },
            "response_spec": {
                "name": "$result.company",
                "size": "$result.headcount",
                "requested": "$params.cmpny_id"
            },
            "status_codes": {"success": 200, "not_found": 404}
        }
    });
    send(&h.app, "POST", "/admin/routes", Some(route)).await;

    let (status, body) = send(&h.app, "GET", "/api/company-lookup?cmpny_id=42", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"name": "Acme", "size": 12, "requested": 42})
    );
    assert_eq!(
        h.caller.requests()[0].url,
        "https://registry.example/companies/42"
    );
}

#[tokio::test]
async fn body_parameters_are_used_for_post_dispatch() {
    let h = harness();
    let route = json!({
        "path": "echo",
        "method": "POST",
        "version": {
            "request_spec": {"note": {"type": "string", "required": true}},
            "logic": {"kind": "STATIC_RESPONSE", "body": {"echoed": "$params.note"}}
        }
    });
    send(&h.app, "POST", "/admin/routes", Some(route)).await;

    let (status, body) = send(
        &h.app,
        "POST",
        "/api/echo",
        Some(json!({"note": "hello engine"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"echoed": "hello engine"}));
}

#[tokio::test]
async fn persisted_versions_cannot_be_updated_or_deleted() {
    let h = harness();
    let (_, created) = send(&h.app, "POST", "/admin/routes", Some(greeting_route("frozen"))).await;
    let route_id = created["route"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &h.app,
        "PUT",
        &format!("/admin/routes/{}/versions/1", route_id),
        Some(json!({"change_note": "rewrite history"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], json!("IMMUTABLE_POLICY_VIOLATION"));

    let (status, body) = send(
        &h.app,
        "DELETE",
        &format!("/admin/routes/{}/versions/1", route_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], json!("IMMUTABLE_POLICY_VIOLATION"));

    // the version still serves untouched
    let (status, body) = send(&h.app, "GET", "/api/frozen", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"message": "Hello, World"}));
}

#[tokio::test]
async fn deactivated_route_stops_serving() {
    let h = harness();
    let (_, created) = send(&h.app, "POST", "/admin/routes", Some(greeting_route("toggle"))).await;
    let route_id = created["route"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(&h.app, "GET", "/api/toggle", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &h.app,
        "PATCH",
        &format!("/admin/routes/{}/status", route_id),
        Some(json!({"is_active": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&h.app, "GET", "/api/toggle", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
