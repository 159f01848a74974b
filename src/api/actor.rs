use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
};

use crate::model::ActorContext;

/// Axum extractor for ActorContext from request headers
///
/// Definition-management handlers use this to attribute audit entries:
/// - X-Actor: actor identity (user id or service name)
/// - X-Forwarded-For / X-Real-Ip: network origin
///
/// Missing headers yield an anonymous context rather than a rejection; the
/// authentication layer in front of the engine is responsible for enforcing
/// identity where it is required.
#[async_trait]
impl<S> FromRequestParts<S> for ActorContext
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        let actor = extract_header_value(headers, "x-actor");
        let ip = extract_header_value(headers, "x-forwarded-for")
            .map(|raw| raw.split(',').next().unwrap_or("").trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| extract_header_value(headers, "x-real-ip"));

        Ok(ActorContext { actor, ip })
    }
}

/// Extract header value as string
fn extract_header_value(headers: &HeaderMap, header_name: &str) -> Option<String> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-actor"),
            HeaderValue::from_static("ops-admin"),
        );
        headers.insert(
            HeaderName::from_static("x-forwarded-for"),
            HeaderValue::from_static("10.0.0.9, 172.16.0.1"),
        );

        assert_eq!(
            extract_header_value(&headers, "x-actor"),
            Some("ops-admin".to_string())
        );
        let first = extract_header_value(&headers, "x-forwarded-for")
            .map(|raw| raw.split(',').next().unwrap_or("").trim().to_string());
        assert_eq!(first, Some("10.0.0.9".to_string()));
    }
}
