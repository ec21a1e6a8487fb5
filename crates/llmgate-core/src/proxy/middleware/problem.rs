//! `application/problem+json` responses.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use llmgate_types::ProxyError;
use serde::Serialize;

pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

#[derive(Debug, Serialize)]
struct Problem<'a> {
    title: &'a str,
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

/// Render `err` as a problem response.
///
/// Rate limit rejections carry `Retry-After` when the wait is known.
pub fn problem_response(err: &ProxyError) -> Response {
    let status = err.http_status_code();
    let problem = Problem {
        title: err.title(),
        status,
        detail: err.has_detail().then(|| err.to_string()),
    };
    let body = serde_json::to_vec(&problem).unwrap_or_else(|_| {
        format!(r#"{{"title":"{}","status":{status}}}"#, err.title()).into_bytes()
    });

    let mut response = Response::new(Body::from(body));
    *response.status_mut() =
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(PROBLEM_CONTENT_TYPE));
    if let ProxyError::RateLimited { retry_after_secs: Some(secs) } = err {
        if *secs > 0 {
            response.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from(*secs));
        }
    }
    response
}
