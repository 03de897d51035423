//! Router assembly: HTTP endpoints, WebSocket upgrade, static files, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod ws;

/// Build the application router with:
/// - WebSocket at `/ws`
/// - REST-ish API under `/api/v1/...`
/// - Static SPA from `./static` with index fallback
/// - CORS (allow any origin/method/headers)
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    // Static files with SPA fallback
    let static_service = ServeDir::new("./static")
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new("./static/index.html"));

    Router::new()
        // WebSocket
        .route("/ws", get(ws::ws_upgrade))
        // HTTP API
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/catalog", get(http::http_get_catalog))
        .route("/api/v1/dashboard", get(http::http_dashboard))
        .route("/api/v1/sessions", post(http::http_create_session))
        .route("/api/v1/sessions/:id", get(http::http_get_session))
        .route("/api/v1/sessions/:id/select", post(http::http_select))
        .route("/api/v1/sessions/:id/next", post(http::http_next))
        .route("/api/v1/sessions/:id/previous", post(http::http_previous))
        .route("/api/v1/sessions/:id/complete", post(http::http_complete))
        .route("/api/v1/sessions/:id/result", get(http::http_get_result))
        .route("/api/v1/sessions/:id/export", get(http::http_export))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Frontend fallback
        .fallback_service(static_service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::catalog::Catalog;
    use crate::records::InMemoryRecordStore;

    fn app(dir: &TempDir) -> Router {
        let state = AppState::with_parts(
            Catalog::builtin(),
            Arc::new(InMemoryRecordStore::new()),
            dir.path().to_path_buf(),
            Duration::from_secs(1),
        );
        build_router(Arc::new(state))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>, owner: Option<&str>) -> (StatusCode, Vec<u8>, header::HeaderMap) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(o) = owner {
            req = req.header(http::OWNER_HEADER, o);
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec(), headers)
    }

    fn json_of(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    fn subject() -> Value {
        json!({ "name": "Asha Rao", "age": 34, "mobileNumber": "9876543210" })
    }

    #[tokio::test]
    async fn full_session_over_http() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let (status, body, _) = call(&app, "POST", "/api/v1/sessions", Some(subject()), None).await;
        assert_eq!(status, StatusCode::CREATED);
        let view = json_of(&body);
        assert_eq!(view["state"], "presenting");
        assert_eq!(view["index"], 0);
        assert_eq!(view["total"], 18);
        assert_eq!(view["question"]["id"], 1);
        let id = view["sessionId"].as_str().unwrap().to_string();

        for _ in 0..18 {
            let (s, _, _) = call(&app, "POST", &format!("/api/v1/sessions/{id}/select"), Some(json!({ "choiceIndex": 2 })), None).await;
            assert_eq!(s, StatusCode::OK);
            let (s, _, _) = call(&app, "POST", &format!("/api/v1/sessions/{id}/next"), None, None).await;
            assert_eq!(s, StatusCode::OK);
        }

        let (status, body, _) = call(&app, "GET", &format!("/api/v1/sessions/{id}/result"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        let r = json_of(&body);
        assert_eq!(r["result"]["primaryDosha"], "kapha");
        assert_eq!(r["result"]["constitution"], "Kapha Dominant");
        assert_eq!(r["primaryPercentage"], 100);

        let (status, body, headers) = call(&app, "GET", &format!("/api/v1/sessions/{id}/export?format=csv"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "text/csv; charset=utf-8");
        let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.starts_with("attachment; filename=\"prakruti-assessment-asha-rao-"));
        assert!(String::from_utf8(body).unwrap().starts_with("\"Prakruti Assessment Results\""));

        let (status, body, _) = call(&app, "GET", &format!("/api/v1/sessions/{id}/export"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn invalid_subject_lists_every_field() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);
        let bad = json!({ "name": "", "age": 200, "mobileNumber": "12" });
        let (status, body, _) = call(&app, "POST", "/api/v1/sessions", Some(bad), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err = json_of(&body);
        assert_eq!(err["retryable"], false);
        let fields: Vec<&str> = err["fields"].as_array().unwrap().iter().map(|f| f["field"].as_str().unwrap()).collect();
        assert_eq!(fields, vec!["name", "age", "mobileNumber"]);
    }

    #[tokio::test]
    async fn absent_or_mistyped_fields_are_listed_too() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let (status, body, headers) = call(&app, "POST", "/api/v1/sessions", Some(json!({ "name": "Asha Rao", "age": 34 })), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        let err = json_of(&body);
        assert_eq!(err["fields"][0]["field"], "mobileNumber");
        assert_eq!(err["fields"][0]["message"], "Mobile number is required");
        assert_eq!(err["fields"].as_array().unwrap().len(), 1);

        let (status, body, _) = call(&app, "POST", "/api/v1/sessions", Some(json!({ "name": 7, "age": "old" })), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let fields: Vec<String> = json_of(&body)["fields"].as_array().unwrap().iter().map(|f| f["field"].as_str().unwrap().to_string()).collect();
        assert_eq!(fields, vec!["name", "age", "mobileNumber"]);

        let (status, body, _) = call(&app, "POST", "/api/v1/sessions", Some(json!("not an object")), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json_of(&body)["fields"][0]["field"], "subjectDetails");
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let (status, _, _) = call(&app, "GET", "/api/v1/sessions/missing", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body, _) = call(&app, "POST", "/api/v1/sessions", Some(subject()), None).await;
        let id = json_of(&body)["sessionId"].as_str().unwrap().to_string();

        let (status, _, _) = call(&app, "POST", &format!("/api/v1/sessions/{id}/next"), None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _, _) = call(&app, "POST", &format!("/api/v1/sessions/{id}/select"), Some(json!({ "choiceIndex": 9 })), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _, _) = call(&app, "GET", &format!("/api/v1/sessions/{id}/result"), None, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _, _) = call(&app, "GET", &format!("/api/v1/sessions/{id}/export?format=docx"), None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _, _) = call(&app, "GET", "/api/v1/dashboard", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn dashboard_and_catalog() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir);

        let (status, body, _) = call(&app, "GET", "/api/v1/catalog", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let catalog = json_of(&body);
        assert_eq!(catalog["total"], 18);
        assert_eq!(catalog["questions"][0]["options"].as_array().unwrap().len(), 3);

        let (status, body, _) = call(&app, "GET", "/api/v1/dashboard", None, Some("prac-9")).await;
        assert_eq!(status, StatusCode::OK);
        let d = json_of(&body);
        assert_eq!(d["stats"]["totalAssessments"], 0);
        assert!(d["recent"].as_array().unwrap().is_empty());

        let (status, body, _) = call(&app, "GET", "/api/v1/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_of(&body)["ok"], true);
    }
}
