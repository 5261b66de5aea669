//! HTTP API for transport bridges and operator tooling.
//!
//! Provides a health check, an inbound endpoint the WhatsApp bridge posts
//! received messages to, and schedule management. Spawned as a background
//! task by the gateway, same as the dispatcher.

use crate::gateway::Gateway;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;
use zapflow_core::{
    clock::{format_wall, now_wall, parse_offset, parse_wall},
    config::ApiConfig,
    message::{InboundItem, IncomingMessage, MediaItem},
    records::{JobScope, NewJob},
};

type ApiError = (StatusCode, Json<Value>);

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    gateway: Arc<Gateway>,
    api_key: Option<String>,
}

/// Body of `POST /api/inbound`. Exactly one of `text` or `media` is expected.
#[derive(Debug, Deserialize)]
struct InboundRequest {
    conversation_id: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    media: Option<MediaItem>,
    #[serde(default)]
    sender_name: Option<String>,
    #[serde(default)]
    from_me: bool,
    #[serde(default)]
    is_group: bool,
}

/// Body of `POST /api/schedules`.
#[derive(Debug, Deserialize)]
struct ScheduleRequest {
    target: String,
    message: String,
    /// Absolute wall-clock time, `YYYY-MM-DD HH:MM[:SS]`.
    #[serde(default)]
    scheduled_at: Option<String>,
    /// Relative offset such as `2h` or `1d`.
    #[serde(default)]
    offset: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

fn bad_request(msg: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({"error": msg.into()})))
}

fn internal(context: &str, e: impl std::fmt::Display) -> ApiError {
    error!("{context}: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": format!("{context}: {e}")})),
    )
}

/// Constant-time string comparison to prevent timing attacks on token validation.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Check bearer token auth. Returns `None` if authorized, `Some(response)` if rejected.
fn check_auth(headers: &HeaderMap, api_key: &Option<String>) -> Option<ApiError> {
    let key = api_key.as_ref()?;

    let Some(header) = headers.get("authorization") else {
        return Some((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "missing Authorization header"})),
        ));
    };
    let Ok(value) = header.to_str() else {
        return Some((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid Authorization header"})),
        ));
    };

    match value.strip_prefix("Bearer ") {
        Some(token) if constant_time_eq(token, key) => None,
        _ => Some((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid token"})),
        )),
    }
}

/// `GET /api/health`: uptime, provider, and transport status.
async fn health(headers: HeaderMap, State(state): State<ApiState>) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }

    let transport = state.gateway.transport();
    Ok(Json(json!({
        "status": "ok",
        "uptime_secs": state.gateway.uptime().as_secs(),
        "provider": state.gateway.provider_name(),
        "transport": transport.name(),
        "transport_connected": transport.is_connected().await,
    })))
}

/// `POST /api/inbound`: hand one received message to the gateway.
async fn inbound(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<InboundRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let Json(request) = body.map_err(|e| bad_request(format!("invalid request: {e}")))?;

    let conversation_id = request.conversation_id.trim().to_string();
    if conversation_id.is_empty() {
        return Err(bad_request("conversation_id must not be empty"));
    }

    let item = match (request.text, request.media) {
        (Some(_), Some(_)) => return Err(bad_request("send either text or media, not both")),
        (Some(text), None) if !text.trim().is_empty() => InboundItem::Text { text },
        (None, Some(media)) if !media.url.trim().is_empty() => InboundItem::Media(media),
        _ => return Err(bad_request("text or media must not be empty")),
    };

    let message = IncomingMessage {
        id: Uuid::new_v4(),
        conversation_id,
        sender_name: request.sender_name,
        item,
        timestamp: Utc::now(),
        from_me: request.from_me,
        is_group: request.is_group,
    };
    let id = message.id;
    state.gateway.handle_inbound(message).await;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"status": "queued", "id": id})),
    ))
}

/// `POST /api/schedules`: enqueue a scheduled message.
async fn create_schedule(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Result<Json<ScheduleRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let Json(request) = body.map_err(|e| bad_request(format!("invalid request: {e}")))?;

    let target = request.target.trim();
    if target.is_empty() {
        return Err(bad_request("target must not be empty"));
    }
    if request.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let scope = match request.scope.as_deref() {
        None => JobScope::Individual,
        Some(s) => JobScope::parse(s).ok_or_else(|| {
            bad_request(format!("invalid scope '{s}', expected 'individual' or 'group'"))
        })?,
    };

    let now = now_wall();
    let scheduled_at = match (request.scheduled_at.as_deref(), request.offset.as_deref()) {
        (Some(_), Some(_)) => return Err(bad_request("send either scheduled_at or offset, not both")),
        (Some(at), None) => {
            parse_wall(at).ok_or_else(|| bad_request(format!("invalid scheduled_at '{at}'")))?
        }
        (None, Some(offset)) => {
            now + parse_offset(offset)
                .ok_or_else(|| bad_request(format!("invalid offset '{offset}'")))?
        }
        (None, None) => return Err(bad_request("scheduled_at or offset is required")),
    };
    if scheduled_at <= now {
        return Err(bad_request("scheduled time must be in the future"));
    }

    if scope == JobScope::Individual {
        let contact = state
            .gateway
            .state()
            .get_contact(target)
            .await
            .map_err(|e| internal("contact lookup failed", e))?;
        if contact.is_some_and(|c| c.opted_out) {
            return Err((
                StatusCode::CONFLICT,
                Json(json!({"error": format!("{target} opted out of scheduled messages")})),
            ));
        }
    }

    let tag = request.tag.as_deref();
    let category = request.category.as_deref();
    let job = match scope {
        JobScope::Individual => NewJob::individual(target, &request.message, scheduled_at, tag, category),
        JobScope::Group => NewJob::group(target, &request.message, scheduled_at, tag, category),
    };
    let id = state
        .gateway
        .jobs()
        .enqueue_job(&job)
        .await
        .map_err(|e| internal("enqueue failed", e))?;
    info!("api: scheduled {id} for {target} at {}", format_wall(&scheduled_at));

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": id,
            "scope": scope.as_str(),
            "scheduled_at": format_wall(&scheduled_at),
            "tag": job.tag,
            "category": job.category,
        })),
    ))
}

/// `GET /api/schedules/{target}`: pending jobs of one conversation.
async fn list_schedules(
    headers: HeaderMap,
    State(state): State<ApiState>,
    Path(target): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return Err(err);
    }
    let jobs = state
        .gateway
        .jobs()
        .pending_jobs_for(&target, None)
        .await
        .map_err(|e| internal("listing failed", e))?;
    Ok(Json(json!({"target": target, "jobs": jobs})))
}

fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/inbound", post(inbound))
        .route("/api/schedules", post(create_schedule))
        .route("/api/schedules/{target}", get(list_schedules))
        .layer(axum::extract::DefaultBodyLimit::max(1024 * 1024)) // 1 MB max request body
        .with_state(state)
}

/// Bind and serve until the task is aborted.
pub async fn serve(config: ApiConfig, gateway: Arc<Gateway>) {
    let api_key = if config.api_key.is_empty() {
        warn!("API server has no api_key configured, accepting unauthenticated requests");
        None
    } else {
        Some(config.api_key.clone())
    };

    let app = build_router(ApiState { gateway, api_key });
    let addr = format!("{}:{}", config.host, config.port);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("API server failed to bind to {addr}: {e}");
            return;
        }
    };

    info!("API server listening on {addr}");

    if let Err(e) = axum::serve(listener, app).await {
        error!("API server error: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProvider, FakeTransport};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use zapflow_core::{
        config::Config,
        records::ContactRecord,
        traits::{SchedulerStore, StateStore},
    };
    use zapflow_memory::Store;

    async fn setup(api_key: Option<&str>) -> (Router, Store) {
        let store = Store::open_in_memory("test").await.unwrap();
        let gateway = Arc::new(Gateway::new(
            Config::default(),
            FakeProvider::scripted(&[]),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            FakeTransport::new(),
        ));
        let app = build_router(ApiState {
            gateway,
            api_key: api_key.map(str::to_string),
        });
        (app, store)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    /// Parse response body as JSON.
    async fn body_json(resp: axum::http::Response<Body>) -> Value {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(!constant_time_eq("secret", "secreT"));
        assert!(!constant_time_eq("secret", "secret2"));
    }

    #[tokio::test]
    async fn test_health_no_auth() {
        let (app, _) = setup(None).await;
        let req = Request::get("/api/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = body_json(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["provider"], "fake");
        assert_eq!(json["transport_connected"], true);
    }

    #[tokio::test]
    async fn test_health_valid_auth() {
        let (app, _) = setup(Some("secret")).await;
        let req = Request::get("/api/health")
            .header("Authorization", "Bearer secret")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_bad_auth() {
        let (app, _) = setup(Some("secret")).await;
        let req = Request::get("/api/health")
            .header("Authorization", "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_health_missing_auth() {
        let (app, _) = setup(Some("secret")).await;
        let req = Request::get("/api/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(resp).await;
        assert_eq!(json["error"], "missing Authorization header");
    }

    #[tokio::test]
    async fn test_inbound_text_is_queued_and_recorded() {
        let (app, store) = setup(None).await;
        let req = post_json(
            "/api/inbound",
            r#"{"conversation_id":"5511999990000","text":"oi, tudo bem?","sender_name":"Ana"}"#,
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(resp).await["status"], "queued");

        let log = store.recent_messages("5511999990000", 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, "user");
        assert_eq!(log[0].1, "oi, tudo bem?");
    }

    #[tokio::test]
    async fn test_inbound_media_is_queued() {
        let (app, store) = setup(None).await;
        let req = post_json(
            "/api/inbound",
            r#"{"conversation_id":"5511999990000","media":{"kind":"image","url":"https://cdn/x.jpg","caption":"olha"}}"#,
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let log = store.recent_messages("5511999990000", 10).await.unwrap();
        assert!(log[0].1.contains("https://cdn/x.jpg"));
    }

    #[tokio::test]
    async fn test_inbound_rejects_empty_and_ambiguous_bodies() {
        for body in [
            r#"{"conversation_id":"5511999990000","text":"   "}"#,
            r#"{"conversation_id":"","text":"oi"}"#,
            r#"{"conversation_id":"5511999990000"}"#,
            r#"{"conversation_id":"5511999990000","text":"oi","media":{"kind":"audio","url":"a.ogg"}}"#,
            r#"{"text":"oi"}"#,
        ] {
            let (app, _) = setup(None).await;
            let resp = app.oneshot(post_json("/api/inbound", body)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{body}");
        }
    }

    #[tokio::test]
    async fn test_create_schedule_with_offset() {
        let (app, store) = setup(None).await;
        let req = post_json(
            "/api/schedules",
            r#"{"target":"5511999990000","message":"Lembrete","offset":"2h","tag":"promo"}"#,
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = body_json(resp).await;
        assert_eq!(json["scope"], "individual");
        assert_eq!(json["tag"], "promo");

        let id = json["id"].as_str().unwrap();
        let job = store.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.message, "Lembrete");
        let pending = store.pending_jobs_for("5511999990000", Some("promo")).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_create_group_schedule_at_absolute_time() {
        let (app, store) = setup(None).await;
        let req = post_json(
            "/api/schedules",
            r#"{"target":"1203630@g.us","message":"Bom dia","scheduled_at":"2099-01-01 08:00","scope":"group"}"#,
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = body_json(resp).await;
        assert_eq!(json["scheduled_at"], "2099-01-01 08:00:00");
        let job = store.get_job(json["id"].as_str().unwrap()).await.unwrap().unwrap();
        assert_eq!(job.scope, JobScope::Group);
    }

    #[tokio::test]
    async fn test_create_schedule_validation() {
        for body in [
            r#"{"target":"5511","message":"oi","scheduled_at":"2000-01-01 10:00"}"#,
            r#"{"target":"5511","message":"oi","offset":"nunca"}"#,
            r#"{"target":"5511","message":"oi"}"#,
            r#"{"target":"5511","message":"oi","offset":"1h","scheduled_at":"2099-01-01 10:00"}"#,
            r#"{"target":"5511","message":" ","offset":"1h"}"#,
            r#"{"target":"5511","message":"oi","offset":"1h","scope":"broadcast"}"#,
        ] {
            let (app, _) = setup(None).await;
            let resp = app.oneshot(post_json("/api/schedules", body)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{body}");
        }
    }

    #[tokio::test]
    async fn test_create_schedule_refuses_opted_out_contact() {
        let (app, store) = setup(None).await;
        let mut contact = ContactRecord::new("5511999990000");
        contact.opted_out = true;
        store.upsert_contact(&contact).await.unwrap();

        let req = post_json(
            "/api/schedules",
            r#"{"target":"5511999990000","message":"oi","offset":"1h"}"#,
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert!(store.pending_jobs_for("5511999990000", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_schedules() {
        let (app, store) = setup(Some("k")).await;
        let at = now_wall() + chrono::Duration::hours(1);
        store
            .enqueue_job(&NewJob::individual("5511999990000", "a", at, None, None))
            .await
            .unwrap();

        let req = Request::get("/api/schedules/5511999990000")
            .header("Authorization", "Bearer k")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["jobs"].as_array().unwrap().len(), 1);
        assert_eq!(json["jobs"][0]["message"], "a");
    }
}
