/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - SENSE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! HTTP delivery layer.
//!
//! Callers arrive already authenticated: the upstream auth layer puts the
//! user id in the `x-sense-user` header. Routes that act on behalf of a user
//! answer 401 without it; read routes treat it as the optional viewer.

use crate::engagement::{Engine, PageRequest};
use crate::error::EngineError;
use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use http::{HeaderMap, StatusCode};
use sense_protocol::{
    FeedFilters, NewComment, NewMedia, NewPublication, PublicationPatch, PublicationType,
    SaveRequest, Visibility,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tower_http::trace::TraceLayer;
use tracing::error;

pub const USER_HEADER: &str = "x-sense-user";

#[derive(Clone)]
struct ApiState {
    engine: Engine,
}

pub fn router(engine: Engine) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/publication/create", post(create_publication))
        .route(
            "/publication/:id",
            get(get_publication).put(update_publication).delete(delete_publication),
        )
        .route("/publication/:id/like", post(toggle_like))
        .route("/publication/:id/likes", get(liked_users))
        .route("/publication/:id/save", post(save).delete(unsave))
        .route("/publication/:id/comments", get(list_comments).post(create_comment))
        .route("/comment/:id", get(get_comment).put(update_comment).delete(delete_comment))
        .route("/comment/:id/reply", post(reply_to_comment))
        .route("/comment/:id/like", post(toggle_comment_like))
        .route("/comment/:id/replies", get(list_replies))
        .route("/feed", get(feed))
        .route("/feed/me", get(my_feed))
        .route("/feed/me/saved", get(my_saved))
        .route("/feed/user/:id", get(user_timeline))
        .route("/search", get(search))
        .route("/profile/:id/follow", post(follow).delete(unfollow))
        .route("/profile/:id/stats", get(user_stats))
        .route("/media", post(register_media))
        .route("/media/:id", get(get_media).delete(delete_media))
        .layer(TraceLayer::new_for_http())
        .with_state(ApiState { engine })
}

/// Engine error rendered as `{"error": kind, "message": text}`.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

pub fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::NotAuthor { .. } | EngineError::NotOwner { .. } => StatusCode::FORBIDDEN,
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::MediaNotOwned { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        EngineError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        EngineError::Storage(_) | EngineError::Pool(_) | EngineError::Join(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        (
            status,
            Json(json!({ "error": self.0.kind(), "message": self.0.to_string() })),
        )
            .into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

fn viewer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "unauthorized", "message": format!("missing {USER_HEADER} header") })),
    )
        .into_response()
}

macro_rules! require_user {
    ($headers:expr) => {
        match viewer(&$headers) {
            Some(u) => u,
            None => return Ok(unauthorized()),
        }
    };
}

fn page_from(q: &HashMap<String, String>) -> PageRequest {
    PageRequest {
        limit: q.get("limit").and_then(|v| v.trim().parse().ok()),
        offset: q.get("offset").and_then(|v| v.trim().parse().ok()),
    }
}

/// Unknown or malformed filter values are dropped, never rejected.
fn filters_from(q: &HashMap<String, String>) -> FeedFilters {
    FeedFilters {
        kind: q.get("type").and_then(|v| PublicationType::parse(v)),
        visibility: q.get("visibility").and_then(|v| Visibility::parse(v)),
        author_id: q
            .get("author")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
        date_from_ms: q.get("date_from").and_then(|v| v.trim().parse().ok()),
        date_to_ms: q.get("date_to").and_then(|v| v.trim().parse().ok()),
    }
}

async fn health(State(state): State<ApiState>) -> ApiResult {
    state.engine.store().health_check(&state.engine.op_context()).await?;
    Ok((StatusCode::OK, "ok").into_response())
}

async fn create_publication(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<NewPublication>,
) -> ApiResult {
    let user = require_user!(headers);
    let ctx = state.engine.op_context();
    let publication = state.engine.create_publication(&ctx, &user, req).await?;
    Ok((StatusCode::CREATED, Json(publication)).into_response())
}

async fn get_publication(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let ctx = state.engine.op_context();
    let view = state
        .engine
        .get_publication(&ctx, &id, viewer(&headers).as_deref())
        .await?;
    Ok(Json(view).into_response())
}

async fn update_publication(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<PublicationPatch>,
) -> ApiResult {
    let user = require_user!(headers);
    let ctx = state.engine.op_context();
    let publication = state.engine.update_publication(&ctx, &id, &user, patch).await?;
    Ok(Json(publication).into_response())
}

async fn delete_publication(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let user = require_user!(headers);
    let ctx = state.engine.op_context();
    state.engine.delete_publication(&ctx, &id, &user).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn toggle_like(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let user = require_user!(headers);
    let ctx = state.engine.op_context();
    let outcome = state.engine.toggle_like(&ctx, &id, &user).await?;
    Ok(Json(outcome).into_response())
}

async fn liked_users(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(q): Query<HashMap<String, String>>,
) -> ApiResult {
    let ctx = state.engine.op_context();
    let page = state
        .engine
        .liked_users(&ctx, &id, viewer(&headers).as_deref(), page_from(&q))
        .await?;
    Ok(Json(page).into_response())
}

async fn save(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<SaveRequest>>,
) -> ApiResult {
    let user = require_user!(headers);
    let note = body.and_then(|Json(b)| b.note);
    let ctx = state.engine.op_context();
    state.engine.save(&ctx, &id, &user, note.as_deref()).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn unsave(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let user = require_user!(headers);
    let ctx = state.engine.op_context();
    state.engine.unsave(&ctx, &id, &user).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn list_comments(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(q): Query<HashMap<String, String>>,
) -> ApiResult {
    let ctx = state.engine.op_context();
    let page = state
        .engine
        .list_comments(&ctx, &id, viewer(&headers).as_deref(), page_from(&q))
        .await?;
    Ok(Json(page).into_response())
}

async fn create_comment(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<NewComment>,
) -> ApiResult {
    let user = require_user!(headers);
    let ctx = state.engine.op_context();
    let comment = state.engine.create_comment(&ctx, &id, &user, req).await?;
    Ok((StatusCode::CREATED, Json(comment)).into_response())
}

#[derive(Debug, Deserialize)]
struct CommentText {
    text: String,
}

async fn get_comment(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let ctx = state.engine.op_context();
    let view = state
        .engine
        .get_comment(&ctx, &id, viewer(&headers).as_deref())
        .await?;
    Ok(Json(view).into_response())
}

async fn update_comment(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<CommentText>,
) -> ApiResult {
    let user = require_user!(headers);
    let ctx = state.engine.op_context();
    let comment = state.engine.update_comment(&ctx, &id, &user, &body.text).await?;
    Ok(Json(comment).into_response())
}

async fn delete_comment(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let user = require_user!(headers);
    let ctx = state.engine.op_context();
    state.engine.delete_comment(&ctx, &id, &user).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn reply_to_comment(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<CommentText>,
) -> ApiResult {
    let user = require_user!(headers);
    let ctx = state.engine.op_context();
    let comment = state.engine.reply_to_comment(&ctx, &id, &user, &body.text).await?;
    Ok((StatusCode::CREATED, Json(comment)).into_response())
}

async fn toggle_comment_like(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let user = require_user!(headers);
    let ctx = state.engine.op_context();
    let outcome = state.engine.toggle_comment_like(&ctx, &id, &user).await?;
    Ok(Json(outcome).into_response())
}

async fn list_replies(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(q): Query<HashMap<String, String>>,
) -> ApiResult {
    let ctx = state.engine.op_context();
    let page = state
        .engine
        .list_replies(&ctx, &id, viewer(&headers).as_deref(), page_from(&q))
        .await?;
    Ok(Json(page).into_response())
}

async fn feed(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> ApiResult {
    let ctx = state.engine.op_context();
    let page = state
        .engine
        .get_feed(&ctx, viewer(&headers).as_deref(), filters_from(&q), page_from(&q))
        .await?;
    Ok(Json(page).into_response())
}

/// The caller's own timeline.
async fn my_feed(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> ApiResult {
    let user = require_user!(headers);
    let ctx = state.engine.op_context();
    let page = state
        .engine
        .get_author_timeline(&ctx, &user, Some(&user), filters_from(&q), page_from(&q))
        .await?;
    Ok(Json(page).into_response())
}

async fn my_saved(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> ApiResult {
    let user = require_user!(headers);
    let ctx = state.engine.op_context();
    let page = state
        .engine
        .get_saved(&ctx, &user, filters_from(&q), page_from(&q))
        .await?;
    Ok(Json(page).into_response())
}

async fn user_timeline(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(q): Query<HashMap<String, String>>,
) -> ApiResult {
    let ctx = state.engine.op_context();
    let page = state
        .engine
        .get_author_timeline(&ctx, &id, viewer(&headers).as_deref(), filters_from(&q), page_from(&q))
        .await?;
    Ok(Json(page).into_response())
}

async fn search(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(q): Query<HashMap<String, String>>,
) -> ApiResult {
    let text = q.get("q").cloned().unwrap_or_default();
    let ctx = state.engine.op_context();
    let page = state
        .engine
        .search(&ctx, &text, viewer(&headers).as_deref(), filters_from(&q), page_from(&q))
        .await?;
    Ok(Json(page).into_response())
}

async fn follow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let user = require_user!(headers);
    let ctx = state.engine.op_context();
    state.engine.follow(&ctx, &user, &id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn unfollow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let user = require_user!(headers);
    let ctx = state.engine.op_context();
    state.engine.unfollow(&ctx, &user, &id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn user_stats(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    let ctx = state.engine.op_context();
    let stats = state.engine.user_stats(&ctx, &id).await?;
    Ok(Json(stats).into_response())
}

async fn register_media(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<NewMedia>,
) -> ApiResult {
    let user = require_user!(headers);
    let ctx = state.engine.op_context();
    let asset = state.engine.register_media(&ctx, &user, req).await?;
    Ok((StatusCode::CREATED, Json(asset)).into_response())
}

async fn get_media(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    let ctx = state.engine.op_context();
    let asset = state.engine.get_media(&ctx, &id).await?;
    Ok(Json(asset).into_response())
}

async fn delete_media(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult {
    let user = require_user!(headers);
    let ctx = state.engine.op_context();
    state.engine.delete_media(&ctx, &id, &user).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engagement::tests::TestHarness;
    use axum::body::{to_bytes, Body};
    use http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn call(app: &Router, method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(u) = user {
            req = req.header(USER_HEADER, u);
        }
        let req = match body {
            Some(b) => req
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[test]
    fn error_kinds_map_to_statuses() {
        assert_eq!(status_for(&EngineError::not_found("x")), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&EngineError::NotAuthor { entity: "x" }), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&EngineError::NotOwner { entity: "x" }), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&EngineError::validation("bad")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&EngineError::MediaNotOwned { media_id: "m".into() }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_for(&EngineError::Cancelled).as_u16(), 499);
        assert_eq!(status_for(&EngineError::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_for(&EngineError::Storage(rusqlite::Error::InvalidQuery)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn malformed_query_values_fall_back() {
        let q: HashMap<String, String> = [
            ("limit", "ten"),
            ("offset", "5"),
            ("type", "video"),
            ("visibility", "Community"),
            ("date_from", "yesterday"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(page_from(&q), PageRequest { limit: None, offset: Some(5) });
        let f = filters_from(&q);
        assert_eq!(f.kind, None);
        assert_eq!(f.visibility, Some(Visibility::Community));
        assert_eq!(f.date_from_ms, None);
    }

    #[tokio::test]
    async fn publication_lifecycle_over_http() {
        let h = TestHarness::new().await;
        let app = router(h.engine.clone());

        let (status, _) = call(&app, "POST", "/publication/create", None, Some(json!({"type": "post", "visibility": "public"}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, created) = call(
            &app,
            "POST",
            "/publication/create",
            Some("alice"),
            Some(json!({"type": "post", "title": "hi", "visibility": "private"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap().to_string();

        let (status, body) = call(&app, "GET", &format!("/publication/{id}"), Some("bob"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, body) = call(&app, "GET", &format!("/publication/{id}"), Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_liked"], false);

        let (status, body) = call(&app, "DELETE", &format!("/publication/{id}"), Some("bob"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "not_author");

        let (status, body) = call(
            &app,
            "PUT",
            &format!("/publication/{id}"),
            Some("alice"),
            Some(json!({"visibility": "public"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["visibility"], "public");

        let (status, body) = call(&app, "POST", &format!("/publication/{id}/like"), Some("bob"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"liked": true, "count": 1}));

        let (status, body) = call(&app, "GET", "/feed?limit=abc&type=nonsense", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
        assert_eq!(body["limit"], 20);

        let (status, body) = call(&app, "GET", "/search?q=", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");

        let (status, _) = call(&app, "DELETE", &format!("/publication/{id}"), Some("alice"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn media_and_follow_errors_over_http() {
        let h = TestHarness::new().await;
        h.user("alice").await;
        let app = router(h.engine.clone());

        let (status, media) = call(&app, "POST", "/media", Some("bob"), Some(json!({"mime": "image/png"}))).await;
        assert_eq!(status, StatusCode::CREATED);
        let media_id = media["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &app,
            "POST",
            "/publication/create",
            Some("alice"),
            Some(json!({"type": "quote", "visibility": "public", "media_ids": [media_id]})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "media_not_owned");

        let (status, _) = call(&app, "DELETE", &format!("/media/{media_id}"), Some("alice"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, asset) = call(&app, "GET", &format!("/media/{media_id}"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(asset["owner_id"], "bob");
        let (status, _) = call(&app, "GET", "/media/missing", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, "POST", "/profile/alice/follow", Some("alice"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call(&app, "POST", "/profile/alice/follow", Some("bob"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, stats) = call(&app, "GET", "/profile/alice/stats", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["followers_count"], 1);
    }
}
