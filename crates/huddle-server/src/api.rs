//! HTTP API for Huddle.
//!
//! Room membership and history live behind plain request/response routes.
//! Every route takes a `Bearer` JWT; the realtime socket picks up membership
//! changes on the client's next `join-room`.

use crate::handlers::AppState;
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use huddle_core::store::DEFAULT_PAGE_LIMIT;
use huddle_core::{
    CredentialVerifier, MembershipStore, MessageStore, Page, PageRequest, StoreError,
};
use huddle_protocol::{Cursor, MessageId, RoomId, RoomKind, RoomSummary, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

/// HTTP-facing errors.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            StoreError::Unavailable(reason) => {
                error!(reason = %reason, "Store unavailable");
                ApiError::Internal
            }
        }
    }
}

/// The caller, verified from the `Authorization: Bearer` header.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".into()))?;

        state
            .dispatcher
            .stores()
            .verifier
            .verify(token)
            .await
            .map(AuthUser)
            .map_err(|e| ApiError::Unauthorized(e.to_string()))
    }
}

/// Routes mounted under `/api`.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/chatrooms", get(list_rooms).post(create_room))
        .route("/api/chatrooms/:id", get(fetch_room))
        .route("/api/chatrooms/:id/join", post(join_room))
        .route("/api/chatrooms/:id/leave", post(leave_room))
        .route("/api/messages/:id", get(history))
        .route("/api/video/room", get(video_room))
        .route("/api/video/get-room", get(video_room))
}

/// Rooms the caller belongs to.
pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<RoomSummary>>, ApiError> {
    let memberships = &state.dispatcher.stores().memberships;
    let mut rooms = Vec::new();
    for id in memberships.rooms_for_user(&user).await? {
        if let Some(room) = memberships.room(&id).await? {
            rooms.push(room);
        }
    }
    Ok(Json(rooms))
}

/// Body of a room creation request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoom {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: RoomKind,
    #[serde(default)]
    pub user_ids: Vec<UserId>,
}

/// Create a room with the caller as its first member.
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(body): Json<CreateRoom>,
) -> Result<(StatusCode, Json<RoomSummary>), ApiError> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Chatroom name is required".into()));
    }

    let room = state
        .dispatcher
        .stores()
        .memberships
        .create_room(&user, name, body.kind, &body.user_ids)
        .await?;

    info!(user = %user, room = %room.id, "Chatroom created");
    Ok((StatusCode::CREATED, Json(room)))
}

/// A room with its member list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomDetail {
    #[serde(flatten)]
    pub room: RoomSummary,
    pub members: Vec<UserId>,
}

/// Fetch one of the caller's rooms. Rooms the caller is not in are not found.
pub async fn fetch_room(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<RoomId>,
) -> Result<Json<RoomDetail>, ApiError> {
    let memberships = &state.dispatcher.stores().memberships;
    let not_found = || ApiError::NotFound("Chatroom not found".into());

    if !memberships.is_member(&user, &id).await? {
        return Err(not_found());
    }
    let room = memberships.room(&id).await?.ok_or_else(not_found)?;
    let members = memberships.members(&id).await?;
    Ok(Json(RoomDetail { room, members }))
}

pub async fn join_room(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<RoomId>,
) -> Result<Json<RoomSummary>, ApiError> {
    let memberships = &state.dispatcher.stores().memberships;
    let room = memberships
        .room(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Chatroom not found".into()))?;

    if !memberships.add_member(&user, &id).await? {
        return Err(ApiError::BadRequest("Already a member of this chatroom".into()));
    }

    info!(user = %user, room = %id, "Membership added");
    Ok(Json(room))
}

pub async fn leave_room(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<RoomId>,
) -> Result<StatusCode, ApiError> {
    if !state
        .dispatcher
        .stores()
        .memberships
        .remove_member(&user, &id)
        .await?
    {
        return Err(ApiError::BadRequest("Not a member of this chatroom".into()));
    }

    info!(user = %user, room = %id, "Membership removed");
    Ok(StatusCode::NO_CONTENT)
}

/// History query. The cursor is given as both halves or neither.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub limit: Option<usize>,
    pub before_ts: Option<u64>,
    pub before_id: Option<u64>,
}

impl HistoryParams {
    fn page_request(&self, max_limit: usize) -> Result<PageRequest, ApiError> {
        let before = match (self.before_ts, self.before_id) {
            (Some(created_at), Some(id)) => Some(Cursor {
                created_at,
                id: MessageId(id),
            }),
            (None, None) => None,
            _ => {
                return Err(ApiError::BadRequest(
                    "beforeTs and beforeId must be given together".into(),
                ))
            }
        };
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, max_limit.max(1));
        Ok(PageRequest { limit, before })
    }
}

/// A page of a room's history, oldest first.
pub async fn history(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<RoomId>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Page>, ApiError> {
    let stores = state.dispatcher.stores();
    if !stores.memberships.is_member(&user, &id).await? {
        return Err(ApiError::Forbidden("Not a member of this chatroom".into()));
    }

    let request = params.page_request(state.config.limits.history_page_limit)?;
    let page = stores.messages.page(&id, request).await?;
    debug!(user = %user, room = %id, count = page.messages.len(), "History page");
    Ok(Json(page))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoRoom {
    pub name: String,
    pub url: String,
}

pub async fn video_room(
    State(state): State<Arc<AppState>>,
    AuthUser(_user): AuthUser,
) -> Json<VideoRoom> {
    Json(VideoRoom {
        name: state.config.video.name.clone(),
        url: state.config.video.url.clone(),
    })
}
