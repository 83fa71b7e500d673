use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use ulid::Ulid;

use crate::auth::{Session, SessionKeys, bearer_token, hash_password, verify_password};
use crate::engine::{EngineError, normalize_email};
use crate::limits::MAX_PASSWORD_LEN;
use crate::model::{Ms, Role, UserRecord};
use crate::observability::{LOGIN_FAILURES_TOTAL, SESSIONS_REJECTED_TOTAL};
use crate::timestamp::{now_ms, serialize_ms};

use super::AppState;
use super::body::{json_fields, raw_str_field, str_field};
use super::error::ApiError;

#[derive(Serialize)]
pub struct LoginResponse {
    pub id: Ulid,
    pub email: String,
    pub role: Role,
    pub token: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub id: Ulid,
    pub email: String,
    pub role: Role,
    #[serde(serialize_with = "serialize_ms")]
    pub expires_at: Ms,
}

fn login_failure(reason: &'static str) -> ApiError {
    metrics::counter!(LOGIN_FAILURES_TOTAL, "reason" => reason).increment(1);
    ApiError::Unauthorized(reason)
}

/// Verified session behind the request's bearer token.
fn authenticate(sessions: &SessionKeys, headers: &HeaderMap) -> Result<Session, ApiError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .ok_or(ApiError::Unauthorized("authentication required"))?;
    sessions.verify(token, now_ms()).map_err(|e| {
        tracing::debug!("rejected session token: {e}");
        metrics::counter!(SESSIONS_REJECTED_TOTAL, "reason" => e.reason()).increment(1);
        ApiError::Unauthorized("invalid session")
    })
}

pub(super) async fn require_admin(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    match authenticate(&state.sessions, req.headers()) {
        Ok(session) if session.role == Role::Admin => {
            req.extensions_mut().insert(session);
            next.run(req).await
        }
        Ok(session) => {
            tracing::warn!(user_id = %session.user_id, "non-admin on admin route {}", req.uri().path());
            ApiError::Forbidden.into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// First login with the configured demo credentials creates the account.
async fn demo_account(state: &AppState, email: &str, password: &str) -> Result<Option<UserRecord>, ApiError> {
    let Some(demo) = state.demo_user.as_deref() else {
        return Ok(None);
    };
    if normalize_email(&demo.email) != normalize_email(email) || demo.password != password {
        return Ok(None);
    }
    let hash = hash_password(password.to_string()).await.map_err(|e| {
        tracing::error!("{e}");
        ApiError::Internal
    })?;
    match state
        .engine
        .create_user(Ulid::new(), email, Some(hash), Role::User)
        .await
    {
        Ok(info) => tracing::info!(user_id = %info.id, "created demo account on first login"),
        Err(EngineError::DuplicateEmail(_)) => {}
        Err(e) => return Err(e.into()),
    }
    Ok(state.engine.find_user_by_email(email).await)
}

pub(super) async fn login(State(state): State<AppState>, body: Bytes) -> Result<Json<LoginResponse>, ApiError> {
    let fields = json_fields(&body);
    // Passwords are compared verbatim.
    let (Some(email), Some(password)) = (str_field(&fields, "email")?, raw_str_field(&fields, "password")?) else {
        return Err(ApiError::bad_request("email and password required"));
    };
    if password.len() > MAX_PASSWORD_LEN {
        return Err(login_failure("invalid credentials"));
    }

    let user = match state.engine.find_user_by_email(email).await {
        Some(user) => user,
        None => demo_account(&state, email, password)
            .await?
            .ok_or_else(|| login_failure("user not found"))?,
    };
    let Some(hash) = user.password_hash.clone() else {
        return Err(login_failure("no password set"));
    };
    if !verify_password(password.to_string(), hash).await {
        return Err(login_failure("invalid credentials"));
    }

    tracing::info!(user_id = %user.id, role = user.role.as_str(), "login");
    Ok(Json(LoginResponse {
        id: user.id,
        email: user.email,
        role: user.role,
        token: state.sessions.issue(user.id, user.role, now_ms()),
    }))
}

pub(super) async fn current_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = authenticate(&state.sessions, &headers)?;
    let user = state
        .engine
        .get_user(session.user_id)
        .await
        .ok_or(ApiError::Unauthorized("unknown user"))?;
    Ok(Json(SessionResponse {
        id: user.id,
        email: user.email,
        role: session.role,
        expires_at: session.expires_ms,
    }))
}
