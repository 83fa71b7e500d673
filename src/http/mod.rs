mod admin;
mod body;
mod error;
mod reservations;
mod session;
mod vehicles;

pub use error::{ApiError, CONFLICT_MESSAGE};

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, MatchedPath, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{Request, StatusCode};
use axum::middleware::{Next, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use tokio::sync::Semaphore;

use crate::auth::SessionKeys;
use crate::config::Credentials;
use crate::engine::Engine;
use crate::limits::MAX_BODY_BYTES;
use crate::observability::{
    HTTP_IN_FLIGHT, HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_REJECTED_TOTAL, HTTP_REQUESTS_TOTAL,
};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub sessions: Arc<SessionKeys>,
    /// Logging in with these creates the account on first use.
    pub demo_user: Option<Arc<Credentials>>,
    in_flight: Arc<Semaphore>,
}

impl AppState {
    pub fn new(
        engine: Arc<Engine>,
        sessions: SessionKeys,
        demo_user: Option<Credentials>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            engine,
            sessions: Arc::new(sessions),
            demo_user: demo_user.map(Arc::new),
            in_flight: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/users", get(admin::list_users))
        .route("/vehicles", get(admin::list_vehicles).post(admin::create_vehicle))
        .route("/cars", post(admin::create_vehicle))
        .route(
            "/cars/:id",
            patch(admin::update_vehicle).delete(admin::delete_vehicle),
        )
        .route("/rentals", get(admin::list_rentals).post(admin::create_rental))
        .route(
            "/rentals/:id",
            patch(admin::update_rental).delete(admin::delete_rental),
        )
        .route_layer(from_fn_with_state(state.clone(), session::require_admin));

    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/vehicles", get(vehicles::list_vehicles))
        .route("/api/cars", get(vehicles::list_vehicles))
        .route("/api/cars/:id", get(vehicles::get_car))
        .route(
            "/api/reservations",
            get(reservations::list_reservations)
                .post(reservations::create_reservation)
                .delete(reservations::delete_reservation),
        )
        .route("/api/rentals", post(reservations::create_reservation))
        .route("/api/rentals/history", get(reservations::rental_history))
        .route("/api/auth/local", post(session::login))
        .route("/api/auth/session", get(session::current_session))
        .nest("/api/admin", admin)
        .fallback(not_found_handler)
        .layer(from_fn_with_state(state.clone(), track_requests))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

async fn healthz_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn not_found_handler() -> ApiError {
    ApiError::NotFound("Not found")
}

/// Extractor rejections are plain text; a body over the limit still answers in JSON.
fn json_rejection(resp: Response) -> Response {
    let is_json = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    if resp.status() == StatusCode::PAYLOAD_TOO_LARGE && !is_json {
        return ApiError::PayloadTooLarge.into_response();
    }
    resp
}

/// In-flight limit plus RED metrics for every request.
async fn track_requests(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let Ok(_permit) = state.in_flight.clone().try_acquire_owned() else {
        metrics::counter!(HTTP_REQUESTS_REJECTED_TOTAL).increment(1);
        tracing::warn!("in-flight limit reached, rejecting {}", req.uri().path());
        return ApiError::Overloaded.into_response();
    };

    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    metrics::gauge!(HTTP_IN_FLIGHT).increment(1.0);
    let started = Instant::now();
    let resp = json_rejection(next.run(req).await);
    let elapsed = started.elapsed();
    metrics::gauge!(HTTP_IN_FLIGHT).decrement(1.0);

    let status = resp.status().as_u16();
    metrics::counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "route" => route.clone(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method.clone(), "route" => route.clone())
        .record(elapsed.as_secs_f64());
    tracing::debug!(%method, %route, status, elapsed_ms = elapsed.as_millis() as u64, "request");
    resp
}
