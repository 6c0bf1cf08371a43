//! HTTP adapter for the leaderboard service
//!
//! Thin axum layer over [`MembershipService`]. Error kinds map onto status
//! codes here and nowhere else.

pub mod handlers;

use crate::error::{ErrorKind, LeaderboardError};
use crate::membership::MembershipService;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::{error, warn};

/// Build the leaderboard and player routes
pub fn router(service: MembershipService) -> Router {
    Router::new()
        .route("/hello", get(handlers::hello))
        .route("/leaderboard/join", post(handlers::join))
        .route("/leaderboard/score", post(handlers::submit_score))
        .route(
            "/leaderboard/player/{player_id}",
            get(handlers::player_leaderboard),
        )
        .route("/leaderboard/{leaderboard_id}", get(handlers::leaderboard))
        .route("/player", post(handlers::create_player))
        .route(
            "/player/{player_id}",
            get(handlers::get_player).put(handlers::update_player),
        )
        .with_state(service)
}

/// Error body returned by every route
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<LeaderboardError> for ApiError {
    fn from(err: LeaderboardError) -> Self {
        let status = match err.kind() {
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, message = %self.message, "Request failed");
        } else {
            warn!(status = %self.status, message = %self.message, "Request rejected");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
