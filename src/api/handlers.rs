//! Route handlers

use crate::api::ApiError;
use crate::membership::MembershipService;
use crate::types::{CompetitionId, Player, PlayerId};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct JoinParams {
    pub player_id: PlayerId,
}

#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    pub player_id: PlayerId,
    pub score: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePlayerRequest {
    pub level: i32,
    pub country_code: String,
}

pub async fn hello() -> &'static str {
    "Hello, World!"
}

pub async fn join(
    State(service): State<MembershipService>,
    Query(params): Query<JoinParams>,
) -> Result<impl IntoResponse, ApiError> {
    let membership = service.join(&params.player_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "Player added to matchmaking queue",
            "membership_id": membership.membership_id,
            "player_id": membership.player_id,
            "status": membership.status,
        })),
    ))
}

pub async fn submit_score(
    State(service): State<MembershipService>,
    Json(request): Json<ScoreRequest>,
) -> Result<StatusCode, ApiError> {
    debug!("Score submission for player {}", request.player_id);
    service.submit_score(&request.player_id, request.score).await?;
    Ok(StatusCode::OK)
}

pub async fn player_leaderboard(
    State(service): State<MembershipService>,
    Path(player_id): Path<PlayerId>,
) -> Result<impl IntoResponse, ApiError> {
    let response = match service.get_player_leaderboard(&player_id).await? {
        Some(board) => Json(board).into_response(),
        None => Json(json!({})).into_response(),
    };
    Ok(response)
}

pub async fn leaderboard(
    State(service): State<MembershipService>,
    Path(leaderboard_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    debug!("Leaderboard {} requested", leaderboard_id);
    let competition_id: CompetitionId = leaderboard_id
        .parse()
        .map_err(|_| ApiError::not_found(format!("leaderboard not found: {}", leaderboard_id)))?;
    let board = service.get_leaderboard(competition_id).await?;
    Ok(Json(board))
}

pub async fn create_player(
    State(service): State<MembershipService>,
    Json(player): Json<Player>,
) -> Result<impl IntoResponse, ApiError> {
    service.create_player(player).await?;
    Ok((StatusCode::CREATED, Json(json!({ "message": "Player created" }))))
}

pub async fn get_player(
    State(service): State<MembershipService>,
    Path(player_id): Path<PlayerId>,
) -> Result<Json<Player>, ApiError> {
    Ok(Json(service.get_player(&player_id).await?))
}

pub async fn update_player(
    State(service): State<MembershipService>,
    Path(player_id): Path<PlayerId>,
    Json(request): Json<UpdatePlayerRequest>,
) -> Result<impl IntoResponse, ApiError> {
    service
        .update_player(Player::new(player_id, request.level, request.country_code))
        .await?;
    Ok(Json(json!({ "message": "Player updated" })))
}

#[cfg(test)]
mod tests {
    use crate::api::router;
    use crate::membership::MembershipService;
    use crate::storage::InMemoryStore;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt; // for oneshot

    fn app() -> Router {
        router(MembershipService::new(Arc::new(InMemoryStore::new())))
    }

    fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_hello() {
        let response = app()
            .oneshot(Request::builder().uri("/hello").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_and_join() {
        let app = app();

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/player",
                r#"{"player_id":"p1","level":2,"country_code":"US"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/player",
                r#"{"player_id":"p1","level":2,"country_code":"US"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .clone()
            .oneshot(json_request("POST", "/leaderboard/join?player_id=p1", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["status"], "WAITING");

        let response = app
            .oneshot(json_request("POST", "/leaderboard/join?player_id=p1", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["error"], "player already in waiting queue: p1");
    }

    #[tokio::test]
    async fn test_unknown_player_routes() {
        let app = app();

        let response = app
            .clone()
            .oneshot(json_request("POST", "/leaderboard/join?player_id=ghost", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/leaderboard/score",
                r#"{"player_id":"ghost","score":5}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/player/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(json_request(
                "PUT",
                "/player/ghost",
                r#"{"level":1,"country_code":"US"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_score_without_competition_conflicts() {
        let app = app();
        app.clone()
            .oneshot(json_request(
                "POST",
                "/player",
                r#"{"player_id":"p1","level":2,"country_code":"US"}"#,
            ))
            .await
            .unwrap();

        let response = app
            .oneshot(json_request(
                "POST",
                "/leaderboard/score",
                r#"{"player_id":"p1","score":5}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_negative_score_is_bad_request() {
        let response = app()
            .oneshot(json_request(
                "POST",
                "/leaderboard/score",
                r#"{"player_id":"p1","score":-25}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["error"],
            "score must not decrease: -25"
        );
    }

    #[tokio::test]
    async fn test_player_leaderboard_empty() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/leaderboard/player/nobody")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_leaderboard_not_found() {
        let app = app();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/leaderboard/not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/leaderboard/{}", uuid::Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let response = app()
            .oneshot(json_request("POST", "/leaderboard/score", r#"{"player_id":"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
