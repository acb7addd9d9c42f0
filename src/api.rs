//! Axum REST API handlers.
//!
//! Handlers validate identifiers, delegate to the service layer, and shape
//! responses; no domain rules live here.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db;
use crate::errors::{is_unique_violation, ApiError, Result};
use crate::models::{Challenge, Participation, UserSummary};
use crate::participation::{
    self, JoinOutcome, NewActivity, ProgressUpdate, RankedParticipant, UserChallenge,
};
use crate::progress;

#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
}

/// All `/api/v1` routes.
pub fn router() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/participations/join", post(join_challenge))
        .route(
            "/participations/leave/:challenge_id/:user_id",
            put(leave_challenge),
        )
        .route("/participations/:id/progress", put(update_progress))
        .route(
            "/participations/:id/activities",
            post(add_activity),
        )
        .route(
            "/participations/:id/activities/:activity_id",
            axum::routing::delete(remove_activity),
        )
        .route("/participations/user/:user_id", get(user_challenges))
        .route("/challenges/:id/participants", get(challenge_participants))
        .route("/challenges", post(create_challenge).get(list_challenges))
        .route(
            "/challenges/:id",
            get(get_challenge)
                .put(update_challenge)
                .delete(delete_challenge),
        )
        .route("/users", post(create_user))
        .route("/users/:id", get(get_user))
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct JoinResponse {
    pub message: &'static str,
    pub participation: Participation,
}

#[derive(Serialize)]
pub struct LeaveResponse {
    pub message: &'static str,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ParticipantsResponse {
    pub count: i64,
    pub next: Option<String>,
    pub results: Vec<RankedParticipant>,
}

#[derive(Serialize)]
pub struct ChallengesResponse {
    pub count: i64,
    pub next: Option<String>,
    pub results: Vec<Challenge>,
}

// ─────────────────────────────────────────────────────────
// Misc
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─────────────────────────────────────────────────────────
// Participation
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub challenge_id: String,
}

/// `POST /participations/join`
pub async fn join_challenge(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<JoinRequest>,
) -> Result<impl IntoResponse> {
    if req.user_id.is_empty() || req.challenge_id.is_empty() {
        return Err(ApiError::Validation(
            "Challenge ID and User ID are required".to_string(),
        ));
    }

    let outcome = participation::join(&state.pool, &req.user_id, &req.challenge_id).await?;
    let (status, message, p) = match outcome {
        JoinOutcome::Joined(p) => (StatusCode::CREATED, "Successfully joined challenge", p),
        JoinOutcome::AlreadyParticipating(p) => (
            StatusCode::OK,
            "Already participating in this challenge",
            p,
        ),
        JoinOutcome::Rejoined(p) => (StatusCode::OK, "Rejoined challenge", p),
    };

    Ok((
        status,
        Json(JoinResponse {
            message,
            participation: p,
        }),
    ))
}

/// `PUT /participations/leave/:challenge_id/:user_id`
pub async fn leave_challenge(
    State(state): State<Arc<ApiState>>,
    Path((challenge_id, user_id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let status = participation::leave(&state.pool, &user_id, &challenge_id).await?;
    Ok(Json(LeaveResponse {
        message: "Left the challenge",
        status: status.as_str(),
    }))
}

/// `PUT /participations/:id/progress`
pub async fn update_progress(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(update): Json<ProgressUpdate>,
) -> Result<impl IntoResponse> {
    let updated = participation::update_progress(&state.pool, &id, update).await?;
    Ok(Json(updated))
}

/// `POST /participations/:id/activities`
pub async fn add_activity(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(new): Json<NewActivity>,
) -> Result<impl IntoResponse> {
    let added = participation::add_activity(&state.pool, &id, new).await?;
    Ok((StatusCode::CREATED, Json(added)))
}

/// `DELETE /participations/:id/activities/:activity_id`
pub async fn remove_activity(
    State(state): State<Arc<ApiState>>,
    Path((id, activity_id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let totals = participation::remove_activity(&state.pool, &id, &activity_id).await?;
    Ok(Json(totals))
}

/// `GET /participations/user/:user_id`
pub async fn user_challenges(
    State(state): State<Arc<ApiState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<UserChallenge>>> {
    let results = participation::list_user_challenges(&state.pool, &user_id).await?;
    Ok(Json(results))
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// `GET /challenges/:id/participants`
///
/// Leaderboard page for one challenge, progress descending, ranked.
pub async fn challenge_participants(
    State(state): State<Arc<ApiState>>,
    Path(challenge_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(10).clamp(1, 100);

    let result = participation::list_participants(&state.pool, &challenge_id, page, limit).await?;

    let next = (result.count > page * limit).then(|| {
        format!(
            "/api/v1/challenges/{challenge_id}/participants?page={}&limit={limit}",
            page + 1
        )
    });

    Ok(Json(ParticipantsResponse {
        count: result.count,
        next,
        results: result.results,
    }))
}

// ─────────────────────────────────────────────────────────
// Challenges
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChallengeRequest {
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub difficulty: Option<String>,
    pub points: Option<i64>,
    pub status: Option<String>,
    pub target_impact: Option<f64>,
}

/// `POST /challenges`
pub async fn create_challenge(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateChallengeRequest>,
) -> Result<impl IntoResponse> {
    if req.title.is_empty() || req.description.is_empty() {
        return Err(ApiError::Validation(
            "Title and description are required".to_string(),
        ));
    }
    if let Some(target) = req.target_impact {
        if target <= 0.0 {
            return Err(ApiError::Validation(
                "targetImpact must be positive".to_string(),
            ));
        }
    }

    let now = Utc::now();
    let challenge = Challenge {
        id: Uuid::new_v4().to_string(),
        title: req.title,
        description: req.description,
        category: req.category,
        difficulty: req.difficulty.unwrap_or_else(|| "medium".to_string()),
        points: req.points.unwrap_or(10),
        status: req.status.unwrap_or_else(|| "active".to_string()),
        target_impact: req.target_impact.unwrap_or(progress::DEFAULT_TARGET_IMPACT),
        participant_count: 0,
        created_at: now,
        updated_at: now,
    };
    db::insert_challenge(&state.pool, &challenge).await?;

    Ok((StatusCode::CREATED, Json(challenge)))
}

#[derive(Deserialize)]
pub struct ChallengeListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub status: Option<String>,
}

/// `GET /challenges`
pub async fn list_challenges(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ChallengeListQuery>,
) -> Result<impl IntoResponse> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(36).clamp(1, 100);
    let offset = (page - 1) * limit;
    let status = query.status.as_deref();

    let count = db::count_challenges(&state.pool, status).await?;
    let results = db::list_challenges(&state.pool, status, limit, offset).await?;

    let next = (count > page * limit)
        .then(|| format!("/api/v1/challenges?page={}&limit={limit}", page + 1));

    Ok(Json(ChallengesResponse {
        count,
        next,
        results,
    }))
}

/// `GET /challenges/:id`
pub async fn get_challenge(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<Challenge>> {
    let challenge = db::get_challenge(&state.pool, &id)
        .await?
        .ok_or(ApiError::NotFound("challenge"))?;
    Ok(Json(challenge))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChallengeRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub difficulty: Option<String>,
    pub points: Option<i64>,
    pub status: Option<String>,
    pub target_impact: Option<f64>,
}

/// `PUT /challenges/:id`
pub async fn update_challenge(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(req): Json<UpdateChallengeRequest>,
) -> Result<Json<Challenge>> {
    if let Some(target) = req.target_impact {
        if target <= 0.0 {
            return Err(ApiError::Validation(
                "targetImpact must be positive".to_string(),
            ));
        }
    }

    let mut challenge = db::get_challenge(&state.pool, &id)
        .await?
        .ok_or(ApiError::NotFound("challenge"))?;

    if let Some(title) = req.title {
        challenge.title = title;
    }
    if let Some(description) = req.description {
        challenge.description = description;
    }
    if req.category.is_some() {
        challenge.category = req.category;
    }
    if let Some(difficulty) = req.difficulty {
        challenge.difficulty = difficulty;
    }
    if let Some(points) = req.points {
        challenge.points = points;
    }
    if let Some(status) = req.status {
        challenge.status = status;
    }
    if let Some(target) = req.target_impact {
        challenge.target_impact = target;
    }
    challenge.updated_at = Utc::now();

    db::update_challenge(&state.pool, &challenge).await?;
    Ok(Json(challenge))
}

/// `DELETE /challenges/:id`
pub async fn delete_challenge(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    if !db::delete_challenge(&state.pool, &id).await? {
        return Err(ApiError::NotFound("challenge"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ─────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
}

/// `POST /users`
///
/// Minimal registry entry for participant display; authentication lives
/// elsewhere.
pub async fn create_user(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse> {
    if req.username.is_empty() || req.email.is_empty() {
        return Err(ApiError::Validation(
            "Username and email are required".to_string(),
        ));
    }

    let user = UserSummary {
        id: Uuid::new_v4().to_string(),
        username: req.username,
        email: req.email,
    };
    match db::insert_user(&state.pool, &user, Utc::now()).await {
        Ok(()) => {}
        Err(ApiError::Database(e)) if is_unique_violation(&e) => {
            return Err(ApiError::Conflict("Email already registered".to_string()));
        }
        Err(e) => return Err(e),
    }

    Ok((StatusCode::CREATED, Json(user)))
}

/// `GET /users/:id`
pub async fn get_user(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<UserSummary>> {
    let user = db::get_user(&state.pool, &id)
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    Ok(Json(user))
}
