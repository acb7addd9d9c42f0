//! Challenge participation core: membership lifecycle, the activity ledger,
//! and leaderboard assembly.
//!
//! All derived state (`progress`, `status`, `carbon_saved`) flows through
//! here; handlers in [`crate::api`] only translate HTTP to these calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db;
use crate::errors::{is_unique_violation, ApiError, Result};
use crate::models::{Activity, Challenge, Participation, ParticipationStatus, UserSummary};
use crate::progress;
use crate::ranking;

// ─────────────────────────────────────────────────────────
// Payloads and results
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewActivity {
    pub date: Option<DateTime<Utc>>,
    pub description: String,
    #[serde(default)]
    pub impact_value: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub progress: Option<i64>,
    pub activity: Option<NewActivity>,
}

#[derive(Debug)]
pub enum JoinOutcome {
    /// First join: record created, participant count incremented.
    Joined(Participation),
    /// Already active (or completed): nothing changed.
    AlreadyParticipating(Participation),
    /// Was inactive/abandoned: full restart, count restored.
    Rejoined(Participation),
}

impl JoinOutcome {
    pub fn participation(&self) -> &Participation {
        match self {
            Self::Joined(p) | Self::AlreadyParticipating(p) | Self::Rejoined(p) => p,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityAdded {
    pub activity: Activity,
    pub carbon_saved: f64,
    pub progress: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTotals {
    pub carbon_saved: f64,
    pub progress: i64,
}

/// One leaderboard entry: participation state plus computed rank and the
/// owner's display fields.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedParticipant {
    pub id: String,
    pub user: Option<UserSummary>,
    pub challenge: String,
    pub status: ParticipationStatus,
    pub progress: i64,
    pub carbon_saved: f64,
    pub joined_at: DateTime<Utc>,
    pub rank: i64,
}

#[derive(Debug)]
pub struct ParticipantPage {
    pub count: i64,
    pub results: Vec<RankedParticipant>,
}

/// A user's participation populated with its challenge (null if the
/// challenge has since been deleted).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserChallenge {
    pub id: String,
    pub user: String,
    pub challenge: Option<Challenge>,
    pub status: ParticipationStatus,
    pub progress: i64,
    pub carbon_saved: f64,
    pub activities: Vec<Activity>,
    pub joined_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────
// Status transitions
// ─────────────────────────────────────────────────────────

/// Status after progress accrual.  Zero progress leaves the prior status
/// alone: a zero-impact activity must not regress an active participant.
fn status_after_accrual(progress: i64, prior: ParticipationStatus) -> ParticipationStatus {
    if progress >= 100 {
        ParticipationStatus::Completed
    } else if progress > 0 {
        ParticipationStatus::Active
    } else {
        prior
    }
}

/// Status after activity removal.  Floors at `active`: removing your last
/// activity does not make you `inactive` — only an explicit leave does.
fn status_after_removal(progress: i64) -> ParticipationStatus {
    if progress >= 100 {
        ParticipationStatus::Completed
    } else {
        ParticipationStatus::Active
    }
}

// ─────────────────────────────────────────────────────────
// Membership lifecycle
// ─────────────────────────────────────────────────────────

/// Join a challenge, idempotently.
///
/// * no record → create zeroed active participation, increment count
/// * active/completed record → return it unchanged
/// * inactive/abandoned record → rejoin: reset everything, increment count
///
/// The participation write and the counter update share one transaction.
pub async fn join(pool: &SqlitePool, user_id: &str, challenge_id: &str) -> Result<JoinOutcome> {
    if db::get_challenge(pool, challenge_id).await?.is_none() {
        return Err(ApiError::NotFound("challenge"));
    }

    let now = Utc::now();

    if let Some(row) = db::find_participation(pool, user_id, challenge_id).await? {
        let existing: Participation = row.try_into()?;
        return match existing.status {
            ParticipationStatus::Active | ParticipationStatus::Completed => {
                Ok(JoinOutcome::AlreadyParticipating(existing))
            }
            ParticipationStatus::Inactive | ParticipationStatus::Abandoned => {
                let mut tx = pool.begin().await?;
                db::reset_participation(&mut *tx, &existing.id, now).await?;
                db::bump_participant_count(&mut *tx, challenge_id, 1).await?;
                tx.commit().await?;
                info!(user = user_id, challenge = challenge_id, "Rejoined challenge");

                let row = db::get_participation(pool, &existing.id)
                    .await?
                    .ok_or(ApiError::NotFound("participation"))?;
                Ok(JoinOutcome::Rejoined(row.try_into()?))
            }
        };
    }

    let id = Uuid::new_v4().to_string();
    let mut tx = pool.begin().await?;
    match db::insert_participation(&mut *tx, &id, user_id, challenge_id, now).await {
        Ok(()) => {}
        Err(ApiError::Database(e)) if is_unique_violation(&e) => {
            // Lost a race with a concurrent first join for the same pair.
            return Err(ApiError::Conflict(
                "Already joined this challenge".to_string(),
            ));
        }
        Err(e) => return Err(e),
    }
    db::bump_participant_count(&mut *tx, challenge_id, 1).await?;
    tx.commit().await?;
    info!(user = user_id, challenge = challenge_id, "Joined challenge");

    let row = db::get_participation(pool, &id)
        .await?
        .ok_or(ApiError::NotFound("participation"))?;
    Ok(JoinOutcome::Joined(row.try_into()?))
}

/// Leave a challenge: mark the participation `inactive`, keeping progress
/// and the activity log.  The participant count is decremented only when the
/// prior status was `active`, so a repeated leave (or leaving a completed
/// run) never double-decrements.
pub async fn leave(
    pool: &SqlitePool,
    user_id: &str,
    challenge_id: &str,
) -> Result<ParticipationStatus> {
    let row = db::find_participation(pool, user_id, challenge_id)
        .await?
        .ok_or(ApiError::NotFound("participation"))?;
    let was_active = row.status == ParticipationStatus::Active.as_str();

    let now = Utc::now();
    let mut tx = pool.begin().await?;
    db::set_participation_status(
        &mut *tx,
        &row.id,
        ParticipationStatus::Inactive.as_str(),
        now,
    )
    .await?;
    if was_active {
        db::bump_participant_count(&mut *tx, challenge_id, -1).await?;
    }
    tx.commit().await?;
    info!(user = user_id, challenge = challenge_id, "Left challenge");

    Ok(ParticipationStatus::Inactive)
}

// ─────────────────────────────────────────────────────────
// Activity ledger
// ─────────────────────────────────────────────────────────

async fn load_participation(pool: &SqlitePool, id: &str) -> Result<Participation> {
    db::get_participation(pool, id)
        .await?
        .ok_or(ApiError::NotFound("participation"))?
        .try_into()
}

async fn target_impact_for(pool: &SqlitePool, challenge_id: &str) -> Result<f64> {
    Ok(db::get_challenge(pool, challenge_id)
        .await?
        .map(|c| c.target_impact)
        .unwrap_or(progress::DEFAULT_TARGET_IMPACT))
}

/// Append an activity and fold its impact into the derived state.
pub async fn add_activity(
    pool: &SqlitePool,
    participation_id: &str,
    new: NewActivity,
) -> Result<ActivityAdded> {
    if new.impact_value < 0.0 {
        return Err(ApiError::Validation(
            "impactValue must be non-negative".to_string(),
        ));
    }

    let mut participation = load_participation(pool, participation_id).await?;
    let target = target_impact_for(pool, &participation.challenge).await?;

    let activity = Activity {
        id: Uuid::new_v4().to_string(),
        date: new.date.unwrap_or_else(Utc::now),
        description: new.description,
        impact_value: new.impact_value,
    };
    participation.activities.push(activity.clone());
    participation.carbon_saved += new.impact_value;
    participation.progress = progress::recompute(participation.carbon_saved, target);
    participation.status = status_after_accrual(participation.progress, participation.status);
    participation.updated_at = Utc::now();

    db::save_participation_state(pool, &participation).await?;

    Ok(ActivityAdded {
        activity,
        carbon_saved: participation.carbon_saved,
        progress: participation.progress,
    })
}

/// Remove an activity by id, subtracting its impact (carbon floors at zero).
pub async fn remove_activity(
    pool: &SqlitePool,
    participation_id: &str,
    activity_id: &str,
) -> Result<LedgerTotals> {
    let mut participation = load_participation(pool, participation_id).await?;
    let target = target_impact_for(pool, &participation.challenge).await?;

    let index = participation
        .activities
        .iter()
        .position(|a| a.id == activity_id)
        .ok_or(ApiError::NotFound("activity"))?;
    let removed = participation.activities.remove(index);

    participation.carbon_saved = (participation.carbon_saved - removed.impact_value).max(0.0);
    participation.progress = progress::recompute(participation.carbon_saved, target);
    participation.status = status_after_removal(participation.progress);
    participation.updated_at = Utc::now();

    db::save_participation_state(pool, &participation).await?;

    Ok(LedgerTotals {
        carbon_saved: participation.carbon_saved,
        progress: participation.progress,
    })
}

/// Update progress through exactly one of two mechanisms:
///
/// * `activity` — the canonical path; delegates to [`add_activity`] so
///   progress stays derived from accumulated carbon.
/// * `progress` — administrative override of the stored percentage.
///
/// Supplying both (or neither) is rejected, so the two styles can never
/// drive `progress` and `carbonSaved` apart in a single call.
pub async fn update_progress(
    pool: &SqlitePool,
    participation_id: &str,
    update: ProgressUpdate,
) -> Result<Participation> {
    match (update.progress, update.activity) {
        (Some(_), Some(_)) => Err(ApiError::Validation(
            "progress and activity are mutually exclusive".to_string(),
        )),
        (None, None) => Err(ApiError::Validation(
            "either progress or activity is required".to_string(),
        )),
        (None, Some(activity)) => {
            add_activity(pool, participation_id, activity).await?;
            load_participation(pool, participation_id).await
        }
        (Some(value), None) => {
            if !(0..=100).contains(&value) {
                return Err(ApiError::Validation(
                    "progress must be between 0 and 100".to_string(),
                ));
            }
            let mut participation = load_participation(pool, participation_id).await?;
            warn!(
                participation = participation_id,
                from = participation.progress,
                to = value,
                "Administrative progress override"
            );
            participation.progress = value;
            participation.status = status_after_accrual(value, participation.status);
            participation.updated_at = Utc::now();
            db::save_participation_state(pool, &participation).await?;
            Ok(participation)
        }
    }
}

// ─────────────────────────────────────────────────────────
// Read side
// ─────────────────────────────────────────────────────────

/// One leaderboard page for a challenge.  Ranks are competition-style: tied
/// progress shares a rank, the next distinct value skips by the run length.
/// The rank counter is seeded at the page offset, so ties crossing a page
/// boundary are not reconciled with the previous page.
pub async fn list_participants(
    pool: &SqlitePool,
    challenge_id: &str,
    page: i64,
    limit: i64,
) -> Result<ParticipantPage> {
    let page = page.max(1);
    let limit = limit.clamp(1, 100);
    let offset = (page - 1) * limit;

    let count = db::count_participants(pool, challenge_id).await?;
    let rows = db::list_participants_page(pool, challenge_id, limit, offset).await?;

    let progresses: Vec<i64> = rows.iter().map(|r| r.progress).collect();
    let ranks = ranking::assign_ranks(&progresses, offset);

    let mut results = Vec::with_capacity(rows.len());
    for (row, rank) in rows.into_iter().zip(ranks) {
        let status = ParticipationStatus::from_db(&row.status).ok_or_else(|| {
            ApiError::Decode(format!(
                "participation {} has unknown status {:?}",
                row.id, row.status
            ))
        })?;
        let user = row.username.map(|username| UserSummary {
            id: row.user_id.clone(),
            username,
            email: row.email.unwrap_or_default(),
        });
        results.push(RankedParticipant {
            id: row.id,
            user,
            challenge: row.challenge_id,
            status,
            progress: row.progress,
            carbon_saved: row.carbon_saved,
            joined_at: row.joined_at,
            rank,
        });
    }

    Ok(ParticipantPage { count, results })
}

/// All challenges a user participates in (abandoned excluded), each
/// populated with its challenge record.
pub async fn list_user_challenges(pool: &SqlitePool, user_id: &str) -> Result<Vec<UserChallenge>> {
    let rows = db::list_user_participations(pool, user_id).await?;

    let mut results = Vec::with_capacity(rows.len());
    for row in rows {
        let participation: Participation = row.try_into()?;
        let challenge = db::get_challenge(pool, &participation.challenge).await?;
        results.push(UserChallenge {
            id: participation.id,
            user: participation.user,
            challenge,
            status: participation.status,
            progress: participation.progress,
            carbon_saved: participation.carbon_saved,
            activities: participation.activities,
            joined_at: participation.joined_at,
        });
    }
    Ok(results)
}

// ─────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed_challenge(pool: &SqlitePool, target_impact: f64) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        db::insert_challenge(
            pool,
            &Challenge {
                id: id.clone(),
                title: "Bike to work week".to_string(),
                description: "Swap the commute for a bicycle".to_string(),
                category: None,
                difficulty: "medium".to_string(),
                points: 10,
                status: "active".to_string(),
                target_impact,
                participant_count: 0,
                created_at: now,
                updated_at: now,
            },
        )
        .await
        .expect("insert challenge");
        id
    }

    async fn seed_user(pool: &SqlitePool, username: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db::insert_user(
            pool,
            &UserSummary {
                id: id.clone(),
                username: username.to_string(),
                email: format!("{username}@example.com"),
            },
            Utc::now(),
        )
        .await
        .expect("insert user");
        id
    }

    async fn participant_count(pool: &SqlitePool, challenge_id: &str) -> i64 {
        db::get_challenge(pool, challenge_id)
            .await
            .unwrap()
            .unwrap()
            .participant_count
    }

    fn activity(description: &str, impact_value: f64) -> NewActivity {
        NewActivity {
            date: None,
            description: description.to_string(),
            impact_value,
        }
    }

    #[tokio::test]
    async fn first_join_creates_zeroed_active_record() {
        let pool = db::test_pool().await;
        let challenge = seed_challenge(&pool, 100.0).await;
        let user = seed_user(&pool, "ada").await;

        let outcome = join(&pool, &user, &challenge).await.unwrap();
        let p = match outcome {
            JoinOutcome::Joined(p) => p,
            other => panic!("expected Joined, got {other:?}"),
        };

        assert_eq!(p.status, ParticipationStatus::Active);
        assert_eq!(p.progress, 0);
        assert_eq!(p.carbon_saved, 0.0);
        assert!(p.activities.is_empty());
        assert_eq!(participant_count(&pool, &challenge).await, 1);
    }

    #[tokio::test]
    async fn repeat_join_is_idempotent() {
        let pool = db::test_pool().await;
        let challenge = seed_challenge(&pool, 100.0).await;
        let user = seed_user(&pool, "ada").await;

        let first = join(&pool, &user, &challenge).await.unwrap();
        let second = join(&pool, &user, &challenge).await.unwrap();

        assert!(matches!(second, JoinOutcome::AlreadyParticipating(_)));
        assert_eq!(
            second.participation().id,
            first.participation().id,
            "second join must return the same record"
        );
        assert_eq!(participant_count(&pool, &challenge).await, 1);
    }

    #[tokio::test]
    async fn join_missing_challenge_is_not_found() {
        let pool = db::test_pool().await;
        let user = seed_user(&pool, "ada").await;

        let err = join(&pool, &user, "no-such-challenge").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound("challenge")));
    }

    #[tokio::test]
    async fn concurrent_first_join_surfaces_conflict() {
        let pool = db::test_pool().await;
        let challenge = seed_challenge(&pool, 100.0).await;
        let user = seed_user(&pool, "ada").await;

        // Both writers passed the no-record check; the unique index on
        // (user_id, challenge_id) must reject the second insert.
        db::insert_participation(&pool, "p-one", &user, &challenge, Utc::now())
            .await
            .unwrap();
        let err = db::insert_participation(&pool, "p-two", &user, &challenge, Utc::now())
            .await
            .unwrap_err();

        match err {
            ApiError::Database(e) => assert!(is_unique_violation(&e)),
            other => panic!("expected database error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn leave_marks_inactive_and_decrements() {
        let pool = db::test_pool().await;
        let challenge = seed_challenge(&pool, 100.0).await;
        let user = seed_user(&pool, "ada").await;

        join(&pool, &user, &challenge).await.unwrap();
        let status = leave(&pool, &user, &challenge).await.unwrap();

        assert_eq!(status, ParticipationStatus::Inactive);
        assert_eq!(participant_count(&pool, &challenge).await, 0);
    }

    #[tokio::test]
    async fn repeated_leave_does_not_double_decrement() {
        let pool = db::test_pool().await;
        let challenge = seed_challenge(&pool, 100.0).await;
        let user = seed_user(&pool, "ada").await;
        let other = seed_user(&pool, "grace").await;

        join(&pool, &user, &challenge).await.unwrap();
        join(&pool, &other, &challenge).await.unwrap();

        leave(&pool, &user, &challenge).await.unwrap();
        leave(&pool, &user, &challenge).await.unwrap();

        assert_eq!(participant_count(&pool, &challenge).await, 1);
    }

    #[tokio::test]
    async fn leave_without_participation_is_not_found() {
        let pool = db::test_pool().await;
        let challenge = seed_challenge(&pool, 100.0).await;

        let err = leave(&pool, "nobody", &challenge).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound("participation")));
    }

    #[tokio::test]
    async fn leave_preserves_progress_and_activities() {
        let pool = db::test_pool().await;
        let challenge = seed_challenge(&pool, 100.0).await;
        let user = seed_user(&pool, "ada").await;

        let joined = join(&pool, &user, &challenge).await.unwrap();
        let pid = joined.participation().id.clone();
        add_activity(&pool, &pid, activity("cycled", 40.0))
            .await
            .unwrap();

        leave(&pool, &user, &challenge).await.unwrap();

        let p = load_participation(&pool, &pid).await.unwrap();
        assert_eq!(p.status, ParticipationStatus::Inactive);
        assert_eq!(p.progress, 40);
        assert_eq!(p.carbon_saved, 40.0);
        assert_eq!(p.activities.len(), 1);
    }

    #[tokio::test]
    async fn rejoin_resets_record_and_restores_count() {
        let pool = db::test_pool().await;
        let challenge = seed_challenge(&pool, 100.0).await;
        let user = seed_user(&pool, "ada").await;

        let joined = join(&pool, &user, &challenge).await.unwrap();
        let pid = joined.participation().id.clone();
        add_activity(&pool, &pid, activity("cycled", 40.0))
            .await
            .unwrap();
        leave(&pool, &user, &challenge).await.unwrap();

        let outcome = join(&pool, &user, &challenge).await.unwrap();
        let p = match outcome {
            JoinOutcome::Rejoined(p) => p,
            other => panic!("expected Rejoined, got {other:?}"),
        };

        assert_eq!(p.status, ParticipationStatus::Active);
        assert_eq!(p.progress, 0);
        assert_eq!(p.carbon_saved, 0.0);
        assert!(p.activities.is_empty(), "rejoin is a full restart");
        assert_eq!(participant_count(&pool, &challenge).await, 1);
    }

    #[tokio::test]
    async fn leave_after_completion_does_not_decrement() {
        let pool = db::test_pool().await;
        let challenge = seed_challenge(&pool, 100.0).await;
        let user = seed_user(&pool, "ada").await;

        let joined = join(&pool, &user, &challenge).await.unwrap();
        let pid = joined.participation().id.clone();
        add_activity(&pool, &pid, activity("solar install", 120.0))
            .await
            .unwrap();
        // Completion already released the active slot semantics-wise; the
        // counter only tracks active transitions.
        leave(&pool, &user, &challenge).await.unwrap();

        assert_eq!(participant_count(&pool, &challenge).await, 1);
    }

    #[tokio::test]
    async fn add_activity_accrues_progress_and_completes() {
        let pool = db::test_pool().await;
        let challenge = seed_challenge(&pool, 100.0).await;
        let user = seed_user(&pool, "ada").await;
        let pid = join(&pool, &user, &challenge)
            .await
            .unwrap()
            .participation()
            .id
            .clone();

        let first = add_activity(&pool, &pid, activity("cycled to work", 60.0))
            .await
            .unwrap();
        assert_eq!(first.carbon_saved, 60.0);
        assert_eq!(first.progress, 60);

        let p = load_participation(&pool, &pid).await.unwrap();
        assert_eq!(p.status, ParticipationStatus::Active);

        let second = add_activity(&pool, &pid, activity("meat-free week", 50.0))
            .await
            .unwrap();
        assert_eq!(second.carbon_saved, 110.0);
        assert_eq!(second.progress, 100, "progress clamps at 100");

        let p = load_participation(&pool, &pid).await.unwrap();
        assert_eq!(p.status, ParticipationStatus::Completed);
        assert_eq!(p.activities.len(), 2);
    }

    #[tokio::test]
    async fn zero_impact_activity_leaves_status_alone() {
        let pool = db::test_pool().await;
        let challenge = seed_challenge(&pool, 100.0).await;
        let user = seed_user(&pool, "ada").await;
        let pid = join(&pool, &user, &challenge)
            .await
            .unwrap()
            .participation()
            .id
            .clone();

        let added = add_activity(&pool, &pid, activity("pledged", 0.0))
            .await
            .unwrap();
        assert_eq!(added.progress, 0);

        let p = load_participation(&pool, &pid).await.unwrap();
        assert_eq!(p.status, ParticipationStatus::Active);
        assert_eq!(p.activities.len(), 1);
    }

    #[tokio::test]
    async fn negative_impact_is_rejected() {
        let pool = db::test_pool().await;
        let challenge = seed_challenge(&pool, 100.0).await;
        let user = seed_user(&pool, "ada").await;
        let pid = join(&pool, &user, &challenge)
            .await
            .unwrap()
            .participation()
            .id
            .clone();

        let err = add_activity(&pool, &pid, activity("oops", -5.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn add_activity_missing_participation_is_not_found() {
        let pool = db::test_pool().await;

        let err = add_activity(&pool, "ghost", activity("cycled", 10.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound("participation")));
    }

    #[tokio::test]
    async fn remove_activity_clamps_carbon_and_stays_active() {
        let pool = db::test_pool().await;
        let challenge = seed_challenge(&pool, 100.0).await;
        let user = seed_user(&pool, "ada").await;
        let pid = join(&pool, &user, &challenge)
            .await
            .unwrap()
            .participation()
            .id
            .clone();

        let added = add_activity(&pool, &pid, activity("big install", 110.0))
            .await
            .unwrap();
        let p = load_participation(&pool, &pid).await.unwrap();
        assert_eq!(p.status, ParticipationStatus::Completed);

        let totals = remove_activity(&pool, &pid, &added.activity.id)
            .await
            .unwrap();
        assert_eq!(totals.carbon_saved, 0.0, "carbon floors at zero");
        assert_eq!(totals.progress, 0);

        // Removal never demotes below active; only leave sets inactive.
        let p = load_participation(&pool, &pid).await.unwrap();
        assert_eq!(p.status, ParticipationStatus::Active);
        assert!(p.activities.is_empty());
    }

    #[tokio::test]
    async fn remove_unknown_activity_is_not_found() {
        let pool = db::test_pool().await;
        let challenge = seed_challenge(&pool, 100.0).await;
        let user = seed_user(&pool, "ada").await;
        let pid = join(&pool, &user, &challenge)
            .await
            .unwrap()
            .participation()
            .id
            .clone();

        let err = remove_activity(&pool, &pid, "not-an-activity")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound("activity")));
    }

    #[tokio::test]
    async fn remove_partial_activity_recomputes_downward() {
        let pool = db::test_pool().await;
        let challenge = seed_challenge(&pool, 200.0).await;
        let user = seed_user(&pool, "ada").await;
        let pid = join(&pool, &user, &challenge)
            .await
            .unwrap()
            .participation()
            .id
            .clone();

        add_activity(&pool, &pid, activity("kept", 100.0))
            .await
            .unwrap();
        let removed = add_activity(&pool, &pid, activity("dropped", 60.0))
            .await
            .unwrap();

        let totals = remove_activity(&pool, &pid, &removed.activity.id)
            .await
            .unwrap();
        assert_eq!(totals.carbon_saved, 100.0);
        assert_eq!(totals.progress, 50);

        let p = load_participation(&pool, &pid).await.unwrap();
        assert_eq!(p.status, ParticipationStatus::Active);
        assert_eq!(p.activities.len(), 1);
        assert_eq!(p.activities[0].description, "kept");
    }

    #[tokio::test]
    async fn update_progress_requires_exactly_one_mechanism() {
        let pool = db::test_pool().await;
        let challenge = seed_challenge(&pool, 100.0).await;
        let user = seed_user(&pool, "ada").await;
        let pid = join(&pool, &user, &challenge)
            .await
            .unwrap()
            .participation()
            .id
            .clone();

        let both = ProgressUpdate {
            progress: Some(50),
            activity: Some(activity("cycled", 10.0)),
        };
        assert!(matches!(
            update_progress(&pool, &pid, both).await.unwrap_err(),
            ApiError::Validation(_)
        ));

        let neither = ProgressUpdate {
            progress: None,
            activity: None,
        };
        assert!(matches!(
            update_progress(&pool, &pid, neither).await.unwrap_err(),
            ApiError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn progress_override_applies_status_thresholds() {
        let pool = db::test_pool().await;
        let challenge = seed_challenge(&pool, 100.0).await;
        let user = seed_user(&pool, "ada").await;
        let pid = join(&pool, &user, &challenge)
            .await
            .unwrap()
            .participation()
            .id
            .clone();

        let p = update_progress(
            &pool,
            &pid,
            ProgressUpdate {
                progress: Some(45),
                activity: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(p.progress, 45);
        assert_eq!(p.status, ParticipationStatus::Active);

        let p = update_progress(
            &pool,
            &pid,
            ProgressUpdate {
                progress: Some(100),
                activity: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(p.status, ParticipationStatus::Completed);

        let err = update_progress(
            &pool,
            &pid,
            ProgressUpdate {
                progress: Some(150),
                activity: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn update_progress_activity_path_stays_derived() {
        let pool = db::test_pool().await;
        let challenge = seed_challenge(&pool, 100.0).await;
        let user = seed_user(&pool, "ada").await;
        let pid = join(&pool, &user, &challenge)
            .await
            .unwrap()
            .participation()
            .id
            .clone();

        let p = update_progress(
            &pool,
            &pid,
            ProgressUpdate {
                progress: None,
                activity: Some(activity("composting", 30.0)),
            },
        )
        .await
        .unwrap();

        assert_eq!(p.carbon_saved, 30.0);
        assert_eq!(p.progress, 30, "activity path recomputes from carbon");
        assert_eq!(p.activities.len(), 1);
    }

    #[tokio::test]
    async fn participants_are_ranked_with_shared_ties() {
        let pool = db::test_pool().await;
        let challenge = seed_challenge(&pool, 100.0).await;

        for (name, impact) in [("ada", 80.0), ("grace", 80.0), ("edsger", 60.0)] {
            let user = seed_user(&pool, name).await;
            let pid = join(&pool, &user, &challenge)
                .await
                .unwrap()
                .participation()
                .id
                .clone();
            add_activity(&pool, &pid, activity("logged", impact))
                .await
                .unwrap();
        }

        let page = list_participants(&pool, &challenge, 1, 10).await.unwrap();
        assert_eq!(page.count, 3);

        let ranks: Vec<i64> = page.results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 1, 3]);

        let progresses: Vec<i64> = page.results.iter().map(|r| r.progress).collect();
        assert_eq!(progresses, vec![80, 80, 60]);

        let first_user = page.results[0].user.as_ref().expect("populated user");
        assert!(!first_user.username.is_empty());
    }

    #[tokio::test]
    async fn second_page_ranks_continue_from_offset() {
        let pool = db::test_pool().await;
        let challenge = seed_challenge(&pool, 100.0).await;

        for (name, impact) in [("ada", 90.0), ("grace", 70.0), ("edsger", 50.0)] {
            let user = seed_user(&pool, name).await;
            let pid = join(&pool, &user, &challenge)
                .await
                .unwrap()
                .participation()
                .id
                .clone();
            add_activity(&pool, &pid, activity("logged", impact))
                .await
                .unwrap();
        }

        let page = list_participants(&pool, &challenge, 2, 2).await.unwrap();
        assert_eq!(page.count, 3);
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0].progress, 50);
        assert_eq!(page.results[0].rank, 3);
    }

    #[tokio::test]
    async fn abandoned_participants_are_excluded_from_listings() {
        let pool = db::test_pool().await;
        let challenge = seed_challenge(&pool, 100.0).await;
        let keeper = seed_user(&pool, "ada").await;
        let quitter = seed_user(&pool, "grace").await;

        join(&pool, &keeper, &challenge).await.unwrap();
        let abandoned_pid = join(&pool, &quitter, &challenge)
            .await
            .unwrap()
            .participation()
            .id
            .clone();
        db::set_participation_status(
            &pool,
            &abandoned_pid,
            ParticipationStatus::Abandoned.as_str(),
            Utc::now(),
        )
        .await
        .unwrap();

        let page = list_participants(&pool, &challenge, 1, 10).await.unwrap();
        assert_eq!(page.count, 1);
        assert_eq!(page.results.len(), 1);

        let mine = list_user_challenges(&pool, &quitter).await.unwrap();
        assert!(mine.is_empty(), "abandoned challenges are hidden");
    }

    #[tokio::test]
    async fn user_challenges_are_populated() {
        let pool = db::test_pool().await;
        let challenge = seed_challenge(&pool, 100.0).await;
        let user = seed_user(&pool, "ada").await;
        let pid = join(&pool, &user, &challenge)
            .await
            .unwrap()
            .participation()
            .id
            .clone();
        add_activity(&pool, &pid, activity("cycled", 25.0))
            .await
            .unwrap();

        let mine = list_user_challenges(&pool, &user).await.unwrap();
        assert_eq!(mine.len(), 1);
        let entry = &mine[0];
        assert_eq!(entry.progress, 25);
        let populated = entry.challenge.as_ref().expect("challenge populated");
        assert_eq!(populated.id, challenge);
        assert_eq!(populated.title, "Bike to work week");
    }
}
