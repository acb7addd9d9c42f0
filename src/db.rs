//! Database layer — pool setup, migrations, and all queries.
//!
//! Functions that participate in the join/leave transactions are generic
//! over the executor so the participation write and the participant-count
//! update can share one transaction.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool};
use tracing::info;

use crate::errors::Result;
use crate::models::{Challenge, ParticipantRow, Participation, ParticipationRow, UserSummary};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    // Make sure the file is created if it doesn't exist yet.
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    MIGRATOR.run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Challenges
// ─────────────────────────────────────────────────────────

pub async fn get_challenge(pool: &SqlitePool, id: &str) -> Result<Option<Challenge>> {
    let row = sqlx::query_as::<_, Challenge>(
        r#"
        SELECT id, title, description, category, difficulty, points, status,
               target_impact, participant_count, created_at, updated_at
        FROM   challenges
        WHERE  id = ?1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn insert_challenge(pool: &SqlitePool, challenge: &Challenge) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO challenges
            (id, title, description, category, difficulty, points, status,
             target_impact, participant_count, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&challenge.id)
    .bind(&challenge.title)
    .bind(&challenge.description)
    .bind(&challenge.category)
    .bind(&challenge.difficulty)
    .bind(challenge.points)
    .bind(&challenge.status)
    .bind(challenge.target_impact)
    .bind(challenge.participant_count)
    .bind(challenge.created_at)
    .bind(challenge.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Full-row update; callers merge partial payloads into the fetched record.
pub async fn update_challenge(pool: &SqlitePool, challenge: &Challenge) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE challenges
        SET    title = ?2, description = ?3, category = ?4, difficulty = ?5,
               points = ?6, status = ?7, target_impact = ?8, updated_at = ?9
        WHERE  id = ?1
        "#,
    )
    .bind(&challenge.id)
    .bind(&challenge.title)
    .bind(&challenge.description)
    .bind(&challenge.category)
    .bind(&challenge.difficulty)
    .bind(challenge.points)
    .bind(&challenge.status)
    .bind(challenge.target_impact)
    .bind(challenge.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Returns `false` when no row matched the id.
pub async fn delete_challenge(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM challenges WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn count_challenges(pool: &SqlitePool, status: Option<&str>) -> Result<i64> {
    let (count,): (i64,) = match status {
        Some(status) => {
            sqlx::query_as("SELECT COUNT(*) FROM challenges WHERE status = ?1")
                .bind(status)
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_as("SELECT COUNT(*) FROM challenges")
                .fetch_one(pool)
                .await?
        }
    };
    Ok(count)
}

pub async fn list_challenges(
    pool: &SqlitePool,
    status: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Challenge>> {
    let base = r#"
        SELECT id, title, description, category, difficulty, points, status,
               target_impact, participant_count, created_at, updated_at
        FROM   challenges
        "#;

    let rows = match status {
        Some(status) => {
            sqlx::query_as::<_, Challenge>(&format!(
                "{base} WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2 OFFSET ?3"
            ))
            .bind(status)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, Challenge>(&format!(
                "{base} ORDER BY created_at DESC LIMIT ?1 OFFSET ?2"
            ))
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows)
}

/// Adjust a challenge's participant counter, floored at zero.
pub async fn bump_participant_count<'e, E>(exec: E, challenge_id: &str, delta: i64) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "UPDATE challenges SET participant_count = MAX(0, participant_count + ?2) WHERE id = ?1",
    )
    .bind(challenge_id)
    .bind(delta)
    .execute(exec)
    .await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────

pub async fn insert_user(pool: &SqlitePool, user: &UserSummary, now: DateTime<Utc>) -> Result<()> {
    sqlx::query("INSERT INTO users (id, username, email, created_at) VALUES (?1, ?2, ?3, ?4)")
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(now)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_user(pool: &SqlitePool, id: &str) -> Result<Option<UserSummary>> {
    let row = sqlx::query_as::<_, UserSummary>(
        "SELECT id, username, email FROM users WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

// ─────────────────────────────────────────────────────────
// Participations
// ─────────────────────────────────────────────────────────

const PARTICIPATION_COLUMNS: &str = r#"
    id, user_id, challenge_id, status, progress, carbon_saved,
    activities, joined_at, updated_at
"#;

pub async fn find_participation(
    pool: &SqlitePool,
    user_id: &str,
    challenge_id: &str,
) -> Result<Option<ParticipationRow>> {
    let row = sqlx::query_as::<_, ParticipationRow>(&format!(
        "SELECT {PARTICIPATION_COLUMNS} FROM participations WHERE user_id = ?1 AND challenge_id = ?2"
    ))
    .bind(user_id)
    .bind(challenge_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_participation(pool: &SqlitePool, id: &str) -> Result<Option<ParticipationRow>> {
    let row = sqlx::query_as::<_, ParticipationRow>(&format!(
        "SELECT {PARTICIPATION_COLUMNS} FROM participations WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Insert a fresh participation with zeroed progress.  A uniqueness violation
/// on `(user_id, challenge_id)` surfaces as a database error for the caller
/// to map to a conflict.
pub async fn insert_participation<'e, E>(
    exec: E,
    id: &str,
    user_id: &str,
    challenge_id: &str,
    now: DateTime<Utc>,
) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO participations
            (id, user_id, challenge_id, status, progress, carbon_saved,
             activities, joined_at, updated_at)
        VALUES (?1, ?2, ?3, 'active', 0, 0, '[]', ?4, ?4)
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(challenge_id)
    .bind(now)
    .execute(exec)
    .await?;
    Ok(())
}

/// Rejoin: full restart — progress, carbon and the activity log are wiped.
pub async fn reset_participation<'e, E>(exec: E, id: &str, now: DateTime<Utc>) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE participations
        SET    status = 'active', progress = 0, carbon_saved = 0,
               activities = '[]', joined_at = ?2, updated_at = ?2
        WHERE  id = ?1
        "#,
    )
    .bind(id)
    .bind(now)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn set_participation_status<'e, E>(
    exec: E,
    id: &str,
    status: &str,
    now: DateTime<Utc>,
) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query("UPDATE participations SET status = ?2, updated_at = ?3 WHERE id = ?1")
        .bind(id)
        .bind(status)
        .bind(now)
        .execute(exec)
        .await?;
    Ok(())
}

/// Persist derived state after a ledger mutation or progress override.
pub async fn save_participation_state(
    pool: &SqlitePool,
    participation: &Participation,
) -> Result<()> {
    let activities = serde_json::to_string(&participation.activities)?;
    sqlx::query(
        r#"
        UPDATE participations
        SET    status = ?2, progress = ?3, carbon_saved = ?4,
               activities = ?5, updated_at = ?6
        WHERE  id = ?1
        "#,
    )
    .bind(&participation.id)
    .bind(participation.status.as_str())
    .bind(participation.progress)
    .bind(participation.carbon_saved)
    .bind(activities)
    .bind(participation.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn count_participants(pool: &SqlitePool, challenge_id: &str) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM participations WHERE challenge_id = ?1 AND status != 'abandoned'",
    )
    .bind(challenge_id)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// One leaderboard page, ordered by progress descending with a stable
/// tiebreak, joined with the owner's display fields.
pub async fn list_participants_page(
    pool: &SqlitePool,
    challenge_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<ParticipantRow>> {
    let rows = sqlx::query_as::<_, ParticipantRow>(
        r#"
        SELECT p.id, p.user_id, p.challenge_id, p.status, p.progress,
               p.carbon_saved, p.joined_at, u.username, u.email
        FROM   participations p
        LEFT JOIN users u ON u.id = p.user_id
        WHERE  p.challenge_id = ?1 AND p.status != 'abandoned'
        ORDER  BY p.progress DESC, p.joined_at ASC, p.id ASC
        LIMIT  ?2 OFFSET ?3
        "#,
    )
    .bind(challenge_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// All of one user's participations, abandoned ones excluded.
pub async fn list_user_participations(
    pool: &SqlitePool,
    user_id: &str,
) -> Result<Vec<ParticipationRow>> {
    let rows = sqlx::query_as::<_, ParticipationRow>(&format!(
        r#"
        SELECT {PARTICIPATION_COLUMNS}
        FROM   participations
        WHERE  user_id = ?1 AND status != 'abandoned'
        ORDER  BY joined_at DESC
        "#
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Test support
// ─────────────────────────────────────────────────────────

/// Single-connection in-memory pool with migrations applied.  One connection
/// only: each `sqlite::memory:` connection is its own database.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    MIGRATOR.run(&pool).await.expect("migrations");
    pool
}
