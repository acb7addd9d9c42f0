//! Domain records: challenges, users, and the participation documents that
//! link them.  Wire shapes use camelCase field names to match the public API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ApiError;

/// Lifecycle of one user's engagement with one challenge.
///
/// `completed` and `abandoned` are reached only through progress accrual and
/// administrative action respectively; an ordinary leave produces `inactive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipationStatus {
    Active,
    Inactive,
    Completed,
    Abandoned,
}

impl ParticipationStatus {
    /// Identifier string as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "completed" => Some(Self::Completed),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }
}

/// One logged activity, embedded in its owning participation.  Entries are
/// identity-bearing so removal never depends on position in the sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub date: DateTime<Utc>,
    pub description: String,
    pub impact_value: f64,
}

/// A participation as exposed by the API, with the activity log decoded.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participation {
    pub id: String,
    pub user: String,
    pub challenge: String,
    pub status: ParticipationStatus,
    pub progress: i64,
    pub carbon_saved: f64,
    pub activities: Vec<Activity>,
    pub joined_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A participation row as stored in / read from the database.  The activity
/// log is a JSON array in the `activities` column.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ParticipationRow {
    pub id: String,
    pub user_id: String,
    pub challenge_id: String,
    pub status: String,
    pub progress: i64,
    pub carbon_saved: f64,
    pub activities: String,
    pub joined_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ParticipationRow> for Participation {
    type Error = ApiError;

    fn try_from(row: ParticipationRow) -> Result<Self, ApiError> {
        let status = ParticipationStatus::from_db(&row.status).ok_or_else(|| {
            ApiError::Decode(format!(
                "participation {} has unknown status {:?}",
                row.id, row.status
            ))
        })?;
        let activities: Vec<Activity> = serde_json::from_str(&row.activities)?;

        Ok(Participation {
            id: row.id,
            user: row.user_id,
            challenge: row.challenge_id,
            status,
            progress: row.progress,
            carbon_saved: row.carbon_saved,
            activities,
            joined_at: row.joined_at,
            updated_at: row.updated_at,
        })
    }
}

/// A challenge record.  Read-mostly from the participation core's point of
/// view: it contributes `target_impact` and carries the participant counter.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub difficulty: String,
    pub points: i64,
    pub status: String,
    pub target_impact: f64,
    pub participant_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Minimal user identity fields for participant display.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub email: String,
}

/// Participation joined with the owner's display fields, as returned by the
/// participant-listing query.  User fields are nullable: a participation may
/// outlive its user record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ParticipantRow {
    pub id: String,
    pub user_id: String,
    pub challenge_id: String,
    pub status: String,
    pub progress: i64,
    pub carbon_saved: f64,
    pub joined_at: DateTime<Utc>,
    pub username: Option<String>,
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_db_strings() {
        for status in [
            ParticipationStatus::Active,
            ParticipationStatus::Inactive,
            ParticipationStatus::Completed,
            ParticipationStatus::Abandoned,
        ] {
            assert_eq!(ParticipationStatus::from_db(status.as_str()), Some(status));
        }
        assert_eq!(ParticipationStatus::from_db("in-progress"), None);
    }

    #[test]
    fn row_with_unknown_status_is_rejected() {
        let row = ParticipationRow {
            id: "p1".into(),
            user_id: "u1".into(),
            challenge_id: "c1".into(),
            status: "frozen".into(),
            progress: 0,
            carbon_saved: 0.0,
            activities: "[]".into(),
            joined_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(matches!(
            Participation::try_from(row),
            Err(ApiError::Decode(_))
        ));
    }
}
