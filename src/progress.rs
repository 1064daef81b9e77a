use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

/// Per-guest record of which experiences have been completed. Created on
/// first contact, only ever grows.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuestProgress {
    pub event_id: Uuid,
    pub guest_id: Uuid,
    pub completed: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GuestProgress {
    pub fn is_complete(&self, experience_id: &Uuid) -> bool {
        self.completed.contains(experience_id)
    }
}

#[derive(Clone)]
pub struct Progress {
    pub(crate) pool: PgPool,
}

impl Progress {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record an experience as complete for this guest. Monotonic and
    /// idempotent: marking twice is a no-op, and nothing ever unmarks.
    pub async fn mark_complete(
        &self,
        event_id: &Uuid,
        guest_id: &Uuid,
        experience_id: &Uuid,
    ) -> Result<()> {
        sqlx::query(
            r#"insert into guest_progress (event_id, guest_id, completed)
               values ($1, $2, jsonb_build_array($3::text))
               on conflict (event_id, guest_id) do update
                 set completed = case
                       when guest_progress.completed @> excluded.completed
                         then guest_progress.completed
                       else guest_progress.completed || excluded.completed
                     end,
                     updated_at = now()"#,
        )
        .bind(event_id)
        .bind(guest_id)
        .bind(experience_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn is_complete(
        &self,
        event_id: &Uuid,
        guest_id: &Uuid,
        experience_id: &Uuid,
    ) -> Result<bool> {
        let complete: bool = sqlx::query_scalar(
            r#"select exists (
                   select 1 from guest_progress
                   where event_id = $1
                     and guest_id = $2
                     and completed @> jsonb_build_array($3::text)
               )"#,
        )
        .bind(event_id)
        .bind(guest_id)
        .bind(experience_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(complete)
    }

    pub async fn get(&self, event_id: &Uuid, guest_id: &Uuid) -> Result<Option<GuestProgress>> {
        let row: Option<(Value, DateTime<Utc>, DateTime<Utc>)> = sqlx::query_as(
            r#"select completed, created_at, updated_at
               from guest_progress where event_id = $1 and guest_id = $2"#,
        )
        .bind(event_id)
        .bind(guest_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((completed, created_at, updated_at)) = row else {
            return Ok(None);
        };

        Ok(Some(GuestProgress {
            event_id: *event_id,
            guest_id: *guest_id,
            completed: serde_json::from_value(completed)?,
            created_at,
            updated_at,
        }))
    }

    /// First-contact initialization: create the guest's progress record if it
    /// does not exist yet and return it.
    pub async fn ensure(&self, event_id: &Uuid, guest_id: &Uuid) -> Result<GuestProgress> {
        let row: (Value, DateTime<Utc>, DateTime<Utc>) = sqlx::query_as(
            r#"insert into guest_progress (event_id, guest_id)
               values ($1, $2)
               on conflict (event_id, guest_id) do update set updated_at = guest_progress.updated_at
               returning completed, created_at, updated_at"#,
        )
        .bind(event_id)
        .bind(guest_id)
        .fetch_one(&self.pool)
        .await?;

        let (completed, created_at, updated_at) = row;
        Ok(GuestProgress {
            event_id: *event_id,
            guest_id: *guest_id,
            completed: serde_json::from_value(completed)?,
            created_at,
            updated_at,
        })
    }
}
