use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

/// One step in an experience, in guest-facing order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    Capture {
        #[serde(default)]
        countdown_seconds: Option<u32>,
    },
    Input {
        prompt: String,
        #[serde(default)]
        required: bool,
    },
    Info {
        heading: String,
        #[serde(default)]
        body: Option<String>,
    },
}

/// A configured sequence of steps a guest completes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub steps: Vec<Step>,
}

/// The workspace's experience catalog.
#[derive(Clone)]
pub struct Experiences {
    pub(crate) pool: PgPool,
}

impl Experiences {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, experience: &Experience) -> Result<()> {
        let steps = serde_json::to_value(&experience.steps)?;
        sqlx::query(
            r#"insert into experiences (id, workspace_id, name, steps)
               values ($1, $2, $3, $4)
               on conflict (id) do update
                 set workspace_id = excluded.workspace_id,
                     name = excluded.name,
                     steps = excluded.steps,
                     updated_at = now()"#,
        )
        .bind(experience.id)
        .bind(experience.workspace_id)
        .bind(&experience.name)
        .bind(&steps)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, id: &Uuid) -> Result<Option<Experience>> {
        let row: Option<(Uuid, String, Value)> =
            sqlx::query_as("select workspace_id, name, steps from experiences where id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let Some((workspace_id, name, steps)) = row else {
            return Ok(None);
        };

        Ok(Some(Experience {
            id: *id,
            workspace_id,
            name,
            steps: serde_json::from_value(steps)?,
        }))
    }

    pub async fn list_for_workspace(&self, workspace_id: &Uuid) -> Result<Vec<Experience>> {
        let rows: Vec<(Uuid, String, Value)> = sqlx::query_as(
            "select id, name, steps from experiences where workspace_id = $1 order by name",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, name, steps)| {
                Ok(Experience {
                    id,
                    workspace_id: *workspace_id,
                    name,
                    steps: serde_json::from_value(steps)?,
                })
            })
            .collect()
    }

    /// Step count without deserializing the whole document; `None` when the
    /// experience does not exist.
    pub async fn step_count(&self, id: &Uuid) -> Result<Option<i64>> {
        let count: Option<i64> =
            sqlx::query_scalar("select jsonb_array_length(steps) from experiences where id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(count)
    }
}
