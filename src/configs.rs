use crate::{Error, Result, metrics};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};
use sqlx::PgPool;
use uuid::Uuid;

/// Guest-facing appearance settings for an event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Theme {
    pub background_color: Option<String>,
    pub text_color: Option<String>,
    pub logo_url: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharingOptions {
    pub enabled: bool,
    pub caption: Option<String>,
    pub download_enabled: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayPlacement {
    #[default]
    FullFrame,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Overlay {
    pub id: Uuid,
    pub image_url: String,
    #[serde(default)]
    pub placement: OverlayPlacement,
}

/// The full configuration of one event, stored as `jsonb` in both the draft
/// and published columns. Unknown fields in older snapshots are tolerated on
/// read; absent fields take their defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    pub theme: Theme,
    pub pregate_experience_id: Option<Uuid>,
    pub main_experience_id: Option<Uuid>,
    pub preshare_experience_id: Option<Uuid>,
    pub sharing: SharingOptions,
    pub overlays: Vec<Overlay>,
}

/// One versioned configuration row: the freely mutated draft and the
/// guest-visible published snapshot, with their version bookkeeping.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub id: Uuid,
    pub draft: Option<EventConfig>,
    pub published: Option<EventConfig>,
    pub draft_version: Option<i32>,
    pub published_version: Option<i32>,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ConfigRecord {
    /// Derived, never stored. False when no draft has ever been written.
    pub fn has_unpublished_changes(&self) -> bool {
        self.versions().has_unpublished_changes()
    }

    pub fn versions(&self) -> ConfigVersions {
        ConfigVersions {
            draft_version: self.draft_version,
            published_version: self.published_version,
        }
    }
}

/// The record's version pair on its own, cheap to ship over a watch channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigVersions {
    pub draft_version: Option<i32>,
    pub published_version: Option<i32>,
}

impl ConfigVersions {
    pub fn has_unpublished_changes(&self) -> bool {
        match (self.draft_version, self.published_version) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(draft), Some(published)) => draft > published,
        }
    }
}

#[derive(Clone, Debug)]
enum UpdateOp {
    /// Deep-merge a partial object into the draft: nested objects merge
    /// key-by-key, everything else replaces.
    Merge(Value),
    /// Replace the value at a dot path, creating parent objects as needed.
    Set(String, Value),
}

/// A batch of draft field updates applied as one atomic mutation.
#[derive(Clone, Debug, Default)]
pub struct DraftUpdate {
    ops: Vec<UpdateOp>,
}

impl DraftUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deep-merge a partial config object. Sibling fields of any nested
    /// object not named in `partial` are left untouched.
    pub fn merge(mut self, partial: Value) -> Self {
        self.ops.push(UpdateOp::Merge(partial));
        self
    }

    /// Set a single field by dot path, e.g. `"sharing.caption"`.
    pub fn set(mut self, path: impl Into<String>, value: Value) -> Self {
        self.ops.push(UpdateOp::Set(path.into(), value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn apply_to(&self, draft: &mut Value) {
        for op in &self.ops {
            match op {
                UpdateOp::Merge(partial) => deep_merge(draft, partial),
                UpdateOp::Set(path, value) => set_path(draft, path, value.clone()),
            }
        }
    }
}

fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match target_map.get_mut(key) {
                    Some(existing) if existing.is_object() && patch_value.is_object() => {
                        deep_merge(existing, patch_value);
                    }
                    _ => {
                        target_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn set_path(target: &mut Value, path: &str, value: Value) {
    let mut current = target;
    let parts: Vec<&str> = path.split('.').collect();
    for (i, part) in parts.iter().enumerate() {
        if i == parts.len() - 1 {
            if !current.is_object() {
                *current = Value::Object(JsonMap::new());
            }
            current
                .as_object_mut()
                .expect("just coerced to object")
                .insert((*part).to_string(), value);
            return;
        }
        if !current.is_object() {
            *current = Value::Object(JsonMap::new());
        }
        current = current
            .as_object_mut()
            .expect("just coerced to object")
            .entry((*part).to_string())
            .or_insert_with(|| Value::Object(JsonMap::new()));
    }
}

/// Draft/published version ledger over `event_configs`.
#[derive(Clone)]
pub struct Configs {
    pub(crate) pool: PgPool,
}

impl Configs {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply a batch of field updates to the draft inside a single
    /// transaction: read the current draft under a row lock (initializing it
    /// lazily if absent), merge, write back, bump `draft_version`.
    ///
    /// Returns the new draft version. Two concurrent mutations against the
    /// same entity serialize on the row lock, so neither loses the other's
    /// fields.
    pub async fn mutate_draft(&self, id: &Uuid, update: DraftUpdate) -> Result<i32> {
        if update.is_empty() {
            // No-op: report the current version without bumping it.
            let version: Option<Option<i32>> =
                sqlx::query_scalar("select draft_version from event_configs where id = $1")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
            return version.flatten().ok_or(Error::ConfigNotFound(*id));
        }

        let mut tx = self.pool.begin().await?;

        // Materialize the row first so the locked read below always has
        // something to lock; two first-ever mutations racing serialize here
        // instead of colliding on insert.
        sqlx::query("insert into event_configs (id) values ($1) on conflict (id) do nothing")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let (draft, version): (Option<Value>, Option<i32>) = sqlx::query_as(
            "select draft, draft_version from event_configs where id = $1 for update",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        let mut draft = match draft {
            Some(value) => value,
            None => serde_json::to_value(EventConfig::default())?,
        };

        update.apply_to(&mut draft);
        // Reject updates that leave the draft unreadable as a config.
        let _: EventConfig = serde_json::from_value(draft.clone())?;

        let next_version = version.unwrap_or(0) + 1;
        sqlx::query(
            r#"update event_configs
               set draft = $2, draft_version = $3, updated_at = now()
               where id = $1"#,
        )
        .bind(id)
        .bind(&draft)
        .bind(next_version)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        metrics::record_draft_mutation();
        Ok(next_version)
    }

    /// Atomically copy the current draft to the published snapshot and
    /// synchronize versions. The statement re-reads the draft at commit time,
    /// so a publish racing a draft mutation snapshots whatever draft state
    /// the row holds when the lock is granted.
    ///
    /// Publishing an already-published version is a successful no-op that
    /// leaves `published_at` untouched.
    pub async fn publish(&self, id: &Uuid) -> Result<i32> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(bool, Option<i32>, Option<i32>)> = sqlx::query_as(
            r#"select draft is not null, draft_version, published_version
               from event_configs where id = $1 for update"#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((has_draft, draft_version, published_version)) = row else {
            return Err(Error::ConfigNotFound(*id));
        };
        if !has_draft {
            return Err(Error::NoDraftConfigured(*id));
        }
        if let (Some(draft), Some(published)) = (draft_version, published_version) {
            if draft == published {
                metrics::record_publish_noop();
                return Ok(published);
            }
        }

        let version = draft_version.unwrap_or(1);
        sqlx::query(
            r#"update event_configs
               set published = draft,
                   published_version = $2,
                   published_at = now(),
                   updated_at = now()
               where id = $1"#,
        )
        .bind(id)
        .bind(version)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        metrics::record_publish();
        Ok(version)
    }

    pub async fn record(&self, id: &Uuid) -> Result<Option<ConfigRecord>> {
        let row: Option<(
            Option<Value>,
            Option<Value>,
            Option<i32>,
            Option<i32>,
            Option<DateTime<Utc>>,
            DateTime<Utc>,
        )> = sqlx::query_as(
            r#"select draft, published, draft_version, published_version, published_at, updated_at
               from event_configs where id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((draft, published, draft_version, published_version, published_at, updated_at)) =
            row
        else {
            return Ok(None);
        };

        Ok(Some(ConfigRecord {
            id: *id,
            draft: draft.map(serde_json::from_value).transpose()?,
            published: published.map(serde_json::from_value).transpose()?,
            draft_version,
            published_version,
            published_at,
            updated_at,
        }))
    }

    /// The guest-visible snapshot, or `None` when nothing has been published.
    pub async fn published(&self, id: &Uuid) -> Result<Option<EventConfig>> {
        let value: Option<Option<Value>> =
            sqlx::query_scalar("select published from event_configs where id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        value
            .flatten()
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }

    /// Derived save-state predicate; false for records that were never drafted
    /// and for ids with no record at all.
    pub async fn has_unpublished_changes(&self, id: &Uuid) -> Result<bool> {
        let row: Option<(Option<i32>, Option<i32>)> = sqlx::query_as(
            "select draft_version, published_version from event_configs where id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|(draft_version, published_version)| ConfigVersions {
                draft_version,
                published_version,
            })
            .is_some_and(|versions| versions.has_unpublished_changes()))
    }
}
