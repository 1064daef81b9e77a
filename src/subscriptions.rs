use crate::configs::ConfigVersions;
use crate::metrics;
use crate::sessions::{SessionRecord, SessionState};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};
use uuid::Uuid;

#[derive(Clone, Copy, Debug)]
pub struct WatchOptions {
    pub poll_interval: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Aborts the owned polling task when the last clone drops, so a subscription
/// outliving its page container becomes a no-op instead of writing into
/// now-irrelevant state.
#[derive(Debug)]
pub(crate) struct WatchGuard {
    handle: JoinHandle<()>,
}

impl WatchGuard {
    pub(crate) fn new(handle: JoinHandle<()>) -> Self {
        metrics::watch_task_started();
        Self { handle }
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.handle.abort();
        metrics::watch_task_stopped();
    }
}

/// Spawn a polling watch over one `guest_sessions` row. The receiver starts
/// at `SessionState::Loading` and observes every committed change; delivery
/// stops when all receivers drop or the guard aborts the task.
pub(crate) fn watch_session(
    pool: PgPool,
    id: Uuid,
    opts: WatchOptions,
) -> (watch::Receiver<SessionState>, WatchGuard) {
    let (tx, rx) = watch::channel(SessionState::Loading);

    let handle = tokio::spawn(async move {
        let mut last_seen: Option<DateTime<Utc>> = None;
        loop {
            let row: Result<Option<SessionRecord>, sqlx::Error> = sqlx::query_as(
                r#"select id, project_id, workspace_id, event_id, experience_id,
                          main_session_id, created_at, updated_at
                   from guest_sessions where id = $1"#,
            )
            .bind(id)
            .fetch_optional(&pool)
            .await;

            match row {
                Ok(Some(record)) => {
                    if last_seen != Some(record.updated_at) {
                        last_seen = Some(record.updated_at);
                        if tx.send(SessionState::Ready(record)).is_err() {
                            return;
                        }
                    }
                }
                Ok(None) => {
                    tracing::warn!(session_id = %id, "watched session row missing");
                    if tx.send(SessionState::Missing).is_err() {
                        return;
                    }
                }
                Err(err) => {
                    // Transient read failures keep the last delivered state.
                    tracing::warn!(session_id = %id, error = %err, "session watch poll failed");
                }
            }

            tokio::select! {
                _ = tx.closed() => return,
                _ = sleep(opts.poll_interval) => {}
            }
        }
    });

    (rx, WatchGuard::new(handle))
}

/// Spawn a polling watch over one `event_configs` row, delivering the
/// version pair whenever the row commits a change. The editor top bar
/// derives its unpublished indicator from this without re-reading the whole
/// record.
pub(crate) fn watch_config_versions(
    pool: PgPool,
    id: Uuid,
    opts: WatchOptions,
) -> (watch::Receiver<Option<ConfigVersions>>, WatchGuard) {
    let (tx, rx) = watch::channel(None);

    let handle = tokio::spawn(async move {
        let mut last_seen: Option<DateTime<Utc>> = None;
        loop {
            let row: Result<Option<(Option<i32>, Option<i32>, DateTime<Utc>)>, sqlx::Error> =
                sqlx::query_as(
                    r#"select draft_version, published_version, updated_at
                       from event_configs where id = $1"#,
                )
                .bind(id)
                .fetch_optional(&pool)
                .await;

            match row {
                Ok(Some((draft_version, published_version, updated_at))) => {
                    if last_seen != Some(updated_at) {
                        last_seen = Some(updated_at);
                        let versions = ConfigVersions {
                            draft_version,
                            published_version,
                        };
                        if tx.send(Some(versions)).is_err() {
                            return;
                        }
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(config_id = %id, error = %err, "config watch poll failed");
                }
            }

            tokio::select! {
                _ = tx.closed() => return,
                _ = sleep(opts.poll_interval) => {}
            }
        }
    });

    (rx, WatchGuard::new(handle))
}
