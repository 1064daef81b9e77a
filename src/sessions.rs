use crate::{
    Error, Result, metrics,
    subscriptions::{WatchGuard, WatchOptions, watch_session},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::{OnceCell, watch};
use uuid::Uuid;

/// Identifies where a guest session lives: which project, workspace, event,
/// and experience stage it belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GuestContext {
    pub project_id: Uuid,
    pub workspace_id: Uuid,
    pub event_id: Uuid,
    pub experience_id: Uuid,
}

/// One guest's traversal record through one experience stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub workspace_id: Uuid,
    pub event_id: Uuid,
    pub experience_id: Uuid,
    pub main_session_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a stage container currently knows about its session document.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionState {
    Loading,
    Ready(SessionRecord),
    /// The watched row disappeared. Sessions are never deleted mid-visit, so
    /// shells treat this as the error state.
    Missing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    /// A previous link already won; the stored main session id is returned.
    AlreadyLinked(Uuid),
}

/// Creation, resumption, and linking of guest session records.
#[derive(Clone)]
pub struct Sessions {
    pub(crate) pool: PgPool,
}

impl Sessions {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, ctx: &GuestContext) -> Result<SessionRecord> {
        let record: SessionRecord = sqlx::query_as(
            r#"insert into guest_sessions (id, project_id, workspace_id, event_id, experience_id)
               values ($1, $2, $3, $4, $5)
               returning id, project_id, workspace_id, event_id, experience_id,
                         main_session_id, created_at, updated_at"#,
        )
        .bind(Uuid::new_v4())
        .bind(ctx.project_id)
        .bind(ctx.workspace_id)
        .bind(ctx.event_id)
        .bind(ctx.experience_id)
        .fetch_one(&self.pool)
        .await?;
        metrics::record_session_created();
        Ok(record)
    }

    pub async fn get(&self, id: &Uuid) -> Result<Option<SessionRecord>> {
        let record: Option<SessionRecord> = sqlx::query_as(
            r#"select id, project_id, workspace_id, event_id, experience_id,
                      main_session_id, created_at, updated_at
               from guest_sessions where id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Set `main_session_id` on a pregate/preshare session, once. The guarded
    /// update makes the write at-most-once at the storage layer no matter how
    /// many times the triggering condition re-fires.
    pub async fn link(&self, child: &Uuid, main: &Uuid) -> Result<LinkOutcome> {
        loop {
            let updated = sqlx::query(
                r#"update guest_sessions
                   set main_session_id = $2, updated_at = now()
                   where id = $1 and main_session_id is null"#,
            )
            .bind(child)
            .bind(main)
            .execute(&self.pool)
            .await?;

            if updated.rows_affected() == 1 {
                metrics::record_session_link();
                return Ok(LinkOutcome::Linked);
            }

            let existing: Option<Option<Uuid>> =
                sqlx::query_scalar("select main_session_id from guest_sessions where id = $1")
                    .bind(child)
                    .fetch_optional(&self.pool)
                    .await?;

            match existing {
                None => return Err(Error::SessionNotFound(*child)),
                Some(Some(main)) => return Ok(LinkOutcome::AlreadyLinked(main)),
                // The row was absent when the guarded update ran but exists
                // now, still unlinked: it was created in between. Retry; the
                // next update either wins or observes the winner.
                Some(None) => continue,
            }
        }
    }

    /// Fire-and-forget link. Failures are logged, never surfaced: a missing
    /// link must not block the guest's progression through the experience.
    pub fn link_best_effort(&self, child: Uuid, main: Uuid) {
        let sessions = self.clone();
        tokio::spawn(async move {
            if let Err(err) = sessions.link(&child, &main).await {
                tracing::warn!(
                    child_session = %child,
                    main_session = %main,
                    error = %err,
                    "best-effort session link failed",
                );
            }
        });
    }

    /// A one-shot binder for one stage container instance. Hold it for the
    /// container's lifetime; every `ensure` call resolves the same session.
    pub fn binder(&self, ctx: GuestContext) -> SessionBinder {
        SessionBinder {
            sessions: self.clone(),
            ctx,
            watch_opts: WatchOptions::default(),
            bound: OnceCell::new(),
            link_gate: OnceCell::new(),
        }
    }
}

#[derive(Clone)]
struct BoundSession {
    session_id: Uuid,
    updates: watch::Receiver<SessionState>,
    guard: Arc<WatchGuard>,
}

/// Idempotent-enable guard around session creation. Re-renders and remounts
/// of the owning container may call `ensure` any number of times, possibly
/// concurrently; exactly one session is created or resumed per binder.
pub struct SessionBinder {
    sessions: Sessions,
    ctx: GuestContext,
    watch_opts: WatchOptions,
    bound: OnceCell<BoundSession>,
    link_gate: OnceCell<()>,
}

impl SessionBinder {
    pub fn watch_options(mut self, opts: WatchOptions) -> Self {
        self.watch_opts = opts;
        self
    }

    /// Resolve the binder's session: resume `existing` when it is provided
    /// and still resolves, otherwise create a new session. A stale or
    /// tampered id falls back to creation rather than stranding the guest.
    ///
    /// On failure the guard stays unarmed, so a retry can attempt creation
    /// again.
    pub async fn ensure(&self, existing: Option<Uuid>) -> Result<SessionHandle> {
        let bound = self
            .bound
            .get_or_try_init(|| async {
                let record = match existing {
                    Some(id) => match self.sessions.get(&id).await? {
                        Some(record) => {
                            metrics::record_session_resumed();
                            record
                        }
                        None => {
                            tracing::warn!(
                                session_id = %id,
                                "session id from URL did not resolve; creating a new session",
                            );
                            self.sessions.create(&self.ctx).await?
                        }
                    },
                    None => self.sessions.create(&self.ctx).await?,
                };

                let (updates, guard) =
                    watch_session(self.sessions.pool.clone(), record.id, self.watch_opts);
                Ok::<_, Error>(BoundSession {
                    session_id: record.id,
                    updates,
                    guard: Arc::new(guard),
                })
            })
            .await?;

        Ok(SessionHandle {
            session_id: bound.session_id,
            updates: bound.updates.clone(),
            _guard: bound.guard.clone(),
        })
    }

    /// `ensure`, then link the resolved session to `main_session_id` exactly
    /// once per binder instance, best-effort. Used by preshare containers
    /// whose linking condition re-evaluates on every render.
    pub async fn ensure_linked(
        &self,
        existing: Option<Uuid>,
        main_session_id: Uuid,
    ) -> Result<SessionHandle> {
        let handle = self.ensure(existing).await?;
        self.link_gate
            .get_or_init(|| async {
                self.sessions
                    .link_best_effort(handle.session_id(), main_session_id);
            })
            .await;
        Ok(handle)
    }

    /// The resolved session id, if `ensure` has completed.
    pub fn session_id(&self) -> Option<Uuid> {
        self.bound.get().map(|b| b.session_id)
    }
}

/// A live handle to one session: the stable id plus a subscription to the
/// record. The polling task aborts once the binder and every handle created
/// from it have dropped, so a late poll cannot touch a torn-down container.
pub struct SessionHandle {
    session_id: Uuid,
    updates: watch::Receiver<SessionState>,
    _guard: Arc<WatchGuard>,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// The most recently delivered state.
    pub fn state(&self) -> SessionState {
        self.updates.borrow().clone()
    }

    /// Wait for the next committed change to the session record.
    pub async fn changed(&mut self) -> Result<SessionState> {
        self.updates
            .changed()
            .await
            .map_err(|_| Error::WatchClosed)?;
        Ok(self.updates.borrow().clone())
    }

    /// Wait until the session document has been delivered at least once.
    pub async fn ready(&mut self) -> Result<SessionRecord> {
        loop {
            match self.state() {
                SessionState::Ready(record) => return Ok(record),
                SessionState::Missing => return Err(Error::SessionNotFound(self.session_id)),
                SessionState::Loading => {
                    self.updates
                        .changed()
                        .await
                        .map_err(|_| Error::WatchClosed)?;
                }
            }
        }
    }

    pub fn updates(&self) -> watch::Receiver<SessionState> {
        self.updates.clone()
    }
}
