use crate::{
    Result,
    configs::{ConfigRecord, ConfigVersions, Configs, DraftUpdate},
    subscriptions::{WatchGuard, WatchOptions, watch_config_versions},
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use uuid::Uuid;

/// How long the save indicator shows "recently saved" after the last pending
/// save drains.
pub const RECENTLY_SAVED_WINDOW_MS: i64 = 3_000;

/// Injectable time source so save-window logic is testable without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveStatus {
    Saving,
    RecentlySaved,
    Idle,
}

#[derive(Debug, Default)]
struct TrackState {
    pending_saves: u32,
    last_completed_at: Option<DateTime<Utc>>,
}

/// Reference-counted pending-save counter feeding the editor's save
/// indicator. Concurrent in-flight mutations collapse into one "saving"
/// state; the indicator only flips to "recently saved" when the last one
/// drains.
///
/// State is owned by one editing session. Clones share the counter; separate
/// editors (or tests) construct their own tracker.
#[derive(Clone)]
pub struct ChangeTracker {
    state: Arc<Mutex<TrackState>>,
    clock: Arc<dyn Clock>,
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(TrackState::default())),
            clock,
        }
    }

    pub fn start_save(&self) {
        let mut state = self.state.lock().expect("tracker state poisoned");
        state.pending_saves += 1;
    }

    /// Decrement the pending counter, floored at zero. `last_completed_at`
    /// is stamped only when this call drains the counter from exactly one to
    /// zero; an unmatched complete leaves it alone.
    pub fn complete_save(&self) {
        let mut state = self.state.lock().expect("tracker state poisoned");
        match state.pending_saves {
            0 => {}
            1 => {
                state.pending_saves = 0;
                state.last_completed_at = Some(self.clock.now());
            }
            n => state.pending_saves = n - 1,
        }
    }

    /// Unconditional reset, used when navigating away from an editor.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("tracker state poisoned");
        state.pending_saves = 0;
        state.last_completed_at = None;
    }

    pub fn pending_saves(&self) -> u32 {
        self.state.lock().expect("tracker state poisoned").pending_saves
    }

    pub fn last_completed_at(&self) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .expect("tracker state poisoned")
            .last_completed_at
    }

    /// Current indicator state. The "recently saved" window is measured from
    /// `last_completed_at` against the clock's now, so a component remounting
    /// mid-window still sees the remaining duration rather than a fresh one.
    pub fn status(&self) -> SaveStatus {
        let state = self.state.lock().expect("tracker state poisoned");
        if state.pending_saves > 0 {
            return SaveStatus::Saving;
        }
        match state.last_completed_at {
            Some(completed)
                if (self.clock.now() - completed).num_milliseconds()
                    < RECENTLY_SAVED_WINDOW_MS =>
            {
                SaveStatus::RecentlySaved
            }
            _ => SaveStatus::Idle,
        }
    }
}

/// Collapses a burst of field edits into a single deferred commit. Each
/// `call` cancels the previously scheduled commit; dropping the debouncer
/// cancels whatever is pending, so teardown cannot fire a commit against a
/// dead editing context.
#[derive(Debug, Default)]
pub struct Debouncer {
    pending: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call<F>(&mut self, delay: Duration, commit: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            commit.await;
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// One editing session over one configuration record: draft mutations wired
/// through the change tracker, plus the publish surface the editor top bar
/// consumes.
pub struct Editor {
    configs: Configs,
    entity_id: Uuid,
    tracker: ChangeTracker,
    publishing: Arc<AtomicBool>,
}

impl Editor {
    pub(crate) fn new(configs: Configs, entity_id: Uuid) -> Self {
        Self {
            configs,
            entity_id,
            tracker: ChangeTracker::new(),
            publishing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_tracker(mut self, tracker: ChangeTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn entity_id(&self) -> Uuid {
        self.entity_id
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    /// Commit a draft mutation, tracking it as a pending save for the
    /// indicator. The draft is left unchanged on failure; the error is the
    /// caller's to surface.
    pub async fn apply(&self, update: DraftUpdate) -> Result<i32> {
        self.tracker.start_save();
        let result = self.configs.mutate_draft(&self.entity_id, update).await;
        self.tracker.complete_save();
        result
    }

    pub async fn record(&self) -> Result<Option<ConfigRecord>> {
        self.configs.record(&self.entity_id).await
    }

    pub async fn has_unpublished_changes(&self) -> Result<bool> {
        self.configs.has_unpublished_changes(&self.entity_id).await
    }

    pub fn is_publishing(&self) -> bool {
        self.publishing.load(Ordering::Acquire)
    }

    pub async fn publish(&self) -> Result<i32> {
        self.publishing.store(true, Ordering::Release);
        let result = self.configs.publish(&self.entity_id).await;
        self.publishing.store(false, Ordering::Release);
        result
    }

    /// Live view of the record's version pair, for a top bar that wants its
    /// unpublished indicator pushed rather than polled by the UI itself.
    pub fn watch_versions(
        &self,
        opts: WatchOptions,
    ) -> (watch::Receiver<Option<ConfigVersions>>, EditorWatch) {
        let (rx, guard) = watch_config_versions(self.configs.pool.clone(), self.entity_id, opts);
        (rx, EditorWatch { _guard: guard })
    }
}

/// Keeps the version watch alive; drop to stop polling.
pub struct EditorWatch {
    _guard: WatchGuard,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        fn at(start: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(start),
            })
        }

        fn advance(&self, by: ChronoDuration) {
            let mut now = self.now.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    #[test]
    fn overlapping_saves_collapse() {
        let clock = ManualClock::at(Utc::now());
        let tracker = ChangeTracker::with_clock(clock.clone());

        tracker.start_save();
        tracker.start_save();
        tracker.start_save();
        assert_eq!(tracker.pending_saves(), 3);
        assert_eq!(tracker.status(), SaveStatus::Saving);

        tracker.complete_save();
        assert_eq!(tracker.pending_saves(), 2);
        assert_eq!(tracker.last_completed_at(), None);

        tracker.complete_save();
        assert_eq!(tracker.pending_saves(), 1);
        assert_eq!(tracker.last_completed_at(), None);

        tracker.complete_save();
        assert_eq!(tracker.pending_saves(), 0);
        assert_eq!(tracker.last_completed_at(), Some(clock.now()));
        assert_eq!(tracker.status(), SaveStatus::RecentlySaved);
    }

    #[test]
    fn unmatched_complete_does_not_go_negative() {
        let tracker = ChangeTracker::new();
        tracker.complete_save();
        tracker.complete_save();
        assert_eq!(tracker.pending_saves(), 0);
        // No 1 -> 0 transition happened, so no completion stamp either.
        assert_eq!(tracker.last_completed_at(), None);
        assert_eq!(tracker.status(), SaveStatus::Idle);
    }

    #[test]
    fn recently_saved_window_uses_wall_clock() {
        let clock = ManualClock::at(Utc::now());
        let tracker = ChangeTracker::with_clock(clock.clone());

        tracker.start_save();
        tracker.complete_save();
        assert_eq!(tracker.status(), SaveStatus::RecentlySaved);

        // A remount two seconds later is still inside the window.
        clock.advance(ChronoDuration::seconds(2));
        assert_eq!(tracker.status(), SaveStatus::RecentlySaved);

        clock.advance(ChronoDuration::seconds(2));
        assert_eq!(tracker.status(), SaveStatus::Idle);
    }

    #[test]
    fn reset_clears_everything() {
        let tracker = ChangeTracker::new();
        tracker.start_save();
        tracker.start_save();
        tracker.complete_save();
        tracker.reset();
        assert_eq!(tracker.pending_saves(), 0);
        assert_eq!(tracker.last_completed_at(), None);
        assert_eq!(tracker.status(), SaveStatus::Idle);
    }

    #[tokio::test]
    async fn debouncer_collapses_bursts_into_one_commit() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let commits = Arc::new(AtomicU32::new(0));
        let mut debouncer = Debouncer::new();
        for _ in 0..5 {
            let commits = commits.clone();
            debouncer.call(Duration::from_millis(50), async move {
                commits.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(commits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropping_debouncer_cancels_the_pending_commit() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let commits = Arc::new(AtomicU32::new(0));
        {
            let mut debouncer = Debouncer::new();
            let commits = commits.clone();
            debouncer.call(Duration::from_millis(50), async move {
                commits.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(commits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn completion_mid_burst_keeps_saving_without_stamp() {
        let clock = ManualClock::at(Utc::now());
        let tracker = ChangeTracker::with_clock(clock.clone());

        // A text edit and an image upload in flight together; the first one
        // finishing must not flicker the indicator.
        tracker.start_save();
        tracker.start_save();
        tracker.complete_save();
        assert_eq!(tracker.status(), SaveStatus::Saving);
        assert_eq!(tracker.last_completed_at(), None);
    }
}
