use std::fmt::Write as _;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct Metrics {
    // Draft/publish ledger
    pub draft_mutations_total: AtomicU64,
    pub publishes_total: AtomicU64,
    pub publish_noops_total: AtomicU64,

    // Guest sessions
    pub sessions_created_total: AtomicU64,
    pub sessions_resumed_total: AtomicU64,
    pub session_links_total: AtomicU64,

    // Flow router
    pub flow_redirects_total: AtomicU64,

    // Watch tasks
    pub watch_tasks_gauge: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            draft_mutations_total: AtomicU64::new(0),
            publishes_total: AtomicU64::new(0),
            publish_noops_total: AtomicU64::new(0),
            sessions_created_total: AtomicU64::new(0),
            sessions_resumed_total: AtomicU64::new(0),
            session_links_total: AtomicU64::new(0),
            flow_redirects_total: AtomicU64::new(0),
            watch_tasks_gauge: AtomicU64::new(0),
        }
    }
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::default)
}

pub(crate) fn record_draft_mutation() {
    metrics()
        .draft_mutations_total
        .fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_publish() {
    metrics().publishes_total.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_publish_noop() {
    metrics().publish_noops_total.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_session_created() {
    metrics()
        .sessions_created_total
        .fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_session_resumed() {
    metrics()
        .sessions_resumed_total
        .fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_session_link() {
    metrics().session_links_total.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn record_flow_redirect() {
    metrics().flow_redirects_total.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn watch_task_started() {
    metrics().watch_tasks_gauge.fetch_add(1, Ordering::Relaxed);
}

pub(crate) fn watch_task_stopped() {
    // Saturating decrement so teardown racing startup accounting cannot wrap the gauge.
    let _ = metrics()
        .watch_tasks_gauge
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            Some(v.saturating_sub(1))
        });
}

pub fn render_prometheus() -> String {
    let m = metrics();
    let mut s = String::new();
    // ledger
    let _ = writeln!(
        s,
        "# TYPE draft_mutations_total counter\ndraft_mutations_total {}",
        m.draft_mutations_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE publishes_total counter\npublishes_total {}",
        m.publishes_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE publish_noops_total counter\npublish_noops_total {}",
        m.publish_noops_total.load(Ordering::Relaxed)
    );
    // sessions
    let _ = writeln!(
        s,
        "# TYPE sessions_created_total counter\nsessions_created_total {}",
        m.sessions_created_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE sessions_resumed_total counter\nsessions_resumed_total {}",
        m.sessions_resumed_total.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        s,
        "# TYPE session_links_total counter\nsession_links_total {}",
        m.session_links_total.load(Ordering::Relaxed)
    );
    // router
    let _ = writeln!(
        s,
        "# TYPE flow_redirects_total counter\nflow_redirects_total {}",
        m.flow_redirects_total.load(Ordering::Relaxed)
    );
    // watches
    let _ = writeln!(
        s,
        "# TYPE watch_tasks_gauge gauge\nwatch_tasks_gauge {}",
        m.watch_tasks_gauge.load(Ordering::Relaxed)
    );
    s
}
