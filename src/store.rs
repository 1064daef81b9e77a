use crate::{
    Result,
    configs::Configs,
    editor::Editor,
    experiences::Experiences,
    flow::FlowRouter,
    progress::Progress,
    schema::SchemaManager,
    sessions::Sessions,
};
use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;
use uuid::Uuid;

/// Facade over the connection pool. Cheap to clone; every accessor hands out
/// a per-concern API sharing the same pool.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPool::connect(url).await?;
        Ok(Self { pool })
    }

    pub fn builder(url: impl Into<String>) -> StoreBuilder {
        StoreBuilder::new(url)
    }

    /// Draft/published configuration ledger.
    pub fn configs(&self) -> Configs {
        Configs::new(self.pool.clone())
    }

    /// Guest session records.
    pub fn sessions(&self) -> Sessions {
        Sessions::new(self.pool.clone())
    }

    /// Per-guest completion records.
    pub fn progress(&self) -> Progress {
        Progress::new(self.pool.clone())
    }

    /// Workspace experience catalog.
    pub fn experiences(&self) -> Experiences {
        Experiences::new(self.pool.clone())
    }

    /// Stage decision engine over published config + catalog + progress.
    pub fn flow(&self) -> FlowRouter {
        FlowRouter::new(self.configs(), self.experiences(), self.progress())
    }

    /// An editing session over one configuration record, with its own change
    /// tracker.
    pub fn editor(&self, entity_id: Uuid) -> Editor {
        Editor::new(self.configs(), entity_id)
    }

    pub fn schema(&self) -> SchemaManager {
        SchemaManager::new(self.pool.clone())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Lightweight liveness check for the connection pool.
    pub async fn pool_health(&self) -> Result<PoolHealth> {
        let one: i32 = sqlx::query_scalar("select 1").fetch_one(&self.pool).await?;
        Ok(PoolHealth { ok: one == 1 })
    }
}

pub struct StoreBuilder {
    url: String,
    max_connections: Option<u32>,
    connect_timeout: Option<Duration>,
}

impl StoreBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: None,
            connect_timeout: None,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max.max(1));
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub async fn build(self) -> Result<Store> {
        let mut opts = PgPoolOptions::new();
        if let Some(max) = self.max_connections {
            opts = opts.max_connections(max);
        }
        if let Some(t) = self.connect_timeout {
            opts = opts.acquire_timeout(t);
        }
        let pool = opts.connect(&self.url).await?;
        Ok(Store { pool })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PoolHealth {
    pub ok: bool,
}
