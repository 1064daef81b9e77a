//! Stageflow — draft/publish configuration versioning and guest session
//! orchestration for event experiences, powered by Postgres.

pub mod configs;
pub mod editor;
mod error;
pub mod experiences;
pub mod flow;
pub mod metrics;
pub mod progress;
pub mod schema;
pub mod sessions;
pub mod store;
pub mod subscriptions;
pub mod testing;

pub use configs::{ConfigRecord, ConfigVersions, Configs, DraftUpdate, EventConfig};
pub use editor::{ChangeTracker, Editor, SaveStatus};
pub use error::{Error, Result, WithContext};
pub use flow::{FlowRouter, Navigation, Stage, StageParams};
pub use schema::{SchemaConfig, SchemaPlan};
pub use sessions::{GuestContext, SessionHandle, Sessions};
pub use store::Store;

pub mod prelude {
    pub use crate::{
        ChangeTracker, DraftUpdate, Error, EventConfig, GuestContext, Navigation, Result, Stage,
        Store,
    };
}
