use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("configuration record not found: {0}")]
    ConfigNotFound(Uuid),
    #[error("no draft configured for {0}")]
    NoDraftConfigured(Uuid),
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),
    #[error("experience not found: {0}")]
    ExperienceNotFound(Uuid),
    #[error("experience {0} has no steps")]
    EmptyExperience(Uuid),
    #[error("watch channel closed")]
    WatchClosed,
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

pub trait WithContext<T> {
    fn context(self, msg: impl Into<String>) -> Result<T>;
}

impl<T> WithContext<T> for Result<T> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Context {
            context: msg.into(),
            source: Box::new(e),
        })
    }
}
