use thiserror::Error;

use crate::BalloonId;

type Source = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("recognition failed: {0}")]
    Recognition(#[source] Source),
    #[error("could not create balloon: {0}")]
    Create(#[source] Source),
    #[error("could not update balloon {id}: {source}")]
    Update { id: BalloonId, source: Source },
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn recognition(err: impl Into<Source>) -> Self {
        Self::Recognition(err.into())
    }

    pub fn is_recognition(&self) -> bool {
        matches!(self, Self::Recognition(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
