use async_trait::async_trait;
use futures::future::join_all;
use tracing::instrument;

use crate::{
    BalloonCreate, BalloonId, BalloonUpdate, DimensionRecord, Error, RecognitionRequest,
    RecognitionResponse, Result,
};

#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, request: &RecognitionRequest) -> Result<RecognitionResponse>;
}

#[async_trait]
pub trait BalloonStore: Send + Sync {
    async fn create(&self, request: &BalloonCreate) -> Result<BalloonId>;

    async fn update(&self, id: &BalloonId, update: &BalloonUpdate) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistSummary {
    pub created: Vec<BalloonId>,
    pub fully_processed: usize,
    pub failed_creates: usize,
    pub failed_updates: usize,
}

impl PersistSummary {
    pub fn attempted(&self) -> usize {
        self.created.len() + self.failed_creates
    }
}

enum Outcome {
    Complete(BalloonId),
    Partial(BalloonId),
    Missing,
}

async fn persist_record<S: BalloonStore + ?Sized>(store: &S, record: &DimensionRecord) -> Outcome {
    let id = match store.create(&record.create_request()).await {
        Ok(id) => id,
        Err(err) => {
            log::error!("Failed to create balloon {:?}: {err}", record.label);
            return Outcome::Missing;
        }
    };
    match store.update(&id, &record.update_request()).await {
        Ok(()) => Outcome::Complete(id),
        Err(err) => {
            log::warn!("Balloon {id} was created but its data was not saved: {err}");
            Outcome::Partial(id)
        }
    }
}

#[instrument(level = "debug", skip_all, fields(records = records.len()))]
pub async fn persist_records<S: BalloonStore + ?Sized>(
    store: &S,
    records: &[DimensionRecord],
) -> PersistSummary {
    let outcomes = join_all(records.iter().map(|record| persist_record(store, record))).await;

    let mut summary = PersistSummary::default();
    for outcome in outcomes {
        match outcome {
            Outcome::Complete(id) => {
                summary.fully_processed += 1;
                summary.created.push(id);
            }
            Outcome::Partial(id) => {
                summary.failed_updates += 1;
                summary.created.push(id);
            }
            Outcome::Missing => summary.failed_creates += 1,
        }
    }
    log::info!(
        "Persisted {}/{} balloons",
        summary.fully_processed,
        records.len()
    );
    summary
}

pub(crate) fn recognition_error(err: Error) -> Error {
    if err.is_recognition() {
        err
    } else {
        Error::recognition(err)
    }
}
