use tracing::instrument;

pub mod alignment;
pub mod assembly;
pub mod boc;
mod error;
pub mod frame;
pub mod gdt;
mod result;
pub mod service;
pub mod tolerance;
pub mod util;
mod wire;

pub use alignment::AlignmentOptions;
pub use assembly::{classify_and_assemble, AssemblyOptions, ConsumedIndices};
pub use boc::{bill_of_characteristics, BocRow};
pub use error::{Error, Result};
pub use frame::FrameOptions;
pub use gdt::GdtSymbol;
pub use result::*;
pub use service::{persist_records, BalloonStore, PersistSummary, Recognizer};
pub use tolerance::ToleranceOptions;
pub use wire::*;

pub struct BalloonerBuilder {
    options: AssemblyOptions,
}

impl BalloonerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(mut self, options: AssemblyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn alignment(mut self, alignment: AlignmentOptions) -> Self {
        self.options.tolerance.alignment = alignment;
        self
    }

    pub fn tolerance(mut self, tolerance: ToleranceOptions) -> Self {
        self.options.tolerance = tolerance;
        self
    }

    pub fn frame(mut self, frame: FrameOptions) -> Self {
        self.options.frame = frame;
        self
    }

    pub fn symbol_distance(mut self, distance: f32) -> Self {
        self.options.symbol_distance = distance;
        self
    }

    pub fn companion_distance(mut self, distance: f32) -> Self {
        self.options.companion_distance = distance;
        self
    }

    pub fn association_distance(mut self, distance: f32) -> Self {
        self.options.association_distance = distance;
        self
    }

    #[instrument(skip(self))]
    pub fn build(self) -> Ballooner {
        log::debug!("Balloon assembly options: {:?}", self.options);
        Ballooner {
            options: self.options,
        }
    }
}

impl Default for BalloonerBuilder {
    fn default() -> Self {
        Self {
            options: AssemblyOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionOutcome {
    pub records: Vec<DimensionRecord>,
    pub persisted: PersistSummary,
}

pub struct Ballooner {
    options: AssemblyOptions,
}

impl Ballooner {
    pub fn options(&self) -> &AssemblyOptions {
        &self.options
    }

    #[instrument(skip(self, response))]
    pub fn assemble(&self, response: RecognitionResponse, region: Region) -> Vec<DimensionRecord> {
        self.assemble_batch(response.into_batch(), region)
    }

    #[instrument(level = "debug", skip_all)]
    pub fn assemble_batch(&self, batch: RecognitionBatch, region: Region) -> Vec<DimensionRecord> {
        let RecognitionBatch {
            dimensions,
            text_detections,
            gdt_detections,
        } = batch;
        classify_and_assemble(
            dimensions,
            &text_detections,
            &gdt_detections,
            region,
            &self.options,
        )
    }

    /// Nothing is stored when recognition fails.
    #[instrument(skip(self, recognizer, store))]
    pub async fn process_selection<R, S>(
        &self,
        recognizer: &R,
        store: &S,
        region: Region,
        rotation_angle: Option<f32>,
    ) -> Result<SelectionOutcome>
    where
        R: Recognizer + ?Sized,
        S: BalloonStore + ?Sized,
    {
        let request = RecognitionRequest {
            bounding_box: region,
            rotation_angle,
        };
        let response = recognizer
            .recognize(&request)
            .await
            .map_err(service::recognition_error)?;

        let records = self.assemble(response, region);
        if records.is_empty() {
            log::info!("Nothing recognised in {region:?}");
        }
        let persisted = persist_records(store, &records).await;
        Ok(SelectionOutcome { records, persisted })
    }
}
