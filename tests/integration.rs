use std::{collections::HashSet, sync::Mutex};

use async_trait::async_trait;
use balloon_assembly::{
    classify_and_assemble, tolerance::cluster_tolerances, util::merge_regions,
    util::region_from_polygon, AssemblyOptions, BalloonCreate, BalloonId, BalloonStore,
    BalloonUpdate, BalloonerBuilder, Detection, DetectionKind, DimensionCandidate, DimensionType,
    Error, GdtSymbol, RecognitionRequest, RecognitionResponse, Recognizer, Region, Result,
    ToleranceOptions,
};
use geo::{Coord, LineString, Polygon};

const SELECTION: &str = include_str!("data/selection.json");

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn boxed(x: f32, y: f32, w: f32, h: f32) -> Polygon<f32> {
    Region::new(x, y, w, h, 1).to_polygon()
}

fn text(value: &str, x: f32, y: f32, w: f32, h: f32) -> Detection {
    Detection::new(value, boxed(x, y, w, h), DetectionKind::Text)
}

fn gdt(value: &str, x: f32, y: f32, w: f32, h: f32) -> Detection {
    Detection::new(value, boxed(x, y, w, h), DetectionKind::Gdt)
}

fn page() -> Region {
    Region::new(0., 0., 1000., 1000., 1)
}

/// Small deterministic generator so property checks don't need a seed crate.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> f32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 33) % 20_000) as f32 / 10.0 - 500.0
    }

    fn polygon(&mut self, points: usize) -> Polygon<f32> {
        let coords = (0..points)
            .map(|_| Coord {
                x: self.next(),
                y: self.next(),
            })
            .collect::<Vec<_>>();
        Polygon::new(LineString::new(coords), vec![])
    }
}

#[test]
fn stacked_tolerances_cluster_with_their_nominal() {
    init_logger();

    let detections = vec![
        text("103", 98., 122., 14., 10.).with_angle(90.),
        text("+0.2", 100., 100., 16., 5.).with_angle(90.),
        text("-0.1", 100., 106., 16., 5.).with_angle(90.),
    ];
    let clustered = cluster_tolerances(&detections, 1, &ToleranceOptions::default());
    assert_eq!(clustered.len(), 1);
    let cluster = &clustered[0];
    assert!(cluster.clustered);
    assert!(cluster.text.contains("103"));
    assert_eq!(cluster.upper_tol.as_deref(), Some("+ 0.2"));
    assert_eq!(cluster.lower_tol.as_deref(), Some("- 0.1"));
}

#[test]
fn frame_value_is_reclassified_and_stripped() {
    init_logger();

    let gdts = vec![gdt("⏥", 100., 100., 10., 10.)];
    let texts = vec![
        text("0.025", 115., 100., 25., 10.),
        text("M", 145., 100., 7., 10.),
    ];
    let dimension =
        DimensionCandidate::new("0.025 M", DimensionType::Length, boxed(115., 100., 25., 10.));
    let records = classify_and_assemble(
        vec![dimension],
        &texts,
        &gdts,
        page(),
        &AssemblyOptions::default(),
    );

    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(
        record.dimension_data.dimension_type,
        DimensionType::Gdt(Some(GdtSymbol::Flatness))
    );
    assert!(record.dimension_data.dimension_type.to_string().starts_with("GDT-⏥"));
    assert_eq!(record.dimension_data.nominal_value.as_deref(), Some("0.025"));
    assert_eq!(record.label, "GDT: ⏥ Flatness - 0.025");
    assert_eq!(record.bbox, Region::new(100., 100., 52., 10., 1));
    assert_eq!(record.gdt_data.len(), 1);
    assert_eq!(record.text_data.len(), 2);
}

#[test]
fn datum_letters_never_turn_values_into_tolerances() {
    init_logger();

    let gdts = vec![
        gdt("B", 300., 270., 10., 10.),
        gdt("B", 600., 270., 10., 10.),
    ];
    let dimensions = vec![
        DimensionCandidate::new("60", DimensionType::Length, boxed(300., 300., 20., 10.)),
        DimensionCandidate::new("0.5", DimensionType::Length, boxed(600., 300., 20., 10.)),
    ];
    let records = classify_and_assemble(
        dimensions,
        &[],
        &gdts,
        page(),
        &AssemblyOptions::default(),
    );

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].dimension_data.dimension_type, DimensionType::Length);
    assert_eq!(records[0].label, "Length: 60");
    assert_eq!(records[1].dimension_data.dimension_type, DimensionType::Length);
    assert_eq!(records[1].label, "Length: 0.5");
    assert!(records.iter().all(|it| it.gdt_data.is_empty()));
}

#[test]
fn large_gdt_values_are_corrected_to_lengths() {
    init_logger();

    let response = RecognitionResponse::from_json(
        r#"{"dimensions": [{"nominal_value": "1.2", "dimension_type": "GDT",
            "bbox": [[10, 10], [30, 10], [30, 18], [10, 18]],
            "gdt_data": {"class_name": "⌖", "confidence": 0.7, "bbox": [[0, 10], [8, 18]]}}]}"#,
    )
    .unwrap();
    let records = BalloonerBuilder::new().build().assemble(response, page());

    assert_eq!(records.len(), 1);
    let dimension = &records[0].dimension_data;
    assert_eq!(dimension.dimension_type, DimensionType::Length);
    assert!(dimension.gdt_data.is_none());
    assert_eq!(records[0].label, "Length: 1.2");
}

#[test]
fn identical_frames_stay_separate() {
    init_logger();

    let gdts = vec![
        gdt("⟂", 100., 100., 10., 10.),
        gdt("⟂", 100., 400., 10., 10.),
    ];
    let texts = vec![
        text("0.010", 115., 100., 30., 10.),
        text("0.010", 115., 400., 30., 10.),
    ];
    let records = classify_and_assemble(
        Vec::new(),
        &texts,
        &gdts,
        page(),
        &AssemblyOptions::default(),
    );

    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record.dimension_data.dimension_type, DimensionType::Gdt(None));
        assert_eq!(record.dimension_data.dimension_type.to_string(), "GDT");
        assert!(record.dimension_data.nominal_value.is_none());
        assert_eq!(record.label, "GDT: ⟂ Perpendicularity - 0.010");
    }
    assert_eq!(records[0].bbox, Region::new(100., 100., 45., 10., 1));
    assert_eq!(records[1].bbox, Region::new(100., 400., 45., 10., 1));
}

#[test]
fn regions_start_at_the_min_corner() {
    let mut rng = Lcg(7);
    for points in 1..40 {
        let polygon = rng.polygon(points);
        let region = region_from_polygon(&polygon, 1).unwrap();
        let min_x = polygon.exterior().0.iter().map(|it| it.x).fold(f32::MAX, f32::min);
        let min_y = polygon.exterior().0.iter().map(|it| it.y).fold(f32::MAX, f32::min);
        assert!(region.width >= 0.0 && region.height >= 0.0);
        assert_eq!((region.x, region.y), (min_x, min_y));
    }
    let empty = Polygon::new(LineString::new(Vec::<Coord<f32>>::new()), vec![]);
    assert!(region_from_polygon(&empty, 1).is_none());
}

#[test]
fn merged_region_contains_every_part() {
    let mut rng = Lcg(42);
    for count in 1..20 {
        let polygons = (0..count)
            .map(|it| rng.polygon(1 + it % 5))
            .collect::<Vec<_>>();
        let merged = merge_regions(&polygons, 1).unwrap();
        for polygon in &polygons {
            let region = region_from_polygon(polygon, 1).unwrap();
            assert!(merged.contains(&region), "{merged:?} misses {region:?}");
        }
    }
}

#[test]
fn every_detection_lands_in_at_most_one_record() {
    init_logger();

    let response = RecognitionResponse::from_json(SELECTION).unwrap();
    let batch = response.into_batch();
    let records = classify_and_assemble(
        batch.dimensions,
        &batch.text_detections,
        &batch.gdt_detections,
        Region::new(0., 0., 1000., 1000., 2),
        &AssemblyOptions::default(),
    );

    let mut seen = HashSet::new();
    for origin in records.iter().flat_map(|it| it.origins()) {
        assert!(seen.insert(origin), "{origin:?} used twice");
    }
    assert!(!seen
        .iter()
        .any(|origin| origin.kind == DetectionKind::Gdt && origin.index == 2));
}

#[test]
fn competing_candidates_share_nothing() {
    init_logger();

    let gdts = vec![
        gdt("⟂", 200., 170., 10., 10.),
        gdt("⏥", 500., 100., 10., 10.),
    ];
    let texts = vec![
        text("0.02", 515., 100., 25., 10.),
        text("M", 545., 100., 7., 10.),
    ];
    let dimensions = vec![
        DimensionCandidate::new("25", DimensionType::Length, boxed(100., 100., 20., 8.)),
        DimensionCandidate::new("0.05", DimensionType::Length, boxed(200., 200., 20., 8.)),
        DimensionCandidate::new("0.03", DimensionType::Length, boxed(200., 215., 20., 8.)),
        DimensionCandidate::new("0.02", DimensionType::Length, boxed(515., 100., 25., 10.)),
    ];
    let records = classify_and_assemble(
        dimensions,
        &texts,
        &gdts,
        page(),
        &AssemblyOptions::default(),
    );

    let labels = records.iter().map(|it| it.label.as_str()).collect::<Vec<_>>();
    assert_eq!(
        labels,
        [
            "Length: 25",
            "GDT: ⟂ Perpendicularity - 0.05",
            "Length: 0.03",
            "GDT: ⏥ Flatness - 0.02",
        ]
    );

    let mut seen = HashSet::new();
    for origin in records.iter().flat_map(|it| it.origins()) {
        assert!(seen.insert(origin), "{origin:?} used twice");
    }
    assert_eq!(seen.len(), gdts.len() + texts.len());
}

#[test]
fn values_of_one_or_more_are_never_gdt() {
    init_logger();

    let gdts = vec![gdt("⌖", 100., 80., 10., 10.)];
    let texts = vec![text("0.2", 115., 80., 20., 10.)];
    let types = [
        DimensionType::Length,
        DimensionType::Gdt(None),
        DimensionType::Gdt(Some(GdtSymbol::Position)),
        DimensionType::Other("Radius".into()),
    ];
    for value in ["1", "1.0", "2.5", "60", "12 M"] {
        for dimension_type in &types {
            let dimension =
                DimensionCandidate::new(value, dimension_type.clone(), boxed(100., 100., 20., 8.));
            let records = classify_and_assemble(
                vec![dimension],
                &texts,
                &gdts,
                page(),
                &AssemblyOptions::default(),
            );
            let output = &records[0].dimension_data.dimension_type;
            assert!(
                !output.to_string().starts_with("GDT"),
                "{value} as {dimension_type} came out as {output}"
            );
        }
    }
}

#[test]
fn tolerance_clustering_is_idempotent() {
    let options = ToleranceOptions::default();
    let detections = vec![
        text("103", 98., 122., 14., 10.).with_angle(90.),
        text("+0.2", 100., 100., 16., 5.).with_angle(90.),
        text("-0.1", 100., 106., 16., 5.).with_angle(90.),
        text("+0.05", 200., 50., 12., 6.),
        text("-0.02", 210., 50.5, 12., 6.),
        text("25", 227., 48., 10., 8.),
        text("+", 400., 400., 4., 4.),
        text("R4", 500., 500., 10., 8.).with_angle(30.),
    ];
    let once = cluster_tolerances(&detections, 1, &options);
    assert_eq!(once.iter().filter(|it| it.has_tolerance()).count(), 2);
    let twice = cluster_tolerances(&once, 1, &options);
    assert_eq!(once, twice);
}

#[test]
fn recognition_response_fixture_assembles() {
    init_logger();

    let response = RecognitionResponse::from_json(SELECTION).unwrap();
    let ballooner = BalloonerBuilder::new().build();
    let records = ballooner.assemble(response, Region::new(0., 0., 1000., 1000., 2));

    let labels = records.iter().map(|it| it.label.as_str()).collect::<Vec<_>>();
    assert_eq!(
        labels,
        [
            "GDT: ⏥ Flatness - 0.025",
            "Length: 103",
            "Length: 1.2",
            "GDT: ⟂ Perpendicularity - 0.010",
        ]
    );
    assert_eq!(records[0].bbox, Region::new(100., 100., 52., 10., 2));
    assert_eq!(records[1].bbox, Region::new(98., 300., 18., 32., 2));
    assert_eq!(
        records[1].dimension_data.upper_tolerance.as_deref(),
        Some("+0.2")
    );
    assert_eq!(
        records[1].dimension_data.lower_tolerance.as_deref(),
        Some("-0.1")
    );
    assert!(records[2].dimension_data.gdt_data.is_none());
    assert_eq!(records[3].bbox, Region::new(100., 700., 45., 10., 2));

    let update = serde_json::to_value(records[0].update_request()).unwrap();
    assert_eq!(update["dimension_data"][0]["dimension_type"], "GDT-⏥");
    assert_eq!(update["gdt_data"][0]["text"], "⏥");
    let create = serde_json::to_value(records[0].create_request()).unwrap();
    assert_eq!(create["label"], "GDT: ⏥ Flatness - 0.025");
    assert_eq!(create["bounding_box"]["width"], 52.0);
}

struct CannedRecognizer(RecognitionResponse);

#[async_trait]
impl Recognizer for CannedRecognizer {
    async fn recognize(&self, _request: &RecognitionRequest) -> Result<RecognitionResponse> {
        Ok(self.0.clone())
    }
}

struct OfflineRecognizer;

#[async_trait]
impl Recognizer for OfflineRecognizer {
    async fn recognize(&self, _request: &RecognitionRequest) -> Result<RecognitionResponse> {
        Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "recognition timed out").into())
    }
}

#[derive(Default)]
struct MemoryStore {
    created: Mutex<Vec<(BalloonId, BalloonCreate)>>,
    updated: Mutex<Vec<(BalloonId, BalloonUpdate)>>,
    reject_label: Option<&'static str>,
    reject_updates: bool,
}

#[async_trait]
impl BalloonStore for MemoryStore {
    async fn create(&self, request: &BalloonCreate) -> Result<BalloonId> {
        if self
            .reject_label
            .is_some_and(|label| request.label.starts_with(label))
        {
            return Err(Error::Create("label rejected".into()));
        }
        let mut created = self.created.lock().unwrap();
        let id = BalloonId::Number(created.len() as i64 + 1);
        created.push((id.clone(), request.clone()));
        Ok(id)
    }

    async fn update(&self, id: &BalloonId, update: &BalloonUpdate) -> Result<()> {
        if self.reject_updates {
            return Err(Error::Update {
                id: id.clone(),
                source: "store is read-only".into(),
            });
        }
        self.updated
            .lock()
            .unwrap()
            .push((id.clone(), update.clone()));
        Ok(())
    }
}

#[tokio::test]
async fn selection_is_recognised_and_persisted() {
    init_logger();

    let recognizer = CannedRecognizer(RecognitionResponse::from_json(SELECTION).unwrap());
    let store = MemoryStore::default();
    let outcome = BalloonerBuilder::new()
        .build()
        .process_selection(&recognizer, &store, Region::new(0., 0., 1000., 1000., 2), Some(90.))
        .await
        .unwrap();

    assert_eq!(outcome.records.len(), 4);
    assert_eq!(outcome.persisted.created.len(), 4);
    assert_eq!(outcome.persisted.fully_processed, 4);
    assert_eq!(store.created.lock().unwrap().len(), 4);
    assert_eq!(store.updated.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn failed_recognition_persists_nothing() {
    init_logger();

    let store = MemoryStore::default();
    let result = BalloonerBuilder::new()
        .build()
        .process_selection(&OfflineRecognizer, &store, page(), None)
        .await;

    assert!(matches!(result, Err(Error::Recognition(_))));
    assert!(store.created.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failures_are_isolated_per_record() {
    init_logger();

    let records = BalloonerBuilder::new().build().assemble(
        RecognitionResponse::from_json(SELECTION).unwrap(),
        Region::new(0., 0., 1000., 1000., 2),
    );

    let store = MemoryStore {
        reject_label: Some("Length"),
        ..MemoryStore::default()
    };
    let summary = balloon_assembly::persist_records(&store, &records).await;
    assert_eq!(summary.failed_creates, 2);
    assert_eq!(summary.created.len(), 2);
    assert_eq!(summary.fully_processed, 2);
    assert_eq!(summary.attempted(), 4);

    let store = MemoryStore {
        reject_updates: true,
        ..MemoryStore::default()
    };
    let summary = balloon_assembly::persist_records(&store, &records).await;
    assert_eq!(summary.created.len(), 4);
    assert_eq!(summary.failed_updates, 4);
    assert_eq!(summary.fully_processed, 0);
}
