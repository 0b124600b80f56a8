//! End-to-end tests: CSV → training → artifact → prediction

use serde_json::json;
use std::fmt::Write as _;
use std::sync::Arc;
use tempfile::TempDir;
use valuation_lib::data::CsvDataSource;
use valuation_lib::trainer::{BoostingConfig, TrainerConfig};
use valuation_lib::{
    ArtifactSelector, ArtifactStore, PipelineError, PredictionError, PredictionService,
    RawPropertyRecord, TrainingConfig, TrainingError, TrainingPipeline,
};

const SECTORS: [(&str, f64, f64, f64); 5] = [
    // sector, price per m2 (UF), latitude, longitude
    ("Las Condes", 95.0, -33.41, -70.57),
    ("Vitacura", 110.0, -33.39, -70.59),
    ("Providencia", 85.0, -33.43, -70.61),
    ("Nunoa", 70.0, -33.46, -70.60),
    ("La Florida", 45.0, -33.52, -70.59),
];

/// Deterministic synthetic listings roughly shaped like Santiago prices
fn listings_csv(rows: usize, offset: usize) -> String {
    let mut csv = String::from(
        "id,type,sector,net_usable_area,net_area,n_rooms,n_bathroom,latitude,longitude,price\n",
    );
    for i in offset..offset + rows {
        let (sector, per_m2, lat, lon) = SECTORS[i % SECTORS.len()];
        let kind = match i % 3 {
            0 => "departamento",
            1 => "casa",
            _ => "apartment",
        };
        let area = 40.0 + ((i * 37) % 160) as f64;
        let rooms = 1 + (area / 35.0) as usize;
        let bathrooms = 1 + (i % 3);
        let premium = if kind == "casa" { 1.15 } else { 1.0 };
        let price = (area * per_m2 * premium).round();
        let jitter = ((i * 13) % 7) as f64 * 0.001;
        writeln!(
            csv,
            "{i},{kind},{sector},{area},{net},{rooms},{bathrooms},{lat},{lon},{price}",
            net = area + 10.0,
            rooms = rooms.min(10),
            lat = lat - jitter,
            lon = lon + jitter,
        )
        .unwrap();
    }
    csv
}

fn quick_config() -> TrainingConfig {
    TrainingConfig {
        trainer: TrainerConfig {
            boosting: BoostingConfig {
                learning_rate: 0.1,
                n_rounds: 120,
                max_depth: 4,
                ..BoostingConfig::default()
            },
            ..TrainerConfig::default()
        },
        ..TrainingConfig::default()
    }
}

fn las_condes_request() -> RawPropertyRecord {
    serde_json::from_value(json!({
        "type": "apartment",
        "sector": "Las Condes",
        "net_usable_area": 65,
        "net_area": 70,
        "n_rooms": 2,
        "n_bathroom": 1,
        "latitude": -33.45,
        "longitude": -70.65
    }))
    .unwrap()
}

struct Fixture {
    _dir: TempDir,
    store: ArtifactStore,
    version: String,
}

fn train_fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let train = dir.path().join("train.csv");
    let test = dir.path().join("test.csv");
    std::fs::write(&train, listings_csv(300, 0)).unwrap();
    std::fs::write(&test, listings_csv(60, 300)).unwrap();

    let store = ArtifactStore::open(dir.path().join("models"), "property_valuation_model");
    let pipeline = TrainingPipeline::new(quick_config(), store.clone());
    let report = pipeline
        .run(&CsvDataSource::new(&train).with_holdout(&test))
        .unwrap();

    assert_eq!(report.train_rows, 300);
    assert_eq!(report.holdout_rows, 60);
    assert!(report.metrics.mape < 0.40, "mape = {}", report.metrics.mape);

    Fixture {
        _dir: dir,
        store,
        version: report.artifact.version,
    }
}

#[test]
fn test_las_condes_end_to_end() {
    let fixture = train_fixture();
    let artifact = fixture.store.load(&ArtifactSelector::Latest).unwrap();
    let service = PredictionService::from_artifact(artifact);

    let result = service.predict(&las_condes_request(), "e2e-1").unwrap();
    assert!(result.prediction.is_finite());
    assert!(result.prediction > 0.0);
    assert_eq!(result.model_version, fixture.version);
    assert!((0.0..=1.0).contains(&result.confidence));
    if let Some(interval) = result.interval {
        assert!(interval.lower <= result.prediction && result.prediction <= interval.upper);
    }
}

#[test]
fn test_reloaded_artifact_predicts_identically() {
    let fixture = train_fixture();
    let first = PredictionService::from_artifact(fixture.store.load(&ArtifactSelector::Latest).unwrap());
    let second = PredictionService::from_artifact(
        fixture
            .store
            .load(&ArtifactSelector::Version(fixture.version.clone()))
            .unwrap(),
    );

    let a = first.predict(&las_condes_request(), "a").unwrap();
    let b = second.predict(&las_condes_request(), "b").unwrap();
    assert_eq!(a.prediction.to_bits(), b.prediction.to_bits());
    assert_eq!(a.confidence.to_bits(), b.confidence.to_bits());
}

#[test]
fn test_unseen_sector_lowers_confidence() {
    let fixture = train_fixture();
    let service = PredictionService::from_artifact(fixture.store.load(&ArtifactSelector::Latest).unwrap());

    let known = service.predict(&las_condes_request(), "known").unwrap();
    let mut raw = las_condes_request();
    raw.sector = Some(json!("Puerto Williams"));
    let unseen = service.predict(&raw, "unseen").unwrap();

    assert!(unseen.prediction.is_finite());
    assert!(unseen.confidence < known.confidence);
}

#[test]
fn test_invalid_request_is_rejected() {
    let fixture = train_fixture();
    let service = PredictionService::from_artifact(fixture.store.load(&ArtifactSelector::Latest).unwrap());

    let mut raw = las_condes_request();
    raw.n_rooms = Some(json!(11));
    match service.predict(&raw, "bad").unwrap_err() {
        PredictionError::Validation(e) => assert_eq!(e.field(), "n_rooms"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_concurrent_predictions_agree() {
    let fixture = train_fixture();
    let service = Arc::new(PredictionService::from_artifact(
        fixture.store.load(&ArtifactSelector::Latest).unwrap(),
    ));
    let expected = service.predict(&las_condes_request(), "seq").unwrap().prediction;

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let service = Arc::clone(&service);
            std::thread::spawn(move || {
                (0..50)
                    .map(|j| {
                        service
                            .predict(&las_condes_request(), format!("t{i}-{j}"))
                            .unwrap()
                            .prediction
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for handle in handles {
        for prediction in handle.join().unwrap() {
            assert_eq!(prediction.to_bits(), expected.to_bits());
        }
    }
}

#[test]
fn test_too_few_rows_writes_no_artifact() {
    let dir = TempDir::new().unwrap();
    let train = dir.path().join("train.csv");
    std::fs::write(&train, listings_csv(8, 0)).unwrap();

    let models = dir.path().join("models");
    let store = ArtifactStore::open(&models, "property_valuation_model");
    let err = TrainingPipeline::new(quick_config(), store.clone())
        .run(&CsvDataSource::new(&train))
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Training(TrainingError::InsufficientData { rows: 8, .. })
    ));
    assert!(!models.exists());
    assert!(store.list_versions().unwrap().is_empty());
}

#[test]
fn test_retraining_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let train = dir.path().join("train.csv");
    std::fs::write(&train, listings_csv(120, 0)).unwrap();

    let pipeline = TrainingPipeline::new(
        quick_config(),
        ArtifactStore::open(dir.path().join("models"), "property_valuation_model"),
    );
    let set = || valuation_lib::data::DataSource::load(&CsvDataSource::new(&train)).unwrap();
    let a = pipeline.fit(set(), &mut Default::default()).unwrap();
    let b = pipeline.fit(set(), &mut Default::default()).unwrap();

    assert_eq!(a.encoder, b.encoder);
    assert_eq!(a.model, b.model);
    assert_eq!(a.metadata.metrics, b.metadata.metrics);
}
