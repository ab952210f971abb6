mod common;

use approx::assert_abs_diff_eq;
use chrono::{TimeZone, Utc};
use common::*;
use minewatch::core::pipeline::AcquisitionPath;
use minewatch::{Aoi, JsonRunSink, Pipeline, PipelineConfig, RunStatus, Scene, Severity, WatchError, ZoneType};
use tempfile::TempDir;

/// 0.01 x 0.01 degree AOI just south of the equator
fn aoi() -> Aoi {
    Aoi::new(rect(10.0, -1.01, 10.01, -1.0), 0.0).unwrap()
}

/// 70 x 70 pixel tile covering the AOI with a margin of 10 pixels
fn full_tile(patch: bool) -> Tile {
    Tile {
        min_lon: 9.998,
        max_lat: -0.998,
        cols: 70,
        rows: 70,
        background: Reflectance::VEGETATED,
        patch: patch.then_some((30..34, 30..34, Reflectance::DEGRADED)),
    }
}

fn pipeline(catalog: FakeCatalog) -> Pipeline<FakeCatalog, CountingFetcher, RecordingSink> {
    Pipeline::new(
        PipelineConfig::default(),
        catalog,
        CountingFetcher::default(),
        RecordingSink::default(),
    )
    .unwrap()
}

/// A 4x4 patch of vegetation loss (about 0.79 ha) gives one medium alert
fn assert_single_vegetation_alert(output: &minewatch::AnalysisOutput) {
    assert_eq!(output.zones.len(), 1);
    let zone = &output.zones[0];
    assert_eq!(zone.zone_type, ZoneType::VegetationLoss);
    assert_abs_diff_eq!(zone.area_ha, 0.788, epsilon = 0.01);

    assert_eq!(output.alerts.len(), 1);
    let alert = &output.alerts[0];
    assert_eq!(alert.rule, "vegetation_loss");
    assert_eq!(alert.severity, Severity::Medium);
    assert_eq!(alert.zone_id, zone.id);
}

#[test]
fn test_single_scene_path_when_one_tile_covers_aoi() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let base = full_tile(false).write_scene(dir.path(), "base", at(1, 10, 10, 0), Some(0.0));
    let late = full_tile(true).write_scene(dir.path(), "late", at(3, 10, 10, 0), Some(0.0));

    let mut pipeline = pipeline(FakeCatalog::new(vec![base, late]));
    let output = pipeline.run(&aoi(), "base", "late").unwrap();

    assert_eq!(output.baseline.path, AcquisitionPath::Single);
    assert_eq!(output.latest.path, AcquisitionPath::Single);
    assert!(!output.latest.escalated);
    assert_eq!(output.latest.scene_ids, vec!["late"]);
    assert!(output.latest.pixel_coverage_percent.unwrap() >= 95.0);
    assert_eq!(pipeline.fetcher().fetched.len(), 10);
    assert_single_vegetation_alert(&output);

    let runs = &pipeline.sink().runs;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].2, RunStatus::Completed);
    assert_eq!(runs[0].1.len(), 1);
}

#[test]
fn test_planner_combines_partial_scenes() {
    let s1 = Scene::new("S1", at(3, 10, 10, 0), Some(5.0), rect(9.99, -1.02, 10.006, -0.99));
    let s2 = Scene::new("S2", at(3, 10, 10, 4), Some(5.0), rect(10.0055, -1.02, 10.02, -0.99));
    let candidates = vec![s1.clone(), s2];

    let pipeline = pipeline(FakeCatalog::new(candidates.clone()));
    let plan = pipeline.plan_acquisition(&s1, &candidates, &aoi()).unwrap();

    assert_eq!(plan.path, AcquisitionPath::Mosaic);
    assert_eq!(plan.scene_ids(), vec!["S1", "S2"]);
    assert!(plan.coverage.coverage_percent >= 95.0);
}

#[test]
fn test_multi_scene_path_mosaics_partial_tiles() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let base = full_tile(false).write_scene(dir.path(), "base", at(1, 10, 10, 0), Some(0.0));

    // 60% of the AOI, holding the changed patch
    let s1 = Tile {
        min_lon: 9.998,
        max_lat: -0.998,
        cols: 40,
        rows: 70,
        background: Reflectance::VEGETATED,
        patch: Some((30..34, 30..34, Reflectance::DEGRADED)),
    }
    .write_scene(dir.path(), "S1", at(3, 10, 10, 0), Some(0.0));
    // 44% of the AOI, overlapping S1 by two columns
    let s2 = Tile {
        min_lon: 10.0056,
        max_lat: -0.998,
        cols: 32,
        rows: 70,
        background: Reflectance::VEGETATED,
        patch: None,
    }
    .write_scene(dir.path(), "S2", at(3, 10, 10, 4), Some(0.0));

    let mut pipeline = pipeline(FakeCatalog::new(vec![base, s1, s2]));
    let output = pipeline.run(&aoi(), "base", "S1").unwrap();

    assert_eq!(output.baseline.path, AcquisitionPath::Single);
    assert_eq!(output.latest.path, AcquisitionPath::Mosaic);
    assert_eq!(output.latest.scene_ids, vec!["S1", "S2"]);
    assert!(output.latest.bounds_coverage_percent >= 95.0);
    assert!(output.latest.pixel_coverage_percent.unwrap() >= 95.0);
    assert_eq!(pipeline.fetcher().fetched.len(), 15);
    assert_single_vegetation_alert(&output);
}

#[test]
fn test_insufficient_coverage_fails_before_any_fetch() {
    init_logging();
    let base = Scene::new("base", at(1, 10, 10, 0), Some(0.0), rect(9.99, -1.02, 10.02, -0.99));
    let s1 = Scene::new("S1", at(3, 10, 10, 0), Some(0.0), rect(9.99, -1.02, 10.006, -0.99));
    let s3 = Scene::new("S3", at(3, 10, 10, 3), Some(0.0), rect(10.006, -1.02, 10.008, -0.99));

    let mut pipeline = pipeline(FakeCatalog::new(vec![base, s1, s3]));
    let err = pipeline.run(&aoi(), "base", "S1").unwrap_err();

    match err {
        WatchError::InsufficientCoverage {
            coverage_percent,
            required_percent,
            scene_count,
            uncovered_area_ha,
        } => {
            assert_abs_diff_eq!(coverage_percent, 80.0, epsilon = 1e-6);
            assert_eq!(required_percent, 95.0);
            assert_eq!(scene_count, 2);
            assert!(uncovered_area_ha.unwrap() > 0.0);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(pipeline.fetcher().fetched.is_empty());

    let runs = &pipeline.sink().runs;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].2, RunStatus::FailedCoverage);
    assert!(runs[0].0.is_empty() && runs[0].1.is_empty());
}

#[test]
fn test_identical_refs_fail_without_catalog_or_fetch() {
    let catalog = FakeCatalog::new(vec![Scene::new(
        "late",
        at(3, 10, 10, 0),
        Some(0.0),
        rect(9.99, -1.02, 10.02, -0.99),
    )]);
    let queries = catalog.queries.clone();
    let mut pipeline = pipeline(catalog);

    let err = pipeline.run(&aoi(), "late", "late").unwrap_err();
    assert!(matches!(err, WatchError::IdenticalScenes { ref scene_id, .. } if scene_id == "late"));
    assert_eq!(queries.get(), 0);
    assert!(pipeline.fetcher().fetched.is_empty());
    assert_eq!(pipeline.sink().runs[0].2, RunStatus::FailedIdenticalScenes);
}

#[test]
fn test_refs_planning_to_same_scene_set_are_identical() {
    // Neither scene covers the AOI alone; both plans become {S1, S2}
    let s1 = Scene::new("S1", at(3, 10, 10, 0), Some(0.0), rect(9.99, -1.02, 10.006, -0.99));
    let s2 = Scene::new("S2", at(3, 10, 10, 4), Some(0.0), rect(10.0055, -1.02, 10.02, -0.99));

    let mut pipeline = pipeline(FakeCatalog::new(vec![s1, s2]));
    let err = pipeline.run(&aoi(), "S1", "S2").unwrap_err();

    assert!(matches!(err, WatchError::IdenticalScenes { acquired_at: Some(_), .. }));
    assert!(pipeline.fetcher().fetched.is_empty());
}

#[test]
fn test_unknown_scene_ref() {
    let mut pipeline = pipeline(FakeCatalog::new(vec![]));
    let err = pipeline.run(&aoi(), "base", "nope").unwrap_err();
    assert!(matches!(err, WatchError::SceneNotFound { .. }));
    assert_eq!(pipeline.sink().runs[0].2, RunStatus::Failed);
}

#[test]
fn test_baseline_too_old() {
    let old = Scene::new(
        "old",
        Utc.with_ymd_and_hms(2022, 1, 1, 10, 0, 0).unwrap(),
        Some(0.0),
        rect(9.99, -1.02, 10.02, -0.99),
    );
    let late = Scene::new("late", at(3, 10, 10, 0), Some(0.0), rect(9.99, -1.02, 10.02, -0.99));

    let mut pipeline = pipeline(FakeCatalog::new(vec![old, late]));
    let err = pipeline.run(&aoi(), "old", "late").unwrap_err();
    assert!(matches!(err, WatchError::TemporalInconsistency { .. }));
    assert!(pipeline.fetcher().fetched.is_empty());
}

#[test]
fn test_nodata_padded_scene_escalates_to_mosaic() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let base = full_tile(false).write_scene(dir.path(), "base", at(1, 10, 10, 0), Some(0.0));

    // Footprint claims the whole AOI but the western half is zero-filled
    let zero = Reflectance { blue: 0.0, green: 0.0, red: 0.0, nir: 0.0, swir: 0.0 };
    let padded = Tile {
        patch: Some((0..70, 0..35, zero)),
        ..full_tile(false)
    }
    .write_scene(dir.path(), "padded", at(3, 10, 10, 0), Some(0.0));
    let fill = Tile {
        min_lon: 9.998,
        max_lat: -0.998,
        cols: 40,
        rows: 70,
        background: Reflectance::VEGETATED,
        patch: Some((30..34, 30..34, Reflectance::DEGRADED)),
    }
    .write_scene(dir.path(), "fill", at(3, 10, 10, 6), Some(0.0));

    let mut pipeline = pipeline(FakeCatalog::new(vec![base, padded, fill]));
    let output = pipeline.run(&aoi(), "base", "padded").unwrap();

    assert!(output.latest.escalated);
    assert_eq!(output.latest.path, AcquisitionPath::Mosaic);
    assert_eq!(output.latest.scene_ids, vec!["padded", "fill"]);
    assert!(output.latest.pixel_coverage_percent.unwrap() >= 95.0);
    assert_eq!(pipeline.fetcher().scenes_fetched(), vec!["base", "fill", "padded"]);
    assert_single_vegetation_alert(&output);
}

#[test]
fn test_artifacts_and_json_sink() {
    let dir = TempDir::new().unwrap();
    let base = full_tile(false).write_scene(dir.path(), "base", at(1, 10, 10, 0), Some(0.0));
    let late = full_tile(true).write_scene(dir.path(), "late", at(3, 10, 10, 0), Some(0.0));

    let mut config = PipelineConfig::default();
    config.raster.artifact_dir = Some(dir.path().join("artifacts"));
    let sink = JsonRunSink::new(dir.path().join("runs")).unwrap();
    let mut pipeline = Pipeline::new(
        config,
        FakeCatalog::new(vec![base, late]),
        CountingFetcher::default(),
        sink,
    )
    .unwrap();

    let output = pipeline.run(&aoi(), "base", "late").unwrap();
    assert!(output.change_stats[&minewatch::core::IndexKind::Ndvi].decrease_pixels >= 16);

    let artifacts = dir.path().join("artifacts");
    for name in ["baseline_ndvi.tif", "latest_bsi.tif", "change_ndwi.tif", "mask_vegetation_loss.tif"] {
        assert!(artifacts.join(name).exists(), "missing {}", name);
    }

    let written = pipeline.sink().written();
    assert_eq!(written.len(), 1);
    let record = JsonRunSink::read_record(&written[0]).unwrap();
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.zones.len(), 1);
    assert_eq!(record.alerts.len(), 1);
}

#[test]
fn test_invalid_config_rejected_at_construction() {
    let mut config = PipelineConfig::default();
    config.coverage.mosaic_threshold = 99.0;
    let result = Pipeline::new(
        config,
        FakeCatalog::new(vec![]),
        CountingFetcher::default(),
        RecordingSink::default(),
    );
    assert!(matches!(result, Err(WatchError::Config(_))));
}

#[test]
fn test_baseline_plan_never_borrows_latest_scene() {
    // The latest scene alone would complete the baseline mosaic
    let base = Scene::new("base", at(1, 10, 10, 0), Some(0.0), rect(9.99, -1.02, 10.006, -0.99));
    let late = Scene::new("late", at(1, 20, 10, 0), Some(0.0), rect(9.99, -1.02, 10.02, -0.99));

    let mut pipeline = pipeline(FakeCatalog::new(vec![base, late]));
    let err = pipeline.run(&aoi(), "base", "late").unwrap_err();

    match err {
        WatchError::InsufficientCoverage {
            coverage_percent,
            scene_count,
            ..
        } => {
            assert_abs_diff_eq!(coverage_percent, 60.0, epsilon = 1e-6);
            assert_eq!(scene_count, 1);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(pipeline.fetcher().fetched.is_empty());
}

#[test]
fn test_companion_scenes_go_to_the_nearer_epoch() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let west = Tile {
        min_lon: 9.998,
        max_lat: -0.998,
        cols: 40,
        rows: 70,
        background: Reflectance::VEGETATED,
        patch: None,
    };
    let base = west.write_scene(dir.path(), "base", at(1, 10, 10, 0), Some(0.0));
    let east = Tile {
        min_lon: 10.0056,
        cols: 32,
        ..west
    };
    let base_fill = east.write_scene(dir.path(), "base_fill", at(1, 12, 10, 0), Some(0.0));
    let late = full_tile(true).write_scene(dir.path(), "late", at(1, 20, 10, 0), Some(0.0));

    let mut pipeline = pipeline(FakeCatalog::new(vec![base, base_fill, late]));
    let output = pipeline.run(&aoi(), "base", "late").unwrap();

    assert_eq!(output.baseline.scene_ids, vec!["base", "base_fill"]);
    assert_eq!(output.latest.scene_ids, vec!["late"]);
    let counts = fetch_counts(pipeline.fetcher());
    assert_eq!(counts["late"], 5);
    assert_eq!(counts["base_fill"], 5);
    assert_single_vegetation_alert(&output);
}

#[test]
fn test_refs_from_one_acquisition_are_identical() {
    // 8 + 8 minutes chain both refs into one acquisition
    let a = Scene::new("a", at(3, 10, 10, 0), Some(0.0), rect(9.99, -1.02, 10.02, -0.99));
    let mid = Scene::new("mid", at(3, 10, 10, 8), Some(0.0), rect(9.99, -1.02, 10.02, -0.99));
    let b = Scene::new("b", at(3, 10, 10, 16), Some(0.0), rect(9.99, -1.02, 10.02, -0.99));

    let mut pipeline = pipeline(FakeCatalog::new(vec![a, mid, b]));
    let err = pipeline.run(&aoi(), "a", "b").unwrap_err();
    assert!(matches!(err, WatchError::IdenticalScenes { ref scene_id, acquired_at: Some(_) } if scene_id == "b"));
    assert!(pipeline.fetcher().fetched.is_empty());
}

#[test]
fn test_bounds_floor_applies_without_pixel_validation() {
    let base = Scene::new("base", at(1, 10, 10, 0), Some(0.0), rect(9.99, -1.02, 10.02, -0.99));
    // 94% of the AOI: above the mosaic threshold, below the hard minimum
    let late = Scene::new("late", at(3, 10, 10, 0), Some(0.0), rect(9.99, -1.02, 10.0094, -0.99));

    let mut config = PipelineConfig::default();
    config.validation.check_valid_data = false;
    let mut pipeline = Pipeline::new(
        config,
        FakeCatalog::new(vec![base, late]),
        CountingFetcher::default(),
        RecordingSink::default(),
    )
    .unwrap();

    let err = pipeline.run(&aoi(), "base", "late").unwrap_err();
    match err {
        WatchError::InsufficientCoverage { coverage_percent, .. } => {
            assert_abs_diff_eq!(coverage_percent, 94.0, epsilon = 1e-6)
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(pipeline.fetcher().fetched.is_empty());
    assert_eq!(pipeline.sink().runs[0].2, RunStatus::FailedCoverage);
}

#[test]
fn test_insufficient_coverage_reports_best_epoch() {
    // One acquisition reaching 90%; the scene cap for this AOI allows two
    let s1 = Scene::new("S1", at(3, 10, 10, 0), Some(0.0), rect(9.99, -1.02, 10.004, -0.99));
    let s2 = Scene::new("S2", at(3, 10, 10, 2), Some(0.0), rect(10.004, -1.02, 10.007, -0.99));
    let s3 = Scene::new("S3", at(3, 10, 10, 4), Some(0.0), rect(10.007, -1.02, 10.009, -0.99));
    let candidates = vec![s1.clone(), s2, s3];

    let pipeline = pipeline(FakeCatalog::new(candidates.clone()));
    assert_eq!(pipeline.config().max_scenes_for_area(aoi().area_deg2()), 2);
    let err = pipeline.plan_acquisition(&s1, &candidates, &aoi()).unwrap_err();

    match err {
        WatchError::InsufficientCoverage {
            coverage_percent,
            scene_count,
            ..
        } => {
            assert_abs_diff_eq!(coverage_percent, 90.0, epsilon = 1e-6);
            assert_eq!(scene_count, 3);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_short_escalation_fails_before_refetch() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let base = full_tile(false).write_scene(dir.path(), "base", at(1, 10, 10, 0), Some(0.0));
    // Ends at 10.0094: 94% of the AOI, and nothing to complete it
    let late = Tile {
        cols: 57,
        ..full_tile(false)
    }
    .write_scene(dir.path(), "late", at(3, 10, 10, 0), Some(0.0));

    let mut pipeline = pipeline(FakeCatalog::new(vec![base, late]));
    let err = pipeline.run(&aoi(), "base", "late").unwrap_err();

    assert!(matches!(err, WatchError::InsufficientCoverage { scene_count: 1, .. }));
    let counts = fetch_counts(pipeline.fetcher());
    assert_eq!(counts["late"], 5);
    assert_eq!(pipeline.fetcher().fetched.len(), 10);
}
