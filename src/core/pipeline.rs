//! Pipeline orchestration.
//!
//! Sequences coverage screening, scene selection, band fetching,
//! mosaicking, index/change computation and alert evaluation for one
//! baseline/latest pair. Coverage is always decided before the first
//! band is fetched, and the persistence sink sees exactly one write per
//! run: the full result on success, empty sets plus the failure status
//! otherwise.

use crate::config::PipelineConfig;
use crate::core::alerts::{AlertRuleEngine, RuleContext};
use crate::core::change::{change_statistics, detect_changes, ChangeMasks, ChangeStats};
use crate::core::coverage::{coverage, CoverageMode, CoverageResult, CoverageSource};
use crate::core::indices::{BandSet, IndexKind, IndexStats, SpectralIndices};
use crate::core::mosaic::MosaicEngine;
use crate::core::selection::{select_scenes, SelectionCriteria};
use crate::core::temporal::TemporalGrouper;
use crate::io::catalog::SceneCatalog;
use crate::io::fetch::{BandFetcher, RasterHandle};
use crate::io::geotiff;
use crate::io::sink::PersistenceSink;
use crate::types::{Alert, Aoi, Band, Raster, RunStatus, Scene, WatchError, WatchResult, Zone, ZoneType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// How an epoch's rasters are assembled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionPath {
    /// One scene covers the AOI; clip only
    Single,
    /// Several scenes merged per band
    Mosaic,
}

/// Scenes chosen for one epoch, decided from footprints alone
#[derive(Debug, Clone)]
pub struct AcquisitionPlan {
    pub path: AcquisitionPath,
    pub scenes: Vec<Scene>,
    /// Bounds-mode coverage of the planned scenes
    pub coverage: CoverageResult,
}

impl AcquisitionPlan {
    pub fn scene_ids(&self) -> Vec<String> {
        self.scenes.iter().map(|s| s.id.clone()).collect()
    }

    fn id_set(&self) -> BTreeSet<&str> {
        self.scenes.iter().map(|s| s.id.as_str()).collect()
    }
}

/// What was used for one epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    pub path: AcquisitionPath,
    pub scene_ids: Vec<String>,
    pub bounds_coverage_percent: f64,
    /// Pixel-mode coverage of the assembled red band, when validated
    pub pixel_coverage_percent: Option<f64>,
    /// Single-scene plan replaced by a mosaic after pixel validation
    pub escalated: bool,
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub zones: Vec<Zone>,
    pub alerts: Vec<Alert>,
    pub baseline: EpochReport,
    pub latest: EpochReport,
    pub baseline_stats: BTreeMap<IndexKind, IndexStats>,
    pub latest_stats: BTreeMap<IndexKind, IndexStats>,
    pub change_stats: BTreeMap<IndexKind, ChangeStats>,
}

/// Two-epoch change analysis over one AOI
pub struct Pipeline<C, F, S> {
    config: PipelineConfig,
    catalog: C,
    fetcher: F,
    sink: S,
    rules: AlertRuleEngine,
}

impl<C, F, S> Pipeline<C, F, S>
where
    C: SceneCatalog,
    F: BandFetcher,
    S: PersistenceSink,
{
    /// Build a pipeline with the default alert rules. The configuration is
    /// validated here, once.
    pub fn new(config: PipelineConfig, catalog: C, fetcher: F, sink: S) -> WatchResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            catalog,
            fetcher,
            sink,
            rules: AlertRuleEngine::with_default_rules(),
        })
    }

    pub fn with_rules(mut self, rules: AlertRuleEngine) -> Self {
        self.rules = rules;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run the analysis and record its outcome with the sink
    pub fn run(&mut self, aoi: &Aoi, baseline_ref: &str, latest_ref: &str) -> WatchResult<AnalysisOutput> {
        log::info!("Starting analysis: baseline {} -> latest {}", baseline_ref, latest_ref);

        match self.analyse(aoi, baseline_ref, latest_ref) {
            Ok(output) => {
                self.sink.save_run(&output.zones, &output.alerts, RunStatus::Completed)?;
                log::info!(
                    "✅ Analysis completed: {} zone(s), {} alert(s)",
                    output.zones.len(),
                    output.alerts.len()
                );
                Ok(output)
            }
            Err(e) => {
                let status = e.run_status();
                log::error!("Analysis failed ({}): {}", status, e);
                if let WatchError::InsufficientCoverage { .. } = e {
                    log::info!("{}", e.user_message());
                }
                if let Err(sink_err) = self.sink.save_run(&[], &[], status) {
                    log::warn!("Could not record failed run: {}", sink_err);
                }
                Err(e)
            }
        }
    }

    fn analyse(&mut self, aoi: &Aoi, baseline_ref: &str, latest_ref: &str) -> WatchResult<AnalysisOutput> {
        if baseline_ref == latest_ref {
            return Err(WatchError::IdenticalScenes {
                scene_id: baseline_ref.to_string(),
                acquired_at: None,
            });
        }

        let candidates = self
            .catalog
            .list_candidate_scenes(&aoi.bbox(), self.config.scene.candidate_limit)?;
        log::info!("Catalog returned {} candidate scene(s)", candidates.len());

        let baseline_scene = self.resolve_scene(&candidates, baseline_ref)?;
        let latest_scene = self.resolve_scene(&candidates, latest_ref)?;
        self.check_temporal_consistency(&baseline_scene, &latest_scene)?;

        let (baseline_pool, latest_pool) = self.split_candidates(&candidates, &baseline_scene, &latest_scene)?;
        let baseline_plan = self.plan_acquisition(&baseline_scene, &baseline_pool, aoi)?;
        let latest_plan = self.plan_acquisition(&latest_scene, &latest_pool, aoi)?;
        let baseline_ids = baseline_plan.id_set();
        if let Some(shared) = latest_plan.scenes.iter().find(|s| baseline_ids.contains(s.id.as_str())) {
            return Err(WatchError::IdenticalScenes {
                scene_id: shared.id.clone(),
                acquired_at: Some(shared.acquired_at),
            });
        }

        // Without pixel validation the footprints are all there is to go on
        if !self.config.validation.check_valid_data {
            self.enforce_coverage(&baseline_plan.coverage, baseline_plan.scenes.len())?;
            self.enforce_coverage(&latest_plan.coverage, latest_plan.scenes.len())?;
        }

        let engine = MosaicEngine::new(aoi)?;
        let (baseline_bands, baseline_report) =
            self.acquire_epoch("baseline", &baseline_scene, &baseline_pool, aoi, &engine, baseline_plan)?;
        let (latest_bands, latest_report) =
            self.acquire_epoch("latest", &latest_scene, &latest_pool, aoi, &engine, latest_plan)?;

        let baseline_aligned = baseline_bands.align()?;
        let grid = baseline_aligned.reference_grid()?;
        let latest_aligned = latest_bands.align_to(&grid)?;

        let baseline_indices = SpectralIndices::compute(&baseline_aligned)?;
        let latest_indices = SpectralIndices::compute(&latest_aligned)?;
        let (masks, zones) = detect_changes(&baseline_indices, &latest_indices, &self.config.change)?;
        let change_stats = change_statistics(&baseline_indices, &latest_indices)?;

        let context = RuleContext::with_boundary(engine.clip_shape().clone());
        let alerts = self.rules.evaluate_zones(&zones, &context);

        if let Some(dir) = &self.config.raster.artifact_dir {
            write_artifacts(dir, &baseline_indices, &latest_indices, &masks)?;
        }

        Ok(AnalysisOutput {
            zones,
            alerts,
            baseline: baseline_report,
            latest: latest_report,
            baseline_stats: baseline_indices.stats(),
            latest_stats: latest_indices.stats(),
            change_stats,
        })
    }

    fn resolve_scene(&self, candidates: &[Scene], scene_ref: &str) -> WatchResult<Scene> {
        if let Some(scene) = candidates.iter().find(|s| s.id == scene_ref) {
            return Ok(scene.clone());
        }
        self.catalog
            .find_scene(scene_ref)?
            .ok_or_else(|| WatchError::SceneNotFound {
                scene_id: scene_ref.to_string(),
            })
    }

    fn check_temporal_consistency(&self, baseline: &Scene, latest: &Scene) -> WatchResult<()> {
        let max_days = self.config.temporal.max_baseline_latest_diff_days;
        let days = (latest.acquired_at - baseline.acquired_at).num_milliseconds().abs() as f64 / 86_400_000.0;
        if days > max_days {
            return Err(WatchError::TemporalInconsistency {
                baseline: baseline.acquired_at,
                latest: latest.acquired_at,
                max_days,
            });
        }
        if latest.acquired_at < baseline.acquired_at {
            log::warn!("Latest scene {} predates baseline scene {}", latest.id, baseline.id);
        }
        Ok(())
    }

    /// Disjoint candidate pools for the baseline and latest plans.
    ///
    /// Each reference keeps its own acquisition; every other candidate goes
    /// to the reference it is closer to in time, and equidistant ones to
    /// neither. References sharing one acquisition are the same observation.
    fn split_candidates(
        &self,
        candidates: &[Scene],
        baseline: &Scene,
        latest: &Scene,
    ) -> WatchResult<(Vec<Scene>, Vec<Scene>)> {
        let grouper = TemporalGrouper::from_config(&self.config.temporal);
        let mut with_refs = candidates.to_vec();
        with_refs.push(baseline.clone());
        with_refs.push(latest.clone());
        let baseline_acq = grouper.acquisition_of(&with_refs, baseline);
        let latest_acq = grouper.acquisition_of(&with_refs, latest);

        if baseline_acq.contains(&latest.id) {
            return Err(WatchError::IdenticalScenes {
                scene_id: latest.id.clone(),
                acquired_at: Some(latest.acquired_at),
            });
        }

        let mut baseline_pool = vec![baseline.clone()];
        let mut latest_pool = vec![latest.clone()];
        for scene in candidates {
            if scene.id == baseline.id || scene.id == latest.id {
                continue;
            }
            if baseline_acq.contains(&scene.id) {
                baseline_pool.push(scene.clone());
            } else if latest_acq.contains(&scene.id) {
                latest_pool.push(scene.clone());
            } else {
                let to_baseline = (scene.acquired_at - baseline.acquired_at).num_milliseconds().abs();
                let to_latest = (scene.acquired_at - latest.acquired_at).num_milliseconds().abs();
                match to_baseline.cmp(&to_latest) {
                    std::cmp::Ordering::Less => baseline_pool.push(scene.clone()),
                    std::cmp::Ordering::Greater => latest_pool.push(scene.clone()),
                    std::cmp::Ordering::Equal => log::debug!("Scene {} is equidistant from both epochs; skipped", scene.id),
                }
            }
        }
        log::debug!(
            "Candidate pools: {} baseline, {} latest",
            baseline_pool.len(),
            latest_pool.len()
        );
        Ok((baseline_pool, latest_pool))
    }

    /// Choose the scenes for the epoch of `reference`.
    ///
    /// A single scene is used when its footprint alone reaches the mosaic
    /// threshold; otherwise the multi-scene planner runs.
    pub fn plan_acquisition(&self, reference: &Scene, candidates: &[Scene], aoi: &Aoi) -> WatchResult<AcquisitionPlan> {
        let single = coverage(
            CoverageSource::Footprints(std::slice::from_ref(&reference.footprint)),
            &aoi.boundary,
            CoverageMode::Bounds,
            self.config.coverage.mosaic_threshold,
        )?;

        if single.valid {
            log::info!(
                "Scene {} covers {:.1}% of the AOI: single-scene path",
                reference.id,
                single.coverage_percent
            );
            return Ok(AcquisitionPlan {
                path: AcquisitionPath::Single,
                scenes: vec![reference.clone()],
                coverage: single,
            });
        }

        log::info!(
            "Scene {} covers {:.1}% of the AOI (< {:.1}%): multi-scene path",
            reference.id,
            single.coverage_percent,
            self.config.coverage.mosaic_threshold
        );
        self.plan_mosaic(reference, candidates, aoi, single)
    }

    /// Multi-scene plan: the acquisition epoch of `reference` when it
    /// suffices, else the greedy selector around its date
    fn plan_mosaic(
        &self,
        reference: &Scene,
        candidates: &[Scene],
        aoi: &Aoi,
        single: CoverageResult,
    ) -> WatchResult<AcquisitionPlan> {
        let pool = pool_with(reference, candidates);
        let required = self.config.coverage.minimum_required;
        let criteria = |threshold: f64| {
            SelectionCriteria::from_config(&self.config, reference.acquired_at, aoi.area_deg2(), threshold)
        };

        // Best coverage any plan reached, reported when the selection falls short
        let mut best = (single, 1);

        let grouper = TemporalGrouper::from_config(&self.config.temporal);
        let epochs = grouper.group_into_epochs(&pool, &aoi.boundary)?;
        if let Some(epoch) = epochs.iter().find(|e| e.contains_scene(&reference.id)) {
            if epoch.coverage.coverage_percent > best.0.coverage_percent {
                best = (epoch.coverage.clone(), epoch.scenes.len());
            }
            if epoch.coverage.coverage_percent >= required {
                let selection = select_scenes(&epoch.scenes, &aoi.boundary, &criteria(self.config.coverage.target_coverage))?;
                if selection.coverage_percent >= required {
                    log::info!(
                        "Using acquisition epoch of {}: {} scene(s), {:.1}% coverage",
                        reference.id,
                        selection.scenes.len(),
                        selection.coverage_percent
                    );
                    return Ok(AcquisitionPlan {
                        path: AcquisitionPath::Mosaic,
                        scenes: selection.scenes,
                        coverage: selection.coverage,
                    });
                }
            }
        }

        let selection = select_scenes(&pool, &aoi.boundary, &criteria(self.config.coverage.target_coverage))?;
        self.enforce_coverage(&selection.coverage, selection.scenes.len())
            .map_err(|e| match e {
                WatchError::InsufficientCoverage { .. } if best.0.coverage_percent > selection.coverage_percent => {
                    self.insufficient(&best.0, best.1)
                }
                other => other,
            })?;

        let path = if selection.scenes.len() > 1 {
            AcquisitionPath::Mosaic
        } else {
            AcquisitionPath::Single
        };
        Ok(AcquisitionPlan {
            path,
            scenes: selection.scenes,
            coverage: selection.coverage,
        })
    }

    /// Mosaic plan after a single scene failed pixel validation.
    ///
    /// The failed scene's footprint overstates its data, so the footprint
    /// selector cannot be trusted to pick companions: the whole acquisition
    /// epoch is used, reference first, or when the reference stands alone
    /// the scenes the selector picks from the remaining candidates.
    fn plan_escalation(&self, reference: &Scene, candidates: &[Scene], aoi: &Aoi) -> WatchResult<AcquisitionPlan> {
        let pool = pool_with(reference, candidates);
        let grouper = TemporalGrouper::from_config(&self.config.temporal);
        let epochs = grouper.group_into_epochs(&pool, &aoi.boundary)?;

        let mut scenes = vec![reference.clone()];
        if let Some(epoch) = epochs.iter().find(|e| e.contains_scene(&reference.id)) {
            scenes.extend(epoch.scenes.iter().filter(|s| s.id != reference.id).cloned());
        }
        if scenes.len() == 1 {
            let others: Vec<Scene> = pool.into_iter().filter(|s| s.id != reference.id).collect();
            let criteria = SelectionCriteria::from_config(
                &self.config,
                reference.acquired_at,
                aoi.area_deg2(),
                self.config.coverage.target_coverage,
            );
            match select_scenes(&others, &aoi.boundary, &criteria) {
                Ok(selection) => scenes.extend(selection.scenes),
                Err(WatchError::InsufficientCandidates { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        scenes.truncate(self.config.max_scenes_for_area(aoi.area_deg2()));

        let footprints: Vec<_> = scenes.iter().map(|s| s.footprint.clone()).collect();
        let bounds = coverage(
            CoverageSource::Footprints(&footprints),
            &aoi.boundary,
            CoverageMode::Bounds,
            self.config.coverage.minimum_required,
        )?;
        log::info!(
            "Escalated {} to a {}-scene mosaic ({:.1}% bounds coverage)",
            reference.id,
            scenes.len(),
            bounds.coverage_percent
        );
        self.enforce_coverage(&bounds, scenes.len())?;
        Ok(AcquisitionPlan {
            path: AcquisitionPath::Mosaic,
            scenes,
            coverage: bounds,
        })
    }

    /// Fail unless `result` reaches the hard minimum. With
    /// `fail_on_insufficient_coverage` off, anything above the download
    /// minimum passes with a warning.
    fn enforce_coverage(&self, result: &CoverageResult, scene_count: usize) -> WatchResult<()> {
        let required = self.config.coverage.minimum_required;
        if result.coverage_percent >= required {
            return Ok(());
        }

        let err = self.insufficient(result, scene_count);
        if self.config.validation.fail_on_insufficient_coverage
            || result.coverage_percent < self.config.coverage.download_minimum
        {
            return Err(err);
        }
        log::warn!("Continuing despite insufficient coverage: {}", err);
        Ok(())
    }

    fn insufficient(&self, result: &CoverageResult, scene_count: usize) -> WatchError {
        WatchError::InsufficientCoverage {
            coverage_percent: result.coverage_percent,
            required_percent: self.config.coverage.minimum_required,
            scene_count,
            uncovered_area_ha: Some(result.uncovered_area_ha),
        }
    }

    /// Fetch, assemble and pixel-validate one epoch, escalating a failed
    /// single-scene plan to a mosaic once
    fn acquire_epoch(
        &mut self,
        label: &str,
        reference: &Scene,
        candidates: &[Scene],
        aoi: &Aoi,
        engine: &MosaicEngine,
        plan: AcquisitionPlan,
    ) -> WatchResult<(BandSet, EpochReport)> {
        let bands = self.load_bands(&plan, engine)?;
        let pixel = self.validate_pixels(&bands, aoi)?;

        let needs_escalation = plan.path == AcquisitionPath::Single
            && pixel.as_ref().map_or(false, |p| !p.valid);
        if !needs_escalation {
            if let Some(p) = &pixel {
                self.enforce_coverage(p, plan.scenes.len())?;
            }
            log::info!("{} epoch ready: {:?} of {} scene(s)", label, plan.path, plan.scenes.len());
            return Ok((bands, epoch_report(&plan, pixel.as_ref(), false)));
        }

        log::warn!(
            "{} scene {} passed bounds screening but holds data for only {:.1}% of the AOI; re-planning as mosaic",
            label,
            reference.id,
            pixel.as_ref().map_or(0.0, |p| p.coverage_percent)
        );
        let replanned = self.plan_escalation(reference, candidates, aoi)?;
        let bands = self.load_bands(&replanned, engine)?;
        let pixel = self.validate_pixels(&bands, aoi)?;
        if let Some(p) = &pixel {
            self.enforce_coverage(p, replanned.scenes.len())?;
        }
        Ok((bands, epoch_report(&replanned, pixel.as_ref(), true)))
    }

    /// Pixel-mode coverage of the red band against the hard minimum
    fn validate_pixels(&self, bands: &BandSet, aoi: &Aoi) -> WatchResult<Option<CoverageResult>> {
        if !self.config.validation.check_valid_data {
            return Ok(None);
        }
        let red = bands.get(Band::B04)?;
        let result = coverage(
            CoverageSource::Raster(red),
            &aoi.boundary,
            CoverageMode::Pixel,
            self.config.coverage.minimum_required,
        )?;
        log::info!("Pixel validation: {}", result.message);
        Ok(Some(result))
    }

    /// Bands are fetched one at a time; assembly runs per band
    fn load_bands(&mut self, plan: &AcquisitionPlan, engine: &MosaicEngine) -> WatchResult<BandSet> {
        let mut handles: Vec<(Band, Vec<RasterHandle>)> = Vec::with_capacity(Band::ALL.len());
        for band in Band::ALL {
            let mut per_scene = Vec::with_capacity(plan.scenes.len());
            for scene in &plan.scenes {
                per_scene.push(self.fetcher.fetch_band(scene, band)?);
            }
            handles.push((band, per_scene));
        }

        let rasters = assemble_bands(&handles, plan.path, engine, self.config.raster.zero_is_nodata)?;
        let mut bands = BandSet::new();
        for (band, raster) in rasters {
            bands.insert(band, raster);
        }
        Ok(bands)
    }
}

/// Candidates plus the reference scene when the catalog listing missed it
fn pool_with(reference: &Scene, candidates: &[Scene]) -> Vec<Scene> {
    let mut pool = candidates.to_vec();
    if !pool.iter().any(|s| s.id == reference.id) {
        pool.push(reference.clone());
    }
    pool
}

fn assemble_band(
    band: Band,
    handles: &[RasterHandle],
    path: AcquisitionPath,
    engine: &MosaicEngine,
    zero_is_nodata: bool,
) -> WatchResult<Raster> {
    match (path, handles) {
        (AcquisitionPath::Single, [handle]) => engine.clip(&handle.open(zero_is_nodata)?),
        _ => {
            let paths: Vec<&Path> = handles.iter().map(|h| h.path()).collect();
            engine.mosaic_paths(band, &paths, zero_is_nodata)
        }
    }
}

/// Assemble every band in parallel; output stays in `handles` order
#[cfg(feature = "parallel")]
fn assemble_bands(
    handles: &[(Band, Vec<RasterHandle>)],
    path: AcquisitionPath,
    engine: &MosaicEngine,
    zero_is_nodata: bool,
) -> WatchResult<Vec<(Band, Raster)>> {
    use rayon::prelude::*;

    handles
        .par_iter()
        .map(|(band, h)| Ok((*band, assemble_band(*band, h, path, engine, zero_is_nodata)?)))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn assemble_bands(
    handles: &[(Band, Vec<RasterHandle>)],
    path: AcquisitionPath,
    engine: &MosaicEngine,
    zero_is_nodata: bool,
) -> WatchResult<Vec<(Band, Raster)>> {
    handles
        .iter()
        .map(|(band, h)| Ok((*band, assemble_band(*band, h, path, engine, zero_is_nodata)?)))
        .collect()
}

fn epoch_report(plan: &AcquisitionPlan, pixel: Option<&CoverageResult>, escalated: bool) -> EpochReport {
    EpochReport {
        path: plan.path,
        scene_ids: plan.scene_ids(),
        bounds_coverage_percent: plan.coverage.coverage_percent,
        pixel_coverage_percent: pixel.map(|p| p.coverage_percent),
        escalated,
    }
}

/// Index rasters per epoch, index deltas and class masks as GeoTIFFs
fn write_artifacts(
    dir: &Path,
    baseline: &SpectralIndices,
    latest: &SpectralIndices,
    masks: &ChangeMasks,
) -> WatchResult<()> {
    std::fs::create_dir_all(dir)?;
    let grid = &latest.grid;

    for kind in IndexKind::ALL {
        for (label, indices) in [("baseline", baseline), ("latest", latest)] {
            let raster = Raster::new(indices.get(kind).clone(), grid.transform, grid.crs);
            geotiff::write_raster(&raster, dir.join(format!("{}_{}.tif", label, kind.as_str())))?;
        }
        let delta = latest.get(kind) - baseline.get(kind);
        let raster = Raster::new(delta, grid.transform, grid.crs);
        geotiff::write_raster(&raster, dir.join(format!("change_{}.tif", kind.as_str())))?;
    }

    for zone_type in [
        ZoneType::VegetationLoss,
        ZoneType::MiningExpansion,
        ZoneType::WaterAccumulation,
    ] {
        geotiff::write_mask(
            masks.get(zone_type),
            &grid.transform,
            grid.crs,
            dir.join(format!("mask_{}.tif", zone_type.as_str())),
        )?;
    }

    log::info!("Wrote analysis rasters to {}", dir.display());
    Ok(())
}
