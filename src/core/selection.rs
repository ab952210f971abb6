//! Greedy scene selection.
//!
//! Split into a ranking iterator (pure ordering of eligible candidates) and
//! a coverage accumulator (pure reducer over that iterator), so the greedy
//! loop is testable without any catalog or raster access.

use crate::config::PipelineConfig;
use crate::core::coverage::{CoverageMode, CoverageResult};
use crate::core::geometry;
use crate::types::{Scene, WatchError, WatchResult};
use chrono::{DateTime, Utc};
use geo::{MultiPolygon, Polygon};
use std::cmp::Ordering;

/// Coverage gain (percent) below which a scene adds nothing
const MIN_GAIN_PERCENT: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionCriteria {
    pub target_date: DateTime<Utc>,
    pub max_date_diff_days: f64,
    pub max_cloud_cover: f64,
    pub max_scenes: usize,
    pub coverage_threshold: f64,
}

impl SelectionCriteria {
    /// Criteria for `target_date` using the configured windows and an
    /// AOI-dependent scene cap
    pub fn from_config(
        config: &PipelineConfig,
        target_date: DateTime<Utc>,
        aoi_area_deg2: f64,
        coverage_threshold: f64,
    ) -> Self {
        Self {
            target_date,
            max_date_diff_days: config.temporal.max_date_diff_days,
            max_cloud_cover: config.scene.max_cloud_cover,
            max_scenes: config.max_scenes_for_area(aoi_area_deg2),
            coverage_threshold,
        }
    }

    fn days_from_target(&self, scene: &Scene) -> f64 {
        (scene.acquired_at - self.target_date).num_milliseconds().abs() as f64 / 86_400_000.0
    }

    /// Date window and cloud ceiling; unknown cloud cover passes
    pub fn is_eligible(&self, scene: &Scene) -> bool {
        let in_window = self.days_from_target(scene) <= self.max_date_diff_days;
        let clear_enough = scene.cloud_cover.map_or(true, |c| c <= self.max_cloud_cover);
        in_window && clear_enough
    }
}

/// Eligible candidates ordered by date proximity, then cloud cover
pub struct RankedCandidates<'a> {
    inner: std::vec::IntoIter<&'a Scene>,
}

impl<'a> RankedCandidates<'a> {
    pub fn new(candidates: &'a [Scene], criteria: &SelectionCriteria) -> Self {
        let mut eligible: Vec<&Scene> = candidates.iter().filter(|s| criteria.is_eligible(s)).collect();
        eligible.sort_by(|a, b| {
            let da = (a.acquired_at - criteria.target_date).num_milliseconds().abs();
            let db = (b.acquired_at - criteria.target_date).num_milliseconds().abs();
            da.cmp(&db)
                .then_with(|| cmp_cloud(a.cloud_cover, b.cloud_cover))
                .then_with(|| a.id.cmp(&b.id))
        });
        Self {
            inner: eligible.into_iter(),
        }
    }
}

impl<'a> Iterator for RankedCandidates<'a> {
    type Item = &'a Scene;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Known cloud cover ascending, unknown last
fn cmp_cloud(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Outcome of offering one scene to the accumulator
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Offer {
    Added { coverage_percent: f64 },
    NoGain,
    Closed,
}

/// Running union of selected footprints and its AOI coverage
pub struct CoverageAccumulator<'a> {
    aoi: &'a Polygon<f64>,
    threshold: f64,
    max_scenes: usize,
    union: MultiPolygon<f64>,
    selected: Vec<Scene>,
    coverage: CoverageResult,
}

impl<'a> CoverageAccumulator<'a> {
    pub fn new(aoi: &'a Polygon<f64>, threshold: f64, max_scenes: usize) -> WatchResult<Self> {
        let union = geometry::empty();
        let coverage = CoverageResult::from_extent(&union, aoi, CoverageMode::Bounds, threshold)?;
        Ok(Self {
            aoi,
            threshold,
            max_scenes,
            union,
            selected: Vec::new(),
            coverage,
        })
    }

    pub fn coverage_percent(&self) -> f64 {
        self.coverage.coverage_percent
    }

    pub fn is_satisfied(&self) -> bool {
        self.coverage.coverage_percent >= self.threshold
    }

    pub fn is_closed(&self) -> bool {
        self.is_satisfied() || self.selected.len() >= self.max_scenes
    }

    /// Add `scene` if it enlarges the covered AOI area
    pub fn offer(&mut self, scene: &Scene) -> WatchResult<Offer> {
        if self.is_closed() {
            return Ok(Offer::Closed);
        }

        let union = geometry::union_multi(vec![self.union.clone(), MultiPolygon::from(scene.footprint.clone())]);
        let candidate = CoverageResult::from_extent(&union, self.aoi, CoverageMode::Bounds, self.threshold)?;

        if candidate.coverage_percent - self.coverage.coverage_percent < MIN_GAIN_PERCENT {
            log::debug!("Skipping scene {}: no new AOI coverage", scene.id);
            return Ok(Offer::NoGain);
        }

        log::debug!(
            "Selected scene {}: coverage {:.1}% -> {:.1}%",
            scene.id,
            self.coverage.coverage_percent,
            candidate.coverage_percent
        );
        self.union = union;
        self.coverage = candidate;
        self.selected.push(scene.clone());
        Ok(Offer::Added {
            coverage_percent: self.coverage.coverage_percent,
        })
    }

    pub fn finish(self) -> Selection {
        let threshold_met = self.is_satisfied();
        Selection {
            scenes: self.selected,
            coverage_percent: self.coverage.coverage_percent,
            threshold_met,
            coverage: self.coverage,
        }
    }
}

/// Scenes chosen for one epoch, in selection order
#[derive(Debug, Clone)]
pub struct Selection {
    pub scenes: Vec<Scene>,
    pub coverage_percent: f64,
    pub threshold_met: bool,
    pub coverage: CoverageResult,
}

impl Selection {
    pub fn scene_ids(&self) -> Vec<String> {
        self.scenes.iter().map(|s| s.id.clone()).collect()
    }

    pub fn footprints(&self) -> Vec<Polygon<f64>> {
        self.scenes.iter().map(|s| s.footprint.clone()).collect()
    }
}

/// Greedily pick the fewest scenes reaching the coverage threshold.
///
/// When candidates run out first the best partial set is returned with
/// `threshold_met == false`; whether that is fatal is the caller's call.
pub fn select_scenes(candidates: &[Scene], aoi: &Polygon<f64>, criteria: &SelectionCriteria) -> WatchResult<Selection> {
    let ranked = RankedCandidates::new(candidates, criteria);
    let eligible = ranked.size_hint().0;
    if eligible == 0 {
        return Err(WatchError::InsufficientCandidates {
            total: candidates.len(),
            eligible: 0,
        });
    }

    let mut acc = CoverageAccumulator::new(aoi, criteria.coverage_threshold, criteria.max_scenes)?;
    for scene in ranked {
        if acc.offer(scene)? == Offer::Closed {
            break;
        }
    }

    let selection = acc.finish();
    log::info!(
        "Selected {} of {} eligible scene(s): {:.1}% coverage (threshold {:.1}%)",
        selection.scenes.len(),
        eligible,
        selection.coverage_percent,
        criteria.coverage_threshold
    );
    Ok(selection)
}
