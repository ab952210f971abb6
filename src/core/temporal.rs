//! Grouping of scenes into acquisition epochs.

use crate::config::TemporalConfig;
use crate::core::coverage::{coverage, CoverageMode, CoverageResult, CoverageSource};
use crate::types::{Scene, WatchResult};
use chrono::{DateTime, Utc};
use geo::Polygon;
use std::collections::HashSet;

/// Scenes acquired close enough in time to be treated as one observation
#[derive(Debug, Clone)]
pub struct Epoch {
    /// Members in acquisition order
    pub scenes: Vec<Scene>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Bounds-mode coverage of the union footprint
    pub coverage: CoverageResult,
}

impl Epoch {
    pub fn footprints(&self) -> Vec<Polygon<f64>> {
        self.scenes.iter().map(|s| s.footprint.clone()).collect()
    }

    pub fn contains_scene(&self, scene_id: &str) -> bool {
        self.scenes.iter().any(|s| s.id == scene_id)
    }

    pub fn scene_ids(&self) -> Vec<String> {
        self.scenes.iter().map(|s| s.id.clone()).collect()
    }
}

/// Chain-merge clustering of scenes into acquisition epochs
#[derive(Debug, Clone)]
pub struct TemporalGrouper {
    tolerance_minutes: f64,
    min_epoch_coverage: f64,
}

impl TemporalGrouper {
    pub fn new(tolerance_minutes: f64, min_epoch_coverage: f64) -> Self {
        Self {
            tolerance_minutes,
            min_epoch_coverage,
        }
    }

    pub fn from_config(config: &TemporalConfig) -> Self {
        Self::new(config.epoch_tolerance_minutes, config.min_epoch_coverage)
    }

    /// Split scenes into time clusters.
    ///
    /// Scenes are sorted by acquisition time and a cluster grows while the
    /// gap to the next scene stays within tolerance. Duplicate ids are kept
    /// once.
    pub fn cluster(&self, scenes: &[Scene]) -> Vec<Vec<Scene>> {
        let mut seen = HashSet::new();
        let mut sorted: Vec<Scene> = scenes
            .iter()
            .filter(|s| seen.insert(s.id.clone()))
            .cloned()
            .collect();
        sorted.sort_by(|a, b| a.acquired_at.cmp(&b.acquired_at).then_with(|| a.id.cmp(&b.id)));

        let mut clusters: Vec<Vec<Scene>> = Vec::new();
        for scene in sorted {
            let extend = match clusters.last().and_then(|c| c.last()) {
                Some(prev) => {
                    let gap_minutes =
                        (scene.acquired_at - prev.acquired_at).num_milliseconds() as f64 / 60_000.0;
                    gap_minutes <= self.tolerance_minutes
                }
                None => false,
            };
            match clusters.last_mut() {
                Some(current) if extend => current.push(scene),
                _ => clusters.push(vec![scene]),
            }
        }
        clusters
    }

    /// Ids of the time cluster `reference` falls in, coverage aside.
    /// `reference` need not be among `scenes`.
    pub fn acquisition_of(&self, scenes: &[Scene], reference: &Scene) -> HashSet<String> {
        let mut all = vec![reference.clone()];
        all.extend(scenes.iter().filter(|s| s.id != reference.id).cloned());
        self.cluster(&all)
            .into_iter()
            .find(|c| c.iter().any(|s| s.id == reference.id))
            .map(|c| c.into_iter().map(|s| s.id).collect())
            .unwrap_or_default()
    }

    /// Epochs meeting the minimum coverage, most recent first
    pub fn group_into_epochs(&self, candidates: &[Scene], aoi: &Polygon<f64>) -> WatchResult<Vec<Epoch>> {
        let mut epochs = Vec::new();

        for scenes in self.cluster(candidates) {
            let footprints: Vec<Polygon<f64>> = scenes.iter().map(|s| s.footprint.clone()).collect();
            let result = coverage(
                CoverageSource::Footprints(&footprints),
                aoi,
                CoverageMode::Bounds,
                self.min_epoch_coverage,
            )?;

            let (start, end) = match (scenes.first(), scenes.last()) {
                (Some(first), Some(last)) => (first.acquired_at, last.acquired_at),
                _ => continue,
            };

            if !result.valid {
                log::debug!(
                    "Discarding epoch {} ({} scene(s)): coverage {:.1}% < {:.1}%",
                    start,
                    scenes.len(),
                    result.coverage_percent,
                    self.min_epoch_coverage
                );
                continue;
            }

            epochs.push(Epoch {
                scenes,
                start,
                end,
                coverage: result,
            });
        }

        epochs.sort_by(|a, b| {
            b.end.cmp(&a.end).then_with(|| {
                b.coverage
                    .coverage_percent
                    .total_cmp(&a.coverage.coverage_percent)
            })
        });

        log::info!(
            "Grouped {} candidate scene(s) into {} usable epoch(s)",
            candidates.len(),
            epochs.len()
        );
        Ok(epochs)
    }
}
