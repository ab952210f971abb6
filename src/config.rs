use crate::types::{WatchError, WatchResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Coverage policy thresholds (percent of AOI area)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    /// Hard minimum an epoch must reach to be analysed
    pub minimum_required: f64,
    /// Single-scene bounds coverage at or above this skips mosaicking
    pub mosaic_threshold: f64,
    /// Coverage the selector aims for
    pub target_coverage: f64,
    /// Minimum bounds coverage before any band is fetched
    pub download_minimum: f64,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            minimum_required: 95.0,
            mosaic_threshold: 92.0,
            target_coverage: 98.0,
            download_minimum: 80.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    /// Maximum gap between consecutive scenes of one epoch
    pub epoch_tolerance_minutes: f64,
    /// Epochs below this bounds coverage are discarded
    pub min_epoch_coverage: f64,
    /// Candidate window around the target date
    pub max_date_diff_days: f64,
    /// Maximum separation between baseline and latest
    pub max_baseline_latest_diff_days: f64,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            epoch_tolerance_minutes: 10.0,
            min_epoch_coverage: 80.0,
            max_date_diff_days: 30.0,
            max_baseline_latest_diff_days: 365.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Upper bound on scenes per mosaic
    pub max_scenes: usize,
    /// Cloud cover ceiling (percent)
    pub max_cloud_cover: f64,
    /// Number of candidates requested from the catalog
    pub candidate_limit: usize,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            max_scenes: 8,
            max_cloud_cover: 80.0,
            candidate_limit: 100,
        }
    }
}

/// Index-delta thresholds; a pixel changes class when its delta is strictly greater
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeConfig {
    pub vegetation_loss: f64,
    pub mining_expansion: f64,
    pub water_accumulation: f64,
}

impl Default for ChangeConfig {
    fn default() -> Self {
        Self {
            vegetation_loss: 0.15,
            mining_expansion: 0.25,
            water_accumulation: 0.20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    /// Treat 0 reflectance as nodata (Sentinel-2 L2A convention)
    pub zero_is_nodata: bool,
    /// Write index and change GeoTIFFs here when set
    pub artifact_dir: Option<PathBuf>,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            zero_is_nodata: true,
            artifact_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Pixel-mode validation of every mosaic before analysis
    pub check_valid_data: bool,
    /// Development switch: continue with a warning when coverage is short
    pub fail_on_insufficient_coverage: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            check_valid_data: true,
            fail_on_insufficient_coverage: true,
        }
    }
}

/// Immutable configuration handed to the pipeline at construction
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub coverage: CoverageConfig,
    pub temporal: TemporalConfig,
    pub scene: SceneConfig,
    pub change: ChangeConfig,
    pub raster: RasterConfig,
    pub validation: ValidationConfig,
}

impl PipelineConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> WatchResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        log::debug!("Loaded pipeline config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Check internal consistency of all thresholds
    pub fn validate(&self) -> WatchResult<()> {
        let c = &self.coverage;
        for (name, value) in [
            ("minimum_required", c.minimum_required),
            ("mosaic_threshold", c.mosaic_threshold),
            ("target_coverage", c.target_coverage),
            ("download_minimum", c.download_minimum),
            ("min_epoch_coverage", self.temporal.min_epoch_coverage),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(WatchError::Config(format!(
                    "{} must be within 0-100, got {}",
                    name, value
                )));
            }
        }

        if c.download_minimum > c.mosaic_threshold {
            return Err(WatchError::Config(format!(
                "download_minimum ({}) must not exceed mosaic_threshold ({})",
                c.download_minimum, c.mosaic_threshold
            )));
        }
        if c.mosaic_threshold > c.minimum_required {
            return Err(WatchError::Config(format!(
                "mosaic_threshold ({}) must not exceed minimum_required ({})",
                c.mosaic_threshold, c.minimum_required
            )));
        }
        if c.minimum_required > c.target_coverage {
            return Err(WatchError::Config(format!(
                "minimum_required ({}) must not exceed target_coverage ({})",
                c.minimum_required, c.target_coverage
            )));
        }

        let t = &self.temporal;
        if !(t.epoch_tolerance_minutes >= 0.0) {
            return Err(WatchError::Config("epoch_tolerance_minutes must be non-negative".to_string()));
        }
        if !(t.max_date_diff_days > 0.0) || !(t.max_baseline_latest_diff_days > 0.0) {
            return Err(WatchError::Config("date windows must be positive".to_string()));
        }

        let s = &self.scene;
        if s.max_scenes < 2 {
            return Err(WatchError::Config(format!(
                "max_scenes must be at least 2, got {}",
                s.max_scenes
            )));
        }
        if !(0.0..=100.0).contains(&s.max_cloud_cover) {
            return Err(WatchError::Config(format!(
                "max_cloud_cover must be within 0-100, got {}",
                s.max_cloud_cover
            )));
        }
        if s.candidate_limit == 0 {
            return Err(WatchError::Config("candidate_limit must be positive".to_string()));
        }

        let ch = &self.change;
        for (name, value) in [
            ("vegetation_loss", ch.vegetation_loss),
            ("mining_expansion", ch.mining_expansion),
            ("water_accumulation", ch.water_accumulation),
        ] {
            if !(value > 0.0) {
                return Err(WatchError::Config(format!(
                    "change threshold {} must be positive, got {}",
                    name, value
                )));
            }
        }

        if !self.validation.fail_on_insufficient_coverage {
            log::warn!("fail_on_insufficient_coverage is disabled; short coverage will not stop runs");
        }

        Ok(())
    }

    /// Scene cap for an AOI: max(round(area_deg2 * 1.5), 2), capped at `max_scenes`
    pub fn max_scenes_for_area(&self, aoi_area_deg2: f64) -> usize {
        let estimate = (aoi_area_deg2 * 1.5).round().max(2.0) as usize;
        estimate.min(self.scene.max_scenes)
    }
}
