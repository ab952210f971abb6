use chrono::{DateTime, Utc};
use geo::{Area, BoundingRect, Polygon, Rect};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Reflectance raster (rows x cols); NaN marks nodata
pub type BandImage = Array2<f32>;

/// Per-pixel boolean mask on a raster grid
pub type PixelMask = Array2<bool>;

/// Sentinel-2 bands consumed by the change engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Band {
    B02, // Blue
    B03, // Green
    B04, // Red
    B08, // NIR
    B11, // SWIR 1.6um
}

impl Band {
    /// All bands in reference-grid priority order (highest first)
    pub const ALL: [Band; 5] = [Band::B04, Band::B08, Band::B03, Band::B02, Band::B11];

    /// Asset key used by the catalog for this band
    pub fn asset_key(&self) -> &'static str {
        match self {
            Band::B02 => "B02",
            Band::B03 => "B03",
            Band::B04 => "B04",
            Band::B08 => "B08",
            Band::B11 => "B11",
        }
    }

    pub fn common_name(&self) -> &'static str {
        match self {
            Band::B02 => "blue",
            Band::B03 => "green",
            Band::B04 => "red",
            Band::B08 => "nir",
            Band::B11 => "swir16",
        }
    }

    /// Native ground sampling distance in meters
    pub fn native_resolution_m(&self) -> f64 {
        match self {
            Band::B11 => 20.0,
            _ => 10.0,
        }
    }

    /// Position in [`Band::ALL`]; lower is higher priority
    pub fn priority(&self) -> usize {
        Band::ALL.iter().position(|b| b == self).unwrap_or(Band::ALL.len())
    }
}

impl std::fmt::Display for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.asset_key())
    }
}

impl FromStr for Band {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "B02" | "BLUE" => Ok(Band::B02),
            "B03" | "GREEN" => Ok(Band::B03),
            "B04" | "RED" => Ok(Band::B04),
            "B08" | "NIR" => Ok(Band::B08),
            "B11" | "SWIR16" | "SWIR" => Ok(Band::B11),
            _ => Err(WatchError::Config(format!("Unknown band: {}", s))),
        }
    }
}

/// Coordinate reference systems the pipeline can reproject between
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// WGS84 longitude/latitude (EPSG:4326)
    Geographic,
    /// WGS84 / UTM (EPSG:326xx north, 327xx south)
    Utm { zone: u8, north: bool },
}

impl CoordinateSystem {
    pub fn from_epsg(epsg: u32) -> WatchResult<Self> {
        match epsg {
            4326 => Ok(CoordinateSystem::Geographic),
            32601..=32660 => Ok(CoordinateSystem::Utm { zone: (epsg - 32600) as u8, north: true }),
            32701..=32760 => Ok(CoordinateSystem::Utm { zone: (epsg - 32700) as u8, north: false }),
            _ => Err(WatchError::Projection(format!("Unsupported CRS EPSG:{}", epsg))),
        }
    }

    pub fn epsg(&self) -> u32 {
        match self {
            CoordinateSystem::Geographic => 4326,
            CoordinateSystem::Utm { zone, north: true } => 32600 + *zone as u32,
            CoordinateSystem::Utm { zone, north: false } => 32700 + *zone as u32,
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, CoordinateSystem::Geographic)
    }
}

impl std::fmt::Display for CoordinateSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

/// Geospatial bounding box (WGS84 degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn from_rect(rect: &Rect<f64>) -> Self {
        Self {
            min_lon: rect.min().x,
            max_lon: rect.max().x,
            min_lat: rect.min().y,
            max_lat: rect.max().y,
        }
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        Rect::new(
            geo::coord! { x: self.min_lon, y: self.min_lat },
            geo::coord! { x: self.max_lon, y: self.max_lat },
        )
        .to_polygon()
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        !(self.max_lon < other.min_lon
            || other.max_lon < self.min_lon
            || self.max_lat < other.min_lat
            || other.max_lat < self.min_lat)
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform without rotation terms
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map coordinates of a fractional pixel position (col, row)
    pub fn pixel_to_map(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// Fractional pixel position (col, row) of map coordinates.
    /// Rotation terms are ignored; all pipeline grids are north-up.
    pub fn map_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.top_left_x) / self.pixel_width,
            (y - self.top_left_y) / self.pixel_height,
        )
    }

    pub fn is_north_up(&self) -> bool {
        self.rotation_x == 0.0 && self.rotation_y == 0.0 && self.pixel_height < 0.0
    }
}

/// Single-band georeferenced raster held in memory
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub data: BandImage,
    pub transform: GeoTransform,
    pub crs: CoordinateSystem,
}

impl Raster {
    pub fn new(data: BandImage, transform: GeoTransform, crs: CoordinateSystem) -> Self {
        Self { data, transform, crs }
    }

    /// (rows, cols)
    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn is_valid(value: f32) -> bool {
        value.is_finite()
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| Self::is_valid(**v)).count()
    }

    pub fn valid_mask(&self) -> PixelMask {
        self.data.mapv(Self::is_valid)
    }

    /// Absolute pixel size (x, y) in CRS units
    pub fn pixel_size(&self) -> (f64, f64) {
        (self.transform.pixel_width.abs(), self.transform.pixel_height.abs())
    }

    /// Extent in native CRS units
    pub fn bounds(&self) -> Rect<f64> {
        let (rows, cols) = self.dim();
        let (x0, y0) = self.transform.pixel_to_map(0.0, 0.0);
        let (x1, y1) = self.transform.pixel_to_map(cols as f64, rows as f64);
        Rect::new(geo::coord! { x: x0, y: y0 }, geo::coord! { x: x1, y: y1 })
    }
}

/// Satellite scene metadata as delivered by the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    pub acquired_at: DateTime<Utc>,
    /// Cloud cover percentage; `None` when the catalog does not report it
    pub cloud_cover: Option<f64>,
    /// Footprint in WGS84
    pub footprint: Polygon<f64>,
    /// Band asset key -> href
    #[serde(default)]
    pub assets: BTreeMap<String, String>,
}

impl Scene {
    pub fn new(id: impl Into<String>, acquired_at: DateTime<Utc>, cloud_cover: Option<f64>, footprint: Polygon<f64>) -> Self {
        Self {
            id: id.into(),
            acquired_at,
            cloud_cover,
            footprint,
            assets: BTreeMap::new(),
        }
    }

    pub fn with_asset(mut self, band: Band, href: impl Into<String>) -> Self {
        self.assets.insert(band.asset_key().to_string(), href.into());
        self
    }
}

/// Area of interest: WGS84 boundary plus a buffer distance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aoi {
    pub boundary: Polygon<f64>,
    pub buffer_km: f64,
}

impl Aoi {
    pub fn new(boundary: Polygon<f64>, buffer_km: f64) -> WatchResult<Self> {
        if boundary.unsigned_area() <= 0.0 {
            return Err(WatchError::InvalidGeometry("AOI boundary has zero area".to_string()));
        }
        if !buffer_km.is_finite() || buffer_km < 0.0 {
            return Err(WatchError::InvalidGeometry(format!(
                "AOI buffer must be a non-negative distance, got {} km",
                buffer_km
            )));
        }
        Ok(Self { boundary, buffer_km })
    }

    /// Planar area in square degrees, used for scene-count estimates
    pub fn area_deg2(&self) -> f64 {
        self.boundary.unsigned_area()
    }

    pub fn bbox(&self) -> BoundingBox {
        match self.boundary.bounding_rect() {
            Some(rect) => BoundingBox::from_rect(&rect),
            None => BoundingBox { min_lon: 0.0, max_lon: 0.0, min_lat: 0.0, max_lat: 0.0 },
        }
    }
}

/// Change classes produced by the index engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    VegetationLoss,
    MiningExpansion,
    WaterAccumulation,
}

impl ZoneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneType::VegetationLoss => "vegetation_loss",
            ZoneType::MiningExpansion => "mining_expansion",
            ZoneType::WaterAccumulation => "water_accumulation",
        }
    }
}

impl std::fmt::Display for ZoneType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One contiguous area of detected change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: usize,
    pub zone_type: ZoneType,
    pub area_ha: f64,
    /// WGS84 outline
    pub geometry: Polygon<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity-graded notification derived from a zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub zone_id: usize,
    /// Name of the rule that fired
    pub rule: String,
    pub alert_type: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub location: String,
    pub geometry: Polygon<f64>,
}

/// Final status recorded for an analysis run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    FailedCoverage,
    FailedIdenticalScenes,
    FailedMosaic,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::FailedCoverage => "failed_coverage",
            RunStatus::FailedIdenticalScenes => "failed_identical_scenes",
            RunStatus::FailedMosaic => "failed_mosaic",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error types for the monitoring pipeline
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Scene not found in catalog: {scene_id}")]
    SceneNotFound { scene_id: String },

    #[error("Baseline and latest scenes are identical: {scene_id}")]
    IdenticalScenes {
        scene_id: String,
        acquired_at: Option<DateTime<Utc>>,
    },

    #[error("Insufficient coverage: {coverage_percent:.1}% from {scene_count} scene(s), required {required_percent:.1}%")]
    InsufficientCoverage {
        coverage_percent: f64,
        required_percent: f64,
        scene_count: usize,
        uncovered_area_ha: Option<f64>,
    },

    #[error("No eligible scene candidates ({eligible} of {total} passed date and cloud filters)")]
    InsufficientCandidates { total: usize, eligible: usize },

    #[error("Mosaic failed for band {band} ({scene_count} scene(s)): {reason}")]
    Mosaic {
        band: String,
        scene_count: usize,
        reason: String,
    },

    #[error("Baseline {baseline} and latest {latest} are more than {max_days} days apart")]
    TemporalInconsistency {
        baseline: DateTime<Utc>,
        latest: DateTime<Utc>,
        max_days: f64,
    },

    #[error("Rule '{rule}' failed: {reason}")]
    RuleEvaluation { rule: String, reason: String },
}

impl WatchError {
    /// Run status persisted when this error ends a run
    pub fn run_status(&self) -> RunStatus {
        match self {
            WatchError::InsufficientCoverage { .. } | WatchError::InsufficientCandidates { .. } => {
                RunStatus::FailedCoverage
            }
            WatchError::IdenticalScenes { .. } => RunStatus::FailedIdenticalScenes,
            WatchError::Mosaic { .. } => RunStatus::FailedMosaic,
            _ => RunStatus::Failed,
        }
    }

    /// End-user text with remediation hints
    pub fn user_message(&self) -> String {
        match self {
            WatchError::InsufficientCoverage {
                coverage_percent,
                required_percent,
                scene_count,
                uncovered_area_ha,
            } => {
                let mut msg = format!(
                    "Insufficient imagery coverage for analysis.\n\n\
                     Current coverage: {:.1}%\n\
                     Required coverage: {:.1}%\n\
                     Scenes attempted: {}\n",
                    coverage_percent, required_percent, scene_count
                );
                if let Some(ha) = uncovered_area_ha {
                    msg.push_str(&format!("Uncovered area: {:.1} hectares\n", ha));
                }
                msg.push_str(
                    "\nAction Required:\n\
                     - Ingest more satellite scenes for the monitored period\n\
                     - Ensure scenes cover the entire boundary area\n\
                     - Consider reducing the boundary size or adjusting the buffer\n",
                );
                msg
            }
            WatchError::IdenticalScenes { scene_id, acquired_at } => {
                let mut msg = format!(
                    "Baseline and latest scenes are identical: {}\nChange detection requires different scenes.",
                    scene_id
                );
                if let Some(at) = acquired_at {
                    msg.push_str(&format!("\nAcquired: {}", at.to_rfc3339()));
                }
                msg
            }
            other => other.to_string(),
        }
    }
}

/// Result type for pipeline operations
pub type WatchResult<T> = Result<T, WatchError>;
