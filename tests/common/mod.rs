#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use geo::{polygon, Polygon};
use minewatch::io::geotiff;
use minewatch::{
    Alert, Band, BandFetcher, BoundingBox, CoordinateSystem, GeoTransform, PersistenceSink, Raster, RasterHandle,
    RunStatus, Scene, SceneCatalog, WatchError, WatchResult, Zone,
};
use ndarray::Array2;
use std::cell::Cell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Pixel size of the synthetic rasters (degrees)
pub const PIXEL: f64 = 0.0002;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Polygon<f64> {
    polygon![
        (x: min_x, y: min_y),
        (x: max_x, y: min_y),
        (x: max_x, y: max_y),
        (x: min_x, y: max_y),
    ]
}

pub fn at(month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, month, day, hour, minute, 0).unwrap()
}

/// Surface reflectance of the five bands
#[derive(Debug, Clone, Copy)]
pub struct Reflectance {
    pub blue: f32,
    pub green: f32,
    pub red: f32,
    pub nir: f32,
    pub swir: f32,
}

impl Reflectance {
    pub const VEGETATED: Reflectance = Reflectance { blue: 0.05, green: 0.08, red: 0.1, nir: 0.5, swir: 0.2 };
    pub const DEGRADED: Reflectance = Reflectance { blue: 0.05, green: 0.05, red: 0.1, nir: 0.25, swir: 0.15 };

    pub fn get(&self, band: Band) -> f32 {
        match band {
            Band::B02 => self.blue,
            Band::B03 => self.green,
            Band::B04 => self.red,
            Band::B08 => self.nir,
            Band::B11 => self.swir,
        }
    }
}

/// Synthetic WGS84 tile: uniform background with an optional
/// rectangular patch given in pixel rows/cols
pub struct Tile {
    pub min_lon: f64,
    pub max_lat: f64,
    pub cols: usize,
    pub rows: usize,
    pub background: Reflectance,
    pub patch: Option<(std::ops::Range<usize>, std::ops::Range<usize>, Reflectance)>,
}

impl Tile {
    pub fn footprint(&self) -> Polygon<f64> {
        rect(
            self.min_lon,
            self.max_lat - self.rows as f64 * PIXEL,
            self.min_lon + self.cols as f64 * PIXEL,
            self.max_lat,
        )
    }

    pub fn raster(&self, band: Band) -> Raster {
        let mut data = Array2::from_elem((self.rows, self.cols), self.background.get(band));
        if let Some((rows, cols, value)) = &self.patch {
            for r in rows.clone() {
                for c in cols.clone() {
                    data[[r, c]] = value.get(band);
                }
            }
        }
        Raster::new(
            data,
            GeoTransform::north_up(self.min_lon, self.max_lat, PIXEL, PIXEL),
            CoordinateSystem::Geographic,
        )
    }

    /// Write all five bands under `dir` and return the scene with file assets
    pub fn write_scene(&self, dir: &Path, id: &str, acquired_at: DateTime<Utc>, cloud: Option<f64>) -> Scene {
        let mut scene = Scene::new(id, acquired_at, cloud, self.footprint());
        for band in Band::ALL {
            let path = dir.join(format!("{}_{}.tif", id, band));
            geotiff::write_raster(&self.raster(band), &path).unwrap();
            scene = scene.with_asset(band, path.display().to_string());
        }
        scene
    }
}

/// In-memory catalog counting how often it is queried
pub struct FakeCatalog {
    pub scenes: Vec<Scene>,
    pub queries: Rc<Cell<usize>>,
}

impl FakeCatalog {
    pub fn new(scenes: Vec<Scene>) -> Self {
        Self {
            scenes,
            queries: Rc::new(Cell::new(0)),
        }
    }
}

impl SceneCatalog for FakeCatalog {
    fn list_candidate_scenes(&self, _bbox: &BoundingBox, max_count: usize) -> WatchResult<Vec<Scene>> {
        self.queries.set(self.queries.get() + 1);
        let mut scenes = self.scenes.clone();
        scenes.sort_by(|a, b| b.acquired_at.cmp(&a.acquired_at));
        scenes.truncate(max_count);
        Ok(scenes)
    }

    fn find_scene(&self, scene_id: &str) -> WatchResult<Option<Scene>> {
        self.queries.set(self.queries.get() + 1);
        Ok(self.scenes.iter().find(|s| s.id == scene_id).cloned())
    }
}

/// Serves the local asset paths and records every fetch
#[derive(Default)]
pub struct CountingFetcher {
    pub fetched: Vec<(String, Band)>,
}

impl BandFetcher for CountingFetcher {
    fn fetch_band(&mut self, scene: &Scene, band: Band) -> WatchResult<RasterHandle> {
        self.fetched.push((scene.id.clone(), band));
        let href = scene.assets.get(band.asset_key()).ok_or_else(|| {
            WatchError::Download(format!("no {} asset for {}", band, scene.id))
        })?;
        Ok(RasterHandle::new(PathBuf::from(href)))
    }
}

impl CountingFetcher {
    pub fn scenes_fetched(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.fetched.iter().map(|(id, _)| id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Keeps every saved run in memory
#[derive(Default)]
pub struct RecordingSink {
    pub runs: Vec<(Vec<Zone>, Vec<Alert>, RunStatus)>,
}

impl PersistenceSink for RecordingSink {
    fn save_run(&mut self, zones: &[Zone], alerts: &[Alert], status: RunStatus) -> WatchResult<()> {
        self.runs.push((zones.to_vec(), alerts.to_vec(), status));
        Ok(())
    }
}

/// Per-scene artifact counts, keyed by scene id
pub fn fetch_counts(fetcher: &CountingFetcher) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for (id, _) in &fetcher.fetched {
        *counts.entry(id.clone()).or_insert(0) += 1;
    }
    counts
}
