//! Band alignment and NDVI/NDWI/BSI computation.

use crate::core::resample::{resample_to_grid, GridSpec, Resampling};
use crate::types::{Band, BandImage, PixelMask, Raster, WatchError, WatchResult};
use ndarray::Zip;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Approximate meters per degree, for comparing pixel sizes across CRSs
const METERS_PER_DEGREE: f64 = 111_320.0;

/// The five reflectance bands of one epoch
#[derive(Debug, Clone, Default)]
pub struct BandSet {
    bands: BTreeMap<Band, Raster>,
}

impl BandSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, band: Band, raster: Raster) {
        self.bands.insert(band, raster);
    }

    pub fn get(&self, band: Band) -> WatchResult<&Raster> {
        self.bands
            .get(&band)
            .ok_or_else(|| WatchError::Processing(format!("band {} missing from band set", band)))
    }

    pub fn is_complete(&self) -> bool {
        Band::ALL.iter().all(|b| self.bands.contains_key(b))
    }

    /// Highest-priority band among those with the finest pixels
    pub fn reference_band(&self) -> WatchResult<Band> {
        let mut best: Option<(Band, f64)> = None;
        for band in Band::ALL {
            let Some(raster) = self.bands.get(&band) else {
                continue;
            };
            let area = pixel_area_m2(raster);
            // Band::ALL is in priority order, so only strictly finer pixels displace
            match best {
                Some((_, best_area)) if area >= best_area * (1.0 - 1e-9) => {}
                _ => best = Some((band, area)),
            }
        }
        best.map(|(b, _)| b)
            .ok_or_else(|| WatchError::Processing("band set is empty".to_string()))
    }

    pub fn reference_grid(&self) -> WatchResult<GridSpec> {
        Ok(GridSpec::of(self.get(self.reference_band()?)?))
    }

    /// Resample every band onto `grid` (bilinear)
    #[cfg(feature = "parallel")]
    pub fn align_to(&self, grid: &GridSpec) -> WatchResult<BandSet> {
        use rayon::prelude::*;

        let aligned: Vec<(Band, Raster)> = self
            .bands
            .par_iter()
            .map(|(band, raster)| Ok((*band, resample_to_grid(raster, grid, Resampling::Bilinear)?)))
            .collect::<WatchResult<_>>()?;
        Ok(BandSet {
            bands: aligned.into_iter().collect(),
        })
    }

    #[cfg(not(feature = "parallel"))]
    pub fn align_to(&self, grid: &GridSpec) -> WatchResult<BandSet> {
        let mut bands = BTreeMap::new();
        for (band, raster) in &self.bands {
            bands.insert(*band, resample_to_grid(raster, grid, Resampling::Bilinear)?);
        }
        Ok(BandSet { bands })
    }

    /// Align onto this set's own reference grid
    pub fn align(&self) -> WatchResult<BandSet> {
        let reference = self.reference_band()?;
        log::debug!("Aligning bands onto reference band {}", reference);
        self.align_to(&self.reference_grid()?)
    }

    /// Pixels where every band holds data
    pub fn valid_mask(&self) -> WatchResult<PixelMask> {
        let grid = self.reference_grid()?;
        let mut mask = PixelMask::from_elem((grid.rows, grid.cols), true);
        for raster in self.bands.values() {
            if raster.dim() != mask.dim() {
                return Err(WatchError::Processing("bands are not aligned".to_string()));
            }
            Zip::from(&mut mask)
                .and(&raster.data)
                .for_each(|m, &v| *m = *m && v.is_finite());
        }
        Ok(mask)
    }
}

fn pixel_area_m2(raster: &Raster) -> f64 {
    let (x, y) = raster.pixel_size();
    if raster.crs.is_geographic() {
        x * y * METERS_PER_DEGREE * METERS_PER_DEGREE
    } else {
        x * y
    }
}

fn safe_ratio(num: f32, den: f32) -> f32 {
    let v = num / den;
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// (a - b) / (a + b); zero division and NaN give 0.0
#[cfg(feature = "parallel")]
pub fn normalized_difference(a: &BandImage, b: &BandImage) -> BandImage {
    Zip::from(a).and(b).par_map_collect(|&x, &y| safe_ratio(x - y, x + y))
}

#[cfg(not(feature = "parallel"))]
pub fn normalized_difference(a: &BandImage, b: &BandImage) -> BandImage {
    Zip::from(a).and(b).map_collect(|&x, &y| safe_ratio(x - y, x + y))
}

/// NDVI = (NIR - RED) / (NIR + RED)
pub fn ndvi(nir: &BandImage, red: &BandImage) -> BandImage {
    normalized_difference(nir, red)
}

/// NDWI = (GREEN - NIR) / (GREEN + NIR)
pub fn ndwi(green: &BandImage, nir: &BandImage) -> BandImage {
    normalized_difference(green, nir)
}

/// BSI = ((SWIR + RED) - (NIR + BLUE)) / ((SWIR + RED) + (NIR + BLUE))
pub fn bsi(swir: &BandImage, red: &BandImage, nir: &BandImage, blue: &BandImage) -> BandImage {
    let soil = swir + red;
    let veg = nir + blue;
    normalized_difference(&soil, &veg)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Ndvi,
    Ndwi,
    Bsi,
}

impl IndexKind {
    pub const ALL: [IndexKind; 3] = [IndexKind::Ndvi, IndexKind::Ndwi, IndexKind::Bsi];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Ndvi => "ndvi",
            IndexKind::Ndwi => "ndwi",
            IndexKind::Bsi => "bsi",
        }
    }
}

/// Spectral indices of one epoch on a common grid
#[derive(Debug, Clone)]
pub struct SpectralIndices {
    pub ndvi: BandImage,
    pub ndwi: BandImage,
    pub bsi: BandImage,
    pub grid: GridSpec,
    /// Pixels where all bands held data
    pub valid: PixelMask,
}

impl SpectralIndices {
    /// Compute NDVI, NDWI and BSI from bands already aligned to `grid`
    pub fn compute(bands: &BandSet) -> WatchResult<Self> {
        if !bands.is_complete() {
            return Err(WatchError::Processing("all five bands are required".to_string()));
        }
        let grid = bands.reference_grid()?;
        let valid = bands.valid_mask()?;

        let blue = &bands.get(Band::B02)?.data;
        let green = &bands.get(Band::B03)?.data;
        let red = &bands.get(Band::B04)?.data;
        let nir = &bands.get(Band::B08)?.data;
        let swir = &bands.get(Band::B11)?.data;

        let indices = Self {
            ndvi: ndvi(nir, red),
            ndwi: ndwi(green, nir),
            bsi: bsi(swir, red, nir, blue),
            grid,
            valid,
        };
        log::debug!(
            "Computed indices on {}x{} grid ({} valid pixels)",
            grid.rows,
            grid.cols,
            indices.valid.iter().filter(|v| **v).count()
        );
        Ok(indices)
    }

    pub fn get(&self, kind: IndexKind) -> &BandImage {
        match kind {
            IndexKind::Ndvi => &self.ndvi,
            IndexKind::Ndwi => &self.ndwi,
            IndexKind::Bsi => &self.bsi,
        }
    }

    pub fn stats(&self) -> BTreeMap<IndexKind, IndexStats> {
        IndexKind::ALL
            .iter()
            .filter_map(|k| IndexStats::compute(self.get(*k)).map(|s| (*k, s)))
            .collect()
    }
}

/// Summary statistics over non-zero finite index values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
    pub pixel_count: usize,
}

impl IndexStats {
    pub fn compute(values: &BandImage) -> Option<Self> {
        let valid: Vec<f64> = values
            .iter()
            .filter(|v| v.is_finite() && **v != 0.0)
            .map(|v| *v as f64)
            .collect();
        if valid.is_empty() {
            return None;
        }
        let n = valid.len() as f64;
        let mean = valid.iter().sum::<f64>() / n;
        let variance = valid.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            min: valid.iter().copied().fold(f64::INFINITY, f64::min),
            max: valid.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean,
            std: variance.sqrt(),
            pixel_count: valid.len(),
        })
    }
}
