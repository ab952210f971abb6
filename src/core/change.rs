//! Index deltas between two epochs, change masks and change zones.

use crate::config::ChangeConfig;
use crate::core::indices::{IndexKind, SpectralIndices};
use crate::core::vectorize::vectorize_zones;
use crate::types::{BandImage, PixelMask, WatchError, WatchResult, Zone, ZoneType};
use ndarray::Zip;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Delta magnitude counted as a decrease/increase in change statistics
const CHANGE_STAT_THRESHOLD: f32 = 0.1;

/// Classes in tie-break order: a pixel meeting several thresholds takes
/// the first class it meets
pub const CLASS_PRIORITY: [ZoneType; 3] = [
    ZoneType::MiningExpansion,
    ZoneType::VegetationLoss,
    ZoneType::WaterAccumulation,
];

/// Signed index deltas oriented so that positive means change of the class
#[derive(Debug, Clone)]
pub struct IndexDeltas {
    /// baseline NDVI - latest NDVI
    pub vegetation_loss: BandImage,
    /// latest BSI - baseline BSI
    pub mining_expansion: BandImage,
    /// latest NDWI - baseline NDWI
    pub water_accumulation: BandImage,
}

impl IndexDeltas {
    pub fn compute(baseline: &SpectralIndices, latest: &SpectralIndices) -> WatchResult<Self> {
        if baseline.grid != latest.grid {
            return Err(WatchError::Processing(
                "baseline and latest indices are on different grids".to_string(),
            ));
        }
        Ok(Self {
            vegetation_loss: &baseline.ndvi - &latest.ndvi,
            mining_expansion: &latest.bsi - &baseline.bsi,
            water_accumulation: &latest.ndwi - &baseline.ndwi,
        })
    }

    pub fn get(&self, zone_type: ZoneType) -> &BandImage {
        match zone_type {
            ZoneType::VegetationLoss => &self.vegetation_loss,
            ZoneType::MiningExpansion => &self.mining_expansion,
            ZoneType::WaterAccumulation => &self.water_accumulation,
        }
    }
}

fn threshold_for(config: &ChangeConfig, zone_type: ZoneType) -> f32 {
    match zone_type {
        ZoneType::VegetationLoss => config.vegetation_loss as f32,
        ZoneType::MiningExpansion => config.mining_expansion as f32,
        ZoneType::WaterAccumulation => config.water_accumulation as f32,
    }
}

/// Mutually exclusive per-class change masks on the reference grid
#[derive(Debug, Clone)]
pub struct ChangeMasks {
    pub vegetation_loss: PixelMask,
    pub mining_expansion: PixelMask,
    pub water_accumulation: PixelMask,
}

impl ChangeMasks {
    pub fn get(&self, zone_type: ZoneType) -> &PixelMask {
        match zone_type {
            ZoneType::VegetationLoss => &self.vegetation_loss,
            ZoneType::MiningExpansion => &self.mining_expansion,
            ZoneType::WaterAccumulation => &self.water_accumulation,
        }
    }

    fn get_mut(&mut self, zone_type: ZoneType) -> &mut PixelMask {
        match zone_type {
            ZoneType::VegetationLoss => &mut self.vegetation_loss,
            ZoneType::MiningExpansion => &mut self.mining_expansion,
            ZoneType::WaterAccumulation => &mut self.water_accumulation,
        }
    }

    pub fn pixel_count(&self, zone_type: ZoneType) -> usize {
        self.get(zone_type).iter().filter(|v| **v).count()
    }
}

/// Threshold index deltas into change masks.
///
/// A pixel changes class when its delta is strictly above the class
/// threshold and both epochs hold data there; overlaps resolve by
/// [`CLASS_PRIORITY`].
pub fn classify_change(deltas: &IndexDeltas, valid: &PixelMask, config: &ChangeConfig) -> ChangeMasks {
    let dim = valid.dim();
    let mut masks = ChangeMasks {
        vegetation_loss: PixelMask::from_elem(dim, false),
        mining_expansion: PixelMask::from_elem(dim, false),
        water_accumulation: PixelMask::from_elem(dim, false),
    };
    let mut claimed = valid.mapv(|v| !v);

    for zone_type in CLASS_PRIORITY {
        let threshold = threshold_for(config, zone_type);
        Zip::from(masks.get_mut(zone_type))
            .and(&mut claimed)
            .and(deltas.get(zone_type))
            .for_each(|m, taken, &d| {
                if !*taken && d > threshold {
                    *m = true;
                    *taken = true;
                }
            });
    }

    for zone_type in CLASS_PRIORITY {
        log::debug!("{}: {} changed pixel(s)", zone_type, masks.pixel_count(zone_type));
    }
    masks
}

/// Full change step: deltas, masks and WGS84 zones
pub fn detect_changes(
    baseline: &SpectralIndices,
    latest: &SpectralIndices,
    config: &ChangeConfig,
) -> WatchResult<(ChangeMasks, Vec<Zone>)> {
    let deltas = IndexDeltas::compute(baseline, latest)?;
    let valid = Zip::from(&baseline.valid)
        .and(&latest.valid)
        .map_collect(|&a, &b| a && b);
    let masks = classify_change(&deltas, &valid, config);

    let mut zones = Vec::new();
    for zone_type in [
        ZoneType::VegetationLoss,
        ZoneType::MiningExpansion,
        ZoneType::WaterAccumulation,
    ] {
        let next_id = zones.len() + 1;
        zones.extend(vectorize_zones(
            masks.get(zone_type),
            zone_type,
            &latest.grid.transform,
            latest.grid.crs,
            next_id,
        )?);
    }

    log::info!("Detected {} change zone(s)", zones.len());
    Ok((masks, zones))
}

/// Decrease/increase pixel counts of an index delta (latest - baseline)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChangeStats {
    pub decrease_pixels: usize,
    pub increase_pixels: usize,
    pub mean_change: f64,
}

impl ChangeStats {
    pub fn compute(delta: &BandImage, valid: &PixelMask) -> Self {
        let mut decrease = 0;
        let mut increase = 0;
        let mut sum = 0.0f64;
        let mut n = 0usize;
        Zip::from(delta).and(valid).for_each(|&d, &ok| {
            if ok && d.is_finite() {
                if d < -CHANGE_STAT_THRESHOLD {
                    decrease += 1;
                } else if d > CHANGE_STAT_THRESHOLD {
                    increase += 1;
                }
                sum += d as f64;
                n += 1;
            }
        });
        Self {
            decrease_pixels: decrease,
            increase_pixels: increase,
            mean_change: if n > 0 { sum / n as f64 } else { 0.0 },
        }
    }
}

/// Change statistics for every index (latest - baseline)
pub fn change_statistics(baseline: &SpectralIndices, latest: &SpectralIndices) -> WatchResult<BTreeMap<IndexKind, ChangeStats>> {
    if baseline.grid != latest.grid {
        return Err(WatchError::Processing("indices are on different grids".to_string()));
    }
    let valid = Zip::from(&baseline.valid)
        .and(&latest.valid)
        .map_collect(|&a, &b| a && b);
    Ok(IndexKind::ALL
        .iter()
        .map(|k| {
            let delta = latest.get(*k) - baseline.get(*k);
            (*k, ChangeStats::compute(&delta, &valid))
        })
        .collect())
}
