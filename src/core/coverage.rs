//! AOI coverage of scene footprints or raster data.
//!
//! Bounds mode intersects footprints with the AOI; pixel mode only counts
//! area that holds finite data.

use crate::core::geometry;
use crate::core::projection::transform_polygon;
use crate::core::vectorize::mask_to_polygons;
use crate::types::{CoordinateSystem, Raster, WatchError, WatchResult};
use geo::{Area, Coord, LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};

/// Vertices inserted per raster edge when projecting bounds to WGS84
const EDGE_DENSIFY: usize = 8;

/// Fidelity of a coverage computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageMode {
    /// Bounding rectangle or catalog footprint
    Bounds,
    /// Extent of actual non-nodata pixels
    Pixel,
}

/// What coverage is measured from
#[derive(Debug, Clone, Copy)]
pub enum CoverageSource<'a> {
    Footprints(&'a [Polygon<f64>]),
    Raster(&'a Raster),
}

/// Fraction of the AOI intersected by data
#[derive(Debug, Clone)]
pub struct CoverageResult {
    pub coverage_percent: f64,
    pub valid: bool,
    pub mode: CoverageMode,
    /// AOI part covered by data (WGS84)
    pub covered: MultiPolygon<f64>,
    /// AOI part without data (WGS84)
    pub uncovered: MultiPolygon<f64>,
    pub uncovered_area_ha: f64,
    pub message: String,
}

impl CoverageResult {
    /// Evaluate a data extent (WGS84) against the AOI
    pub fn from_extent(
        extent: &MultiPolygon<f64>,
        aoi: &Polygon<f64>,
        mode: CoverageMode,
        min_percent: f64,
    ) -> WatchResult<Self> {
        let aoi_area = aoi.unsigned_area();
        if aoi_area <= 0.0 {
            return Err(WatchError::InvalidGeometry("AOI has zero area".to_string()));
        }

        let aoi_mp = MultiPolygon::from(aoi.clone());
        let covered = geometry::intersection(extent, &aoi_mp);
        let coverage_percent = (covered.unsigned_area() / aoi_area * 100.0).clamp(0.0, 100.0);
        let uncovered = geometry::difference(&aoi_mp, &covered);
        let uncovered_area_ha = geometry::multi_polygon_area_ha(&uncovered)?;
        let valid = coverage_percent >= min_percent;

        let message = if valid {
            format!(
                "Coverage {:.1}% meets the required {:.1}%",
                coverage_percent, min_percent
            )
        } else {
            format!(
                "Coverage {:.1}% is below the required {:.1}% ({:.1} ha uncovered)",
                coverage_percent, min_percent, uncovered_area_ha
            )
        };

        Ok(Self {
            coverage_percent,
            valid,
            mode,
            covered,
            uncovered,
            uncovered_area_ha,
            message,
        })
    }
}

/// Compute the coverage of `aoi` by footprints or raster data.
///
/// `valid` only reflects `min_percent`; the policy behind that number is
/// the caller's.
pub fn coverage(
    source: CoverageSource<'_>,
    aoi: &Polygon<f64>,
    mode: CoverageMode,
    min_percent: f64,
) -> WatchResult<CoverageResult> {
    let extent = match (source, mode) {
        (CoverageSource::Footprints(footprints), CoverageMode::Bounds) => {
            geometry::union_all(footprints.to_vec())
        }
        (CoverageSource::Footprints(_), CoverageMode::Pixel) => {
            return Err(WatchError::Processing(
                "pixel-mode coverage needs raster data, not footprints".to_string(),
            ))
        }
        (CoverageSource::Raster(raster), CoverageMode::Bounds) => {
            MultiPolygon::from(raster_bounds_wgs84(raster))
        }
        (CoverageSource::Raster(raster), CoverageMode::Pixel) => valid_data_extent_wgs84(raster),
    };

    let result = CoverageResult::from_extent(&extent, aoi, mode, min_percent)?;
    log::debug!("{:?} coverage: {}", mode, result.message);
    Ok(result)
}

/// Raster bounding rectangle as a WGS84 polygon
pub fn raster_bounds_wgs84(raster: &Raster) -> Polygon<f64> {
    let rect = raster.bounds();
    let (min, max) = (rect.min(), rect.max());
    let corners = [
        Coord { x: min.x, y: min.y },
        Coord { x: max.x, y: min.y },
        Coord { x: max.x, y: max.y },
        Coord { x: min.x, y: max.y },
    ];

    let mut coords = Vec::with_capacity(4 * EDGE_DENSIFY + 1);
    for i in 0..4 {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        for s in 0..EDGE_DENSIFY {
            let t = s as f64 / EDGE_DENSIFY as f64;
            let x = a.x + t * (b.x - a.x);
            let y = a.y + t * (b.y - a.y);
            let (lon, lat) = raster.crs.to_wgs84(x, y);
            coords.push(Coord { x: lon, y: lat });
        }
    }
    coords.push(coords[0]);
    Polygon::new(LineString::new(coords), vec![])
}

/// Union of all non-nodata pixel outlines, in WGS84
pub fn valid_data_extent_wgs84(raster: &Raster) -> MultiPolygon<f64> {
    let polygons: Vec<Polygon<f64>> = mask_to_polygons(&raster.valid_mask(), &raster.transform)
        .iter()
        .map(|p| transform_polygon(p, raster.crs, CoordinateSystem::Geographic))
        .collect();
    geometry::union_all(polygons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use geo::polygon;
    use ndarray::Array2;

    fn square(x0: f64, y0: f64, w: f64, h: f64) -> Polygon<f64> {
        polygon![
            (x: x0, y: y0),
            (x: x0 + w, y: y0),
            (x: x0 + w, y: y0 + h),
            (x: x0, y: y0 + h),
        ]
    }

    #[test]
    fn test_full_and_partial_footprint_coverage() {
        let aoi = square(0.0, 0.0, 0.1, 0.1);

        let full = [square(-0.05, -0.05, 0.2, 0.2)];
        let r = coverage(CoverageSource::Footprints(&full), &aoi, CoverageMode::Bounds, 95.0).unwrap();
        assert!((r.coverage_percent - 100.0).abs() < 1e-9);
        assert!(r.valid);
        assert!(r.uncovered_area_ha < 1e-6);

        let half = [square(0.0, 0.0, 0.05, 0.1)];
        let r = coverage(CoverageSource::Footprints(&half), &aoi, CoverageMode::Bounds, 95.0).unwrap();
        assert!((r.coverage_percent - 50.0).abs() < 1e-9);
        assert!(!r.valid);
        assert!(r.uncovered_area_ha > 0.0);
        assert_eq!(r.mode, CoverageMode::Bounds);
    }

    #[test]
    fn test_coverage_monotonic_in_footprints() {
        let aoi = square(0.0, 0.0, 1.0, 1.0);
        let tiles = [
            square(0.0, 0.0, 0.6, 1.0),
            square(0.4, 0.0, 0.3, 1.0),
            square(0.5, 0.5, 0.5, 0.5),
            square(0.6, 0.0, 0.4, 0.6),
        ];
        let mut last = 0.0;
        for n in 1..=tiles.len() {
            let r = coverage(CoverageSource::Footprints(&tiles[..n]), &aoi, CoverageMode::Bounds, 0.0).unwrap();
            assert!(r.coverage_percent + 1e-9 >= last);
            last = r.coverage_percent;
        }
        assert!((last - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_pixel_mode_sees_nodata_padding() {
        // 10x10 WGS84 raster over the AOI, left 3 columns are nodata
        let mut data = Array2::<f32>::from_elem((10, 10), 0.3);
        for r in 0..10 {
            for c in 0..3 {
                data[[r, c]] = f32::NAN;
            }
        }
        let raster = Raster::new(
            data,
            GeoTransform::north_up(0.0, 0.01, 0.001, 0.001),
            CoordinateSystem::Geographic,
        );
        let aoi = square(0.0, 0.0, 0.01, 0.01);

        let bounds = coverage(CoverageSource::Raster(&raster), &aoi, CoverageMode::Bounds, 95.0).unwrap();
        assert!((bounds.coverage_percent - 100.0).abs() < 1e-6);

        let pixel = coverage(CoverageSource::Raster(&raster), &aoi, CoverageMode::Pixel, 95.0).unwrap();
        assert!((pixel.coverage_percent - 70.0).abs() < 1e-6);
        assert!(!pixel.valid);
    }

    #[test]
    fn test_pixel_mode_rejects_footprints() {
        let aoi = square(0.0, 0.0, 1.0, 1.0);
        let fp = [aoi.clone()];
        assert!(coverage(CoverageSource::Footprints(&fp), &aoi, CoverageMode::Pixel, 95.0).is_err());
    }
}
