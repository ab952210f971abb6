//! Per-band mosaicking onto one grid, clipped to the buffered AOI.

use crate::core::geometry;
use crate::core::projection::transform_multi_polygon;
use crate::core::resample::{reproject_to_crs, resample_to_grid, GridSpec, Resampling};
use crate::io::geotiff;
use crate::types::{Aoi, Band, BandImage, CoordinateSystem, GeoTransform, Raster, WatchError, WatchResult};
use geo::{BoundingRect, MultiPolygon};
use std::path::Path;

/// Tolerance (in pixels) for treating two grids as sharing a lattice
const LATTICE_TOLERANCE: f64 = 1e-6;

/// Merges per-scene band rasters and clips them to the AOI.
///
/// The buffered AOI outline is computed once per engine and reused for
/// every band.
pub struct MosaicEngine {
    clip_shape: MultiPolygon<f64>,
}

impl MosaicEngine {
    pub fn new(aoi: &Aoi) -> WatchResult<Self> {
        let clip_shape = aoi.buffered()?;
        log::debug!(
            "Mosaic clip shape: AOI + {:.2} km buffer ({} part(s))",
            aoi.buffer_km,
            clip_shape.0.len()
        );
        Ok(Self { clip_shape })
    }

    /// AOI-plus-buffer outline in WGS84
    pub fn clip_shape(&self) -> &MultiPolygon<f64> {
        &self.clip_shape
    }

    /// Merge then clip one band. Any failure is reported as a band mosaic error.
    pub fn mosaic(&self, band: Band, rasters: Vec<Raster>) -> WatchResult<Raster> {
        let scene_count = rasters.len();
        log::info!("🔗 Mosaicking band {} from {} scene(s)", band, scene_count);

        let result = self.merge(rasters).and_then(|merged| self.clip(&merged));
        match result {
            Ok(raster) => {
                log::info!(
                    "✅ Band {} mosaic: {}x{} pixels, {} valid",
                    band,
                    raster.dim().0,
                    raster.dim().1,
                    raster.valid_count()
                );
                Ok(raster)
            }
            Err(e) => Err(mosaic_error(band, scene_count, e)),
        }
    }

    /// Load band rasters from disk, then [`MosaicEngine::mosaic`] them
    pub fn mosaic_paths<P: AsRef<Path>>(&self, band: Band, paths: &[P], zero_is_nodata: bool) -> WatchResult<Raster> {
        let mut rasters = Vec::with_capacity(paths.len());
        for path in paths {
            let raster = geotiff::read_raster(path, zero_is_nodata).map_err(|e| mosaic_error(band, paths.len(), e))?;
            rasters.push(raster);
        }
        self.mosaic(band, rasters)
    }

    /// First-valid-pixel-wins merge on the union grid of all inputs.
    ///
    /// Inputs are reprojected to the CRS of the first raster; the output
    /// keeps the first raster's resolution and pixel lattice.
    pub fn merge(&self, rasters: Vec<Raster>) -> WatchResult<Raster> {
        let first = rasters
            .first()
            .ok_or_else(|| WatchError::Processing("no rasters to merge".to_string()))?;
        if !first.transform.is_north_up() {
            return Err(WatchError::Processing("rotated rasters are not supported".to_string()));
        }
        let crs = first.crs;
        let anchor = first.transform;
        let (res_x, res_y) = first.pixel_size();

        let aligned: Vec<Raster> = rasters
            .iter()
            .map(|r| reproject_to_crs(r, crs))
            .collect::<WatchResult<_>>()?;

        let grid = union_grid(&aligned, &anchor, res_x, res_y, crs)?;
        let mut out = BandImage::from_elem((grid.rows, grid.cols), f32::NAN);

        for raster in &aligned {
            match lattice_offset(raster, &grid) {
                Some((row0, col0)) => composite_block(&mut out, &raster.data, row0, col0),
                None => {
                    let resampled = resample_to_grid(raster, &grid, Resampling::Nearest)?;
                    composite_block(&mut out, &resampled.data, 0, 0);
                }
            }
        }

        Ok(Raster::new(out, grid.transform, crs))
    }

    /// Mask pixels whose centres fall outside the AOI outline and crop to
    /// the outline's extent
    pub fn clip(&self, raster: &Raster) -> WatchResult<Raster> {
        clip_to_shape(raster, &self.clip_shape)
    }
}

fn mosaic_error(band: Band, scene_count: usize, err: WatchError) -> WatchError {
    match err {
        e @ WatchError::Mosaic { .. } => e,
        other => WatchError::Mosaic {
            band: band.to_string(),
            scene_count,
            reason: other.to_string(),
        },
    }
}

/// Union extent of all rasters snapped outward to the anchor lattice
fn union_grid(rasters: &[Raster], anchor: &GeoTransform, res_x: f64, res_y: f64, crs: CoordinateSystem) -> WatchResult<GridSpec> {
    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    for r in rasters {
        let b = r.bounds();
        min_x = min_x.min(b.min().x);
        min_y = min_y.min(b.min().y);
        max_x = max_x.max(b.max().x);
        max_y = max_y.max(b.max().y);
    }
    if !(max_x > min_x && max_y > min_y) {
        return Err(WatchError::Processing("merged extent is empty".to_string()));
    }

    let snapped_min_x = anchor.top_left_x + ((min_x - anchor.top_left_x) / res_x + LATTICE_TOLERANCE).floor() * res_x;
    let snapped_max_y = anchor.top_left_y - ((anchor.top_left_y - max_y) / res_y + LATTICE_TOLERANCE).floor() * res_y;
    Ok(GridSpec::covering(snapped_min_x, min_y, max_x, snapped_max_y, res_x, res_y, crs))
}

/// Integer (row, col) offset of `raster` inside `grid` when both share
/// pixel size and lattice
fn lattice_offset(raster: &Raster, grid: &GridSpec) -> Option<(usize, usize)> {
    let t = &raster.transform;
    let g = &grid.transform;
    if raster.crs != grid.crs || !t.is_north_up() {
        return None;
    }
    let same_size = ((t.pixel_width - g.pixel_width) / g.pixel_width).abs() < LATTICE_TOLERANCE
        && ((t.pixel_height - g.pixel_height) / g.pixel_height).abs() < LATTICE_TOLERANCE;
    if !same_size {
        return None;
    }

    let col = (t.top_left_x - g.top_left_x) / g.pixel_width;
    let row = (t.top_left_y - g.top_left_y) / g.pixel_height;
    let (col_r, row_r) = (col.round(), row.round());
    if (col - col_r).abs() > LATTICE_TOLERANCE || (row - row_r).abs() > LATTICE_TOLERANCE || col_r < 0.0 || row_r < 0.0 {
        return None;
    }

    let (rows, cols) = raster.dim();
    let (row0, col0) = (row_r as usize, col_r as usize);
    if row0 + rows > grid.rows || col0 + cols > grid.cols {
        return None;
    }
    Some((row0, col0))
}

/// Fill still-empty cells of `out` from `src` placed at (row0, col0)
fn composite_block(out: &mut BandImage, src: &BandImage, row0: usize, col0: usize) {
    let (rows, cols) = src.dim();
    for r in 0..rows {
        for c in 0..cols {
            let v = src[[r, c]];
            if v.is_finite() {
                let cell = &mut out[[row0 + r, col0 + c]];
                if !cell.is_finite() {
                    *cell = v;
                }
            }
        }
    }
}

/// Crop to the extent of `shape` (WGS84) and set pixels outside it to NaN
pub fn clip_to_shape(raster: &Raster, shape: &MultiPolygon<f64>) -> WatchResult<Raster> {
    let native = transform_multi_polygon(shape, CoordinateSystem::Geographic, raster.crs);
    let rect = native
        .bounding_rect()
        .ok_or_else(|| WatchError::InvalidGeometry("clip shape is empty".to_string()))?;

    let t = &raster.transform;
    let (rows, cols) = raster.dim();
    let (res_x, res_y) = raster.pixel_size();
    let col0 = ((rect.min().x - t.top_left_x) / res_x + LATTICE_TOLERANCE).floor().max(0.0) as usize;
    let col1 = (((rect.max().x - t.top_left_x) / res_x - LATTICE_TOLERANCE).ceil().max(0.0) as usize).min(cols);
    let row0 = ((t.top_left_y - rect.max().y) / res_y + LATTICE_TOLERANCE).floor().max(0.0) as usize;
    let row1 = (((t.top_left_y - rect.min().y) / res_y - LATTICE_TOLERANCE).ceil().max(0.0) as usize).min(rows);

    if col0 >= col1 || row0 >= row1 {
        return Err(WatchError::Processing("AOI does not intersect the raster".to_string()));
    }

    let (x0, y0) = t.pixel_to_map(col0 as f64, row0 as f64);
    let transform = GeoTransform { top_left_x: x0, top_left_y: y0, ..*t };
    let (out_rows, out_cols) = (row1 - row0, col1 - col0);

    let inside = geometry::rasterize(&native, &transform, out_rows, out_cols);
    let window = raster.data.slice(ndarray::s![row0..row1, col0..col1]);
    let data = ndarray::Zip::from(&window)
        .and(&inside)
        .map_collect(|&v, &keep| if keep { v } else { f32::NAN });

    Ok(Raster::new(data, transform, raster.crs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use ndarray::Array2;

    fn tile(x0: f64, y0: f64, rows: usize, cols: usize, value: f32) -> Raster {
        Raster::new(
            Array2::from_elem((rows, cols), value),
            GeoTransform::north_up(x0, y0, 0.001, 0.001),
            CoordinateSystem::Geographic,
        )
    }

    fn aoi(x0: f64, y0: f64, x1: f64, y1: f64) -> Aoi {
        Aoi::new(
            polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)],
            0.0,
        )
        .unwrap()
    }

    #[test]
    fn test_merge_adjacent_tiles() {
        let engine = MosaicEngine::new(&aoi(0.0, 0.0, 0.02, 0.01)).unwrap();
        let west = tile(0.0, 0.01, 10, 10, 1.0);
        let east = tile(0.01, 0.01, 10, 10, 2.0);
        let merged = engine.merge(vec![west, east]).unwrap();
        assert_eq!(merged.dim(), (10, 20));
        assert_eq!(merged.data[[5, 2]], 1.0);
        assert_eq!(merged.data[[5, 15]], 2.0);
    }

    #[test]
    fn test_first_valid_pixel_wins() {
        let engine = MosaicEngine::new(&aoi(0.0, 0.0, 0.015, 0.01)).unwrap();
        let mut first = tile(0.0, 0.01, 10, 10, 1.0);
        first.data[[0, 9]] = f32::NAN;
        let second = tile(0.005, 0.01, 10, 10, 2.0);
        let merged = engine.merge(vec![first, second]).unwrap();
        assert_eq!(merged.dim(), (10, 15));
        assert_eq!(merged.data[[3, 7]], 1.0); // overlap keeps the first
        assert_eq!(merged.data[[0, 9]], 2.0); // hole filled by the second
        assert_eq!(merged.data[[3, 12]], 2.0);
    }

    #[test]
    fn test_clip_masks_and_crops() {
        let engine = MosaicEngine::new(&aoi(0.002, 0.002, 0.006, 0.006)).unwrap();
        let clipped = engine.clip(&tile(0.0, 0.01, 10, 10, 1.0)).unwrap();
        assert_eq!(clipped.dim(), (4, 4));
        assert_eq!(clipped.valid_count(), 16);
        assert!((clipped.transform.top_left_x - 0.002).abs() < 1e-12);
        assert!((clipped.transform.top_left_y - 0.006).abs() < 1e-12);
    }

    #[test]
    fn test_clip_triangle_sets_nodata() {
        let tri = Aoi::new(polygon![(x: 0.0, y: 0.0), (x: 0.0105, y: 0.0), (x: 0.0, y: 0.0105)], 0.0).unwrap();
        let engine = MosaicEngine::new(&tri).unwrap();
        let clipped = engine.clip(&tile(0.0, 0.01, 10, 10, 1.0)).unwrap();
        assert_eq!(clipped.dim(), (10, 10));
        // Centres on or below the pixel diagonal: 55 of 100
        assert_eq!(clipped.valid_count(), 55);
    }

    #[test]
    fn test_mosaic_reports_band_on_failure() {
        let engine = MosaicEngine::new(&aoi(0.0, 0.0, 0.01, 0.01)).unwrap();
        match engine.mosaic(Band::B08, vec![]) {
            Err(WatchError::Mosaic { band, scene_count, .. }) => {
                assert_eq!(band, "B08");
                assert_eq!(scene_count, 0);
            }
            other => panic!("expected mosaic error, got {:?}", other.map(|r| r.dim())),
        }

        // AOI far away from the data
        let far = MosaicEngine::new(&aoi(5.0, 5.0, 5.01, 5.01)).unwrap();
        assert!(matches!(
            far.mosaic(Band::B04, vec![tile(0.0, 0.01, 10, 10, 1.0)]),
            Err(WatchError::Mosaic { .. })
        ));
    }

    #[test]
    fn test_mosaic_is_idempotent() {
        let engine = MosaicEngine::new(&aoi(0.001, 0.001, 0.019, 0.009)).unwrap();
        let inputs = || vec![tile(0.0, 0.01, 10, 10, 1.0), tile(0.01, 0.01, 10, 10, 2.0)];
        let a = engine.mosaic(Band::B04, inputs()).unwrap();
        let b = engine.mosaic(Band::B04, inputs()).unwrap();
        assert_eq!(a.transform, b.transform);
        assert!(a
            .data
            .iter()
            .zip(b.data.iter())
            .all(|(x, y)| x == y || (x.is_nan() && y.is_nan())));
    }

    #[test]
    fn test_mixed_crs_inputs_are_reprojected() {
        let utm = CoordinateSystem::Utm { zone: 31, north: true };
        let (x, y) = utm.from_wgs84(3.0, 0.01);
        let first = Raster::new(
            Array2::from_elem((50, 50), 1.0f32),
            GeoTransform::north_up(x.floor(), y.ceil(), 20.0, 20.0),
            utm,
        );
        let second = tile(3.0, 0.01, 10, 10, 2.0);
        let engine = MosaicEngine::new(&aoi(3.0, 0.0, 3.01, 0.01)).unwrap();
        let merged = engine.merge(vec![first, second]).unwrap();
        assert_eq!(merged.crs, utm);
        assert!(merged.data.iter().any(|v| *v == 2.0));
    }
}
