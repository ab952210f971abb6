//! Grid resampling and reprojection of rasters.

use crate::core::projection::transform_point;
use crate::types::{BandImage, CoordinateSystem, GeoTransform, Raster, WatchError, WatchResult};

/// Vertices sampled per edge when estimating a reprojected extent
const EXTENT_SAMPLES: usize = 16;

/// Interpolation used when resampling onto a target grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resampling {
    Nearest,
    Bilinear,
}

/// Target raster grid: georeferencing plus shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    pub transform: GeoTransform,
    pub rows: usize,
    pub cols: usize,
    pub crs: CoordinateSystem,
}

impl GridSpec {
    pub fn of(raster: &Raster) -> Self {
        let (rows, cols) = raster.dim();
        Self {
            transform: raster.transform,
            rows,
            cols,
            crs: raster.crs,
        }
    }

    /// North-up grid covering [min_x, max_x] x [min_y, max_y] at `res`
    pub fn covering(min_x: f64, min_y: f64, max_x: f64, max_y: f64, res_x: f64, res_y: f64, crs: CoordinateSystem) -> Self {
        let cols = (((max_x - min_x) / res_x) - 1e-9).ceil().max(1.0) as usize;
        let rows = (((max_y - min_y) / res_y) - 1e-9).ceil().max(1.0) as usize;
        Self {
            transform: GeoTransform::north_up(min_x, max_y, res_x, res_y),
            rows,
            cols,
            crs,
        }
    }

    pub fn same_as(&self, raster: &Raster) -> bool {
        *self == GridSpec::of(raster)
    }
}

/// Default grid for `raster` in `target` CRS: the reprojected extent at a
/// square resolution preserving the pixel count along the diagonal
pub fn default_grid(raster: &Raster, target: CoordinateSystem) -> WatchResult<GridSpec> {
    let (rows, cols) = raster.dim();
    if rows == 0 || cols == 0 {
        return Err(WatchError::Processing("cannot reproject an empty raster".to_string()));
    }

    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;

    for i in 0..=EXTENT_SAMPLES {
        let t = i as f64 / EXTENT_SAMPLES as f64;
        let edge_points = [
            (t * cols as f64, 0.0),
            (t * cols as f64, rows as f64),
            (0.0, t * rows as f64),
            (cols as f64, t * rows as f64),
        ];
        for (col, row) in edge_points {
            let (x, y) = raster.transform.pixel_to_map(col, row);
            let (tx, ty) = transform_point(raster.crs, target, x, y);
            min_x = min_x.min(tx);
            min_y = min_y.min(ty);
            max_x = max_x.max(tx);
            max_y = max_y.max(ty);
        }
    }

    if !(min_x.is_finite() && min_y.is_finite() && max_x.is_finite() && max_y.is_finite()) {
        return Err(WatchError::Projection(format!(
            "extent is not representable in {}",
            target
        )));
    }

    let diagonal_pixels = ((rows * rows + cols * cols) as f64).sqrt();
    let res = ((max_x - min_x).powi(2) + (max_y - min_y).powi(2)).sqrt() / diagonal_pixels;
    if !(res > 0.0) {
        return Err(WatchError::Projection("degenerate reprojected extent".to_string()));
    }

    Ok(GridSpec::covering(min_x, min_y, max_x, max_y, res, res, target))
}

/// Sample at fractional pixel coordinates (col, row) where pixel centres
/// sit at +0.5.
///
/// Uses all four neighbours when they are valid; otherwise falls back to
/// the containing pixel so nodata never blends into data.
pub fn bilinear_interpolate(image: &BandImage, col: f64, row: f64) -> f32 {
    let (height, width) = image.dim();
    if col < 0.0 || row < 0.0 || col >= width as f64 || row >= height as f64 {
        return f32::NAN;
    }

    let fx = (col - 0.5).max(0.0);
    let fy = (row - 0.5).max(0.0);
    let x1 = (fx.floor() as usize).min(width - 1);
    let y1 = (fy.floor() as usize).min(height - 1);
    let x2 = (x1 + 1).min(width - 1);
    let y2 = (y1 + 1).min(height - 1);
    let dx = fx - x1 as f64;
    let dy = fy - y1 as f64;

    let v11 = image[[y1, x1]];
    let v12 = image[[y2, x1]];
    let v21 = image[[y1, x2]];
    let v22 = image[[y2, x2]];

    if !(v11.is_finite() && v12.is_finite() && v21.is_finite() && v22.is_finite()) {
        return nearest_sample(image, col, row);
    }

    let interpolated = v11 as f64 * (1.0 - dx) * (1.0 - dy)
        + v21 as f64 * dx * (1.0 - dy)
        + v12 as f64 * (1.0 - dx) * dy
        + v22 as f64 * dx * dy;

    interpolated as f32
}

/// Value of the pixel containing (col, row)
pub fn nearest_sample(image: &BandImage, col: f64, row: f64) -> f32 {
    let (height, width) = image.dim();
    if col < 0.0 || row < 0.0 || col >= width as f64 || row >= height as f64 {
        return f32::NAN;
    }
    image[[row.floor() as usize, col.floor() as usize]]
}

fn sample_at(raster: &Raster, grid: &GridSpec, method: Resampling, row: usize, col: usize) -> f32 {
    let (x, y) = grid.transform.pixel_to_map(col as f64 + 0.5, row as f64 + 0.5);
    let (sx, sy) = transform_point(grid.crs, raster.crs, x, y);
    let (sc, sr) = raster.transform.map_to_pixel(sx, sy);
    match method {
        Resampling::Bilinear => bilinear_interpolate(&raster.data, sc, sr),
        Resampling::Nearest => nearest_sample(&raster.data, sc, sr),
    }
}

/// Resample `raster` onto `grid`; cells outside the source become NaN
#[cfg(feature = "parallel")]
pub fn resample_to_grid(raster: &Raster, grid: &GridSpec, method: Resampling) -> WatchResult<Raster> {
    use rayon::prelude::*;

    if grid.same_as(raster) {
        return Ok(raster.clone());
    }
    log::debug!(
        "Resampling {:?} {}x{} {} -> {}x{} {}",
        method,
        raster.dim().0,
        raster.dim().1,
        raster.crs,
        grid.rows,
        grid.cols,
        grid.crs
    );

    let values: Vec<f32> = (0..grid.rows * grid.cols)
        .into_par_iter()
        .map(|i| sample_at(raster, grid, method, i / grid.cols, i % grid.cols))
        .collect();

    let data = BandImage::from_shape_vec((grid.rows, grid.cols), values)
        .map_err(|e| WatchError::Processing(format!("Shape error: {}", e)))?;
    Ok(Raster::new(data, grid.transform, grid.crs))
}

#[cfg(not(feature = "parallel"))]
pub fn resample_to_grid(raster: &Raster, grid: &GridSpec, method: Resampling) -> WatchResult<Raster> {
    if grid.same_as(raster) {
        return Ok(raster.clone());
    }
    let data = BandImage::from_shape_fn((grid.rows, grid.cols), |(r, c)| sample_at(raster, grid, method, r, c));
    Ok(Raster::new(data, grid.transform, grid.crs))
}

/// Reproject onto the default grid of `target` with bilinear interpolation
pub fn reproject_to_crs(raster: &Raster, target: CoordinateSystem) -> WatchResult<Raster> {
    if raster.crs == target {
        return Ok(raster.clone());
    }
    log::info!("Reprojecting raster from {} to {}", raster.crs, target);
    let grid = default_grid(raster, target)?;
    resample_to_grid(raster, &grid, Resampling::Bilinear)
}
