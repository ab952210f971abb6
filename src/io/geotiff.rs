use crate::types::{CoordinateSystem, GeoTransform, PixelMask, Raster, WatchError, WatchResult};
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::Path;

/// Read band 1 of a GeoTIFF as reflectance.
///
/// The declared nodata value (and 0 when `zero_is_nodata`) become NaN.
pub fn read_raster<P: AsRef<Path>>(path: P, zero_is_nodata: bool) -> WatchResult<Raster> {
    log::debug!("Reading raster from: {}", path.as_ref().display());

    let dataset = Dataset::open(path.as_ref())?;
    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let crs = read_crs(&dataset)?;
    let (width, height) = dataset.raster_size();

    let rasterband = dataset.rasterband(1)?;
    let nodata = rasterband.no_data_value();
    let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

    let mut data = Array2::from_shape_vec((height, width), band_data.data)
        .map_err(|e| WatchError::Processing(format!("Failed to reshape raster data: {}", e)))?;

    data.mapv_inplace(|v| {
        let is_nodata = match nodata {
            Some(nd) if nd.is_nan() => v.is_nan(),
            Some(nd) => v as f64 == nd,
            None => false,
        };
        if is_nodata || (zero_is_nodata && v == 0.0) {
            f32::NAN
        } else {
            v
        }
    });

    log::debug!("Raster {}x{} in {}", width, height, crs);
    Ok(Raster::new(data, transform, crs))
}

fn read_crs(dataset: &Dataset) -> WatchResult<CoordinateSystem> {
    let mut srs = dataset.spatial_ref()?;
    let code = match srs.auth_code() {
        Ok(code) => code,
        Err(_) => {
            srs.auto_identify_epsg()?;
            srs.auth_code()?
        }
    };
    CoordinateSystem::from_epsg(code as u32)
}

/// Write a raster as a single-band float32 GeoTIFF with NaN nodata
pub fn write_raster<P: AsRef<Path>>(raster: &Raster, output_path: P) -> WatchResult<()> {
    log::debug!("Writing GeoTIFF: {}", output_path.as_ref().display());

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (height, width) = raster.dim();

    let mut dataset = driver.create_with_band_type::<f32, _>(output_path.as_ref(), width as isize, height as isize, 1)?;
    dataset.set_geo_transform(&raster.transform.to_gdal())?;
    dataset.set_spatial_ref(&SpatialRef::from_epsg(raster.crs.epsg())?)?;

    let mut rasterband = dataset.rasterband(1)?;
    let flat_data: Vec<f32> = raster.data.iter().cloned().collect();
    let buffer = Buffer::new((width, height), flat_data);
    rasterband.write((0, 0), (width, height), &buffer)?;
    rasterband.set_no_data_value(Some(f64::NAN))?;

    Ok(())
}

/// Write a boolean mask as a byte GeoTIFF (1 = set)
pub fn write_mask<P: AsRef<Path>>(
    mask: &PixelMask,
    transform: &GeoTransform,
    crs: CoordinateSystem,
    output_path: P,
) -> WatchResult<()> {
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (height, width) = mask.dim();

    let mut dataset = driver.create_with_band_type::<u8, _>(output_path.as_ref(), width as isize, height as isize, 1)?;
    dataset.set_geo_transform(&transform.to_gdal())?;
    dataset.set_spatial_ref(&SpatialRef::from_epsg(crs.epsg())?)?;

    let mut rasterband = dataset.rasterband(1)?;
    let flat_data: Vec<u8> = mask.iter().map(|v| u8::from(*v)).collect();
    rasterband.write((0, 0), (width, height), &Buffer::new((width, height), flat_data))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_write_then_read_utm_raster() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b04.tif");
        let raster = Raster::new(
            array![[0.0f32, 0.12], [f32::NAN, 0.3]],
            GeoTransform::north_up(600_000.0, 7_100_000.0, 10.0, 10.0),
            CoordinateSystem::Utm { zone: 35, north: false },
        );
        write_raster(&raster, &path).unwrap();

        let read = read_raster(&path, true).unwrap();
        assert_eq!(read.crs, CoordinateSystem::Utm { zone: 35, north: false });
        assert_eq!(read.transform, raster.transform);
        assert!(read.data[[0, 0]].is_nan()); // zero treated as nodata
        assert!(read.data[[1, 0]].is_nan());
        assert!((read.data[[0, 1]] - 0.12).abs() < 1e-7);

        let keep_zero = read_raster(&path, false).unwrap();
        assert_eq!(keep_zero.data[[0, 0]], 0.0);
    }
}
