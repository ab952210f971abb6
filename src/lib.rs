//! MineWatch: coverage-aware Sentinel-2 change monitoring for mine sites
//!
//! Decides which scenes cover an area of interest, mosaics them when one
//! tile is not enough, computes NDVI/NDWI/BSI change between a baseline
//! and a latest epoch, and turns the changed areas into graded alerts.

pub mod types;
pub mod config;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    Alert, Aoi, Band, BoundingBox, CoordinateSystem, GeoTransform, Raster, RunStatus, Scene, Severity,
    WatchError, WatchResult, Zone, ZoneType,
};
pub use config::PipelineConfig;
pub use io::{BandFetcher, HttpBandFetcher, JsonRunSink, JsonSceneCatalog, PersistenceSink, RasterHandle, SceneCatalog};
pub use crate::core::{AlertRuleEngine, AnalysisOutput, MosaicEngine, Pipeline};

#[cfg(feature = "python")]
mod python {
    use crate::core::coverage::{coverage, CoverageMode, CoverageSource};
    use crate::core::indices;
    use geo::{LineString, Polygon};
    use numpy::{IntoPyArray, PyArray2, PyReadonlyArray2};
    use pyo3::prelude::*;

    fn to_py_err(e: crate::types::WatchError) -> PyErr {
        PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e))
    }

    fn check_shapes(a: &PyReadonlyArray2<f32>, b: &PyReadonlyArray2<f32>) -> PyResult<()> {
        if a.shape() != b.shape() {
            return Err(PyErr::new::<pyo3::exceptions::PyValueError, _>(format!(
                "Band shapes differ: {:?} vs {:?}",
                a.shape(),
                b.shape()
            )));
        }
        Ok(())
    }

    fn ring(points: Vec<(f64, f64)>) -> Polygon<f64> {
        Polygon::new(LineString::from(points), vec![])
    }

    /// NDVI from NIR and red reflectance arrays
    #[pyfunction]
    fn ndvi<'py>(py: Python<'py>, nir: PyReadonlyArray2<f32>, red: PyReadonlyArray2<f32>) -> PyResult<&'py PyArray2<f32>> {
        check_shapes(&nir, &red)?;
        Ok(indices::ndvi(&nir.as_array().to_owned(), &red.as_array().to_owned()).into_pyarray(py))
    }

    /// NDWI from green and NIR reflectance arrays
    #[pyfunction]
    fn ndwi<'py>(py: Python<'py>, green: PyReadonlyArray2<f32>, nir: PyReadonlyArray2<f32>) -> PyResult<&'py PyArray2<f32>> {
        check_shapes(&green, &nir)?;
        Ok(indices::ndwi(&green.as_array().to_owned(), &nir.as_array().to_owned()).into_pyarray(py))
    }

    /// BSI from SWIR, red, NIR and blue reflectance arrays
    #[pyfunction]
    fn bsi<'py>(
        py: Python<'py>,
        swir: PyReadonlyArray2<f32>,
        red: PyReadonlyArray2<f32>,
        nir: PyReadonlyArray2<f32>,
        blue: PyReadonlyArray2<f32>,
    ) -> PyResult<&'py PyArray2<f32>> {
        check_shapes(&swir, &red)?;
        check_shapes(&swir, &nir)?;
        check_shapes(&swir, &blue)?;
        let out = indices::bsi(
            &swir.as_array().to_owned(),
            &red.as_array().to_owned(),
            &nir.as_array().to_owned(),
            &blue.as_array().to_owned(),
        );
        Ok(out.into_pyarray(py))
    }

    /// Bounds-mode coverage (percent) of an AOI ring by footprint rings, all lon/lat
    #[pyfunction]
    fn footprint_coverage(footprints: Vec<Vec<(f64, f64)>>, aoi: Vec<(f64, f64)>) -> PyResult<f64> {
        let footprints: Vec<Polygon<f64>> = footprints.into_iter().map(ring).collect();
        let result = coverage(
            CoverageSource::Footprints(&footprints),
            &ring(aoi),
            CoverageMode::Bounds,
            0.0,
        )
        .map_err(to_py_err)?;
        Ok(result.coverage_percent)
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(ndvi, m)?)?;
        m.add_function(wrap_pyfunction!(ndwi, m)?)?;
        m.add_function(wrap_pyfunction!(bsi, m)?)?;
        m.add_function(wrap_pyfunction!(footprint_coverage, m)?)?;
        Ok(())
    }
}
