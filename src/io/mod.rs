//! External collaborators: GeoTIFF access, scene catalog, band fetching
//! and run persistence.

pub mod catalog;
pub mod fetch;
pub mod geotiff;
pub mod sink;

pub use catalog::{JsonSceneCatalog, SceneCatalog};
pub use fetch::{BandFetcher, HttpBandFetcher, RasterHandle};
pub use sink::{JsonRunSink, PersistenceSink, RunRecord};
