use crate::io::geotiff;
use crate::types::{Band, Raster, Scene, WatchError, WatchResult};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local artifact produced by a band fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterHandle {
    path: PathBuf,
}

impl RasterHandle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn open(&self, zero_is_nodata: bool) -> WatchResult<Raster> {
        geotiff::read_raster(&self.path, zero_is_nodata)
    }
}

/// Retrieves band assets; repeated calls for the same band return the cached artifact
pub trait BandFetcher {
    fn fetch_band(&mut self, scene: &Scene, band: Band) -> WatchResult<RasterHandle>;
}

/// Downloads band assets over HTTP into a cache directory
pub struct HttpBandFetcher {
    cache_dir: PathBuf,
    client: reqwest::blocking::Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl HttpBandFetcher {
    pub fn new(cache_dir: impl Into<PathBuf>) -> WatchResult<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .user_agent(concat!("minewatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WatchError::Download(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            cache_dir,
            client,
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
        })
    }

    /// Fetcher caching under the user cache directory
    pub fn with_default_cache() -> WatchResult<Self> {
        let base = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
        Self::new(base.join("minewatch").join("bands"))
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Cache location of one band: `{scene_id}_{band}.tif`
    pub fn cached_path(&self, scene_id: &str, band: Band) -> PathBuf {
        let safe_id: String = scene_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect();
        self.cache_dir.join(format!("{}_{}.tif", safe_id, band))
    }

    fn download_with_retries(&self, url: &str, output_path: &Path) -> WatchResult<()> {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            log::debug!("Download attempt {} of {}: {}", attempt, self.max_retries, url);

            match self.try_download_once(url, output_path) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::warn!("Download attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                    if attempt < self.max_retries {
                        std::thread::sleep(self.retry_delay);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| WatchError::Download("Download failed after all retries".to_string())))
    }

    /// Single attempt; the file only appears at `output_path` once complete
    fn try_download_once(&self, url: &str, output_path: &Path) -> WatchResult<()> {
        let content: Vec<u8> = match url.strip_prefix("file://") {
            Some(local) => std::fs::read(local)?,
            None => {
                let response = self
                    .client
                    .get(url)
                    .send()
                    .map_err(|e| WatchError::Download(format!("HTTP request failed: {}", e)))?;
                if !response.status().is_success() {
                    return Err(WatchError::Download(format!(
                        "HTTP {} {}: {}",
                        response.status().as_u16(),
                        response.status().canonical_reason().unwrap_or(""),
                        url
                    )));
                }
                response
                    .bytes()
                    .map_err(|e| WatchError::Download(format!("Failed to read response body: {}", e)))?
                    .to_vec()
            }
        };

        if content.is_empty() {
            return Err(WatchError::Download(format!("Empty response from {}", url)));
        }

        let mut tmp = tempfile::NamedTempFile::new_in(&self.cache_dir)?;
        tmp.write_all(&content)?;
        tmp.persist(output_path).map_err(|e| WatchError::Io(e.error))?;
        log::debug!("Downloaded {} bytes to {}", content.len(), output_path.display());
        Ok(())
    }
}

impl BandFetcher for HttpBandFetcher {
    fn fetch_band(&mut self, scene: &Scene, band: Band) -> WatchResult<RasterHandle> {
        let output_path = self.cached_path(&scene.id, band);
        if output_path.exists() {
            log::debug!("Using cached band {} of {}", band, scene.id);
            return Ok(RasterHandle::new(output_path));
        }

        let href = scene.assets.get(band.asset_key()).ok_or_else(|| {
            WatchError::Download(format!("Scene {} has no asset for band {}", scene.id, band))
        })?;

        log::info!("Downloading band {} of scene {}", band, scene.id);
        self.download_with_retries(href, &output_path)?;
        Ok(RasterHandle::new(output_path))
    }
}
