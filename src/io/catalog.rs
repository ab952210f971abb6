use crate::types::{BoundingBox, Scene, WatchResult};
use geo::BoundingRect;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Read-only source of scene metadata
pub trait SceneCatalog {
    /// Scenes whose footprint meets `bbox`, most recent first, at most `max_count`
    fn list_candidate_scenes(&self, bbox: &BoundingBox, max_count: usize) -> WatchResult<Vec<Scene>>;

    /// Look up one scene by id
    fn find_scene(&self, scene_id: &str) -> WatchResult<Option<Scene>>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CatalogFile {
    scenes: Vec<Scene>,
}

/// Catalog backed by a JSON file of ingested scenes
#[derive(Debug, Clone, Default)]
pub struct JsonSceneCatalog {
    scenes: Vec<Scene>,
}

impl JsonSceneCatalog {
    pub fn new(scenes: Vec<Scene>) -> Self {
        Self { scenes }
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> WatchResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let file: CatalogFile = serde_json::from_str(&text)?;
        log::info!(
            "Loaded {} scene(s) from catalog {}",
            file.scenes.len(),
            path.as_ref().display()
        );
        Ok(Self { scenes: file.scenes })
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> WatchResult<()> {
        let file = CatalogFile {
            scenes: self.scenes.clone(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

impl SceneCatalog for JsonSceneCatalog {
    fn list_candidate_scenes(&self, bbox: &BoundingBox, max_count: usize) -> WatchResult<Vec<Scene>> {
        let mut hits: Vec<Scene> = self
            .scenes
            .iter()
            .filter(|s| {
                s.footprint
                    .bounding_rect()
                    .map_or(false, |r| BoundingBox::from_rect(&r).intersects(bbox))
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.acquired_at.cmp(&a.acquired_at).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(max_count);
        Ok(hits)
    }

    fn find_scene(&self, scene_id: &str) -> WatchResult<Option<Scene>> {
        Ok(self.scenes.iter().find(|s| s.id == scene_id).cloned())
    }
}
