//! Acquisition, mosaicking and change-detection components

pub mod projection;
pub mod geometry;
pub mod coverage;
pub mod vectorize;
pub mod resample;
pub mod temporal;
pub mod selection;
pub mod mosaic;
pub mod indices;
pub mod change;
pub mod alerts;
pub mod pipeline;

// Re-export main types
pub use coverage::{coverage, CoverageMode, CoverageResult, CoverageSource};
pub use temporal::{Epoch, TemporalGrouper};
pub use selection::{select_scenes, CoverageAccumulator, Offer, RankedCandidates, Selection, SelectionCriteria};
pub use mosaic::{clip_to_shape, MosaicEngine};
pub use resample::{GridSpec, Resampling};
pub use indices::{BandSet, IndexKind, IndexStats, SpectralIndices};
pub use change::{change_statistics, classify_change, detect_changes, ChangeMasks, ChangeStats, IndexDeltas};
pub use alerts::{
    AlertRule, AlertRuleEngine, AreaThresholdRule, BoundaryBreachRule, RuleConfig, RuleContext, RuleKind,
    RulesDocument, SeverityTiers,
};
pub use pipeline::{AcquisitionPath, AcquisitionPlan, AnalysisOutput, EpochReport, Pipeline};
