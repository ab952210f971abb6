//! Alert rule engine.
//!
//! Rules are strategy objects behind [`AlertRule`], registered by name.
//! The built-in kinds are area-threshold rules (one per change class) and
//! the boundary-breach rule; both can be configured from a JSON rules
//! document. A rule that is malformed or fails while evaluating is logged
//! and skipped without affecting the other rules.

use crate::core::geometry;
use crate::types::{Alert, Aoi, Severity, WatchError, WatchResult, Zone, ZoneType};
use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

/// Shared inputs for rule evaluation
#[derive(Debug, Clone, Default)]
pub struct RuleContext {
    /// AOI plus buffer (WGS84); boundary rules are inert without it
    pub boundary: Option<MultiPolygon<f64>>,
}

impl RuleContext {
    pub fn for_aoi(aoi: &Aoi) -> WatchResult<Self> {
        Ok(Self::with_boundary(aoi.buffered()?))
    }

    pub fn with_boundary(boundary: MultiPolygon<f64>) -> Self {
        Self {
            boundary: Some(boundary),
        }
    }
}

/// One pluggable alert rule
pub trait AlertRule: Send + Sync {
    fn name(&self) -> &str;

    /// Whether the rule looks at this zone at all
    fn applies(&self, zone: &Zone) -> bool;

    fn evaluate(&self, zone: &Zone, context: &RuleContext) -> WatchResult<Option<Alert>>;
}

/// Minimum zone area (ha) per severity; present tiers must be strictly descending
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeverityTiers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
}

impl SeverityTiers {
    fn ordered(&self) -> Vec<(Severity, f64)> {
        [
            (Severity::High, self.high),
            (Severity::Medium, self.medium),
            (Severity::Low, self.low),
        ]
        .into_iter()
        .filter_map(|(s, t)| t.map(|t| (s, t)))
        .collect()
    }

    pub fn validate(&self) -> WatchResult<()> {
        let tiers = self.ordered();
        if tiers.is_empty() {
            return Err(WatchError::Config("at least one severity tier is required".to_string()));
        }
        for (severity, t) in &tiers {
            if !t.is_finite() || *t < 0.0 {
                return Err(WatchError::Config(format!("invalid {} tier: {}", severity, t)));
            }
        }
        for pair in tiers.windows(2) {
            if pair[0].1 <= pair[1].1 {
                return Err(WatchError::Config(format!(
                    "tier {} ({}) must be above tier {} ({})",
                    pair[0].0, pair[0].1, pair[1].0, pair[1].1
                )));
            }
        }
        Ok(())
    }

    /// Highest tier whose minimum the area meets
    pub fn severity_for(&self, area_ha: f64) -> Option<Severity> {
        self.ordered()
            .into_iter()
            .find(|(_, min)| area_ha >= *min)
            .map(|(s, _)| s)
    }
}

/// Render `{area}` / `{area:.N}` placeholders; `{{` and `}}` are literal braces
pub fn render_template(template: &str, area_ha: f64) -> WatchResult<String> {
    let mut out = String::with_capacity(template.len() + 8);
    let mut chars = template.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    field.push(c);
                }
                if !closed {
                    return Err(WatchError::Config(format!("unclosed placeholder in '{}'", template)));
                }
                out.push_str(&render_field(&field, area_ha, template)?);
            }
            '}' => {
                return Err(WatchError::Config(format!("stray '}}' in '{}'", template)));
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

fn render_field(field: &str, area_ha: f64, template: &str) -> WatchResult<String> {
    let (name, spec) = match field.split_once(':') {
        Some((n, s)) => (n, Some(s)),
        None => (field, None),
    };
    if name != "area" {
        return Err(WatchError::Config(format!(
            "unknown placeholder '{{{}}}' in '{}'",
            field, template
        )));
    }
    match spec {
        None => Ok(format!("{}", area_ha)),
        Some(spec) => {
            let precision = spec
                .strip_prefix('.')
                .map(|p| p.strip_suffix('f').unwrap_or(p))
                .and_then(|p| p.parse::<usize>().ok())
                .ok_or_else(|| WatchError::Config(format!("bad format spec '{}' in '{}'", spec, template)))?;
            Ok(format!("{:.*}", precision, area_ha))
        }
    }
}

fn default_true() -> bool {
    true
}

/// Serialized form of one rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub kind: RuleKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    AreaThreshold {
        zone_type: ZoneType,
        thresholds: SeverityTiers,
        #[serde(default)]
        min_area_ha: f64,
        alert_type: String,
        location: String,
        #[serde(default)]
        messages: BTreeMap<Severity, String>,
        #[serde(default)]
        description_template: String,
    },
    BoundaryBreach {
        #[serde(default = "default_breach_severity")]
        severity: Severity,
        message: String,
        #[serde(default)]
        description_template: String,
        location: String,
    },
}

fn default_breach_severity() -> Severity {
    Severity::High
}

/// Rules keyed by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RulesDocument {
    pub rules: BTreeMap<String, RuleConfig>,
}

impl RulesDocument {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> WatchResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> WatchResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Severity by zone area for one change class
#[derive(Debug, Clone)]
pub struct AreaThresholdRule {
    name: String,
    enabled: bool,
    zone_type: ZoneType,
    thresholds: SeverityTiers,
    min_area_ha: f64,
    alert_type: String,
    location: String,
    messages: BTreeMap<Severity, String>,
    description_template: String,
}

impl AreaThresholdRule {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        zone_type: ZoneType,
        thresholds: SeverityTiers,
        min_area_ha: f64,
        alert_type: impl Into<String>,
        location: impl Into<String>,
        messages: BTreeMap<Severity, String>,
        description_template: impl Into<String>,
    ) -> WatchResult<Self> {
        thresholds.validate()?;
        let description_template = description_template.into();
        // Reject bad templates up front so the rule never fires half-rendered
        for template in messages.values().chain(std::iter::once(&description_template)) {
            render_template(template, 0.0)?;
        }
        Ok(Self {
            name: name.into(),
            enabled: true,
            zone_type,
            thresholds,
            min_area_ha,
            alert_type: alert_type.into(),
            location: location.into(),
            messages,
            description_template,
        })
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn default_title(&self) -> String {
        let label = match self.zone_type {
            ZoneType::VegetationLoss => "Vegetation loss",
            ZoneType::MiningExpansion => "Mining expansion",
            ZoneType::WaterAccumulation => "Water accumulation",
        };
        format!("{} detected ({{area:.1}} ha)", label)
    }
}

impl AlertRule for AreaThresholdRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn applies(&self, zone: &Zone) -> bool {
        self.enabled && zone.zone_type == self.zone_type
    }

    fn evaluate(&self, zone: &Zone, _context: &RuleContext) -> WatchResult<Option<Alert>> {
        if zone.area_ha < self.min_area_ha {
            return Ok(None);
        }
        let Some(severity) = self.thresholds.severity_for(zone.area_ha) else {
            return Ok(None);
        };

        let title_template = self
            .messages
            .get(&severity)
            .cloned()
            .unwrap_or_else(|| self.default_title());

        Ok(Some(Alert {
            zone_id: zone.id,
            rule: self.name.clone(),
            alert_type: self.alert_type.clone(),
            severity,
            title: render_template(&title_template, zone.area_ha)?,
            description: render_template(&self.description_template, zone.area_ha)?,
            location: self.location.clone(),
            geometry: zone.geometry.clone(),
        }))
    }
}

/// Fires when a zone is not fully inside the AOI plus buffer
#[derive(Debug, Clone)]
pub struct BoundaryBreachRule {
    name: String,
    enabled: bool,
    severity: Severity,
    message: String,
    description_template: String,
    location: String,
}

impl BoundaryBreachRule {
    pub fn new(
        name: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
        description_template: impl Into<String>,
        location: impl Into<String>,
    ) -> WatchResult<Self> {
        let message = message.into();
        let description_template = description_template.into();
        render_template(&message, 0.0)?;
        render_template(&description_template, 0.0)?;
        Ok(Self {
            name: name.into(),
            enabled: true,
            severity,
            message,
            description_template,
            location: location.into(),
        })
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl AlertRule for BoundaryBreachRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn applies(&self, _zone: &Zone) -> bool {
        self.enabled
    }

    fn evaluate(&self, zone: &Zone, context: &RuleContext) -> WatchResult<Option<Alert>> {
        let Some(boundary) = context.boundary.as_ref() else {
            return Ok(None);
        };
        if geometry::is_within(&zone.geometry, boundary) {
            return Ok(None);
        }

        Ok(Some(Alert {
            zone_id: zone.id,
            rule: self.name.clone(),
            alert_type: "boundary_breach".to_string(),
            severity: self.severity,
            title: render_template(&self.message, zone.area_ha)?,
            description: render_template(&self.description_template, zone.area_ha)?,
            location: self.location.clone(),
            geometry: zone.geometry.clone(),
        }))
    }
}

/// Build a rule object from its serialized form
pub fn build_rule(name: &str, config: &RuleConfig) -> WatchResult<Box<dyn AlertRule>> {
    match &config.kind {
        RuleKind::AreaThreshold {
            zone_type,
            thresholds,
            min_area_ha,
            alert_type,
            location,
            messages,
            description_template,
        } => Ok(Box::new(
            AreaThresholdRule::new(
                name,
                *zone_type,
                thresholds.clone(),
                *min_area_ha,
                alert_type.clone(),
                location.clone(),
                messages.clone(),
                description_template.clone(),
            )?
            .enabled(config.enabled),
        )),
        RuleKind::BoundaryBreach {
            severity,
            message,
            description_template,
            location,
        } => Ok(Box::new(
            BoundaryBreachRule::new(name, *severity, message.clone(), description_template.clone(), location.clone())?
                .enabled(config.enabled),
        )),
    }
}

/// Registry of rules, evaluated in registration order
#[derive(Default)]
pub struct AlertRuleEngine {
    rules: Vec<Box<dyn AlertRule>>,
}

impl AlertRuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in rule set: the three change classes plus boundary breach
    pub fn with_default_rules() -> Self {
        Self::from_document(&Self::default_document())
    }

    /// Rules from a document; malformed entries are skipped with a warning
    pub fn from_document(document: &RulesDocument) -> Self {
        let mut engine = Self::new();
        let mut names: Vec<&String> = document.rules.keys().collect();
        // Change-class rules first, then boundary checks, for stable alert order
        names.sort_by_key(|n| match document.rules[*n].kind {
            RuleKind::AreaThreshold { .. } => 0,
            RuleKind::BoundaryBreach { .. } => 1,
        });

        for name in names {
            match build_rule(name, &document.rules[name]) {
                Ok(rule) => engine.register(rule),
                Err(e) => log::warn!("Skipping malformed alert rule '{}': {}", name, e),
            }
        }
        engine
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> WatchResult<Self> {
        let document = RulesDocument::from_json_file(path.as_ref())?;
        log::info!(
            "Loaded {} alert rule definition(s) from {}",
            document.rules.len(),
            path.as_ref().display()
        );
        Ok(Self::from_document(&document))
    }

    /// Add a rule, replacing any rule registered under the same name
    pub fn register(&mut self, rule: Box<dyn AlertRule>) {
        match self.rules.iter().position(|r| r.name() == rule.name()) {
            Some(i) => self.rules[i] = rule,
            None => self.rules.push(rule),
        }
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate every zone against every applicable rule.
    ///
    /// Rule errors and panics are logged and skipped per rule.
    pub fn evaluate_zones(&self, zones: &[Zone], context: &RuleContext) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for zone in zones {
            for rule in &self.rules {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    if rule.applies(zone) {
                        rule.evaluate(zone, context)
                    } else {
                        Ok(None)
                    }
                }));
                match outcome {
                    Ok(Ok(Some(alert))) => alerts.push(alert),
                    Ok(Ok(None)) => {}
                    Ok(Err(e)) => log::warn!("Rule '{}' failed on zone {}: {}", rule.name(), zone.id, e),
                    Err(_) => log::error!("Rule '{}' panicked on zone {}; skipped", rule.name(), zone.id),
                }
            }
        }
        log::info!("Generated {} alert(s) from {} zone(s)", alerts.len(), zones.len());
        alerts
    }

    pub fn default_document() -> RulesDocument {
        let mut rules = BTreeMap::new();
        rules.insert(
            "vegetation_loss".to_string(),
            RuleConfig {
                enabled: true,
                kind: RuleKind::AreaThreshold {
                    zone_type: ZoneType::VegetationLoss,
                    thresholds: SeverityTiers { high: Some(1.0), medium: Some(0.5), low: Some(0.2) },
                    min_area_ha: 0.2,
                    alert_type: "vegetation_loss".to_string(),
                    location: "Site Assessment Zone".to_string(),
                    messages: BTreeMap::from([
                        (Severity::High, "Significant vegetation loss detected ({area:.1} ha)".to_string()),
                        (Severity::Medium, "Moderate vegetation loss detected ({area:.1} ha)".to_string()),
                        (Severity::Low, "Minor vegetation loss detected ({area:.1} ha)".to_string()),
                    ]),
                    description_template: "NDVI analysis shows vegetation decline.".to_string(),
                },
            },
        );
        rules.insert(
            "mining_expansion".to_string(),
            RuleConfig {
                enabled: true,
                kind: RuleKind::AreaThreshold {
                    zone_type: ZoneType::MiningExpansion,
                    thresholds: SeverityTiers { high: None, medium: Some(0.1), low: Some(0.05) },
                    min_area_ha: 0.05,
                    alert_type: "excavation_alert".to_string(),
                    location: "Active Operations Zone".to_string(),
                    messages: BTreeMap::from([
                        (Severity::Medium, "New excavation surface detected ({area:.1} ha)".to_string()),
                        (Severity::Low, "Small excavation expansion ({area:.1} ha)".to_string()),
                    ]),
                    description_template: "Bare Soil Index increase suggests mining expansion.".to_string(),
                },
            },
        );
        rules.insert(
            "water_accumulation".to_string(),
            RuleConfig {
                enabled: true,
                kind: RuleKind::AreaThreshold {
                    zone_type: ZoneType::WaterAccumulation,
                    thresholds: SeverityTiers { high: None, medium: None, low: Some(0.05) },
                    min_area_ha: 0.05,
                    alert_type: "water_warning".to_string(),
                    location: "Drainage Area".to_string(),
                    messages: BTreeMap::from([(Severity::Low, "New water pooling detected ({area:.1} ha)".to_string())]),
                    description_template: "NDWI indicates water accumulation.".to_string(),
                },
            },
        );
        rules.insert(
            "boundary_breach".to_string(),
            RuleConfig {
                enabled: true,
                kind: RuleKind::BoundaryBreach {
                    severity: Severity::High,
                    message: "Unauthorized activity detected outside lease boundary".to_string(),
                    description_template: "Activity detected outside approved boundary".to_string(),
                    location: "Boundary Perimeter".to_string(),
                },
            },
        );
        RulesDocument { rules }
    }
}
