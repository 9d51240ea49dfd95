//! Injected policy tables: market-size tiers and the service-type catalog.
//!
//! These are read-only lookup structures handed to the coverage and
//! prioritization code, never module-level mutable state. Built-in
//! defaults cover the common case; both tables can be overridden from
//! YAML files at the workspace root (`config/markets.yaml`,
//! `config/service_types.yaml`).

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "lmc-config";

/// Market size classification, smallest to largest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketTier {
    Small,
    Medium,
    Large,
    Mega,
}

impl MarketTier {
    pub const ALL: [MarketTier; 4] = [
        MarketTier::Small,
        MarketTier::Medium,
        MarketTier::Large,
        MarketTier::Mega,
    ];
}

/// Distinct-service-type thresholds for one tier: below `min` phase 1 is
/// barely started, `target` marks phase completion, `max` is where more
/// searching stops paying off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub min_service_types: u32,
    pub target_service_types: u32,
    pub max_service_types: u32,
}

/// Tier → thresholds table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketPolicy {
    tiers: BTreeMap<MarketTier, TierThresholds>,
}

impl Default for MarketPolicy {
    fn default() -> Self {
        let mut tiers = BTreeMap::new();
        tiers.insert(
            MarketTier::Small,
            TierThresholds { min_service_types: 3, target_service_types: 5, max_service_types: 8 },
        );
        tiers.insert(
            MarketTier::Medium,
            TierThresholds { min_service_types: 5, target_service_types: 10, max_service_types: 15 },
        );
        tiers.insert(
            MarketTier::Large,
            TierThresholds { min_service_types: 8, target_service_types: 15, max_service_types: 25 },
        );
        tiers.insert(
            MarketTier::Mega,
            TierThresholds { min_service_types: 10, target_service_types: 20, max_service_types: 35 },
        );
        Self { tiers }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct MarketPolicyFile {
    #[allow(dead_code)]
    version: u32,
    tiers: BTreeMap<MarketTier, TierThresholds>,
}

impl MarketPolicy {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let file: MarketPolicyFile =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        let policy = Self { tiers: file.tiers };
        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> Result<()> {
        for tier in MarketTier::ALL {
            let Some(t) = self.tiers.get(&tier) else {
                bail!("market policy missing tier {tier:?}");
            };
            if t.min_service_types > t.target_service_types
                || t.target_service_types > t.max_service_types
            {
                bail!("market policy thresholds out of order for tier {tier:?}");
            }
            if t.target_service_types == 0 {
                bail!("target_service_types must be positive for tier {tier:?}");
            }
        }
        Ok(())
    }

    pub fn thresholds(&self, tier: MarketTier) -> TierThresholds {
        // validate() guarantees every tier is present for loaded tables,
        // and the default table is complete by construction.
        self.tiers[&tier]
    }
}

/// One candidate service type with its desirability heuristics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    /// Base desirability (average project value / visual impact), 0..=100.
    pub base_score: i32,
    /// Rough lead yield expected from one full search pass.
    pub estimated_leads: u32,
    /// Smallest market tier where this type is worth searching.
    #[serde(default = "CatalogEntry::default_min_tier")]
    pub min_tier: MarketTier,
}

impl CatalogEntry {
    fn default_min_tier() -> MarketTier {
        MarketTier::Small
    }
}

/// Static catalog of candidate service types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTypeCatalog {
    entries: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ServiceTypeCatalogFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(default)]
    service_types: Vec<CatalogEntry>,
}

impl Default for ServiceTypeCatalog {
    fn default() -> Self {
        let entry = |name: &str, base_score: i32, estimated_leads: u32, min_tier: MarketTier| {
            CatalogEntry { name: name.to_string(), base_score, estimated_leads, min_tier }
        };
        Self {
            entries: vec![
                entry("landscaping", 85, 40, MarketTier::Small),
                entry("lawn care", 70, 50, MarketTier::Small),
                entry("tree service", 75, 30, MarketTier::Small),
                entry("pressure washing", 60, 35, MarketTier::Small),
                entry("pool cleaning", 72, 25, MarketTier::Medium),
                entry("pool construction", 92, 15, MarketTier::Large),
                entry("roofing", 88, 30, MarketTier::Small),
                entry("painting", 65, 45, MarketTier::Small),
                entry("fencing", 68, 30, MarketTier::Small),
                entry("pest control", 62, 40, MarketTier::Small),
                entry("hvac", 82, 35, MarketTier::Small),
                entry("plumbing", 78, 40, MarketTier::Small),
                entry("electrician", 76, 40, MarketTier::Small),
                entry("gutter cleaning", 55, 25, MarketTier::Small),
                entry("window cleaning", 52, 25, MarketTier::Medium),
                entry("concrete work", 80, 25, MarketTier::Medium),
                entry("kitchen remodeling", 95, 20, MarketTier::Medium),
                entry("bathroom remodeling", 90, 20, MarketTier::Medium),
                entry("garage doors", 66, 20, MarketTier::Medium),
                entry("epoxy flooring", 74, 15, MarketTier::Large),
                entry("outdoor lighting", 70, 15, MarketTier::Large),
                entry("turf installation", 84, 20, MarketTier::Medium),
                entry("solar installation", 89, 20, MarketTier::Large),
                entry("home automation", 71, 10, MarketTier::Mega),
            ],
        }
    }
}

impl ServiceTypeCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let file: ServiceTypeCatalogFile =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        if file.service_types.is_empty() {
            bail!("service type catalog {} has no entries", path.display());
        }
        Ok(Self { entries: file.service_types })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Candidate service types worth searching in a market of the given
    /// tier, in catalog order.
    pub fn entries_for_tier(&self, tier: MarketTier) -> Vec<&CatalogEntry> {
        self.entries.iter().filter(|e| e.min_tier <= tier).collect()
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}
