//! Core domain model for LMC: leads, duplicate groups, import metrics,
//! and per-market coverage state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "lmc-core";

/// Where a lead was acquired from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadSource {
    Maps,
    AdLibrary,
    InstagramManual,
    Manual,
    Csv,
}

/// A business record as collected from one of the acquisition sources.
///
/// Identity fields are all optional except the company name: a lead pulled
/// from an ad library often has no phone, a maps lead no handle. Missing
/// fields never error anywhere downstream; they only reduce how many
/// identity indexes the lead participates in and how it scores as a
/// merge master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub company_name: String,
    pub phone: Option<String>,
    pub handle: Option<String>,
    pub instagram_url: Option<String>,
    pub website: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub service_type: Option<String>,
    pub search_query: Option<String>,
    pub notes: Option<String>,
    pub ad_copy: Option<String>,
    pub price_info: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    /// Letter grade assigned by qualification ("A++" best, "C" worst).
    pub score: Option<String>,
    pub running_ads: bool,
    pub dm_sent: bool,
    pub called: bool,
    pub source: LeadSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    /// Fresh lead with a generated id, current timestamps, and every
    /// optional field empty.
    pub fn new(company_name: impl Into<String>, source: LeadSource) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            company_name: company_name.into(),
            phone: None,
            handle: None,
            instagram_url: None,
            website: None,
            city: None,
            state: None,
            service_type: None,
            search_query: None,
            notes: None,
            ad_copy: None,
            price_info: None,
            rating: None,
            review_count: None,
            score: None,
            running_ads: false,
            dm_sent: false,
            called: false,
            source,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Which identity signal produced a duplicate group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Phone,
    Instagram,
    Company,
    Fuzzy,
}

/// A set of leads presumed to represent one real-world business.
///
/// Transient analysis output: ids reference members of the lead slice the
/// detector ran over, `suggested_master` is always one of `lead_ids`, and
/// every group holds at least two leads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub lead_ids: Vec<Uuid>,
    pub match_type: MatchType,
    pub confidence: f64,
    pub suggested_master: Uuid,
}

/// The three acquisition phases a market moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Broad directory / maps search.
    BroadDirectory,
    /// Targeted ad-library search.
    AdLibrary,
    /// Manual social search.
    ManualSocial,
}

/// Immutable record of one completed import batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportMetric {
    pub timestamp: DateTime<Utc>,
    pub total_found: u32,
    pub duplicates: u32,
    pub imported: u32,
    pub service_type: Option<String>,
    pub search_query: Option<String>,
}

/// Lifecycle of one acquisition phase within a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    NotStarted,
    InProgress,
    Complete,
}

/// Rolling per-phase progress: lead count, the distinct terms tried so
/// far (service types for phase 1, search queries for phase 2, handles
/// for phase 3), bounded import history, and the completion stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PhaseProgress {
    pub lead_count: u32,
    pub distinct_terms: Vec<String>,
    pub history: Vec<ImportMetric>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Derived coverage state for one (owner, market) pair.
///
/// Recomputable from the lead set plus import history; never deleted,
/// only superseded by the next `record_import`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketCoverage {
    pub market: String,
    pub owner: Option<Uuid>,
    pub broad_directory: PhaseProgress,
    pub ad_library: PhaseProgress,
    pub manual_social: PhaseProgress,
    pub updated_at: DateTime<Utc>,
}

impl MarketCoverage {
    pub fn new(market: impl Into<String>, owner: Option<Uuid>) -> Self {
        Self {
            market: market.into(),
            owner,
            broad_directory: PhaseProgress::default(),
            ad_library: PhaseProgress::default(),
            manual_social: PhaseProgress::default(),
            updated_at: Utc::now(),
        }
    }

    pub fn phase(&self, phase: Phase) -> &PhaseProgress {
        match phase {
            Phase::BroadDirectory => &self.broad_directory,
            Phase::AdLibrary => &self.ad_library,
            Phase::ManualSocial => &self.manual_social,
        }
    }

    pub fn phase_mut(&mut self, phase: Phase) -> &mut PhaseProgress {
        match phase {
            Phase::BroadDirectory => &mut self.broad_directory,
            Phase::AdLibrary => &mut self.ad_library,
            Phase::ManualSocial => &mut self.manual_social,
        }
    }
}

/// How exhausted a market or service type looks from recent imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaturationLevel {
    Low,
    Medium,
    High,
    Saturated,
}

/// Classification of an import-metric window. Not persisted; recomputed
/// on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaturationResult {
    pub level: SaturationLevel,
    pub duplicate_rate: f64,
    pub sample_size: usize,
    pub recommendation: String,
}

/// One row of the service-type ranking for a market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceTypePriority {
    pub service_type: String,
    pub priority: i32,
    pub estimated_leads: u32,
    pub saturation: SaturationLevel,
    pub reasons: Vec<String>,
}
