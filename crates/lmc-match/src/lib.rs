//! Record linkage for the lead pool: normalization, similarity, multi-key
//! identity indexing, staged duplicate detection, and merging.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use lmc_core::{DuplicateGroup, Lead, LeadSource, MatchType};
use strsim::normalized_levenshtein;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "lmc-match";

/// Legal-entity suffixes dropped during company-name normalization.
const LEGAL_SUFFIXES: [&str; 6] = ["llc", "inc", "corp", "corporation", "company", "co"];

/// Digits only. `"(602) 555-0100"` → `"6025550100"`. Anything without a
/// digit normalizes to the empty string, which never participates in
/// indexing.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Lowercase, drop legal-suffix tokens, then strip every remaining
/// non-alphanumeric character. `"Joe's Turf LLC"` → `"joesturf"`.
pub fn normalize_company_name(raw: &str) -> String {
    raw.to_lowercase()
        .split_whitespace()
        .filter(|token| {
            let bare: String = token.chars().filter(|c| c.is_alphanumeric()).collect();
            !LEGAL_SUFFIXES.contains(&bare.as_str())
        })
        .collect::<Vec<_>>()
        .join("")
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Lowercase, strip a leading `@`.
pub fn normalize_handle(raw: &str) -> String {
    raw.trim().trim_start_matches('@').to_lowercase()
}

/// Exact-match key for the company index: lowercase with collapsed
/// whitespace, punctuation and suffixes kept. Deliberately lighter than
/// [`normalize_company_name`] so that `"Joe's Turf LLC"` and
/// `"Joes Turf"` are *not* an exact match and fall through to the fuzzy
/// pass instead.
pub fn company_key(raw: &str) -> String {
    raw.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized Levenshtein similarity in [0, 1]:
/// `1 - distance / max(len)`. Symmetric; 1.0 for two empty strings by
/// convention (the detector guards against ever comparing two empties).
pub fn similarity(a: &str, b: &str) -> f64 {
    normalized_levenshtein(a, b)
}

/// Multi-key in-memory index over a lead slice. Values are positions into
/// the slice the index was built from, in input order. Leads whose
/// normalized key is empty are excluded from that particular index.
#[derive(Debug, Default)]
pub struct IdentityIndex {
    by_phone: HashMap<String, Vec<usize>>,
    by_handle: HashMap<String, Vec<usize>>,
    by_company: HashMap<String, Vec<usize>>,
}

impl IdentityIndex {
    pub fn build(leads: &[Lead]) -> Self {
        let mut index = Self::default();
        for (pos, lead) in leads.iter().enumerate() {
            let phone = normalize_phone(lead.phone.as_deref().unwrap_or_default());
            if !phone.is_empty() {
                index.by_phone.entry(phone).or_default().push(pos);
            }
            let handle = normalize_handle(lead.handle.as_deref().unwrap_or_default());
            if !handle.is_empty() {
                index.by_handle.entry(handle).or_default().push(pos);
            }
            let company = company_key(&lead.company_name);
            if !company.is_empty() {
                index.by_company.entry(company).or_default().push(pos);
            }
        }
        index
    }

    pub fn phone_bucket(&self, key: &str) -> &[usize] {
        self.by_phone.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn handle_bucket(&self, key: &str) -> &[usize] {
        self.by_handle.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn company_bucket(&self, key: &str) -> &[usize] {
        self.by_company.get(key).map(Vec::as_slice).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    /// Strict lower bound for the fuzzy company-name pass.
    pub fuzzy_threshold: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self { fuzzy_threshold: 0.8 }
    }
}

const PHONE_CONFIDENCE: f64 = 0.95;
const HANDLE_CONFIDENCE: f64 = 0.90;
const COMPANY_CONFIDENCE: f64 = 0.80;
const FUZZY_CONFIDENCE: f64 = 0.70;

pub struct DuplicateDetector {
    config: DetectorConfig,
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl DuplicateDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Group leads that look like the same business. Deterministic for a
    /// given input order. Each lead lands in at most one group; stages run
    /// in strict priority order (phone, handle, exact company, fuzzy) over
    /// a shared processed set, so a phone match always claims a lead
    /// before a weaker signal can.
    pub fn detect(&self, leads: &[Lead]) -> Vec<DuplicateGroup> {
        let now = Utc::now();
        let index = IdentityIndex::build(leads);
        let mut processed = vec![false; leads.len()];
        let mut groups = Vec::new();

        self.exact_stage(
            leads,
            &mut processed,
            &mut groups,
            now,
            |lead| normalize_phone(lead.phone.as_deref().unwrap_or_default()),
            |key| index.phone_bucket(key),
            MatchType::Phone,
            PHONE_CONFIDENCE,
        );
        self.exact_stage(
            leads,
            &mut processed,
            &mut groups,
            now,
            |lead| normalize_handle(lead.handle.as_deref().unwrap_or_default()),
            |key| index.handle_bucket(key),
            MatchType::Instagram,
            HANDLE_CONFIDENCE,
        );
        self.exact_stage(
            leads,
            &mut processed,
            &mut groups,
            now,
            |lead| company_key(&lead.company_name),
            |key| index.company_bucket(key),
            MatchType::Company,
            COMPANY_CONFIDENCE,
        );
        self.fuzzy_stage(leads, &mut processed, &mut groups, now);

        // Stages already emit in descending confidence; the stable sort
        // keeps discovery order within equal confidence.
        groups.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        debug!(leads = leads.len(), groups = groups.len(), "duplicate detection complete");
        groups
    }

    #[allow(clippy::too_many_arguments)]
    fn exact_stage<'a, K, B>(
        &self,
        leads: &'a [Lead],
        processed: &mut [bool],
        groups: &mut Vec<DuplicateGroup>,
        now: DateTime<Utc>,
        key_of: K,
        bucket_of: B,
        match_type: MatchType,
        confidence: f64,
    ) where
        K: Fn(&Lead) -> String,
        B: Fn(&str) -> &'a [usize],
    {
        // Iterate leads in input order rather than walking the hash map,
        // so grouping is deterministic.
        for pos in 0..leads.len() {
            if processed[pos] {
                continue;
            }
            let key = key_of(&leads[pos]);
            if key.is_empty() {
                continue;
            }
            let members: Vec<usize> = bucket_of(&key)
                .iter()
                .copied()
                .filter(|&p| !processed[p])
                .collect();
            if members.len() < 2 {
                continue;
            }
            for &p in &members {
                processed[p] = true;
            }
            groups.push(self.group_from(leads, &members, match_type, confidence, now));
        }
    }

    /// Star-shaped fuzzy clustering over the leads no exact stage claimed:
    /// each later lead is compared against the cluster's seed only, never
    /// the evolving cluster. Preserved as-is from the original policy even
    /// though it is not a transitive closure.
    fn fuzzy_stage(
        &self,
        leads: &[Lead],
        processed: &mut [bool],
        groups: &mut Vec<DuplicateGroup>,
        now: DateTime<Utc>,
    ) {
        let names: Vec<String> =
            leads.iter().map(|l| normalize_company_name(&l.company_name)).collect();

        for seed in 0..leads.len() {
            if processed[seed] || names[seed].is_empty() {
                continue;
            }
            let Some(seed_city) = leads[seed].city.as_deref().filter(|c| !c.is_empty()) else {
                continue;
            };
            let mut cluster = vec![seed];
            for other in (seed + 1)..leads.len() {
                if processed[other] || names[other].is_empty() {
                    continue;
                }
                if leads[other].city.as_deref() != Some(seed_city) {
                    continue;
                }
                if similarity(&names[seed], &names[other]) > self.config.fuzzy_threshold {
                    cluster.push(other);
                }
            }
            if cluster.len() < 2 {
                continue;
            }
            for &p in &cluster {
                processed[p] = true;
            }
            groups.push(self.group_from(leads, &cluster, MatchType::Fuzzy, FUZZY_CONFIDENCE, now));
        }
    }

    fn group_from(
        &self,
        leads: &[Lead],
        members: &[usize],
        match_type: MatchType,
        confidence: f64,
        now: DateTime<Utc>,
    ) -> DuplicateGroup {
        let master_pos = select_master(leads, members, now);
        DuplicateGroup {
            lead_ids: members.iter().map(|&p| leads[p].id).collect(),
            match_type,
            confidence,
            suggested_master: leads[master_pos].id,
        }
    }
}

fn present(value: &Option<String>) -> bool {
    matches!(value.as_deref(), Some(s) if !s.trim().is_empty())
}

/// Additive completeness score used to pick the master of a group.
/// Richer records win; ties go to the earliest lead in input order.
pub fn master_score(lead: &Lead, now: DateTime<Utc>) -> i32 {
    let mut score = 0;
    if present(&lead.phone) {
        score += 3;
    }
    if present(&lead.website) {
        score += 2;
    }
    if present(&lead.instagram_url) {
        score += 2;
    }
    if present(&lead.handle) {
        score += 1;
    }
    if present(&lead.notes) {
        score += 1;
    }
    if present(&lead.service_type) {
        score += 1;
    }
    if present(&lead.city) {
        score += 1;
    }
    if lead.running_ads {
        score += 1;
    }
    if present(&lead.ad_copy) {
        score += 1;
    }
    if present(&lead.price_info) {
        score += 1;
    }
    score += match lead.source {
        LeadSource::InstagramManual => 2,
        LeadSource::Maps => 1,
        _ => 0,
    };
    let age = now.signed_duration_since(lead.updated_at);
    if age <= Duration::days(7) {
        score += 2;
    } else if age <= Duration::days(30) {
        score += 1;
    }
    score
}

fn select_master(leads: &[Lead], members: &[usize], now: DateTime<Utc>) -> usize {
    let mut best = members[0];
    let mut best_score = master_score(&leads[best], now);
    for &pos in &members[1..] {
        let score = master_score(&leads[pos], now);
        if score > best_score {
            best = pos;
            best_score = score;
        }
    }
    best
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("master lead {0} not found among merge members")]
    MasterNotFound(Uuid),
}

/// Qualification grades, best first. Unknown grades rank below every
/// known one.
const SCORE_LADDER: [&str; 6] = ["A++", "A+", "A", "B+", "B", "C"];

fn score_rank(grade: &str) -> usize {
    SCORE_LADDER
        .iter()
        .position(|g| *g == grade)
        .map(|p| SCORE_LADDER.len() - p)
        .unwrap_or(0)
}

fn fill<T: Clone>(dst: &mut Option<T>, src: &Option<T>) {
    if dst.is_none() {
        if let Some(v) = src {
            *dst = Some(v.clone());
        }
    }
}

/// Combine a group into one record. Starts from the master; scans the
/// remaining members in input order, filling absent scalars with the
/// first value seen, OR-ing the positive booleans, accumulating differing
/// notes with a `" | "` separator, and keeping the better qualification
/// grade.
pub fn merge(leads: &[Lead], master_id: Uuid) -> Result<Lead, MergeError> {
    let master = leads
        .iter()
        .find(|l| l.id == master_id)
        .ok_or(MergeError::MasterNotFound(master_id))?;
    let mut merged = master.clone();

    for lead in leads.iter().filter(|l| l.id != master_id) {
        fill(&mut merged.phone, &lead.phone);
        fill(&mut merged.handle, &lead.handle);
        fill(&mut merged.instagram_url, &lead.instagram_url);
        fill(&mut merged.website, &lead.website);
        fill(&mut merged.city, &lead.city);
        fill(&mut merged.state, &lead.state);
        fill(&mut merged.service_type, &lead.service_type);
        fill(&mut merged.search_query, &lead.search_query);
        fill(&mut merged.ad_copy, &lead.ad_copy);
        fill(&mut merged.price_info, &lead.price_info);
        fill(&mut merged.rating, &lead.rating);
        fill(&mut merged.review_count, &lead.review_count);

        merged.running_ads |= lead.running_ads;
        merged.dm_sent |= lead.dm_sent;
        merged.called |= lead.called;

        if let Some(notes) = lead.notes.as_deref().filter(|n| !n.trim().is_empty()) {
            merged.notes = match merged.notes.take() {
                None => Some(notes.to_string()),
                Some(acc) if acc.split(" | ").any(|part| part == notes) => Some(acc),
                Some(acc) => Some(format!("{acc} | {notes}")),
            };
        }

        if let Some(grade) = &lead.score {
            let keep = merged
                .score
                .as_deref()
                .map(|current| score_rank(current) >= score_rank(grade))
                .unwrap_or(false);
            if !keep {
                merged.score = Some(grade.clone());
            }
        }
    }

    merged.updated_at = Utc::now();
    Ok(merged)
}
