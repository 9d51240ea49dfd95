//! Market coverage tracking, saturation detection, and service-type
//! prioritization over the import-metric event stream.

use std::collections::BTreeMap;

use chrono::Utc;
use lmc_config::{MarketPolicy, MarketTier, ServiceTypeCatalog};
use lmc_core::{
    ImportMetric, MarketCoverage, Phase, PhaseStatus, SaturationLevel, SaturationResult,
    ServiceTypePriority,
};
use tracing::debug;

pub const CRATE_NAME: &str = "lmc-coverage";

/// Import history kept per market per phase, oldest evicted first.
pub const HISTORY_CAP: usize = 20;

/// Events needed before a saturation classification means anything.
pub const MIN_SATURATION_SAMPLE: usize = 3;

/// Distinct ad-library queries that complete phase 2.
pub const PHASE2_TARGET_QUERIES: u32 = 3;

/// Distinct handles that complete phase 3.
pub const PHASE3_TARGET_HANDLES: u32 = 10;

/// Folds import results into per-market coverage state and answers
/// "how much of this market have we covered" against the tier policy.
pub struct CoverageTracker {
    policy: MarketPolicy,
}

impl Default for CoverageTracker {
    fn default() -> Self {
        Self::new(MarketPolicy::default())
    }
}

impl CoverageTracker {
    pub fn new(policy: MarketPolicy) -> Self {
        Self { policy }
    }

    /// Distinct-category target that completes the given phase. Phase 1
    /// scales with market size; phases 2 and 3 are fixed.
    pub fn phase_target(&self, phase: Phase, tier: MarketTier) -> u32 {
        match phase {
            Phase::BroadDirectory => self.policy.thresholds(tier).target_service_types,
            Phase::AdLibrary => PHASE2_TARGET_QUERIES,
            Phase::ManualSocial => PHASE3_TARGET_HANDLES,
        }
    }

    /// Fold one completed import batch into the market's coverage state:
    /// bump the lead count, record the newly tried category (service type
    /// for phase 1, search query for phase 2, handle for phase 3), append
    /// to the bounded history, and stamp phase completion the first time
    /// the target is reached.
    pub fn record_import(
        &self,
        coverage: &mut MarketCoverage,
        phase: Phase,
        tier: MarketTier,
        metric: ImportMetric,
    ) {
        let target = self.phase_target(phase, tier);
        let progress = coverage.phase_mut(phase);
        progress.lead_count += metric.imported;

        let term = match phase {
            Phase::BroadDirectory => metric.service_type.as_deref(),
            Phase::AdLibrary | Phase::ManualSocial => metric.search_query.as_deref(),
        };
        if let Some(term) = term.filter(|t| !t.trim().is_empty()) {
            if !progress.distinct_terms.iter().any(|t| t == term) {
                progress.distinct_terms.push(term.to_string());
            }
        }

        progress.history.push(metric);
        while progress.history.len() > HISTORY_CAP {
            progress.history.remove(0);
        }

        // Completion stamps are written once and never overwritten.
        if progress.completed_at.is_none() && progress.distinct_terms.len() as u32 >= target {
            progress.completed_at = Some(Utc::now());
            debug!(market = %coverage.market, ?phase, "phase complete");
        }

        coverage.updated_at = Utc::now();
    }

    pub fn phase_status(
        &self,
        coverage: &MarketCoverage,
        phase: Phase,
        tier: MarketTier,
    ) -> PhaseStatus {
        let progress = coverage.phase(phase);
        if progress.lead_count == 0 && progress.history.is_empty() {
            return PhaseStatus::NotStarted;
        }
        if progress.distinct_terms.len() as u32 >= self.phase_target(phase, tier) {
            return PhaseStatus::Complete;
        }
        PhaseStatus::InProgress
    }

    /// Weighted completion percentage, 0..=100. Phase 1 carries 70
    /// points scaled against the tier's service-type target, phase 2
    /// carries 20 against three queries, phase 3 carries 10 against ten
    /// handles.
    pub fn coverage_percentage(&self, coverage: &MarketCoverage, tier: MarketTier) -> u8 {
        let target = self.policy.thresholds(tier).target_service_types;
        let ratio = |count: usize, target: u32| -> f64 {
            (count as f64 / f64::from(target.max(1))).min(1.0)
        };
        let p1 = 70.0 * ratio(coverage.broad_directory.distinct_terms.len(), target);
        let p2 = 20.0 * ratio(coverage.ad_library.distinct_terms.len(), PHASE2_TARGET_QUERIES);
        let p3 = 10.0 * ratio(coverage.manual_social.distinct_terms.len(), PHASE3_TARGET_HANDLES);
        (p1 + p2 + p3).round() as u8
    }

    /// Ordered next-step suggestions derived purely from counts against
    /// the tier thresholds. Same input, same list.
    pub fn recommended_actions(
        &self,
        coverage: &MarketCoverage,
        tier: MarketTier,
    ) -> Vec<String> {
        let mut actions = Vec::new();
        let thresholds = self.policy.thresholds(tier);
        let p1 = &coverage.broad_directory;
        let p2 = &coverage.ad_library;
        let p3 = &coverage.manual_social;

        let p1_distinct = p1.distinct_terms.len() as u32;
        let p1_done = p1_distinct >= thresholds.target_service_types;
        if !p1_done {
            if p1_distinct < thresholds.min_service_types {
                actions.push(format!(
                    "phase 1 just starting; cover at least {} service types",
                    thresholds.min_service_types
                ));
            }
            let remaining = thresholds.target_service_types - p1_distinct;
            actions.push(format!(
                "search {remaining} more service types to complete phase 1"
            ));
        } else if p1_distinct >= thresholds.max_service_types {
            actions.push(
                "service types exhausted for this market size; focus on phases 2 and 3"
                    .to_string(),
            );
        }

        let p1_saturation = classify(&p1.history);
        if !p1_done
            && matches!(p1_saturation.level, SaturationLevel::High | SaturationLevel::Saturated)
        {
            actions.push(
                "phase 1 is saturating; move effort to ad-library and manual search".to_string(),
            );
        }

        if p1_done && p2.lead_count == 0 && p2.history.is_empty() {
            actions.push("start phase 2: targeted ad-library searches".to_string());
        }
        if (p2.lead_count > 0 || !p2.history.is_empty())
            && (p2.distinct_terms.len() as u32) < PHASE2_TARGET_QUERIES
        {
            let remaining = PHASE2_TARGET_QUERIES - p2.distinct_terms.len() as u32;
            actions.push(format!("run {remaining} more ad-library queries"));
        }

        if p2.completed_at.is_some() && p3.lead_count == 0 && p3.history.is_empty() {
            actions.push("start phase 3: manual social search".to_string());
        }
        if (p3.lead_count > 0 || !p3.history.is_empty())
            && (p3.distinct_terms.len() as u32) < PHASE3_TARGET_HANDLES
        {
            let remaining = PHASE3_TARGET_HANDLES - p3.distinct_terms.len() as u32;
            actions.push(format!("collect {remaining} more handles to complete phase 3"));
        }

        if self.coverage_percentage(coverage, tier) >= 100 {
            actions.push("coverage complete; expand to a new market".to_string());
        }
        actions
    }
}

const REC_INSUFFICIENT: &str = "not enough import history yet; keep searching";
const REC_LOW: &str = "plenty of fresh leads left; keep searching this category";
const REC_MEDIUM: &str = "returns are slowing; line up the next category";
const REC_HIGH: &str = "mostly duplicates now; finish up and rotate categories";
const REC_SATURATED: &str = "stop searching this category; move to the next phase or market";

fn duplicate_rate(events: &[ImportMetric]) -> f64 {
    let found: u64 = events.iter().map(|e| u64::from(e.total_found)).sum();
    if found == 0 {
        return 0.0;
    }
    let duplicates: u64 = events.iter().map(|e| u64::from(e.duplicates)).sum();
    duplicates as f64 / found as f64
}

/// Classify a window of import metrics. Fewer than
/// [`MIN_SATURATION_SAMPLE`] events always reads as `Low` with an
/// insufficient-data recommendation. Threshold boundaries land on the
/// higher level: exactly 0.3 is `Medium`, 0.6 is `High`, 0.85 is
/// `Saturated`.
pub fn classify(events: &[ImportMetric]) -> SaturationResult {
    let rate = duplicate_rate(events);
    if events.len() < MIN_SATURATION_SAMPLE {
        return SaturationResult {
            level: SaturationLevel::Low,
            duplicate_rate: rate,
            sample_size: events.len(),
            recommendation: REC_INSUFFICIENT.to_string(),
        };
    }
    let (level, recommendation) = if rate < 0.3 {
        (SaturationLevel::Low, REC_LOW)
    } else if rate < 0.6 {
        (SaturationLevel::Medium, REC_MEDIUM)
    } else if rate < 0.85 {
        (SaturationLevel::High, REC_HIGH)
    } else {
        (SaturationLevel::Saturated, REC_SATURATED)
    };
    SaturationResult {
        level,
        duplicate_rate: rate,
        sample_size: events.len(),
        recommendation: recommendation.to_string(),
    }
}

/// Per-service-type classification: group the window by `service_type`
/// and classify each group independently. Events without a service type
/// are ignored here. BTreeMap keeps the output order deterministic.
pub fn service_type_saturation(events: &[ImportMetric]) -> BTreeMap<String, SaturationResult> {
    let mut by_type: BTreeMap<String, Vec<ImportMetric>> = BTreeMap::new();
    for event in events {
        if let Some(service_type) = event.service_type.as_deref().filter(|t| !t.is_empty()) {
            by_type.entry(service_type.to_string()).or_default().push(event.clone());
        }
    }
    by_type.into_iter().map(|(name, group)| (name, classify(&group))).collect()
}

fn saturation_penalty(level: SaturationLevel) -> i32 {
    match level {
        SaturationLevel::Low => 0,
        SaturationLevel::Medium => 20,
        SaturationLevel::High => 40,
        SaturationLevel::Saturated => 70,
    }
}

const SEARCHED_PENALTY: i32 = 10;

/// Ranks candidate service types for a market: catalog desirability minus
/// a saturation penalty minus a small already-searched penalty. Searched
/// types stay in the ranking, just demoted.
pub struct Prioritizer {
    catalog: ServiceTypeCatalog,
}

impl Default for Prioritizer {
    fn default() -> Self {
        Self::new(ServiceTypeCatalog::default())
    }
}

impl Prioritizer {
    pub fn new(catalog: ServiceTypeCatalog) -> Self {
        Self { catalog }
    }

    pub fn prioritize(
        &self,
        tier: MarketTier,
        searched: &[String],
        saturation_by_type: &BTreeMap<String, SaturationLevel>,
    ) -> Vec<ServiceTypePriority> {
        let mut ranked: Vec<ServiceTypePriority> = self
            .catalog
            .entries_for_tier(tier)
            .into_iter()
            .map(|entry| {
                let mut priority = entry.base_score;
                let mut reasons = vec![format!("base desirability {}", entry.base_score)];

                let level = saturation_by_type
                    .get(&entry.name)
                    .copied()
                    .unwrap_or(SaturationLevel::Low);
                let penalty = saturation_penalty(level);
                if penalty > 0 {
                    priority -= penalty;
                    reasons.push(format!("saturation penalty -{penalty}"));
                }

                if searched.iter().any(|s| s == &entry.name) {
                    priority -= SEARCHED_PENALTY;
                    reasons.push(format!("already searched -{SEARCHED_PENALTY}"));
                }

                ServiceTypePriority {
                    service_type: entry.name.clone(),
                    priority,
                    estimated_leads: entry.estimated_leads,
                    saturation: level,
                    reasons,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.priority.cmp(&a.priority).then_with(|| a.service_type.cmp(&b.service_type))
        });
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use lmc_config::CatalogEntry;

    fn metric(found: u32, duplicates: u32, imported: u32) -> ImportMetric {
        ImportMetric {
            timestamp: Utc::now(),
            total_found: found,
            duplicates,
            imported,
            service_type: None,
            search_query: None,
        }
    }

    fn typed_metric(service_type: &str, found: u32, duplicates: u32) -> ImportMetric {
        ImportMetric {
            service_type: Some(service_type.to_string()),
            ..metric(found, duplicates, found - duplicates)
        }
    }

    #[test]
    fn low_duplicate_rate_classifies_low() {
        let events = vec![metric(20, 2, 18), metric(20, 3, 17), metric(20, 4, 16)];
        let result = classify(&events);
        assert_eq!(result.level, SaturationLevel::Low);
        assert!((result.duplicate_rate - 0.15).abs() < 1e-9);
    }

    #[test]
    fn threshold_boundaries_land_on_the_higher_level() {
        let at = |duplicates: u32| {
            classify(&[metric(20, duplicates, 1), metric(20, duplicates, 1), metric(20, duplicates, 1)])
        };
        assert_eq!(at(6).level, SaturationLevel::Medium); // 18/60 = 0.30
        assert_eq!(at(12).level, SaturationLevel::High); // 36/60 = 0.60
        assert_eq!(at(17).level, SaturationLevel::Saturated); // 51/60 = 0.85
        assert_eq!(at(5).level, SaturationLevel::Low); // 15/60 = 0.25
    }

    #[test]
    fn small_samples_read_as_insufficient_data() {
        let events = vec![metric(10, 10, 0), metric(10, 10, 0)];
        let result = classify(&events);
        assert_eq!(result.level, SaturationLevel::Low);
        assert_eq!(result.sample_size, 2);
        assert_eq!(result.recommendation, REC_INSUFFICIENT);
    }

    #[test]
    fn zero_found_guards_division() {
        let events = vec![metric(0, 0, 0), metric(0, 0, 0), metric(0, 0, 0)];
        assert_eq!(classify(&events).duplicate_rate, 0.0);
    }

    #[test]
    fn saturation_groups_by_service_type_independently() {
        let mut events = Vec::new();
        for _ in 0..3 {
            events.push(typed_metric("lawn care", 20, 19));
            events.push(typed_metric("roofing", 20, 1));
        }
        events.push(metric(50, 50, 0)); // untyped, ignored by the group-by

        let by_type = service_type_saturation(&events);
        assert_eq!(by_type.len(), 2);
        assert_eq!(by_type["lawn care"].level, SaturationLevel::Saturated);
        assert_eq!(by_type["roofing"].level, SaturationLevel::Low);
    }

    fn import(tracker: &CoverageTracker, coverage: &mut MarketCoverage, service_type: &str) {
        tracker.record_import(
            coverage,
            Phase::BroadDirectory,
            MarketTier::Medium,
            ImportMetric {
                service_type: Some(service_type.to_string()),
                ..metric(20, 2, 18)
            },
        );
    }

    #[test]
    fn five_of_ten_service_types_scores_35_percent() {
        // Medium tier targets 10 service types; phase 1 alone carries 70
        // points, so half the target is 35.
        let tracker = CoverageTracker::default();
        let mut coverage = MarketCoverage::new("phoenix", None);
        for name in ["lawn care", "roofing", "painting", "fencing", "hvac"] {
            import(&tracker, &mut coverage, name);
        }
        assert_eq!(tracker.coverage_percentage(&coverage, MarketTier::Medium), 35);
    }

    #[test]
    fn coverage_is_monotonic_in_distinct_service_types() {
        let tracker = CoverageTracker::default();
        let mut coverage = MarketCoverage::new("phoenix", None);
        let mut last = 0;
        for i in 0..15 {
            import(&tracker, &mut coverage, &format!("type-{i}"));
            let pct = tracker.coverage_percentage(&coverage, MarketTier::Medium);
            assert!(pct >= last, "coverage went backwards");
            last = pct;
        }
        assert_eq!(last, 70); // phase 1 maxes out at 70 points
    }

    #[test]
    fn repeat_service_types_do_not_inflate_distinct_counts() {
        let tracker = CoverageTracker::default();
        let mut coverage = MarketCoverage::new("phoenix", None);
        import(&tracker, &mut coverage, "lawn care");
        import(&tracker, &mut coverage, "lawn care");
        assert_eq!(coverage.broad_directory.distinct_terms.len(), 1);
        assert_eq!(coverage.broad_directory.lead_count, 36);
    }

    #[test]
    fn history_keeps_most_recent_twenty() {
        let tracker = CoverageTracker::default();
        let mut coverage = MarketCoverage::new("phoenix", None);
        let start = Utc::now();
        for i in 0..25 {
            tracker.record_import(
                &mut coverage,
                Phase::BroadDirectory,
                MarketTier::Medium,
                ImportMetric {
                    timestamp: start + Duration::minutes(i),
                    ..metric(10, 1, 9)
                },
            );
        }
        let history = &coverage.broad_directory.history;
        assert_eq!(history.len(), HISTORY_CAP);
        assert_eq!(history[0].timestamp, start + Duration::minutes(5));
        assert_eq!(history[19].timestamp, start + Duration::minutes(24));
    }

    #[test]
    fn phase_completion_stamp_is_idempotent() {
        let tracker = CoverageTracker::default();
        let mut coverage = MarketCoverage::new("smalltown", None);
        for i in 0..5 {
            tracker.record_import(
                &mut coverage,
                Phase::BroadDirectory,
                MarketTier::Small,
                ImportMetric { service_type: Some(format!("type-{i}")), ..metric(10, 1, 9) },
            );
        }
        let stamp = coverage.broad_directory.completed_at.expect("phase 1 complete");
        assert_eq!(
            tracker.phase_status(&coverage, Phase::BroadDirectory, MarketTier::Small),
            PhaseStatus::Complete
        );

        import(&tracker, &mut coverage, "one more type");
        assert_eq!(coverage.broad_directory.completed_at, Some(stamp));
    }

    #[test]
    fn phase_status_walks_not_started_to_complete() {
        let tracker = CoverageTracker::default();
        let mut coverage = MarketCoverage::new("phoenix", None);
        assert_eq!(
            tracker.phase_status(&coverage, Phase::AdLibrary, MarketTier::Medium),
            PhaseStatus::NotStarted
        );
        for query in ["lawn care phoenix ads", "roofing phoenix ads"] {
            tracker.record_import(
                &mut coverage,
                Phase::AdLibrary,
                MarketTier::Medium,
                ImportMetric { search_query: Some(query.to_string()), ..metric(8, 1, 7) },
            );
        }
        assert_eq!(
            tracker.phase_status(&coverage, Phase::AdLibrary, MarketTier::Medium),
            PhaseStatus::InProgress
        );
        tracker.record_import(
            &mut coverage,
            Phase::AdLibrary,
            MarketTier::Medium,
            ImportMetric { search_query: Some("painting phoenix ads".to_string()), ..metric(8, 1, 7) },
        );
        assert_eq!(
            tracker.phase_status(&coverage, Phase::AdLibrary, MarketTier::Medium),
            PhaseStatus::Complete
        );
    }

    #[test]
    fn recommendations_are_deterministic_and_phase_aware() {
        let tracker = CoverageTracker::default();
        let mut coverage = MarketCoverage::new("phoenix", None);
        for name in ["lawn care", "roofing", "painting"] {
            import(&tracker, &mut coverage, name);
        }
        let first = tracker.recommended_actions(&coverage, MarketTier::Medium);
        let second = tracker.recommended_actions(&coverage, MarketTier::Medium);
        assert_eq!(first, second);
        assert_eq!(
            first,
            vec![
                "phase 1 just starting; cover at least 5 service types".to_string(),
                "search 7 more service types to complete phase 1".to_string(),
            ]
        );
    }

    #[test]
    fn saturating_phase_one_recommends_moving_on() {
        let tracker = CoverageTracker::default();
        let mut coverage = MarketCoverage::new("phoenix", None);
        for i in 0..4 {
            tracker.record_import(
                &mut coverage,
                Phase::BroadDirectory,
                MarketTier::Medium,
                ImportMetric {
                    service_type: Some(format!("type-{i}")),
                    ..metric(20, 19, 1)
                },
            );
        }
        let actions = tracker.recommended_actions(&coverage, MarketTier::Medium);
        assert!(actions
            .iter()
            .any(|a| a.contains("phase 1 is saturating")));
    }

    #[test]
    fn prioritizer_demotes_saturated_and_searched_types() {
        let catalog = ServiceTypeCatalog::default();
        let prioritizer = Prioritizer::new(catalog);
        let searched = vec!["landscaping".to_string()];
        let mut saturation = BTreeMap::new();
        saturation.insert("landscaping".to_string(), SaturationLevel::Saturated);
        saturation.insert("roofing".to_string(), SaturationLevel::Medium);

        let ranked = prioritizer.prioritize(MarketTier::Medium, &searched, &saturation);

        let find = |name: &str| ranked.iter().find(|p| p.service_type == name).expect(name);
        assert_eq!(find("landscaping").priority, 85 - 70 - 10);
        assert_eq!(find("roofing").priority, 88 - 20);
        assert_eq!(find("kitchen remodeling").priority, 95);
        assert_eq!(ranked[0].service_type, "kitchen remodeling");

        let untouched = find("hvac");
        assert_eq!(untouched.saturation, SaturationLevel::Low);
        assert_eq!(untouched.reasons, vec!["base desirability 82".to_string()]);

        for pair in ranked.windows(2) {
            assert!(
                pair[0].priority > pair[1].priority
                    || (pair[0].priority == pair[1].priority
                        && pair[0].service_type < pair[1].service_type)
            );
        }
    }

    #[test]
    fn prioritizer_breaks_ties_alphabetically() {
        let entries = vec![
            CatalogEntry {
                name: "bravo".into(),
                base_score: 50,
                estimated_leads: 10,
                min_tier: MarketTier::Small,
            },
            CatalogEntry {
                name: "alpha".into(),
                base_score: 50,
                estimated_leads: 10,
                min_tier: MarketTier::Small,
            },
        ];
        let ranked = Prioritizer::new(ServiceTypeCatalog::new(entries)).prioritize(
            MarketTier::Small,
            &[],
            &BTreeMap::new(),
        );
        assert_eq!(ranked[0].service_type, "alpha");
        assert_eq!(ranked[1].service_type, "bravo");
    }
}
