//! Axum JSON API exposing the analytical core to dashboard collaborators.
//!
//! Market coverage lives in memory behind a lock; durable storage and
//! write serialization per market are the embedding application's job.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use lmc_config::{MarketPolicy, MarketTier, ServiceTypeCatalog};
use lmc_core::{
    DuplicateGroup, ImportMetric, Lead, MarketCoverage, Phase, PhaseStatus, SaturationResult,
    ServiceTypePriority,
};
use lmc_coverage::{classify, service_type_saturation, CoverageTracker, Prioritizer};
use lmc_match::{merge, DuplicateDetector, MergeError};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const CRATE_NAME: &str = "lmc-web";

#[derive(Debug, Clone)]
struct MarketEntry {
    tier: MarketTier,
    coverage: MarketCoverage,
}

pub struct AppState {
    detector: DuplicateDetector,
    tracker: CoverageTracker,
    prioritizer: Prioritizer,
    markets: RwLock<HashMap<String, MarketEntry>>,
}

impl AppState {
    pub fn new(policy: MarketPolicy, catalog: ServiceTypeCatalog) -> Self {
        Self {
            detector: DuplicateDetector::default(),
            tracker: CoverageTracker::new(policy),
            prioritizer: Prioritizer::new(catalog),
            markets: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(MarketPolicy::default(), ServiceTypeCatalog::default())
    }
}

#[derive(Debug, Deserialize)]
struct MergeRequest {
    leads: Vec<Lead>,
    master_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct RecordImportRequest {
    phase: Phase,
    #[serde(default)]
    tier: Option<MarketTier>,
    metric: ImportMetric,
}

#[derive(Debug, Serialize)]
struct DetectResponse {
    groups: Vec<DuplicateGroup>,
    leads_seen: usize,
}

#[derive(Debug, Serialize)]
struct CoverageResponse {
    market: String,
    tier: MarketTier,
    coverage_percentage: u8,
    phase_statuses: BTreeMap<String, PhaseStatus>,
    recommended_actions: Vec<String>,
    coverage: MarketCoverage,
}

#[derive(Debug, Serialize)]
struct SaturationResponse {
    market: String,
    overall: SaturationResult,
    by_service_type: BTreeMap<String, SaturationResult>,
}

#[derive(Debug, Serialize)]
struct PrioritiesResponse {
    market: String,
    priorities: Vec<ServiceTypePriority>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/detect", post(detect_handler))
        .route("/merge", post(merge_handler))
        .route("/markets", get(markets_handler))
        .route("/markets/{market}/imports", post(record_import_handler))
        .route("/markets/{market}/coverage", get(coverage_handler))
        .route("/markets/{market}/saturation", get(saturation_handler))
        .route("/markets/{market}/priorities", get(priorities_handler))
        .with_state(Arc::new(state))
}

/// Serve on `LMC_WEB_PORT` (default 8000), picking up policy overrides
/// from `config/markets.yaml` and `config/service_types.yaml` when they
/// exist next to the working directory.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("LMC_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);

    let markets_path = std::path::Path::new("config/markets.yaml");
    let policy = if markets_path.exists() {
        MarketPolicy::from_yaml_file(markets_path)?
    } else {
        MarketPolicy::default()
    };
    let catalog_path = std::path::Path::new("config/service_types.yaml");
    let catalog = if catalog_path.exists() {
        ServiceTypeCatalog::from_yaml_file(catalog_path)?
    } else {
        ServiceTypeCatalog::default()
    };

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app(AppState::new(policy, catalog))).await?;
    Ok(())
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    let markets = state.markets.read().await;
    Json(serde_json::json!({
        "service": "lead market coverage",
        "markets": markets.len(),
    }))
    .into_response()
}

async fn detect_handler(
    State(state): State<Arc<AppState>>,
    Json(leads): Json<Vec<Lead>>,
) -> Response {
    let groups = state.detector.detect(&leads);
    Json(DetectResponse { groups, leads_seen: leads.len() }).into_response()
}

async fn merge_handler(
    State(_state): State<Arc<AppState>>,
    Json(request): Json<MergeRequest>,
) -> Response {
    match merge(&request.leads, request.master_id) {
        Ok(lead) => Json(lead).into_response(),
        Err(err @ MergeError::MasterNotFound(_)) => {
            (StatusCode::UNPROCESSABLE_ENTITY, Json(serde_json::json!({ "error": err.to_string() })))
                .into_response()
        }
    }
}

async fn markets_handler(State(state): State<Arc<AppState>>) -> Response {
    let markets = state.markets.read().await;
    let mut names: Vec<&String> = markets.keys().collect();
    names.sort();
    Json(names).into_response()
}

async fn record_import_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(market): AxumPath<String>,
    Json(request): Json<RecordImportRequest>,
) -> Response {
    let mut markets = state.markets.write().await;
    let entry = markets.entry(market.clone()).or_insert_with(|| MarketEntry {
        tier: request.tier.unwrap_or(MarketTier::Medium),
        coverage: MarketCoverage::new(market.clone(), None),
    });
    if let Some(tier) = request.tier {
        entry.tier = tier;
    }
    state
        .tracker
        .record_import(&mut entry.coverage, request.phase, entry.tier, request.metric);
    coverage_response(&state.tracker, &market, entry).into_response()
}

async fn coverage_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(market): AxumPath<String>,
) -> Response {
    let markets = state.markets.read().await;
    match markets.get(&market) {
        Some(entry) => coverage_response(&state.tracker, &market, entry).into_response(),
        None => market_not_found(&market),
    }
}

async fn saturation_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(market): AxumPath<String>,
) -> Response {
    let markets = state.markets.read().await;
    let Some(entry) = markets.get(&market) else {
        return market_not_found(&market);
    };
    let mut window: Vec<ImportMetric> = Vec::new();
    for phase in [Phase::BroadDirectory, Phase::AdLibrary, Phase::ManualSocial] {
        window.extend(entry.coverage.phase(phase).history.iter().cloned());
    }
    Json(SaturationResponse {
        market,
        overall: classify(&window),
        by_service_type: service_type_saturation(&entry.coverage.broad_directory.history),
    })
    .into_response()
}

async fn priorities_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(market): AxumPath<String>,
) -> Response {
    let markets = state.markets.read().await;
    let Some(entry) = markets.get(&market) else {
        return market_not_found(&market);
    };
    let saturation_levels: BTreeMap<String, _> =
        service_type_saturation(&entry.coverage.broad_directory.history)
            .into_iter()
            .map(|(name, result)| (name, result.level))
            .collect();
    let priorities = state.prioritizer.prioritize(
        entry.tier,
        &entry.coverage.broad_directory.distinct_terms,
        &saturation_levels,
    );
    Json(PrioritiesResponse { market, priorities }).into_response()
}

fn coverage_response(tracker: &CoverageTracker, market: &str, entry: &MarketEntry) -> Json<CoverageResponse> {
    let mut phase_statuses = BTreeMap::new();
    for (name, phase) in [
        ("broad_directory", Phase::BroadDirectory),
        ("ad_library", Phase::AdLibrary),
        ("manual_social", Phase::ManualSocial),
    ] {
        phase_statuses
            .insert(name.to_string(), tracker.phase_status(&entry.coverage, phase, entry.tier));
    }
    Json(CoverageResponse {
        market: market.to_string(),
        tier: entry.tier,
        coverage_percentage: tracker.coverage_percentage(&entry.coverage, entry.tier),
        phase_statuses,
        recommended_actions: tracker.recommended_actions(&entry.coverage, entry.tier),
        coverage: entry.coverage.clone(),
    })
}

fn market_not_found(market: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": format!("unknown market {market}") })),
    )
        .into_response()
}
