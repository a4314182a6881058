use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Json, Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use clap::{Args, Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::ai::{AiClient, allocate_with_ai};
use crate::config::{DEFAULT_PORT, ProviderArgs, Settings};
use crate::core::{
    Allocation, ExpectedProjection, Inputs, PortfolioStats, ReturnBasis, ReturnTable, RiskTier,
    StressOutcome, Ticker, allocate, expected_projection, simulate, stress_test,
};
use crate::error::InputError;
use crate::market::{ReturnsCache, YahooClient};

const INDEX_HTML: &str = include_str!("../../web/index.html");
const STYLES_CSS: &str = include_str!("../../web/styles.css");
const APP_JS: &str = include_str!("../../web/app.js");

const DEFAULT_AGE: u32 = 25;
const DEFAULT_RISK: u32 = 7;
const DEFAULT_MONTHLY: f64 = 10_000.0;
const DEFAULT_YEARS: u32 = 20;
const DEFAULT_GOAL: &str = "Build a retirement fund over the next 20 years.";

#[derive(Parser, Debug)]
#[command(
    name = "etf-advisor",
    about = "ETF allocation advisor with a Monte Carlo savings projection"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the web UI and JSON API
    Serve(ServeArgs),
    /// Run one analysis and print it as JSON
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[arg(long, env = "ADVISOR_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
    #[command(flatten)]
    pub provider: ProviderArgs,
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    #[arg(long, default_value_t = DEFAULT_AGE, help = "Investor age, 18-80")]
    pub age: u32,
    #[arg(long, default_value_t = DEFAULT_RISK, help = "Risk tolerance, 1-10")]
    pub risk: u32,
    #[arg(long, default_value_t = DEFAULT_MONTHLY, help = "Monthly contribution")]
    pub monthly: f64,
    #[arg(long, default_value_t = DEFAULT_YEARS, help = "Investment horizon in years")]
    pub years: u32,
    #[arg(long, default_value = DEFAULT_GOAL, help = "Free-text goal, used by --use-ai")]
    pub goal: String,
    #[arg(long, help = "Seed for a reproducible projection")]
    pub seed: Option<u64>,
    #[arg(long, help = "Ask the text-generation provider for the allocation")]
    pub use_ai: bool,
    #[arg(long, help = "Skip the historical data fetch and use default assumptions")]
    pub offline: bool,
    #[command(flatten)]
    pub provider: ProviderArgs,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AnalyzePayload {
    age: Option<u32>,
    risk: Option<u32>,
    monthly: Option<f64>,
    years: Option<u32>,
    goal: Option<String>,
    seed: Option<u64>,
    use_ai: Option<bool>,
    offline: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub inputs: Inputs,
    pub use_ai: bool,
    pub offline: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub age: u32,
    pub risk: u32,
    pub monthly_amount: f64,
    pub years: u32,
    pub risk_tier: RiskTier,
    pub allocation: Allocation,
    pub stats: PortfolioStats,
    pub using_default_assumptions: bool,
    pub history_start: Option<String>,
    pub history_end: Option<String>,
    pub annual_return: f64,
    pub annual_volatility: f64,
    pub total_contributed: f64,
    pub final_balance: f64,
    pub gain_pct: f64,
    pub trajectory: Vec<f64>,
    pub stress: Vec<StressOutcome>,
    pub expected: ExpectedProjection,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentInfo {
    symbol: &'static str,
    name: &'static str,
    description: &'static str,
    role: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Shared across requests: the historical data cache and the outbound clients.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppInner>,
}

struct AppInner {
    cache: ReturnsCache,
    prices: YahooClient,
    ai: AiClient,
}

impl AppState {
    pub fn new(settings: &Settings) -> Self {
        Self {
            inner: Arc::new(AppInner {
                cache: ReturnsCache::new(settings.market.cache_ttl),
                prices: YahooClient::new(&settings.market),
                ai: AiClient::new(&settings.ai),
            }),
        }
    }
}

pub fn build_inputs(args: &AnalyzeArgs) -> Result<AnalysisRequest, InputError> {
    let inputs = Inputs::new(
        args.age,
        args.risk,
        args.monthly,
        args.years,
        args.goal.clone(),
        args.seed,
    )?;
    Ok(AnalysisRequest {
        inputs,
        use_ai: args.use_ai,
        offline: args.offline,
    })
}

pub async fn analyze(state: &AppState, request: &AnalysisRequest) -> AnalysisResponse {
    let inputs = &request.inputs;
    let allocation = if request.use_ai {
        allocate_with_ai(&state.inner.ai, inputs).await
    } else {
        allocate(inputs.age, inputs.risk)
    };

    let table = if request.offline {
        Arc::new(ReturnTable::default())
    } else {
        state
            .inner
            .cache
            .get_or_fetch(&state.inner.prices, &Ticker::ALL)
            .await
    };

    let mut rng = match inputs.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let projection = simulate(
        &allocation.weights,
        inputs.monthly_amount,
        inputs.years,
        &table,
        &mut rng,
    );
    let stress = stress_test(inputs.monthly_amount, inputs.years, &mut rng);
    let expected = expected_projection(inputs.risk, inputs.monthly_amount, inputs.years);

    let using_default_assumptions = projection.stats.basis == ReturnBasis::Fallback;
    tracing::info!(
        age = inputs.age,
        risk = inputs.risk,
        years = inputs.years,
        use_ai = request.use_ai,
        default_assumptions = using_default_assumptions,
        "analysis complete"
    );

    let total_contributed = inputs.total_contributed();
    let final_balance = projection.final_balance();
    AnalysisResponse {
        age: inputs.age,
        risk: inputs.risk,
        monthly_amount: inputs.monthly_amount,
        years: inputs.years,
        risk_tier: RiskTier::from_risk(inputs.risk),
        allocation,
        stats: projection.stats,
        using_default_assumptions,
        history_start: table.periods.first().cloned(),
        history_end: table.periods.last().cloned(),
        annual_return: projection.annual_return,
        annual_volatility: projection.annual_volatility,
        total_contributed,
        final_balance,
        gain_pct: final_balance / total_contributed - 1.0,
        trajectory: projection.trajectory,
        stress,
        expected,
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/index.html", get(index_handler))
        .route("/styles.css", get(styles_handler))
        .route("/app.js", get(app_js_handler))
        .route(
            "/api/analyze",
            get(analyze_get_handler).post(analyze_post_handler),
        )
        .route("/api/instruments", get(instruments_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

pub async fn run_http_server(port: u16, settings: &Settings) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router(AppState::new(settings));

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "ETF advisor listening");
    tracing::info!("local access: http://127.0.0.1:{port}/");
    if settings.ai.api_key.is_none() {
        tracing::info!("no AI provider key set; AI allocations will use the fallback mix");
    }

    axum::serve(listener, app).await
}

async fn index_handler() -> impl IntoResponse {
    with_cache_control(Html(INDEX_HTML))
}

async fn styles_handler() -> impl IntoResponse {
    with_cache_control((
        [(header::CONTENT_TYPE, "text/css; charset=utf-8")],
        STYLES_CSS,
    ))
}

async fn app_js_handler() -> impl IntoResponse {
    with_cache_control((
        [(
            header::CONTENT_TYPE,
            "application/javascript; charset=utf-8",
        )],
        APP_JS,
    ))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn instruments_handler() -> Response {
    let instruments: Vec<InstrumentInfo> = Ticker::ALL
        .into_iter()
        .map(|ticker| InstrumentInfo {
            symbol: ticker.symbol(),
            name: ticker.name(),
            description: ticker.description(),
            role: match ticker {
                Ticker::Tw50 => "domestic growth",
                Ticker::TwHighDividend => "domestic income",
                Ticker::Vt => "global equity",
                Ticker::Bnd => "bonds",
            },
        })
        .collect();
    json_response(StatusCode::OK, instruments)
}

async fn analyze_get_handler(
    State(state): State<AppState>,
    Query(payload): Query<AnalyzePayload>,
) -> Response {
    analyze_handler_impl(&state, payload).await
}

async fn analyze_post_handler(
    State(state): State<AppState>,
    Json(payload): Json<AnalyzePayload>,
) -> Response {
    analyze_handler_impl(&state, payload).await
}

async fn analyze_handler_impl(state: &AppState, payload: AnalyzePayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    json_response(StatusCode::OK, analyze(state, &request).await)
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    with_cache_control((status, Json(body)))
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<AnalysisRequest, String> {
    let payload = serde_json::from_str::<AnalyzePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload).map_err(|e| e.to_string())
}

fn api_request_from_payload(payload: AnalyzePayload) -> Result<AnalysisRequest, InputError> {
    let inputs = Inputs::new(
        payload.age.unwrap_or(DEFAULT_AGE),
        payload.risk.unwrap_or(DEFAULT_RISK),
        payload.monthly.unwrap_or(DEFAULT_MONTHLY),
        payload.years.unwrap_or(DEFAULT_YEARS),
        payload.goal.unwrap_or_else(|| DEFAULT_GOAL.to_string()),
        payload.seed,
    )?;
    Ok(AnalysisRequest {
        inputs,
        use_ai: payload.use_ai.unwrap_or(false),
        offline: payload.offline.unwrap_or(false),
    })
}
