mod allocation;
mod engine;
mod types;

pub use allocation::{
    FALLBACK_WEIGHTS, allocate, extract_json_object, fallback_allocation, parse_ai_allocation,
    raw_weights,
};
pub use engine::{
    FALLBACK_MONTHLY_MEAN, FALLBACK_MONTHLY_STD, STRESS_SCENARIOS, expected_projection,
    max_drawdown, portfolio_returns, portfolio_stats, simulate, stress_test,
};
pub use types::{
    Allocation, AllocationSource, ExpectedProjection, Inputs, MAX_AGE, MAX_RISK, MAX_YEARS,
    MIN_AGE, MIN_RISK, PortfolioStats, Projection, ReturnBasis, ReturnTable, RiskTier,
    StressOutcome, Ticker, Weights, round2,
};
