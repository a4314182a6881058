use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use super::types::{
    ExpectedProjection, MAX_YEARS, PortfolioStats, Projection, ReturnBasis, ReturnTable,
    StressOutcome, Weights,
};

/// About 7.2% a year.
pub const FALLBACK_MONTHLY_MEAN: f64 = 0.006;
pub const FALLBACK_MONTHLY_STD: f64 = 0.015;

const MONTHS_PER_YEAR: u32 = 12;

const MIN_MONTHLY_RETURN: f64 = -1.0;

/// Annual (return, volatility) per regime.
pub const STRESS_SCENARIOS: [(&str, f64, f64); 4] = [
    ("optimistic", 0.10, 0.12),
    ("baseline", 0.07, 0.15),
    ("pessimistic", 0.03, 0.18),
    ("crisis", -0.02, 0.25),
];

const EXPECTED_BASE_RETURN: f64 = 0.045;
const EXPECTED_RISK_PREMIUM: f64 = 0.05;
const EXPECTED_BASE_VOLATILITY: f64 = 0.05;
const EXPECTED_RISK_VOLATILITY: f64 = 0.15;

pub fn portfolio_returns(weights: &Weights, table: &ReturnTable) -> Vec<f64> {
    table.rows.iter().map(|row| weights.dot(row)).collect()
}

pub fn portfolio_stats(weights: &Weights, table: &ReturnTable) -> PortfolioStats {
    let returns = portfolio_returns(weights, table);
    let (mean, std_dev, basis, drawdown) = match mean_and_sample_std(&returns) {
        Some((mean, std_dev)) => (
            mean,
            std_dev,
            ReturnBasis::Historical {
                periods: returns.len(),
            },
            max_drawdown(&returns),
        ),
        None => (
            FALLBACK_MONTHLY_MEAN,
            FALLBACK_MONTHLY_STD,
            ReturnBasis::Fallback,
            0.0,
        ),
    };

    let annual_return = mean * MONTHS_PER_YEAR as f64;
    let annual_volatility = std_dev * (MONTHS_PER_YEAR as f64).sqrt();
    let sharpe_ratio = if annual_volatility > 0.0 {
        annual_return / annual_volatility
    } else {
        0.0
    };

    PortfolioStats {
        mean_monthly_return: mean,
        monthly_std_dev: std_dev,
        annual_return,
        annual_volatility,
        sharpe_ratio,
        max_drawdown: drawdown,
        basis,
    }
}

// (n - 1) denominator; None without two finite points
fn mean_and_sample_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 2 || values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some((mean, variance.sqrt()))
}

/// Always <= 0.
pub fn max_drawdown(returns: &[f64]) -> f64 {
    let mut cumulative = 1.0;
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for r in returns {
        cumulative *= 1.0 + r;
        peak = peak.max(cumulative);
        if peak > 0.0 {
            worst = worst.min(cumulative / peak - 1.0);
        }
    }
    worst
}

/// Monte Carlo path of a monthly savings plan.
///
/// Each month the contribution is added first, then a normally distributed
/// return is applied. Uses fallback statistics when `table` has too little data.
/// Horizons longer than [`MAX_YEARS`] are truncated.
pub fn simulate<R: Rng + ?Sized>(
    weights: &Weights,
    monthly_amount: f64,
    years: u32,
    table: &ReturnTable,
    rng: &mut R,
) -> Projection {
    let stats = portfolio_stats(weights, table);
    let trajectory = monthly_path(
        stats.mean_monthly_return,
        stats.monthly_std_dev,
        monthly_amount,
        horizon_months(years),
        rng,
    );

    Projection {
        trajectory,
        annual_return: stats.annual_return,
        annual_volatility: stats.annual_volatility,
        stats,
    }
}

fn monthly_path<R: Rng + ?Sized>(
    mean: f64,
    std_dev: f64,
    monthly_amount: f64,
    months: u32,
    rng: &mut R,
) -> Vec<f64> {
    let (mean, std_dev) = if mean.is_finite() && std_dev.is_finite() && std_dev >= 0.0 {
        (mean, std_dev)
    } else {
        tracing::warn!(mean, std_dev, "invalid return distribution; using fallback");
        (FALLBACK_MONTHLY_MEAN, FALLBACK_MONTHLY_STD)
    };

    let mut balance = 0.0;
    let mut path = Vec::with_capacity(months as usize);
    for _ in 0..months {
        let z: f64 = StandardNormal.sample(rng);
        let sampled = (mean + std_dev * z).max(MIN_MONTHLY_RETURN);
        balance = (balance + monthly_amount) * (1.0 + sampled);
        path.push(balance);
    }
    path
}

pub fn stress_test<R: Rng + ?Sized>(
    monthly_amount: f64,
    years: u32,
    rng: &mut R,
) -> Vec<StressOutcome> {
    STRESS_SCENARIOS
        .iter()
        .map(|&(scenario, annual_return, annual_volatility)| {
            let path = monthly_path(
                annual_return / MONTHS_PER_YEAR as f64,
                annual_volatility / (MONTHS_PER_YEAR as f64).sqrt(),
                monthly_amount,
                horizon_months(years),
                rng,
            );
            StressOutcome {
                scenario,
                annual_return,
                annual_volatility,
                final_balance: path.last().copied().unwrap_or(0.0),
            }
        })
        .collect()
}

/// Deterministic projection from a risk-scaled expected return.
pub fn expected_projection(risk: u32, monthly_amount: f64, years: u32) -> ExpectedProjection {
    let years = years.min(MAX_YEARS);
    let risk_factor = risk as f64 / 10.0;
    let annual_return = EXPECTED_BASE_RETURN + risk_factor * EXPECTED_RISK_PREMIUM;
    let annual_volatility = EXPECTED_BASE_VOLATILITY + risk_factor * EXPECTED_RISK_VOLATILITY;

    let monthly_rate = annual_return / MONTHS_PER_YEAR as f64;
    let months = horizon_months(years) as i32;
    let final_value = annuity_due(monthly_amount, monthly_rate, months);

    let annual_amount = monthly_amount * MONTHS_PER_YEAR as f64;
    let yearly_values = (0..=years as i32)
        .map(|t| annuity_due(annual_amount, annual_return, t))
        .collect();

    ExpectedProjection {
        annual_return,
        annual_volatility,
        final_value,
        yearly_values,
    }
}

fn horizon_months(years: u32) -> u32 {
    if years > MAX_YEARS {
        tracing::warn!(years, max = MAX_YEARS, "horizon truncated");
    }
    years.min(MAX_YEARS) * MONTHS_PER_YEAR
}

// future value of payments made at the start of each period
fn annuity_due(payment: f64, rate: f64, periods: i32) -> f64 {
    if rate == 0.0 {
        return payment * periods as f64;
    }
    payment * (((1.0 + rate).powi(periods) - 1.0) / rate) * (1.0 + rate)
}
