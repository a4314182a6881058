use std::fmt;
use std::str::FromStr;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::error::InputError;

pub const MIN_AGE: u32 = 18;
pub const MAX_AGE: u32 = 80;
pub const MIN_RISK: u32 = 1;
pub const MAX_RISK: u32 = 10;
pub const MAX_YEARS: u32 = 60;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub enum Ticker {
    #[serde(rename = "0050.TW")]
    Tw50,
    #[serde(rename = "0056.TW")]
    TwHighDividend,
    #[serde(rename = "VT")]
    Vt,
    #[serde(rename = "BND")]
    Bnd,
}

impl Ticker {
    pub const COUNT: usize = 4;
    pub const ALL: [Ticker; Ticker::COUNT] =
        [Ticker::Tw50, Ticker::TwHighDividend, Ticker::Vt, Ticker::Bnd];

    /// Domestic growth sleeve; also absorbs the rounding residual.
    pub const GROWTH: Ticker = Ticker::Tw50;
    pub const INCOME: Ticker = Ticker::TwHighDividend;
    pub const GLOBAL: Ticker = Ticker::Vt;
    pub const BOND: Ticker = Ticker::Bnd;

    pub fn index(self) -> usize {
        match self {
            Ticker::Tw50 => 0,
            Ticker::TwHighDividend => 1,
            Ticker::Vt => 2,
            Ticker::Bnd => 3,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Ticker::Tw50 => "0050.TW",
            Ticker::TwHighDividend => "0056.TW",
            Ticker::Vt => "VT",
            Ticker::Bnd => "BND",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Ticker::Tw50 => "Yuanta Taiwan Top 50 ETF",
            Ticker::TwHighDividend => "Yuanta Taiwan High Dividend ETF",
            Ticker::Vt => "Vanguard Total World Stock ETF",
            Ticker::Bnd => "Vanguard Total Bond Market ETF",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Ticker::Tw50 => "Tracks the 50 largest companies listed in Taiwan by market cap.",
            Ticker::TwHighDividend => "Holds Taiwanese constituents selected for high cash dividends.",
            Ticker::Vt => "Invests across developed and emerging equity markets worldwide.",
            Ticker::Bnd => "Investment-grade bonds; the defensive hedge of the portfolio.",
        }
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Ticker {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ticker::ALL
            .into_iter()
            .find(|t| t.symbol().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| InputError::UnknownTicker(trimmed.to_string()))
    }
}

/// One fraction per ticker. Serialises as `{"0050.TW": 0.4, ...}`.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Weights([f64; Ticker::COUNT]);

impl Weights {
    pub const fn new(values: [f64; Ticker::COUNT]) -> Self {
        Self(values)
    }

    pub fn get(&self, ticker: Ticker) -> f64 {
        self.0[ticker.index()]
    }

    pub fn set(&mut self, ticker: Ticker, value: f64) {
        self.0[ticker.index()] = value;
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Ticker, f64)> + '_ {
        Ticker::ALL.into_iter().map(|t| (t, self.get(t)))
    }

    pub fn equity_share(&self) -> f64 {
        1.0 - self.get(Ticker::BOND)
    }

    pub fn dot(&self, row: &[f64; Ticker::COUNT]) -> f64 {
        self.0.iter().zip(row.iter()).map(|(w, r)| w * r).sum()
    }

    /// Rounds each weight to two decimals, then folds the rounding residual into
    /// the growth ticker so the total is exactly 1.00.
    ///
    /// If the residual would push the growth weight below zero, the growth weight
    /// is pinned at zero and the shortfall is taken from the largest weight.
    pub fn normalized(self) -> Self {
        let mut out = Self(self.0.map(round2));
        let residual = round2(1.0 - out.sum());
        let growth = out.get(Ticker::GROWTH) + residual;
        if growth >= 0.0 {
            out.set(Ticker::GROWTH, round2(growth));
        } else {
            out.set(Ticker::GROWTH, 0.0);
            let largest = Ticker::ALL
                .into_iter()
                .max_by(|a, b| out.get(*a).total_cmp(&out.get(*b)))
                .unwrap_or(Ticker::BOND);
            out.set(largest, round2(out.get(largest) + growth));
        }
        out
    }
}

impl Serialize for Weights {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Ticker::COUNT))?;
        for (ticker, weight) in self.iter() {
            map.serialize_entry(ticker.symbol(), &weight)?;
        }
        map.end()
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Monthly returns per ticker, aligned by month.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnTable {
    pub periods: Vec<String>,
    pub rows: Vec<[f64; Ticker::COUNT]>,
}

impl ReturnTable {
    pub fn new(periods: Vec<String>, rows: Vec<[f64; Ticker::COUNT]>) -> Self {
        debug_assert_eq!(periods.len(), rows.len());
        Self { periods, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Conservative,
    Balanced,
    Aggressive,
}

impl RiskTier {
    pub fn from_risk(risk: u32) -> Self {
        if risk >= 7 {
            RiskTier::Aggressive
        } else if risk <= 4 {
            RiskTier::Conservative
        } else {
            RiskTier::Balanced
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inputs {
    pub age: u32,
    pub risk: u32,
    pub monthly_amount: f64,
    pub years: u32,
    pub goal: String,
    pub seed: Option<u64>,
}

impl Inputs {
    pub fn new(
        age: u32,
        risk: u32,
        monthly_amount: f64,
        years: u32,
        goal: impl Into<String>,
        seed: Option<u64>,
    ) -> Result<Self, InputError> {
        if !(MIN_AGE..=MAX_AGE).contains(&age) {
            return Err(InputError::Age {
                value: age,
                min: MIN_AGE,
                max: MAX_AGE,
            });
        }
        if !(MIN_RISK..=MAX_RISK).contains(&risk) {
            return Err(InputError::Risk {
                value: risk,
                min: MIN_RISK,
                max: MAX_RISK,
            });
        }
        if !monthly_amount.is_finite() || monthly_amount <= 0.0 {
            return Err(InputError::MonthlyAmount);
        }
        if years == 0 || years > MAX_YEARS {
            return Err(InputError::Years {
                value: years,
                max: MAX_YEARS,
            });
        }
        Ok(Self {
            age,
            risk,
            monthly_amount,
            years,
            goal: goal.into(),
            seed,
        })
    }

    pub fn total_contributed(&self) -> f64 {
        self.monthly_amount * 12.0 * self.years as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AllocationSource {
    Rules,
    Ai,
    Fallback { cause: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub weights: Weights,
    pub rationale: String,
    pub source: AllocationSource,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReturnBasis {
    Historical { periods: usize },
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioStats {
    pub mean_monthly_return: f64,
    pub monthly_std_dev: f64,
    pub annual_return: f64,
    pub annual_volatility: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub basis: ReturnBasis,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub trajectory: Vec<f64>,
    pub annual_return: f64,
    pub annual_volatility: f64,
    pub stats: PortfolioStats,
}

impl Projection {
    pub fn final_balance(&self) -> f64 {
        self.trajectory.last().copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StressOutcome {
    pub scenario: &'static str,
    pub annual_return: f64,
    pub annual_volatility: f64,
    pub final_balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedProjection {
    pub annual_return: f64,
    pub annual_volatility: f64,
    pub final_value: f64,
    pub yearly_values: Vec<f64>,
}
