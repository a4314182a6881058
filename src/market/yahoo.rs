use std::collections::BTreeMap;
use std::time::Duration;

use chrono::DateTime;
use serde::Deserialize;

use super::{PriceSeries, PriceSource};
use crate::config::MarketSettings;
use crate::core::Ticker;
use crate::error::MarketDataError;

pub const YAHOO_BASE_URL: &str = "https://query1.finance.yahoo.com";
const LOOKBACK_RANGE: &str = "10y";
const INTERVAL: &str = "1mo";

#[derive(Debug, Clone)]
pub struct YahooClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    meta: ChartMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    #[serde(default)]
    indicators: Indicators,
}

#[derive(Debug, Default, Deserialize)]
struct ChartMeta {
    #[serde(default)]
    gmtoffset: i64,
}

#[derive(Debug, Default, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
    #[serde(default)]
    adjclose: Vec<AdjClose>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

impl YahooClient {
    pub fn new(settings: &MarketSettings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .user_agent(concat!("etf-advisor/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to default HTTP client for market data");
                reqwest::Client::new()
            });
        Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn chart_url(&self, ticker: Ticker) -> String {
        format!(
            "{}/v8/finance/chart/{}?range={LOOKBACK_RANGE}&interval={INTERVAL}",
            self.base_url,
            ticker.symbol()
        )
    }
}

impl PriceSource for YahooClient {
    async fn monthly_prices(&self, ticker: Ticker) -> Result<PriceSeries, MarketDataError> {
        let symbol = ticker.symbol().to_string();
        let request_error = |source| MarketDataError::Request {
            symbol: symbol.clone(),
            source,
        };

        let response = self
            .http
            .get(self.chart_url(ticker))
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(MarketDataError::Status {
                symbol,
                status: status.as_u16(),
            });
        }

        let envelope: ChartEnvelope = response.json().await.map_err(request_error)?;
        let series = series_from_envelope(ticker, envelope);
        if series.points.is_empty() {
            return Err(MarketDataError::Empty { symbol });
        }
        tracing::debug!(%ticker, months = series.points.len(), "fetched monthly prices");
        Ok(series)
    }
}

// unparseable bodies give an empty series
pub fn parse_chart(ticker: Ticker, body: &str) -> PriceSeries {
    match serde_json::from_str::<ChartEnvelope>(body) {
        Ok(envelope) => series_from_envelope(ticker, envelope),
        Err(e) => {
            tracing::warn!(error = %e, %ticker, "unreadable chart response");
            PriceSeries {
                ticker,
                points: BTreeMap::new(),
            }
        }
    }
}

fn series_from_envelope(ticker: Ticker, envelope: ChartEnvelope) -> PriceSeries {
    let mut points = BTreeMap::new();
    let Some(result) = envelope.chart.result.and_then(|r| r.into_iter().next()) else {
        return PriceSeries { ticker, points };
    };

    // adjusted close when the provider has it, plain close otherwise
    let prices = result
        .indicators
        .adjclose
        .into_iter()
        .next()
        .map(|a| a.adjclose)
        .filter(|v| !v.is_empty())
        .or_else(|| result.indicators.quote.into_iter().next().map(|q| q.close))
        .unwrap_or_default();

    for (ts, price) in result.timestamp.iter().zip(prices) {
        let Some(price) = price else { continue };
        // exchange-local time, so Taipei and New York bars land in the same month
        if let Some(local) = DateTime::from_timestamp(ts + result.meta.gmtoffset, 0) {
            points.insert(local.format("%Y-%m").to_string(), price);
        }
    }
    PriceSeries { ticker, points }
}
