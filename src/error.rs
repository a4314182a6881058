use thiserror::Error;

/// Rejected user inputs. Messages name the flag / field that was out of range.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("--age must be between {min} and {max}, got {value}")]
    Age { value: u32, min: u32, max: u32 },

    #[error("--risk must be between {min} and {max}, got {value}")]
    Risk { value: u32, min: u32, max: u32 },

    #[error("--monthly must be a finite amount > 0")]
    MonthlyAmount,

    #[error("--years must be between 1 and {max}, got {value}")]
    Years { value: u32, max: u32 },

    #[error("unknown ticker `{0}`")]
    UnknownTicker(String),
}

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("request for {symbol} failed: {source}")]
    Request {
        symbol: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{symbol}: provider returned status {status}")]
    Status { symbol: String, status: u16 },

    #[error("{symbol}: provider returned no chart data")]
    Empty { symbol: String },
}

/// Reasons the text-generation allocation could not be used.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AiError {
    #[error("AI provider is not configured")]
    NotConfigured,

    #[error("AI request failed: {0}")]
    Transport(String),

    #[error("AI provider returned status {0}")]
    Status(u16),

    #[error("AI reply contained no message text")]
    EmptyReply,

    #[error("AI reply contained no complete JSON object")]
    NoJsonObject,

    #[error("AI reply was not valid JSON: {0}")]
    MalformedJson(String),

    #[error("AI reply is missing `{0}`")]
    MissingKey(&'static str),

    #[error("AI weight for {ticker} is not numeric: {value}")]
    NonNumericWeight { ticker: String, value: String },

    #[error("AI weight for {ticker} is out of range: {value}")]
    WeightOutOfRange { ticker: String, value: f64 },

    #[error("AI reply names unknown ticker `{0}`")]
    UnknownTicker(String),

    #[error("AI weights sum to {0:.3}, expected 1.0")]
    WeightSum(f64),
}
