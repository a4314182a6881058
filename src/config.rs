use std::time::Duration;

use clap::Args;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 86_400;
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
pub const LLM_API_KEY_ENV: &str = "ADVISOR_LLM_API_KEY";

/// Settings shared by `serve` and `analyze`. Each flag can also come from the environment.
#[derive(Args, Debug, Clone)]
pub struct ProviderArgs {
    #[arg(
        long,
        env = "ADVISOR_CACHE_TTL_SECS",
        default_value_t = DEFAULT_CACHE_TTL_SECS,
        help = "Seconds before cached historical returns are refetched"
    )]
    pub cache_ttl_secs: u64,
    #[arg(
        long,
        env = "ADVISOR_MARKET_BASE_URL",
        default_value = crate::market::YAHOO_BASE_URL,
        help = "Base URL of the chart API used for historical prices"
    )]
    pub market_base_url: String,
    #[arg(long, env = "ADVISOR_MARKET_TIMEOUT_SECS", default_value_t = 10)]
    pub market_timeout_secs: u64,
    #[arg(
        long,
        env = "ADVISOR_LLM_BASE_URL",
        default_value = DEFAULT_LLM_BASE_URL,
        help = "Base URL of an OpenAI-compatible API"
    )]
    pub llm_base_url: String,
    #[arg(long, env = "ADVISOR_LLM_MODEL", default_value = DEFAULT_LLM_MODEL)]
    pub llm_model: String,
    #[arg(long, env = "ADVISOR_LLM_TIMEOUT_SECS", default_value_t = 30)]
    pub llm_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarketSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub cache_ttl: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub market: MarketSettings,
    pub ai: AiSettings,
}

impl Settings {
    /// Builds settings from parsed flags; the API key is only ever read from the environment.
    pub fn from_args(args: &ProviderArgs) -> Self {
        Self::with_api_key(args, std::env::var(LLM_API_KEY_ENV).ok())
    }

    pub fn with_api_key(args: &ProviderArgs, api_key: Option<String>) -> Self {
        Self {
            market: MarketSettings {
                base_url: args.market_base_url.clone(),
                timeout_secs: args.market_timeout_secs,
                cache_ttl: Duration::from_secs(args.cache_ttl_secs),
            },
            ai: AiSettings {
                base_url: args.llm_base_url.clone(),
                model: args.llm_model.clone(),
                api_key: api_key.filter(|k| !k.trim().is_empty()),
                timeout_secs: args.llm_timeout_secs,
            },
        }
    }
}
