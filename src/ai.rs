//! Allocation from an external text-generation provider.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::AiSettings;
use crate::core::{Allocation, Inputs, Ticker, fallback_allocation, parse_ai_allocation};
use crate::error::AiError;

const SYSTEM_PROMPT: &str = "You are a careful ETF portfolio advisor. Reply with a single JSON \
object and nothing else.";

pub trait TextGenerator {
    fn generate(&self, prompt: &str) -> impl Future<Output = Result<String, AiError>> + Send;
}

pub fn build_prompt(inputs: &Inputs) -> String {
    let tickers = Ticker::ALL
        .iter()
        .map(|t| format!("{} ({})", t.symbol(), t.name()))
        .collect::<Vec<_>>()
        .join(", ");
    let goal = if inputs.goal.trim().is_empty() {
        "long-term wealth building"
    } else {
        inputs.goal.trim()
    };
    format!(
        "An investor is {age} years old with a risk tolerance of {risk} on a 1-10 scale. \
         They will invest {monthly:.0} every month for {years} years. Their goal: {goal}.\n\
         Allocate their contributions across exactly these ETFs: {tickers}.\n\
         Respond with JSON only, in the form \
         {{\"weights\": {{\"0050.TW\": 0.4, \"0056.TW\": 0.2, \"VT\": 0.2, \"BND\": 0.2}}, \
         \"reason\": \"short explanation\"}}. Weights must be decimals that sum to 1.0.",
        age = inputs.age,
        risk = inputs.risk,
        monthly = inputs.monthly_amount,
        years = inputs.years,
    )
}

/// Asks `generator` for an allocation, falling back to the default mix on any failure.
pub async fn allocate_with_ai<G: TextGenerator + ?Sized>(
    generator: &G,
    inputs: &Inputs,
) -> Allocation {
    let prompt = build_prompt(inputs);
    let outcome = match generator.generate(&prompt).await {
        Ok(reply) => parse_ai_allocation(&reply),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(allocation) => {
            tracing::info!(age = inputs.age, risk = inputs.risk, "AI allocation accepted");
            allocation
        }
        Err(cause) => {
            tracing::warn!(%cause, "AI allocation unavailable; using fallback mix");
            fallback_allocation(&cause)
        }
    }
}

/// OpenAI-compatible `/chat/completions` client.
#[derive(Clone)]
pub struct AiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl fmt::Debug for AiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f64,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl AiClient {
    pub fn new(settings: &AiSettings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to default HTTP client for AI provider");
                reqwest::Client::new()
            });
        Self {
            http,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            model: settings.model.clone(),
            api_key: settings.api_key.clone().filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

impl TextGenerator for AiClient {
    async fn generate(&self, prompt: &str) -> Result<String, AiError> {
        let api_key = self.api_key.as_deref().ok_or(AiError::NotConfigured)?;
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.2,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AiError::Status(status.as_u16()));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AiError::MalformedJson(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(AiError::EmptyReply)
    }
}
