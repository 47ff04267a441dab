// src/llm/client.rs

use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::ImpactError;
use crate::llm::prompt::{build_prompt, LlmPrompt};
use crate::llm::{DelegateQuery, DelegateReply, ReasoningDelegate};

const PROMPT_ABI_VERSION: &str = "v1-impact-resolution";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Anthropic,
}

impl Provider {
    pub fn parse(name: &str) -> Result<Self, ImpactError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAI),
            "anthropic" => Ok(Provider::Anthropic),
            other => Err(ImpactError::ConfigurationMissing(format!(
                "unknown LLM provider '{other}' (expected openai or anthropic)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub timeout: Duration,
}

/// HTTP-backed [`ReasoningDelegate`].
#[derive(Clone)]
pub struct LlmClient {
    cfg: ProviderConfig,
    http: reqwest::blocking::Client,
}

impl LlmClient {
    pub fn new(cfg: ProviderConfig) -> Result<Self, ImpactError> {
        if cfg.api_key.trim().is_empty() {
            return Err(ImpactError::ConfigurationMissing(
                "reasoning-service API key".into(),
            ));
        }

        let http = reqwest::blocking::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(|e| ImpactError::DelegateUnavailable(e.to_string()))?;

        Ok(Self { cfg, http })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.cfg
    }

    /// Execute LLM request
    pub fn run(&self, prompt: &LlmPrompt) -> Result<DelegateReply, ImpactError> {
        let prompt_hash = hash_prompt(prompt);
        let (url, headers, body) = build_request(&self.cfg, prompt, &prompt_hash);

        let mut req = self.http.post(url).json(&body);
        for (k, v) in headers {
            req = req.header(k, v);
        }

        let resp = req.send().map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        let text = resp.text().map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(ImpactError::DelegateUnavailable(format!(
                "LLM error {status}: {}",
                text.trim()
            )));
        }

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| ImpactError::DelegateMalformed(e.to_string()))?;

        let cached_tokens = json
            .pointer("/usage/prompt_tokens_details/cached_tokens")
            .and_then(|v| v.as_u64());

        let text = extract_text(self.cfg.provider, &json)?;

        Ok(DelegateReply {
            text,
            prompt_hash,
            cached_tokens,
        })
    }
}

impl LlmClient {
    fn transport_error(&self, e: reqwest::Error) -> ImpactError {
        if e.is_timeout() {
            ImpactError::DelegateUnavailable(format!(
                "no reply within {}s",
                self.cfg.timeout.as_secs()
            ))
        } else {
            ImpactError::DelegateUnavailable(e.to_string())
        }
    }
}

impl ReasoningDelegate for LlmClient {
    fn ask(&self, query: &DelegateQuery) -> Result<DelegateReply, ImpactError> {
        let prompt = build_prompt(query);
        debug!(
            model = %self.cfg.model,
            unresolved = query.unresolved.len(),
            "asking reasoning delegate"
        );
        self.run(&prompt)
    }
}

fn hash_prompt(prompt: &LlmPrompt) -> String {
    let mut h = Sha256::new();
    h.update(PROMPT_ABI_VERSION.as_bytes());
    h.update(prompt.system.as_bytes());
    h.update(prompt.user.as_bytes());
    hex::encode(h.finalize())
}

fn build_request(
    cfg: &ProviderConfig,
    prompt: &LlmPrompt,
    prompt_hash: &str,
) -> (String, Vec<(&'static str, String)>, Value) {
    match cfg.provider {
        Provider::OpenAI => {
            let url = cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1/responses".into());

            let body = serde_json::json!({
                "model": cfg.model,
                "instructions": prompt.system,
                "input": prompt.user,
                "temperature": 0,
                "prompt_cache_key": prompt_hash,
            });

            (
                url,
                vec![("Authorization", format!("Bearer {}", cfg.api_key))],
                body,
            )
        }

        Provider::Anthropic => {
            let url = cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com/v1/messages".into());

            let body = serde_json::json!({
                "model": cfg.model,
                "max_tokens": 1024,
                "temperature": 0,
                "system": prompt.system,
                "messages": [
                    { "role": "user", "content": prompt.user }
                ]
            });

            (
                url,
                vec![
                    ("x-api-key", cfg.api_key.clone()),
                    ("anthropic-version", "2023-06-01".into()),
                ],
                body,
            )
        }
    }
}

fn extract_text(provider: Provider, v: &Value) -> Result<String, ImpactError> {
    let text = match provider {
        Provider::OpenAI => v
            .get("output")
            .and_then(|o| o.as_array())
            .and_then(|arr| {
                arr.iter().find_map(|item| {
                    item.get("content")?
                        .as_array()?
                        .iter()
                        .find_map(|c| c.get("text")?.as_str())
                })
            }),

        Provider::Anthropic => v.pointer("/content/0/text").and_then(|v| v.as_str()),
    };

    text.map(str::to_owned).ok_or_else(|| {
        ImpactError::DelegateMalformed(format!("{provider:?} response carried no text"))
    })
}
