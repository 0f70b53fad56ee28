//! Text generation providers used for whole-document summaries.
//!
//! - **[`OllamaGenerator`]**: `POST /api/generate` on a local Ollama instance.
//! - **[`OpenAIGenerator`]**: the OpenAI chat completions API.
//!
//! Both return the full completion text. The `streaming` flag is forwarded
//! to Ollama, whose streamed response is reassembled from its NDJSON lines.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use docrag_core::generation::Generator;

use crate::config::GenerationConfig;
use crate::embedding::post_json_with_retry;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const GENERATION_RETRIES: u32 = 2;

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

// ============ Ollama ============

pub struct OllamaGenerator {
    model: String,
    url: String,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            client: http_client(config.timeout_secs)?,
        })
    }

    async fn generate_streamed(&self, prompt: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&serde_json::json!({
                "model": self.model,
                "prompt": prompt,
                "stream": true,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body);
        }

        let body = response.text().await?;
        join_ollama_stream(&body)
    }
}

/// Concatenate the `response` fields of an Ollama NDJSON stream.
fn join_ollama_stream(body: &str) -> Result<String> {
    let mut text = String::new();
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let part: serde_json::Value = serde_json::from_str(line)?;
        if let Some(err) = part.get("error").and_then(|e| e.as_str()) {
            bail!("Ollama generation failed: {}", err);
        }
        if let Some(piece) = part.get("response").and_then(|r| r.as_str()) {
            text.push_str(piece);
        }
    }
    Ok(text)
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, streaming: bool) -> Result<String> {
        if streaming {
            return self.generate_streamed(prompt).await;
        }

        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/generate", self.url),
            None,
            &body,
            GENERATION_RETRIES,
            "Ollama API",
        )
        .await?;

        json.get("response")
            .and_then(|r| r.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response field"))
    }
}

// ============ OpenAI ============

/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIGenerator {
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            model,
            api_key,
            client: http_client(config.timeout_secs)?,
        })
    }
}

fn parse_chat_completion(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, _streaming: bool) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
        });
        let json = post_json_with_retry(
            &self.client,
            OPENAI_CHAT_URL,
            Some(&self.api_key),
            &body,
            GENERATION_RETRIES,
            "OpenAI API",
        )
        .await?;
        parse_chat_completion(&json)
    }
}

/// Instantiate the configured generator. `Ok(None)` when disabled.
pub fn create_generator(config: &GenerationConfig) -> Result<Option<Arc<dyn Generator>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "ollama" => Ok(Some(Arc::new(OllamaGenerator::new(config)?))),
        "openai" => Ok(Some(Arc::new(OpenAIGenerator::new(config)?))),
        other => bail!("Unknown generation provider: {}", other),
    }
}
