//! ==============================================================================
//! gemini.rs - google generative language REST client
//! ==============================================================================
//!
//! implements TextGenerator against `models/{model}:generateContent`.
//! structured requests attach `generationConfig` with a JSON mime type and the
//! caller's response schema. the reply text is the first candidate's parts
//! joined together.
//!
//! ==============================================================================

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use crate::config::AiConfig;
use crate::insight::{GenerationRequest, InsightError, TextGenerator};

const API_KEY_HEADER: &str = "x-goog-api-key";

pub struct GeminiClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(ai: &AiConfig, api_key: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(ai.request_timeout_seconds))
            .build()
            .context("failed to build AI http client")?;

        Ok(Self {
            http,
            url: format!(
                "{}/models/{}:generateContent",
                ai.endpoint.trim_end_matches('/'),
                ai.model
            ),
            api_key,
        })
    }
}

fn request_body(request: &GenerationRequest) -> serde_json::Value {
    let mut body = json!({
        "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }]
    });
    if let Some(schema) = &request.response_schema {
        body["generationConfig"] = json!({
            "responseMimeType": "application/json",
            "responseSchema": schema,
        });
    }
    body
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

fn response_text(body: &str) -> Result<String, InsightError> {
    let parsed: GenerateResponse =
        serde_json::from_str(body).map_err(|e| InsightError::Malformed(e.to_string()))?;

    let text: String = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        return Err(InsightError::EmptyResponse);
    }
    Ok(text.to_string())
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, InsightError> {
        let resp = self
            .http
            .post(&self.url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request_body(&request))
            .send()
            .await
            .map_err(InsightError::Transport)?;

        let status = resp.status();
        let body = resp.text().await.map_err(InsightError::Transport)?;
        if !status.is_success() {
            return Err(InsightError::Status { status, body });
        }

        response_text(&body)
    }
}
