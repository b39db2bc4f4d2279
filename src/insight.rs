//! ==============================================================================
//! insight.rs - ai insight requests
//! ==============================================================================
//!
//! purpose:
//!     turns farm data into the three kinds of generated text:
//!     - the daily actionable insight (at most two sentences)
//!     - a batch of exactly three prioritized recommendations
//!     - a plain-text chat reply
//!
//! relationships:
//!     - uses: prompt.rs (prompt wording), a TextGenerator (gemini.rs in
//!       production, fakes in tests)
//!     - used by: coordinator.rs (prefetch + regenerate), chat.rs
//!
//! every operation returns a Result. fallback content on failure is built by
//! the caller, so an error here never masquerades as a real answer.
//!
//! ==============================================================================

use async_trait::async_trait;
use chrono::Local;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::{ChatTurn, Recommendation, SensorReading, WeatherSnapshot};
use crate::prompt::{self, FarmContext};

pub const RECOMMENDATION_COUNT: usize = 3;
pub const ACTIONABLE_SENTENCES: usize = 2;

#[derive(Debug, Error)]
pub enum InsightError {
    #[error("AI service request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("AI service returned HTTP {status}: {body}")]
    Status { status: reqwest::StatusCode, body: String },

    #[error("AI service returned no text")]
    EmptyResponse,

    #[error("AI response could not be used: {0}")]
    Malformed(String),
}

/// one generation call
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    /// ask for JSON matching this schema instead of free text
    pub response_schema: Option<serde_json::Value>,
}

impl GenerationRequest {
    pub fn text(prompt: String) -> Self {
        Self { prompt, response_schema: None }
    }

    pub fn structured(prompt: String, schema: serde_json::Value) -> Self {
        Self { prompt, response_schema: Some(schema) }
    }
}

/// a text generation backend
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// non-empty generated text
    async fn generate(&self, request: GenerationRequest) -> Result<String, InsightError>;
}

#[derive(Clone)]
pub struct InsightRequester {
    generator: Arc<dyn TextGenerator>,
    location: String,
}

impl InsightRequester {
    pub fn new(generator: Arc<dyn TextGenerator>, location: impl Into<String>) -> Self {
        Self { generator, location: location.into() }
    }

    fn context(&self) -> FarmContext<'_> {
        FarmContext {
            location: &self.location,
            today: Local::now().date_naive(),
        }
    }

    pub async fn daily_actionable(
        &self,
        latest: &SensorReading,
        weather: &WeatherSnapshot,
    ) -> Result<String, InsightError> {
        let prompt = prompt::actionable_prompt(&self.context(), latest, weather);
        let text = self.generator.generate(GenerationRequest::text(prompt)).await?;
        Ok(clamp_sentences(&text, ACTIONABLE_SENTENCES))
    }

    /// `readings` newest first
    pub async fn recommendation_batch(
        &self,
        readings: &[SensorReading],
        weather: &WeatherSnapshot,
    ) -> Result<Vec<Recommendation>, InsightError> {
        let prompt = prompt::recommendations_prompt(&self.context(), readings, weather);
        let request = GenerationRequest::structured(prompt, prompt::recommendation_schema());
        let text = self.generator.generate(request).await?;
        parse_recommendations(&text)
    }

    /// `history` already ends with the farmer's query
    pub async fn chat_reply(
        &self,
        query: &str,
        readings: &[SensorReading],
        weather: &WeatherSnapshot,
        history: &[ChatTurn],
    ) -> Result<String, InsightError> {
        let prompt = prompt::chat_prompt(&self.context(), query, readings, weather, history);
        let text = self.generator.generate(GenerationRequest::text(prompt)).await?;
        Ok(plain_text(&text))
    }
}

/// exactly three recommendations out of a JSON reply (extra entries dropped)
pub fn parse_recommendations(text: &str) -> Result<Vec<Recommendation>, InsightError> {
    let body = strip_code_fence(text.trim());
    if body.is_empty() {
        return Err(InsightError::EmptyResponse);
    }

    let mut batch: Vec<Recommendation> =
        serde_json::from_str(body).map_err(|e| InsightError::Malformed(e.to_string()))?;

    if batch.len() < RECOMMENDATION_COUNT {
        return Err(InsightError::Malformed(format!(
            "expected {} recommendations, got {}",
            RECOMMENDATION_COUNT,
            batch.len()
        )));
    }
    batch.truncate(RECOMMENDATION_COUNT);
    Ok(batch)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// first `max` sentences of `text`
pub fn clamp_sentences(text: &str, max: usize) -> String {
    let text = text.trim().trim_matches('"').trim();
    let mut seen = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let at_boundary = chars.peek().map_or(true, |&(_, next)| next.is_whitespace());
        if at_boundary {
            seen += 1;
            if seen == max {
                return text[..i + c.len_utf8()].to_string();
            }
        }
    }
    text.to_string()
}

/// drop markdown emphasis, headings and bullets from a reply
pub fn plain_text(text: &str) -> String {
    text.trim()
        .lines()
        .map(|line| {
            let line = line.trim_start();
            let line = match line.strip_prefix('#') {
                Some(rest) => rest.trim_start_matches('#').trim_start(),
                None => line,
            };
            line.strip_prefix("- ")
                .or_else(|| line.strip_prefix("* "))
                .unwrap_or(line)
                .replace("**", "")
                .replace("__", "")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Priority;
    use std::sync::Mutex;

    /// records prompts and answers from a canned reply
    struct Canned {
        reply: Result<String, ()>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl Canned {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self { reply: Ok(reply.to_string()), requests: Mutex::new(Vec::new()) })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self { reply: Err(()), requests: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl TextGenerator for Canned {
        async fn generate(&self, request: GenerationRequest) -> Result<String, InsightError> {
            self.requests.lock().unwrap().push(request);
            self.reply.clone().map_err(|_| InsightError::EmptyResponse)
        }
    }

    fn reading() -> SensorReading {
        SensorReading {
            group_id: 7,
            moisture: 22.0,
            temperature: 19.0,
            electrical_conductivity: 300.0,
            ph: 6.4,
            nitrogen: 18.0,
            phosphorus: 10.0,
            potassium: 100.0,
            validity_flag: "Y".to_string(),
            captured_at: "27-OCT-2025 14:49:04".to_string(),
        }
    }

    fn weather() -> WeatherSnapshot {
        WeatherSnapshot {
            temperature: 26,
            humidity: 35.0,
            rainfall_mm: 0.0,
            wind_speed_kmh: 20,
            description: "Clear sky".to_string(),
            icon: "wb_sunny".to_string(),
            forecast: Vec::new(),
        }
    }

    const THREE: &str = r#"[
        {"title": "Irrigate", "description": "Moisture is low.", "priority": "High"},
        {"title": "Watch pH", "description": "pH is drifting.", "priority": "Medium"},
        {"title": "Mulch", "description": "Hot week ahead.", "priority": "Low"}
    ]"#;

    #[test]
    fn clamps_to_two_sentences() {
        let text = "Irrigate the north block today. Moisture is at 22%. Check again tomorrow.";
        assert_eq!(
            clamp_sentences(text, 2),
            "Irrigate the north block today. Moisture is at 22%."
        );
        assert_eq!(clamp_sentences("\"Aerate the topsoil.\"", 2), "Aerate the topsoil.");
        assert_eq!(clamp_sentences("pH 6.5 is fine", 2), "pH 6.5 is fine");
    }

    #[test]
    fn strips_markdown() {
        let text = "## Advice\n**Irrigate** early.\n- Check pH\n* Mulch beds";
        assert_eq!(plain_text(text), "Advice\nIrrigate early.\nCheck pH\nMulch beds");
    }

    #[test]
    fn parses_exactly_three() {
        let batch = parse_recommendations(THREE).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].priority, Priority::High);
        assert_eq!(batch[2].title, "Mulch");
    }

    #[test]
    fn truncates_extra_and_rejects_short_batches() {
        let four = r#"```json
        [
            {"title": "a", "description": "a", "priority": "low"},
            {"title": "b", "description": "b", "priority": "Low"},
            {"title": "c", "description": "c", "priority": "LOW"},
            {"title": "d", "description": "d", "priority": "Low"}
        ]
        ```"#;
        assert_eq!(parse_recommendations(four).unwrap().len(), 3);

        let two = r#"[
            {"title": "a", "description": "a", "priority": "High"},
            {"title": "b", "description": "b", "priority": "High"}
        ]"#;
        assert!(matches!(parse_recommendations(two), Err(InsightError::Malformed(_))));
        assert!(matches!(parse_recommendations("  "), Err(InsightError::EmptyResponse)));
        assert!(matches!(parse_recommendations("not json"), Err(InsightError::Malformed(_))));
    }

    #[test]
    fn unknown_priority_is_rejected() {
        let bad = r#"[
            {"title": "a", "description": "a", "priority": "Urgent"},
            {"title": "b", "description": "b", "priority": "High"},
            {"title": "c", "description": "c", "priority": "High"}
        ]"#;
        assert!(matches!(parse_recommendations(bad), Err(InsightError::Malformed(_))));
    }

    #[tokio::test]
    async fn recommendation_batch_asks_for_structured_output() {
        let generator = Canned::ok(THREE);
        let requester = InsightRequester::new(generator.clone(), "Franschhoek");
        let batch = requester.recommendation_batch(&[reading()], &weather()).await.unwrap();
        assert_eq!(batch.len(), 3);

        let requests = generator.requests.lock().unwrap();
        assert!(requests[0].response_schema.is_some());
        assert!(requests[0].prompt.contains("Location: Franschhoek."));
    }

    #[tokio::test]
    async fn actionable_is_clamped_and_unstructured() {
        let generator = Canned::ok("Irrigate now. Soil is dry. Wind is strong.");
        let requester = InsightRequester::new(generator.clone(), "Franschhoek");
        let text = requester.daily_actionable(&reading(), &weather()).await.unwrap();
        assert_eq!(text, "Irrigate now. Soil is dry.");
        assert!(generator.requests.lock().unwrap()[0].response_schema.is_none());
    }

    #[tokio::test]
    async fn generator_failure_propagates() {
        let requester = InsightRequester::new(Canned::failing(), "Franschhoek");
        let history = vec![ChatTurn::user("hello")];
        assert!(requester.chat_reply("hello", &[], &weather(), &history).await.is_err());
        assert!(requester.daily_actionable(&reading(), &weather()).await.is_err());
    }
}
