//! Farmer/assistant chat sessions.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::{ChatTurn, SensorReading, WeatherSnapshot};
use crate::insight::InsightRequester;

pub const FALLBACK_CHAT_REPLY: &str =
    "I'm sorry, I encountered an error while processing your request. Please try again.";

/// sessions kept before the least recently used one is dropped
pub const DEFAULT_SESSION_LIMIT: usize = 64;

/// ordered conversation, alternating farmer and assistant turns
#[derive(Debug, Default, Clone, Serialize)]
pub struct ChatSession {
    turns: Vec<ChatTurn>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// append the query and the assistant's reply
    ///
    /// blank queries are ignored and return `None`. a failed request still
    /// appends an assistant turn carrying the apology text. both turns are
    /// appended together, so dropping this future leaves the session as it was.
    pub async fn ask(
        &mut self,
        requester: &InsightRequester,
        readings: &[SensorReading],
        weather: &WeatherSnapshot,
        query: &str,
    ) -> Option<&ChatTurn> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }

        let asked = ChatTurn::user(query);
        let mut history = self.turns.clone();
        history.push(asked.clone());
        let reply = match requester.chat_reply(query, readings, weather, &history).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "[CHAT] reply request failed");
                FALLBACK_CHAT_REPLY.to_string()
            }
        };
        self.turns.push(asked);
        self.turns.push(ChatTurn::assistant(reply));
        self.turns.last()
    }
}

struct SessionSlot {
    session: Arc<Mutex<ChatSession>>,
    last_used: Instant,
}

/// named chat sessions, capped at `limit` entries
///
/// opening a new name when full evicts the session used longest ago. a
/// request already holding an evicted session finishes on its own copy.
pub struct ChatSessions {
    limit: usize,
    slots: RwLock<HashMap<String, SessionSlot>>,
}

impl Default for ChatSessions {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_LIMIT)
    }
}

impl ChatSessions {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            slots: RwLock::default(),
        }
    }

    /// existing session for `name`, or a fresh one
    pub async fn open(&self, name: &str) -> Arc<Mutex<ChatSession>> {
        let now = Instant::now();
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get_mut(name) {
            slot.last_used = now;
            return Arc::clone(&slot.session);
        }

        if slots.len() >= self.limit {
            let oldest = slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(name, _)| name.clone());
            if let Some(oldest) = oldest {
                slots.remove(&oldest);
                debug!(session = %oldest, "[CHAT] evicted least recently used session");
            }
        }

        let session = Arc::new(Mutex::new(ChatSession::new()));
        slots.insert(
            name.to_string(),
            SessionSlot { session: Arc::clone(&session), last_used: now },
        );
        session
    }

    /// the session for `name` if one exists; never creates
    pub async fn find(&self, name: &str) -> Option<Arc<Mutex<ChatSession>>> {
        let slots = self.slots.read().await;
        slots.get(name).map(|slot| Arc::clone(&slot.session))
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChatRole;
    use crate::insight::{GenerationRequest, InsightError, TextGenerator};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Echo {
        prompts: std::sync::Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl TextGenerator for Echo {
        async fn generate(&self, request: GenerationRequest) -> Result<String, InsightError> {
            self.prompts.lock().unwrap().push(request.prompt);
            if self.fail {
                return Err(InsightError::EmptyResponse);
            }
            Ok("**Wait** until the soil dries.".to_string())
        }
    }

    fn requester(fail: bool) -> (Arc<Echo>, InsightRequester) {
        let echo = Arc::new(Echo { prompts: std::sync::Mutex::new(Vec::new()), fail });
        (echo.clone(), InsightRequester::new(echo, "Franschhoek"))
    }

    fn weather() -> WeatherSnapshot {
        WeatherSnapshot {
            temperature: 18,
            humidity: 80.0,
            rainfall_mm: 6.0,
            wind_speed_kmh: 9,
            description: "Slight rain".to_string(),
            icon: "rainy".to_string(),
            forecast: Vec::new(),
        }
    }

    #[tokio::test]
    async fn reply_is_appended_as_plain_text() {
        let (echo, requester) = requester(false);
        let mut session = ChatSession::new();

        let reply = session.ask(&requester, &[], &weather(), "Should I irrigate?").await.unwrap();
        assert_eq!(reply.role, ChatRole::Assistant);
        assert_eq!(reply.text, "Wait until the soil dries.");
        assert_eq!(session.turns().len(), 2);
        assert_eq!(session.turns()[0], ChatTurn::user("Should I irrigate?"));

        session.ask(&requester, &[], &weather(), "And fertilizer?").await;
        let prompts = echo.prompts.lock().unwrap();
        assert!(prompts[1].contains("Farmer: Should I irrigate?\nAssistant: Wait until the soil dries.\nFarmer: And fertilizer?"));
    }

    #[tokio::test]
    async fn blank_query_is_ignored() {
        let (echo, requester) = requester(false);
        let mut session = ChatSession::new();
        assert!(session.ask(&requester, &[], &weather(), "   ").await.is_none());
        assert!(session.turns().is_empty());
        assert!(echo.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failure_appends_apology() {
        let (_, requester) = requester(true);
        let mut session = ChatSession::new();
        let reply = session.ask(&requester, &[], &weather(), "Hello").await.unwrap();
        assert_eq!(reply.text, FALLBACK_CHAT_REPLY);
        assert_eq!(session.turns().len(), 2);
    }

    struct Silent;

    #[async_trait]
    impl TextGenerator for Silent {
        async fn generate(&self, _request: GenerationRequest) -> Result<String, InsightError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_ask_leaves_no_turns() {
        let requester = InsightRequester::new(Arc::new(Silent), "Franschhoek");
        let mut session = ChatSession::new();

        let asked = tokio::time::timeout(
            Duration::from_secs(5),
            session.ask(&requester, &[], &weather(), "Still there?"),
        )
        .await;
        assert!(asked.is_err());
        assert!(session.turns().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_are_capped_by_least_recent_use() {
        let sessions = ChatSessions::new(2);
        let north = sessions.open("north").await;
        tokio::time::advance(Duration::from_secs(1)).await;
        sessions.open("south").await;
        tokio::time::advance(Duration::from_secs(1)).await;

        // touching north makes south the oldest
        sessions.open("north").await;
        tokio::time::advance(Duration::from_secs(1)).await;
        sessions.open("east").await;

        assert_eq!(sessions.len().await, 2);
        assert!(sessions.find("south").await.is_none());
        let kept = sessions.find("north").await.unwrap();
        assert!(Arc::ptr_eq(&kept, &north));
        assert!(sessions.find("east").await.is_some());
    }

    #[tokio::test]
    async fn find_never_creates() {
        let sessions = ChatSessions::default();
        assert!(sessions.find("north").await.is_none());
        assert!(sessions.is_empty().await);
    }
}
