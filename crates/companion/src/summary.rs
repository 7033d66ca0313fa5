//! End-of-session summarization over the non-realtime endpoint.
//!
//! When a session stops, the engine hands over the last few camera frames;
//! one `generateContent` call turns them into a line or two of text, which
//! goes into the memory log for the next session's handshake.

use crate::memory::MemoryStore;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use gamepal_live::hooks::SessionEndHook;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_SUMMARY_MODEL: &str = "gemini-2.5-flash";
const GENERATE_CONTENT_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const SUMMARY_PROMPT: &str = "From these game screenshots, summarize in one or two sentences \
which game was being played and what happened. Include the game title if you can tell.";

/// Produces a short text summary from the session's recent frames.
#[async_trait]
pub trait FrameSummarizer: Send + Sync {
    async fn summarize(&self, frames: &[Bytes]) -> anyhow::Result<Option<String>>;
}

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
}

#[derive(Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Serialize)]
struct RequestPart {
    #[serde(rename = "inline_data", skip_serializing_if = "Option::is_none")]
    inline_data: Option<RequestInlineData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Serialize)]
struct RequestInlineData {
    #[serde(rename = "mime_type")]
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// One-shot `generateContent` client against the same backing service the
/// realtime socket talks to.
pub struct GeminiSummarizer {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiSummarizer {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_model(api_key, DEFAULT_SUMMARY_MODEL)
    }

    pub fn with_model(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn url(&self) -> String {
        format!(
            "{GENERATE_CONTENT_BASE}/{}:generateContent?key={}",
            self.model, self.api_key
        )
    }
}

#[async_trait]
impl FrameSummarizer for GeminiSummarizer {
    async fn summarize(&self, frames: &[Bytes]) -> anyhow::Result<Option<String>> {
        if frames.is_empty() {
            return Ok(None);
        }
        let mut parts: Vec<RequestPart> = frames
            .iter()
            .map(|jpeg| RequestPart {
                inline_data: Some(RequestInlineData {
                    mime_type: "image/jpeg".to_string(),
                    data: BASE64.encode(jpeg),
                }),
                text: None,
            })
            .collect();
        parts.push(RequestPart {
            inline_data: None,
            text: Some(SUMMARY_PROMPT.to_string()),
        });

        let request = GenerateContentRequest {
            contents: vec![RequestContent { parts }],
        };
        let response = self
            .http
            .post(self.url())
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        let body: GenerateContentResponse = response.json().await?;

        let text = body
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .and_then(|content| content.parts.into_iter().find_map(|part| part.text));
        Ok(text
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty()))
    }
}

/// Engine end-hook: summarize the buffered frames and append the result to
/// the memory log. Failures are logged, never propagated.
pub struct MemorySummaryHook {
    summarizer: Arc<dyn FrameSummarizer>,
    memory: Arc<dyn MemoryStore>,
}

impl MemorySummaryHook {
    pub fn new(summarizer: Arc<dyn FrameSummarizer>, memory: Arc<dyn MemoryStore>) -> Self {
        Self { summarizer, memory }
    }
}

#[async_trait]
impl SessionEndHook for MemorySummaryHook {
    async fn on_session_end(&self, frames: Vec<Bytes>) {
        if frames.is_empty() {
            return;
        }
        match self.summarizer.summarize(&frames).await {
            Ok(Some(summary)) => {
                debug!(chars = summary.len(), "session summary saved");
                self.memory.add_summary(&summary).await;
            }
            Ok(None) => debug!("summarizer produced nothing for this session"),
            Err(e) => warn!(error = %e, "failed to summarize the session"),
        }
    }
}
