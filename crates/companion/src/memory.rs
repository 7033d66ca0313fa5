//! Rolling log of past-session summaries.
//!
//! Summaries written here come back on the next connect, folded into the
//! setup instruction so the companion can refer to earlier sessions.
//! On-device persistence is the host application's concern; this crate
//! provides the trait and an in-memory implementation.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::collections::VecDeque;
use tokio::sync::Mutex;

const MAX_SUMMARIES: usize = 10;
const MAX_SUMMARY_LEN: usize = 200;

#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Appends one summary, truncated to a sane length; the oldest entry is
    /// evicted past capacity.
    async fn add_summary(&self, summary: &str);
    /// All entries as one block of `- [MM/dd HH:MM] …` lines, oldest first,
    /// or `None` when empty.
    async fn formatted_summaries(&self) -> Option<String>;
    async fn clear(&self);
}

struct Entry {
    at: DateTime<Local>,
    text: String,
}

/// In-memory memory store.
#[derive(Default)]
pub struct SessionMemory {
    entries: Mutex<VecDeque<Entry>>,
}

impl SessionMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryStore for SessionMemory {
    async fn add_summary(&self, summary: &str) {
        let text = truncate(summary);
        let mut entries = self.entries.lock().await;
        if entries.len() == MAX_SUMMARIES {
            entries.pop_front();
        }
        entries.push_back(Entry {
            at: Local::now(),
            text,
        });
    }

    async fn formatted_summaries(&self) -> Option<String> {
        let entries = self.entries.lock().await;
        if entries.is_empty() {
            return None;
        }
        Some(
            entries
                .iter()
                .map(|entry| format!("- [{}] {}", entry.at.format("%m/%d %H:%M"), entry.text))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

fn truncate(summary: &str) -> String {
    if summary.chars().count() > MAX_SUMMARY_LEN {
        let mut text: String = summary.chars().take(MAX_SUMMARY_LEN).collect();
        text.push_str("...");
        text
    } else {
        summary.to_string()
    }
}
