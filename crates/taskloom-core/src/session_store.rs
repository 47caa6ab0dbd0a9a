// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Persisted session store, distinct from the in-memory [`crate::Session`]
//! the turn loop mutates live. This is the durable record the Engine appends
//! to after every turn and reloads across process restarts, laid out at
//! `.agents/sessions/<date>_<sessionId>/`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// History entries beyond this count are dropped (oldest first) on append.
pub const MAX_HISTORY_SIZE: usize = 100;
/// History entries older than this are pruned on load.
pub const MAX_AGE_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One persisted turn. Mirrors `taskloom_model::Message` but in a
/// disk-stable shape that does not change when the provider wire format
/// does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self { role, content: content.into(), tool_call_id: None, timestamp }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// In-memory view of one session's durable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub metadata: SessionMetadata,
    pub history: Vec<ChatMessage>,
}

/// Single-writer handle onto one session directory.
///
/// `append_message` and `save` take `&self` but serialize through an
/// internal `Mutex` (single-writer discipline) so concurrent callers
/// never interleave partial writes; `save`/`load_history` use atomic
/// rename-after-write, matching [`taskloom_memory`]'s persistence
/// discipline.
pub struct SessionStore {
    dir: PathBuf,
    state: Mutex<PersistedSession>,
}

impl SessionStore {
    /// Start a brand-new session rooted at `sessions_root` (normally
    /// `.agents/sessions`).
    pub fn new(sessions_root: impl AsRef<Path>, session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        let now = Utc::now();
        let dir = session_dir(sessions_root.as_ref(), &session_id, now);
        let metadata = SessionMetadata {
            session_id,
            start_time: now,
            end_time: None,
            compressed: false,
            parent_session_id: None,
            summary: None,
        };
        Self { dir, state: Mutex::new(PersistedSession { metadata, history: Vec::new() }) }
    }

    /// Load an existing session from `dir` (a directory previously produced
    /// by [`SessionStore::save`]). Applies the `MAX_AGE_DAYS` retention
    /// prune on load.
    pub async fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        let metadata_bytes = tokio::fs::read(dir.join("metadata.json")).await?;
        let metadata: SessionMetadata = serde_json::from_slice(&metadata_bytes)?;
        let history_bytes = tokio::fs::read(dir.join("history.json")).await?;
        let mut history: Vec<ChatMessage> = serde_json::from_slice(&history_bytes)?;

        let cutoff = Utc::now() - chrono::Duration::days(MAX_AGE_DAYS);
        history.retain(|m| m.timestamp >= cutoff);

        Ok(Self { dir, state: Mutex::new(PersistedSession { metadata, history }) })
    }

    /// Append one message, enforcing the `MAX_HISTORY_SIZE` retention
    /// policy (oldest entries dropped once the cap is exceeded).
    pub async fn append_message(&self, msg: ChatMessage) {
        let mut state = self.state.lock().await;
        state.history.push(msg);
        if state.history.len() > MAX_HISTORY_SIZE {
            let excess = state.history.len() - MAX_HISTORY_SIZE;
            state.history.drain(0..excess);
        }
    }

    /// Current in-memory history snapshot.
    pub async fn load_history(&self) -> Vec<ChatMessage> {
        self.state.lock().await.history.clone()
    }

    /// Persist `metadata.json` and `history.json` via write-tmp-then-rename.
    pub async fn save(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let state = self.state.lock().await;

        write_atomic(&self.dir.join("metadata.json"), &serde_json::to_vec_pretty(&state.metadata)?).await?;
        write_atomic(&self.dir.join("history.json"), &serde_json::to_vec_pretty(&state.history)?).await?;

        if let Some(summary) = &state.metadata.summary {
            write_atomic(&self.dir.join("compressed-summary.md"), summary.as_bytes()).await?;
        }
        if let Some(parent) = &state.metadata.parent_session_id {
            let parent_ref = serde_json::json!({ "parent_session_id": parent });
            write_atomic(&self.dir.join("parent-ref.json"), &serde_json::to_vec_pretty(&parent_ref)?).await?;
        }
        Ok(())
    }

    /// Seal this session (`end_time`, `compressed=true`, `summary`) and
    /// return a fresh [`SessionStore`] whose history is `compressed_history`
    /// and whose metadata references this session as `parent_session_id`.
    ///
    /// Callers are responsible for calling [`SessionStore::save`] on both
    /// the sealed session (`self`) and the new one.
    pub async fn compress_and_start_new_session(
        &self,
        sessions_root: impl AsRef<Path>,
        compressed_history: Vec<ChatMessage>,
        summary: impl Into<String>,
    ) -> Self {
        let summary = summary.into();
        let (old_id, now) = {
            let mut state = self.state.lock().await;
            state.metadata.end_time = Some(Utc::now());
            state.metadata.compressed = true;
            state.metadata.summary = Some(summary);
            (state.metadata.session_id.clone(), Utc::now())
        };

        let new_id = uuid::Uuid::new_v4().to_string();
        let dir = session_dir(sessions_root.as_ref(), &new_id, now);
        let metadata = SessionMetadata {
            session_id: new_id,
            start_time: now,
            end_time: None,
            compressed: false,
            parent_session_id: Some(old_id),
            summary: None,
        };
        Self { dir, state: Mutex::new(PersistedSession { metadata, history: compressed_history }) }
    }

    pub fn session_id(&self) -> PathBuf {
        self.dir.clone()
    }
}

fn session_dir(root: &Path, session_id: &str, at: DateTime<Utc>) -> PathBuf {
    root.join(format!("{}_{session_id}", at.format("%Y-%m-%d")))
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_and_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path(), "sess-1");
        store.append_message(ChatMessage::new(ChatRole::User, "hello", Utc::now())).await;
        store.append_message(ChatMessage::new(ChatRole::Assistant, "hi", Utc::now())).await;

        let history = store.load_history().await;
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn retention_drops_oldest_beyond_max_history_size() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path(), "sess-1");
        for i in 0..MAX_HISTORY_SIZE + 10 {
            store.append_message(ChatMessage::new(ChatRole::User, format!("msg {i}"), Utc::now())).await;
        }
        let history = store.load_history().await;
        assert_eq!(history.len(), MAX_HISTORY_SIZE);
        assert_eq!(history[0].content, "msg 10");
    }

    #[tokio::test]
    async fn save_then_open_yields_identical_metadata_and_history() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path(), "sess-1");
        store.append_message(ChatMessage::new(ChatRole::User, "hello", Utc::now())).await;
        store.save().await.unwrap();

        let dir = store.session_id();
        let reopened = SessionStore::open(&dir).await.unwrap();
        let history = reopened.load_history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "hello");
    }

    #[tokio::test]
    async fn compress_and_start_new_session_seals_old_and_links_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path(), "sess-1");
        store.append_message(ChatMessage::new(ChatRole::User, "hello", Utc::now())).await;

        let compressed = vec![ChatMessage::new(ChatRole::System, "summary of prior turns", Utc::now())];
        let new_store = store.compress_and_start_new_session(tmp.path(), compressed, "summary text").await;

        store.save().await.unwrap();
        new_store.save().await.unwrap();

        let sealed = SessionStore::open(store.session_id()).await.unwrap();
        let sealed_meta = sealed.state.lock().await.metadata.clone();
        assert!(sealed_meta.compressed);
        assert_eq!(sealed_meta.summary.as_deref(), Some("summary text"));

        let fresh = SessionStore::open(new_store.session_id()).await.unwrap();
        let fresh_meta = fresh.state.lock().await.metadata.clone();
        assert_eq!(fresh_meta.parent_session_id.as_deref(), Some(sealed_meta.session_id.as_str()));
    }
}
