//! Conversation storage.
//!
//! All conversations live in memory and are written to a single JSON file
//! (`{ "<session_id>": [ {"role", "content"}, ... ] }`) after every answered
//! turn. The file is read once at startup.

use crate::models::ChatMessage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

pub type Conversations = HashMap<String, Vec<ChatMessage>>;

pub struct SessionStore {
    conversations: RwLock<Conversations>,
    path: Option<PathBuf>,
    /// Serializes file writes so concurrent saves cannot interleave.
    write_lock: Mutex<()>,
}

impl SessionStore {
    /// Store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Open the store backed by `path`.
    ///
    /// A missing file starts an empty store; an unreadable or corrupt file is
    /// logged and also starts empty (it is overwritten on the next save).
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let conversations = match tokio::fs::read(&path).await {
            Ok(bytes) => match parse_conversations(&bytes) {
                Ok((conversations, skipped)) => {
                    if skipped > 0 {
                        tracing::warn!(
                            path = %path.display(),
                            skipped,
                            "Dropped unreadable messages from sessions file"
                        );
                    }
                    tracing::info!(
                        path = %path.display(),
                        sessions = conversations.len(),
                        "Loaded saved sessions"
                    );
                    conversations
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Sessions file is not valid JSON; starting empty"
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to read sessions file; starting empty"
                );
                HashMap::new()
            }
        };

        Self {
            conversations: RwLock::new(conversations),
            path: Some(path),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Start a turn: create the conversation (seeded with `system_prompt`) if
    /// needed, append the optional context message and the user question, and
    /// return the full history to send to the model.
    pub async fn begin_turn(
        &self,
        session_id: &str,
        system_prompt: &str,
        context: Option<ChatMessage>,
        question: ChatMessage,
    ) -> Vec<ChatMessage> {
        let mut conversations = self.conversations.write().await;
        let history = conversations
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session_id, "Creating conversation");
                vec![ChatMessage::system(system_prompt)]
            });

        if let Some(context) = context {
            history.push(context);
        }
        history.push(question);
        history.clone()
    }

    /// Append the model's answer to an existing conversation.
    pub async fn record_answer(&self, session_id: &str, answer: ChatMessage) {
        let mut conversations = self.conversations.write().await;
        conversations
            .entry(session_id.to_string())
            .or_default()
            .push(answer);
    }

    pub async fn history(&self, session_id: &str) -> Option<Vec<ChatMessage>> {
        self.conversations.read().await.get(session_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.conversations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.conversations.read().await.is_empty()
    }

    /// Write every conversation to the backing file.
    ///
    /// Writes go to a sibling temp file that is then renamed over the target.
    /// No-op for in-memory stores.
    pub async fn persist(&self) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _guard = self.write_lock.lock().await;
        let bytes = {
            let conversations = self.conversations.read().await;
            serde_json::to_vec_pretty(&*conversations)?
        };

        let tmp = path.with_extension("json.tmp");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Sessions saved");
        Ok(())
    }
}

/// Parse the sessions file message by message, so one malformed entry
/// (for example an unknown role) costs that entry only. Returns the
/// conversations and the number of messages dropped.
fn parse_conversations(bytes: &[u8]) -> serde_json::Result<(Conversations, usize)> {
    let raw: HashMap<String, Vec<serde_json::Value>> = serde_json::from_slice(bytes)?;
    let mut skipped = 0;

    let conversations = raw
        .into_iter()
        .map(|(session_id, messages)| {
            let total = messages.len();
            let parsed: Vec<ChatMessage> = messages
                .into_iter()
                .filter_map(|message| serde_json::from_value(message).ok())
                .collect();
            skipped += total - parsed.len();
            (session_id, parsed)
        })
        .collect();

    Ok((conversations, skipped))
}
