//! Conversation session store
//!
//! Each orchestrated call owns exactly one session for its lifetime. The
//! store only hands out shared handles; the owning call appends through its
//! [`SessionGuard`], which deletes the session when released or dropped. A
//! background reaper removes sessions older than a threshold as a backstop
//! for sessions that were created without a guard and never deleted.

use crate::orchestration::error::SessionError;
use crate::provider::{ChatMessage, MessageRole};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Opaque session identifier
pub type SessionId = String;

/// Read-only snapshot of a session's metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session id
    pub id: SessionId,
    /// Diagnostic label of the feature that opened the session
    pub tool_label: String,
    /// Wall-clock start time
    pub started_at: DateTime<Utc>,
    /// Number of messages appended so far, system prompt included
    pub message_count: usize,
}

/// Ordered conversation for one orchestrated call
#[derive(Debug)]
struct ConversationSession {
    id: SessionId,
    tool_label: String,
    messages: Vec<ChatMessage>,
    started_at: DateTime<Utc>,
}

impl ConversationSession {
    fn new(id: SessionId, tool_label: &str) -> Self {
        Self {
            id,
            tool_label: tool_label.to_string(),
            messages: Vec::new(),
            started_at: Utc::now(),
        }
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            tool_label: self.tool_label.clone(),
            started_at: self.started_at,
            message_count: self.messages.len(),
        }
    }

    /// Append a message, enforcing system-first then strict user/assistant alternation.
    fn push(&mut self, message: ChatMessage) -> Result<(), SessionError> {
        let allowed: &[MessageRole] = match self.messages.last().map(|m| m.role) {
            None => &[MessageRole::System, MessageRole::User],
            Some(MessageRole::System) | Some(MessageRole::Assistant) => &[MessageRole::User],
            Some(MessageRole::User) => &[MessageRole::Assistant],
        };

        if !allowed.contains(&message.role) {
            return Err(SessionError::RoleOrder {
                session_id: self.id.clone(),
                expected: allowed
                    .iter()
                    .map(MessageRole::as_str)
                    .collect::<Vec<_>>()
                    .join(" or "),
                found: message.role,
            });
        }

        self.messages.push(message);
        Ok(())
    }
}

#[derive(Debug)]
struct SessionEntry {
    created_at: Instant,
    session: Arc<Mutex<ConversationSession>>,
}

fn lock_session(session: &Mutex<ConversationSession>) -> MutexGuard<'_, ConversationSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keyed store of conversation sessions
///
/// Cloning yields another handle to the same store.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, SessionEntry>>>,
}

impl SessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, tool_label: &str, system_prompt: Option<&str>) -> (SessionId, Arc<Mutex<ConversationSession>>) {
        let id = uuid::Uuid::new_v4().to_string();
        let mut session = ConversationSession::new(id.clone(), tool_label);
        if let Some(prompt) = system_prompt {
            session.messages.push(ChatMessage::system(prompt));
        }
        let session = Arc::new(Mutex::new(session));

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id.clone(),
                SessionEntry {
                    created_at: Instant::now(),
                    session: Arc::clone(&session),
                },
            );

        tracing::debug!(session_id = %id, tool = tool_label, "session created");
        (id, session)
    }

    /// Create a session without a guard. The caller must delete it.
    pub fn create(&self, tool_label: &str, system_prompt: Option<&str>) -> SessionId {
        self.insert(tool_label, system_prompt).0
    }

    /// Create a session owned by the returned guard
    pub fn acquire(&self, tool_label: &str, system_prompt: Option<&str>) -> SessionGuard {
        let (id, session) = self.insert(tool_label, system_prompt);
        SessionGuard {
            store: self.clone(),
            id,
            session,
            released: AtomicBool::new(false),
        }
    }

    fn get(&self, id: &str) -> Result<Arc<Mutex<ConversationSession>>, SessionError> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|entry| Arc::clone(&entry.session))
            .ok_or_else(|| SessionError::NotFound {
                session_id: id.to_string(),
            })
    }

    /// Append a message to a session
    pub fn append(&self, id: &str, message: ChatMessage) -> Result<(), SessionError> {
        let session = self.get(id)?;
        let mut guard = lock_session(&session);
        guard.push(message)
    }

    /// Metadata snapshot of a session
    pub fn session_info(&self, id: &str) -> Result<SessionInfo, SessionError> {
        let session = self.get(id)?;
        let info = lock_session(&session).info();
        Ok(info)
    }

    /// Snapshot of a session's messages
    pub fn messages(&self, id: &str) -> Result<Vec<ChatMessage>, SessionError> {
        let session = self.get(id)?;
        let messages = lock_session(&session).messages.clone();
        Ok(messages)
    }

    /// Delete a session. Returns whether it existed.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some();
        if removed {
            tracing::debug!(session_id = id, "session deleted");
        }
        removed
    }

    /// Whether a session exists
    pub fn contains(&self, id: &str) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete sessions older than `max_age`.
    ///
    /// Sessions that still have an owner are skipped: a live
    /// [`SessionGuard`] or an in-flight store call holding a handle.
    pub fn reap_older_than(&self, max_age: Duration) -> usize {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let before = sessions.len();
        sessions.retain(|_, entry| {
            if entry.created_at.elapsed() < max_age {
                return true;
            }
            Arc::strong_count(&entry.session) > 1
        });
        before - sessions.len()
    }

    /// Start the background reaper.
    ///
    /// Runs until the returned handle is stopped or dropped. Must be called
    /// inside a Tokio runtime.
    pub fn spawn_reaper(&self, interval: Duration, max_age: Duration) -> ReaperHandle {
        let store = self.clone();
        let interval = interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let reaped = store.reap_older_than(max_age);
                if reaped > 0 {
                    tracing::warn!(reaped, "reaped stale sessions");
                }
            }
        });

        ReaperHandle { handle }
    }
}

/// Handle to the background reaper task
#[derive(Debug)]
pub struct ReaperHandle {
    handle: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the reaper
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Exclusive owner of one session
///
/// Released explicitly with [`SessionGuard::release`] or implicitly on drop;
/// either way the session is deleted once.
#[derive(Debug)]
pub struct SessionGuard {
    store: SessionStore,
    id: SessionId,
    session: Arc<Mutex<ConversationSession>>,
    released: AtomicBool,
}

impl SessionGuard {
    /// Session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Append a message
    pub fn append(&self, message: ChatMessage) -> Result<(), SessionError> {
        lock_session(&self.session).push(message)
    }

    /// Snapshot of the messages
    pub fn messages(&self) -> Vec<ChatMessage> {
        lock_session(&self.session).messages.clone()
    }

    /// Metadata snapshot
    pub fn info(&self) -> SessionInfo {
        lock_session(&self.session).info()
    }

    /// Delete the session from the store.
    ///
    /// Returns `true` only for the call that performed the cleanup.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.store.delete(&self.id);
        true
    }

    /// Whether the guard has been released
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.release();
    }
}
