use std::collections::HashMap;
use std::sync::Arc;

use kiln_core::{Message, Role, SessionId};
use tokio::sync::{Mutex as TokioMutex, OwnedMutexGuard, RwLock};
use tracing::debug;

/// A conversation session: ordered history, owned by the sandbox process.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub messages: Vec<Message>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Session {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            messages: Vec::new(),
            created_at: chrono::Utc::now(),
        }
    }
}

/// Exclusive access to one session. Appends from other invocations on the
/// same id wait until the guard is dropped.
pub struct SessionGuard {
    inner: OwnedMutexGuard<Session>,
}

impl SessionGuard {
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn push(&mut self, message: Message) {
        self.inner.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.inner.messages
    }
}

/// Per-process session store, keyed by session id.
///
/// Each session sits behind its own mutex, so work on different ids never
/// contends. Sessions are created lazily and live until the process exits.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<TokioMutex<Session>>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, id: &str) -> Arc<TokioMutex<Session>> {
        // Fast path: session already exists
        {
            let sessions = self.sessions.read().await;
            if let Some(slot) = sessions.get(id) {
                return Arc::clone(slot);
            }
        }
        // Slow path: create it
        let mut sessions = self.sessions.write().await;
        Arc::clone(sessions.entry(id.to_string()).or_insert_with(|| {
            debug!(session_id = %id, "session created");
            Arc::new(TokioMutex::new(Session::new(id.to_string())))
        }))
    }

    /// Take exclusive access to a session, creating it if absent.
    pub async fn lock(&self, id: &str) -> SessionGuard {
        let slot = self.slot(id).await;
        SessionGuard {
            inner: slot.lock_owned().await,
        }
    }

    /// Current history of a session, creating an empty one if absent.
    pub async fn get_or_create(&self, id: &str) -> Vec<Message> {
        self.lock(id).await.messages().to_vec()
    }

    pub async fn append(&self, id: &str, role: Role, content: impl Into<String>) {
        self.lock(id).await.push(Message::new(role, content));
    }

    /// History of an existing session. Never creates one.
    pub async fn messages(&self, id: &str) -> Option<Vec<Message>> {
        let slot = {
            let sessions = self.sessions.read().await;
            sessions.get(id).cloned()
        }?;
        let session = slot.lock().await;
        Some(session.messages.clone())
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn list(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }
}
