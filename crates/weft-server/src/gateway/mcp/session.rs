// crates/weft-server/src/gateway/mcp/session.rs
// Streaming MCP sessions
//
// Each session owns one outbound event channel with a single writer side;
// the notification broadcast collects session handles under the registry
// read lock but sends outside it, so one slow client never blocks another.
// State is process-local and lost on restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::notification;

/// Outbound queue depth per session; a slow client that falls further behind
/// starts missing notifications, which is acceptable because `tools/list` is
/// always re-issuable.
const SESSION_BUFFER: usize = 64;

/// A named SSE event ready to emit.
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub event: &'static str,
    pub data: String,
}

pub struct Session {
    pub id: String,
    tx: mpsc::Sender<OutboundEvent>,
    initialized: AtomicBool,
}

impl Session {
    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Queue an event for the client. Fails when the client is gone.
    pub async fn send(&self, event: &'static str, data: String) -> bool {
        self.tx
            .send(OutboundEvent { event, data })
            .await
            .is_ok()
    }

    /// Best-effort send that never waits; used for notifications.
    pub fn try_send(&self, event: &'static str, data: String) -> bool {
        self.tx.try_send(OutboundEvent { event, data }).is_ok()
    }
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a fresh session, returning its handle and the event stream
    /// the SSE response drains.
    pub async fn create(&self) -> (Arc<Session>, mpsc::Receiver<OutboundEvent>) {
        let (tx, rx) = mpsc::channel(SESSION_BUFFER);
        let session = Arc::new(Session {
            id: Uuid::new_v4().to_string(),
            tx,
            initialized: AtomicBool::new(false),
        });
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), Arc::clone(&session));
        (session, rx)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) {
        self.sessions.write().await.remove(id);
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Fire `notifications/tools/list_changed` at every initialized session.
    /// Sessions whose client went away are pruned.
    pub async fn broadcast_tools_changed(&self) {
        let sessions: Vec<Arc<Session>> = {
            let sessions = self.sessions.read().await;
            sessions.values().cloned().collect()
        };

        let payload = notification("notifications/tools/list_changed").to_string();
        let mut dead = Vec::new();
        for session in sessions {
            if !session.is_initialized() {
                continue;
            }
            if !session.try_send("message", payload.clone()) && session.tx.is_closed() {
                dead.push(session.id.clone());
            }
        }
        if !dead.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in dead {
                sessions.remove(&id);
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
