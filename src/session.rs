//! Process-wide session table
//!
//! Tracks every live MCP session and owns its push channel. Transport adapters write to a
//! client only through [`SessionTable::deliver`].

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Sse,
    Stream,
}

/// Frame pushed to a client; each adapter decides the wire encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum PushFrame {
    Message(Value),
    Ping,
}

pub type PushSender = mpsc::Sender<PushFrame>;

/// Identifies one binding of a push channel to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelId(u64);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub transport: Transport,
    pub initialized: bool,
    pub client_info: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub has_push: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session {0} not found")]
    NotFound(String),
    #[error("session {0} already has a live push channel")]
    AlreadyBound(String),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LiveCounts {
    pub sse: usize,
    pub stream: usize,
}

struct PushHandle {
    channel: ChannelId,
    sender: PushSender,
}

struct Session {
    id: String,
    transport: Transport,
    initialized: bool,
    client_info: Option<Value>,
    created_at: DateTime<Utc>,
    last_active: Instant,
    opened_seq: u64,
    push: Option<PushHandle>,
}

impl Session {
    fn is_live(&self) -> bool {
        self.push
            .as_ref()
            .is_some_and(|handle| !handle.sender.is_closed())
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            transport: self.transport,
            initialized: self.initialized,
            client_info: self.client_info.clone(),
            created_at: self.created_at,
            has_push: self.is_live(),
        }
    }
}

#[derive(Default)]
struct TableState {
    sessions: HashMap<String, Session>,
    next_seq: u64,
}

#[derive(Clone, Default)]
pub struct SessionTable {
    inner: Arc<Mutex<TableState>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, TableState> {
        // Every critical section leaves the map consistent, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn open(&self, transport: Transport) -> String {
        let created_at = Utc::now();
        let id = format!(
            "{:x}-{}",
            created_at.timestamp_millis(),
            Uuid::new_v4().simple()
        );

        let mut state = self.state();
        state.next_seq += 1;
        let opened_seq = state.next_seq;
        state.sessions.insert(
            id.clone(),
            Session {
                id: id.clone(),
                transport,
                initialized: false,
                client_info: None,
                created_at,
                last_active: Instant::now(),
                opened_seq,
                push: None,
            },
        );
        drop(state);

        tracing::info!(session_id = %id, transport = ?transport, "session opened");
        id
    }

    pub fn bind(&self, id: &str, sender: PushSender) -> Result<ChannelId, SessionError> {
        let mut state = self.state();
        state.next_seq += 1;
        let channel = ChannelId(state.next_seq);
        let session = state
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        if session.is_live() {
            return Err(SessionError::AlreadyBound(id.to_string()));
        }
        session.push = Some(PushHandle { channel, sender });
        session.last_active = Instant::now();
        Ok(channel)
    }

    pub fn lookup(&self, id: &str) -> Option<SessionInfo> {
        self.state().sessions.get(id).map(Session::info)
    }

    /// Records client activity so the idle sweep keeps the session.
    pub fn touch(&self, id: &str) -> bool {
        let mut state = self.state();
        let Some(session) = state.sessions.get_mut(id) else {
            return false;
        };
        session.last_active = Instant::now();
        true
    }

    /// Records `initialize`; re-initializing overwrites the stored client info.
    pub fn mark_initialized(&self, id: &str, client_info: Option<Value>) -> bool {
        let mut state = self.state();
        let Some(session) = state.sessions.get_mut(id) else {
            return false;
        };
        session.initialized = true;
        session.client_info = client_info;
        session.last_active = Instant::now();
        true
    }

    /// Removes the session and drops its push channel. Closing an absent session is a no-op.
    pub fn close(&self, id: &str) -> bool {
        let removed = self.state().sessions.remove(id);
        match removed {
            Some(session) => {
                tracing::info!(
                    session_id = %id,
                    transport = ?session.transport,
                    "session closed"
                );
                true
            }
            None => false,
        }
    }

    /// Closes the session only while `channel` is still its bound push channel.
    pub fn release(&self, id: &str, channel: ChannelId) -> bool {
        let owns_session = self
            .state()
            .sessions
            .get(id)
            .and_then(|session| session.push.as_ref())
            .is_some_and(|handle| handle.channel == channel);
        owns_session && self.close(id)
    }

    /// Pushes a frame to the session's client. Returns false instead of failing when the frame
    /// could not be queued; a closed channel also closes the session.
    pub fn deliver(&self, id: &str, frame: PushFrame) -> bool {
        let sender = {
            let state = self.state();
            match state
                .sessions
                .get(id)
                .and_then(|session| session.push.as_ref())
            {
                Some(handle) => handle.sender.clone(),
                None => return false,
            }
        };

        if sender.is_closed() {
            self.close(id);
            return false;
        }

        let is_message = matches!(frame, PushFrame::Message(_));
        match sender.try_send(frame) {
            Ok(()) => {
                if is_message {
                    self.touch(id);
                }
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(session_id = %id, "push channel full, frame dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(session_id = %id, "push channel closed during write");
                self.close(id);
                false
            }
        }
    }

    /// Newest live SSE session, else newest live streaming session.
    pub fn most_recent_live(&self) -> Option<SessionInfo> {
        let state = self.state();
        let newest = |transport: Transport| {
            state
                .sessions
                .values()
                .filter(|session| session.transport == transport && session.is_live())
                .max_by_key(|session| session.opened_seq)
                .map(Session::info)
        };
        newest(Transport::Sse).or_else(|| newest(Transport::Stream))
    }

    /// Removes sessions without a live push channel whose last activity is at least `max_idle`
    /// old. Sessions with a connected client are left to their drop guard.
    pub fn expire_idle(&self, max_idle: Duration) -> usize {
        let expired: Vec<(String, Transport)> = {
            let mut state = self.state();
            let ids: Vec<String> = state
                .sessions
                .values()
                .filter(|session| {
                    !session.is_live() && session.last_active.elapsed() >= max_idle
                })
                .map(|session| session.id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| state.sessions.remove(&id))
                .map(|session| (session.id, session.transport))
                .collect()
        };

        for (id, transport) in &expired {
            tracing::info!(session_id = %id, transport = ?transport, "idle session expired");
        }
        expired.len()
    }

    /// Runs [`SessionTable::expire_idle`] every `every` until the returned task is aborted.
    pub fn spawn_idle_sweeper(&self, every: Duration, max_idle: Duration) -> JoinHandle<()> {
        let sessions = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let expired = sessions.expire_idle(max_idle);
                if expired > 0 {
                    tracing::debug!(expired, remaining = sessions.len(), "idle sweep finished");
                }
            }
        })
    }

    /// Sessions with a connected push channel, per transport.
    pub fn live_counts(&self) -> LiveCounts {
        self.state()
            .sessions
            .values()
            .filter(|session| session.is_live())
            .fold(LiveCounts::default(), |mut counts, session| {
                match session.transport {
                    Transport::Sse => counts.sse += 1,
                    Transport::Stream => counts.stream += 1,
                }
                counts
            })
    }

    pub fn len(&self) -> usize {
        self.state().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
