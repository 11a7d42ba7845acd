//! Session resolution for `POST /messages`
//!
//! An explicit session id always wins and must name a known session. Without one, the request
//! is routed to the most recently opened live connection, but only in compatibility mode: with
//! several clients connected the guess can pick the wrong one.

use thiserror::Error;
use tracing::warn;

use crate::session::{SessionInfo, SessionTable};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("session {0} not found")]
    UnknownSession(String),
    #[error("session id is required")]
    MissingSession,
    #[error("no live connection to deliver to")]
    NoLiveSession,
}

pub fn resolve_session(
    sessions: &SessionTable,
    explicit_id: Option<&str>,
    fallback_enabled: bool,
) -> Result<SessionInfo, ResolveError> {
    if let Some(session_id) = explicit_id {
        return sessions
            .lookup(session_id)
            .ok_or_else(|| ResolveError::UnknownSession(session_id.to_string()));
    }

    if !fallback_enabled {
        return Err(ResolveError::MissingSession);
    }

    let session = sessions
        .most_recent_live()
        .ok_or(ResolveError::NoLiveSession)?;
    warn!(
        session_id = %session.id,
        transport = ?session.transport,
        "request without session id routed to most recent connection"
    );
    Ok(session)
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::session::Transport;

    #[test]
    fn explicit_id_must_exist() {
        let sessions = SessionTable::new();
        let id = sessions.open(Transport::Sse);

        assert_eq!(
            resolve_session(&sessions, Some(id.as_str()), false).map(|info| info.id),
            Ok(id)
        );
        assert_eq!(
            resolve_session(&sessions, Some("nope"), true),
            Err(ResolveError::UnknownSession("nope".to_string()))
        );
    }

    #[test]
    fn missing_id_is_rejected_without_fallback() {
        let sessions = SessionTable::new();
        let id = sessions.open(Transport::Sse);
        let (sender, _receiver) = mpsc::channel(1);
        sessions.bind(&id, sender).expect("bind succeeds");

        assert_eq!(
            resolve_session(&sessions, None, false),
            Err(ResolveError::MissingSession)
        );
    }

    #[test]
    fn fallback_picks_newest_sse_connection() {
        let sessions = SessionTable::new();
        let mut receivers = Vec::new();
        let mut ids = Vec::new();
        for transport in [Transport::Sse, Transport::Stream, Transport::Sse, Transport::Stream] {
            let id = sessions.open(transport);
            let (sender, receiver) = mpsc::channel(1);
            sessions.bind(&id, sender).expect("bind succeeds");
            receivers.push(receiver);
            ids.push(id);
        }

        let resolved = resolve_session(&sessions, None, true).expect("fallback resolves");
        assert_eq!(resolved.id, ids[2]);
        assert_eq!(resolved.transport, Transport::Sse);
    }

    #[test]
    fn fallback_without_live_connection_fails() {
        let sessions = SessionTable::new();
        sessions.open(Transport::Stream);

        assert_eq!(
            resolve_session(&sessions, None, true),
            Err(ResolveError::NoLiveSession)
        );
    }
}
