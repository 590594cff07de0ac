//! Session identifiers and the table of live protocol handlers.

use std::{collections::HashMap, fmt, sync::Arc};

use chrono::{Duration, Utc};
use rand::Rng;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{errors::AppError, mcp::handler::ProtocolHandler};

pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

const SESSION_ID_BYTES: usize = 32;

/// Server-issued session token: 32 random bytes, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        let bytes: [u8; SESSION_ID_BYTES] = rand::rng().random();
        Self(bytes.iter().map(|byte| format!("{byte:02x}")).collect())
    }

    /// Anything that could not have been issued by [`SessionId::generate`] is rejected.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let well_formed = value.len() == SESSION_ID_BYTES * 2
            && value
                .bytes()
                .all(|byte| matches!(byte, b'0'..=b'9' | b'a'..=b'f'));
        well_formed.then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct SessionTable {
    sessions: RwLock<HashMap<SessionId, Arc<ProtocolHandler>>>,
    max_sessions: usize,
    idle_timeout: Option<Duration>,
}

impl SessionTable {
    pub fn new(max_sessions: usize, idle_timeout: Option<std::time::Duration>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
            idle_timeout: idle_timeout.and_then(|timeout| Duration::from_std(timeout).ok()),
        }
    }

    /// Inserts or replaces. A replaced handler is closed before it is dropped.
    pub async fn put(&self, id: SessionId, handler: Arc<ProtocolHandler>) -> Result<(), AppError> {
        let mut sessions = self.sessions.write().await;

        if !sessions.contains_key(&id) && sessions.len() >= self.max_sessions {
            // Dead entries must not hold capacity until the next reaper tick.
            self.evict_expired(&mut sessions);
            if sessions.len() >= self.max_sessions {
                return Err(AppError::SessionLimitReached {
                    max: self.max_sessions,
                });
            }
        }

        if let Some(previous) = sessions.insert(id.clone(), handler) {
            previous.close();
            debug!(session_id = %id, "replaced existing session handler");
        }
        info!(session_id = %id, total = sessions.len(), "session created");
        Ok(())
    }

    /// Live handler for `id`. Finding a session refreshes its idle clock.
    pub async fn get(&self, id: &SessionId) -> Option<Arc<ProtocolHandler>> {
        let sessions = self.sessions.read().await;
        let handler = sessions.get(id)?;

        if self.is_expired(handler) {
            debug!(session_id = %id, "session expired on access");
            return None;
        }

        handler.touch();
        Some(Arc::clone(handler))
    }

    /// Detaches the handler; closing it is the caller's job.
    pub async fn remove(&self, id: &SessionId) -> Option<Arc<ProtocolHandler>> {
        let mut sessions = self.sessions.write().await;
        let removed = sessions.remove(id);
        if removed.is_some() {
            info!(session_id = %id, total = sessions.len(), "session removed");
        }
        removed
    }

    /// Removes and closes sessions idle past the timeout. Returns how many went.
    pub async fn reap_idle(&self) -> usize {
        if self.idle_timeout.is_none() {
            return 0;
        }

        let mut sessions = self.sessions.write().await;
        self.evict_expired(&mut sessions)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    fn evict_expired(&self, sessions: &mut HashMap<SessionId, Arc<ProtocolHandler>>) -> usize {
        let before = sessions.len();
        sessions.retain(|id, handler| {
            let expired = self.is_expired(handler);
            if expired {
                debug!(session_id = %id, "closing idle session");
                handler.close();
            }
            !expired
        });

        let removed = before - sessions.len();
        if removed > 0 {
            info!(
                removed,
                remaining = sessions.len(),
                "cleaned up idle sessions"
            );
        }
        removed
    }

    /// A session with an attached stream is never idle.
    fn is_expired(&self, handler: &ProtocolHandler) -> bool {
        self.idle_timeout.is_some_and(|timeout| {
            !handler.has_streams() && handler.idle_for(Utc::now()) > timeout
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::SampleTools;

    fn handler(id: &SessionId) -> Arc<ProtocolHandler> {
        Arc::new(ProtocolHandler::new(
            Arc::new(SampleTools::new()),
            Some(id.clone()),
        ))
    }

    #[test]
    fn generated_ids_are_unique_hex() {
        let first = SessionId::generate();
        let second = SessionId::generate();

        assert_ne!(first, second);
        assert_eq!(first.as_str().len(), 64);
        assert_eq!(SessionId::parse(first.as_str()), Some(first));
    }

    #[test]
    fn parse_rejects_foreign_ids() {
        assert_eq!(SessionId::parse(""), None);
        assert_eq!(SessionId::parse("abc"), None);
        assert_eq!(SessionId::parse(&"G".repeat(64)), None);
        assert_eq!(SessionId::parse(&"A".repeat(64)), None);
    }

    #[tokio::test]
    async fn put_get_remove_round() {
        let table = SessionTable::new(8, None);
        let id = SessionId::generate();
        let created = handler(&id);

        table.put(id.clone(), Arc::clone(&created)).await.expect("put");
        let found = table.get(&id).await.expect("session present");
        assert!(Arc::ptr_eq(&found, &created));

        let removed = table.remove(&id).await.expect("session removed");
        assert!(Arc::ptr_eq(&removed, &created));
        assert!(table.get(&id).await.is_none());
        assert!(table.remove(&id).await.is_none());
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn put_closes_replaced_handler() {
        let table = SessionTable::new(8, None);
        let id = SessionId::generate();
        let first = handler(&id);
        let second = handler(&id);

        table.put(id.clone(), Arc::clone(&first)).await.expect("put");
        table.put(id.clone(), Arc::clone(&second)).await.expect("replace");

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn put_rejects_new_sessions_at_capacity() {
        let table = SessionTable::new(1, None);
        let first = SessionId::generate();
        table.put(first.clone(), handler(&first)).await.expect("put");

        let second = SessionId::generate();
        let err = table
            .put(second.clone(), handler(&second))
            .await
            .expect_err("table is full");
        assert!(matches!(err, AppError::SessionLimitReached { max: 1 }));

        table
            .put(first.clone(), handler(&first))
            .await
            .expect("replacing an existing id is allowed at capacity");
    }

    #[tokio::test]
    async fn idle_sessions_are_hidden_and_reaped() {
        let table = SessionTable::new(8, Some(std::time::Duration::from_millis(20)));
        let id = SessionId::generate();
        let created = handler(&id);
        table.put(id.clone(), Arc::clone(&created)).await.expect("put");

        tokio::time::sleep(std::time::Duration::from_millis(60)).await;

        assert!(table.get(&id).await.is_none());
        assert_eq!(table.reap_idle().await, 1);
        assert!(created.is_closed());
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn put_evicts_expired_entries_at_capacity() {
        let table = SessionTable::new(1, Some(std::time::Duration::from_millis(20)));
        let stale = SessionId::generate();
        let stale_handler = handler(&stale);
        table.put(stale.clone(), Arc::clone(&stale_handler)).await.expect("put");

        tokio::time::sleep(std::time::Duration::from_millis(60)).await;

        let fresh = SessionId::generate();
        table
            .put(fresh.clone(), handler(&fresh))
            .await
            .expect("expired entry frees its slot");
        assert!(stale_handler.is_closed());
        assert!(table.get(&stale).await.is_none());
        assert!(table.get(&fresh).await.is_some());
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn sessions_with_streams_never_expire() {
        let table = SessionTable::new(8, Some(std::time::Duration::from_millis(20)));
        let id = SessionId::generate();
        let created = handler(&id);
        table.put(id.clone(), Arc::clone(&created)).await.expect("put");
        let subscription = created.subscribe();

        tokio::time::sleep(std::time::Duration::from_millis(60)).await;

        assert_eq!(table.reap_idle().await, 0);
        assert!(!created.is_closed());
        assert!(table.get(&id).await.is_some());

        drop(subscription);
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        assert_eq!(table.reap_idle().await, 1);
        assert!(created.is_closed());
    }

    #[tokio::test]
    async fn reaping_is_disabled_without_timeout() {
        let table = SessionTable::new(8, None);
        let id = SessionId::generate();
        table.put(id.clone(), handler(&id)).await.expect("put");

        assert_eq!(table.reap_idle().await, 0);
        assert_eq!(table.len().await, 1);
    }
}
