//! Request router
//!
//! Decides per HTTP request whether it starts a session or continues one,
//! binds it to a [`ProtocolHandler`] and enforces the session lifecycle for
//! both session modes.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::config::SessionMode;
use crate::errors::AppError;
use crate::mcp::handler::{ProtocolHandler, Subscription};
use crate::mcp::message::JsonRpcBody;
use crate::mcp::session::{SessionId, SessionTable};
use crate::tools::ToolRegistry;

/// Outcome of a POST.
#[derive(Debug)]
pub struct PostReply {
    /// Set when this request created a session the client must echo back.
    pub issued_session: Option<SessionId>,
    /// `None` when the body held notifications only.
    pub body: Option<Value>,
}

/// An open server-push stream. Dropping it releases the handler and, for a
/// stateful session, removes the session from the table.
pub struct StreamLease {
    pub subscription: Subscription,
    handler: Arc<ProtocolHandler>,
    release: Option<(Arc<SessionTable>, SessionId)>,
}

impl StreamLease {
    #[cfg(test)]
    pub fn handler(&self) -> &Arc<ProtocolHandler> {
        &self.handler
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        let Some((sessions, id)) = self.release.take() else {
            self.handler.close();
            return;
        };

        debug!(session_id = %id, "stream disconnected");
        let handler = Arc::clone(&self.handler);
        let release = async move {
            // Only tear down the entry if it still belongs to this stream's handler.
            if let Some(current) = sessions.get(&id).await {
                if !Arc::ptr_eq(&current, &handler) {
                    return;
                }
            }
            if let Some(removed) = sessions.remove(&id).await {
                removed.close();
            }
            handler.close();
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(release);
            }
            Err(_) => self.handler.close(),
        }
    }
}

pub struct RequestRouter {
    mode: SessionMode,
    registry: Arc<dyn ToolRegistry>,
    sessions: Arc<SessionTable>,
}

impl RequestRouter {
    pub fn new(
        mode: SessionMode,
        registry: Arc<dyn ToolRegistry>,
        sessions: Arc<SessionTable>,
    ) -> Self {
        Self {
            mode,
            registry,
            sessions,
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn sessions(&self) -> &Arc<SessionTable> {
        &self.sessions
    }

    /// POST: send one envelope or a batch.
    pub async fn handle_post(
        &self,
        session_header: Option<&str>,
        raw_body: &[u8],
    ) -> Result<PostReply, AppError> {
        let body = JsonRpcBody::parse(raw_body)?;
        let initialize = body.is_initialize();
        debug!(mode = %self.mode, initialize, "classified post");

        match self.mode {
            SessionMode::Stateless => {
                let handler = self.throwaway_handler(initialize).await;
                let reply = handler.handle_body(body).await;
                handler.close();
                Ok(PostReply {
                    issued_session: None,
                    body: reply,
                })
            }
            SessionMode::Stateful => {
                let requested = session_header.and_then(SessionId::parse);
                let (handler, issued_session) = self.bind_session(requested, initialize).await?;
                let reply = handler.handle_body(body).await;
                Ok(PostReply {
                    issued_session,
                    body: reply,
                })
            }
        }
    }

    /// GET: attach a server-push stream.
    pub async fn open_stream(&self, session_header: Option<&str>) -> Result<StreamLease, AppError> {
        match self.mode {
            SessionMode::Stateless => {
                // Nothing can publish to a throwaway handler; the stream only idles.
                let handler = self.throwaway_handler(false).await;
                Ok(StreamLease {
                    subscription: handler.subscribe(),
                    handler,
                    release: None,
                })
            }
            SessionMode::Stateful => {
                let (id, handler) = self.require_session(session_header).await?;
                info!(session_id = %id, "stream opened");
                Ok(StreamLease {
                    subscription: handler.subscribe(),
                    handler,
                    release: Some((Arc::clone(&self.sessions), id)),
                })
            }
        }
    }

    /// DELETE: end a session.
    pub async fn terminate(&self, session_header: Option<&str>) -> Result<(), AppError> {
        match self.mode {
            SessionMode::Stateless => {
                let handler = self.throwaway_handler(false).await;
                handler.close();
                Ok(())
            }
            SessionMode::Stateful => {
                let (id, _) = self.require_session(session_header).await?;
                let removed = self
                    .sessions
                    .remove(&id)
                    .await
                    .ok_or(AppError::NoActiveSession)?;
                removed.close();
                info!(session_id = %id, "session terminated");
                Ok(())
            }
        }
    }

    async fn throwaway_handler(&self, initialize: bool) -> Arc<ProtocolHandler> {
        let handler = Arc::new(ProtocolHandler::new(Arc::clone(&self.registry), None));
        if !initialize {
            handler.mark_initialized().await;
        }
        handler
    }

    /// Reuses the requested session unless this is a handshake or nothing
    /// live matches, in which case a fresh session is registered.
    async fn bind_session(
        &self,
        requested: Option<SessionId>,
        initialize: bool,
    ) -> Result<(Arc<ProtocolHandler>, Option<SessionId>), AppError> {
        if let Some(id) = requested.as_ref() {
            if initialize {
                if let Some(superseded) = self.sessions.remove(id).await {
                    superseded.close();
                    info!(session_id = %id, "session superseded by new handshake");
                }
            } else if let Some(existing) = self.sessions.get(id).await {
                return Ok((existing, None));
            }
        }

        let id = SessionId::generate();
        let handler = Arc::new(ProtocolHandler::new(
            Arc::clone(&self.registry),
            Some(id.clone()),
        ));
        if !initialize {
            handler.mark_initialized().await;
        }
        self.sessions.put(id.clone(), Arc::clone(&handler)).await?;
        Ok((handler, Some(id)))
    }

    async fn require_session(
        &self,
        session_header: Option<&str>,
    ) -> Result<(SessionId, Arc<ProtocolHandler>), AppError> {
        let id = session_header
            .and_then(SessionId::parse)
            .ok_or(AppError::NoActiveSession)?;
        let handler = self
            .sessions
            .get(&id)
            .await
            .ok_or(AppError::NoActiveSession)?;
        Ok((id, handler))
    }
}
