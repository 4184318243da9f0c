//! Per-connection request loop.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::frame::{read_request, write_response, Inbound};
use shoaldb_core::{Database, Session};
use shoaldb_protocol::{error_response, ErrorKind};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Serves one connection at a time: strict request/response pairing over a
/// single [`Session`].
///
/// The session, and with it any open transaction, lives exactly as long as
/// the connection. A transaction left open at disconnect is rolled back.
/// With credentials configured, the session starts logged out.
pub struct ConnectionHandler {
    db: Arc<Database>,
    config: ServerConfig,
}

impl ConnectionHandler {
    /// Creates a handler over a shared database.
    pub fn new(db: Arc<Database>, config: ServerConfig) -> Self {
        Self { db, config }
    }

    /// Runs the request loop until the peer disconnects or idles out.
    pub async fn handle<S>(&self, stream: S, peer: &str) -> ServerResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut session = Session::new(Arc::clone(&self.db));
        if let Some(credentials) = &self.config.credentials {
            session = session.with_credentials(Arc::clone(credentials));
        }
        let mut session = Some(session);
        let max = self.config.max_frame_size;
        let idle = self.config.idle_timeout;

        loop {
            let inbound = if idle.is_zero() {
                read_request(&mut reader, max).await?
            } else {
                match tokio::time::timeout(idle, read_request(&mut reader, max)).await {
                    Ok(inbound) => inbound?,
                    Err(_) => {
                        tracing::debug!(peer, "idle timeout, disconnecting");
                        break;
                    }
                }
            };

            let response = match inbound {
                None => break,
                Some(Inbound::Oversized(len)) => {
                    tracing::warn!(peer, len, max, "oversized request frame discarded");
                    error_response(
                        ErrorKind::Validation,
                        format!("request frame of {len} bytes exceeds the {max} byte limit"),
                    )
                }
                Some(Inbound::Request(payload)) => {
                    let response = execute(&mut session, payload).await?;
                    if response.len() > max {
                        tracing::warn!(peer, len = response.len(), max, "oversized response replaced");
                        error_response(
                            ErrorKind::Validation,
                            format!(
                                "response of {} bytes exceeds the {max} byte frame limit",
                                response.len()
                            ),
                        )
                    } else {
                        response
                    }
                }
            };
            write_response(&mut writer, response.as_bytes()).await?;
        }
        Ok(())
    }
}

/// Runs one command on the blocking pool.
async fn execute(slot: &mut Option<Session>, payload: Vec<u8>) -> ServerResult<String> {
    let mut session = slot
        .take()
        .ok_or_else(|| ServerError::Internal("connection session is gone".into()))?;
    let (session, response) = tokio::task::spawn_blocking(move || {
        let response = match std::str::from_utf8(&payload) {
            Ok(text) => session.execute(text),
            Err(_) => error_response(ErrorKind::Parse, "request is not valid UTF-8"),
        };
        (session, response)
    })
    .await
    .map_err(|e| ServerError::Internal(format!("request worker failed: {e}")))?;
    *slot = Some(session);
    Ok(response)
}
