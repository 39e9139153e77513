//! Tokio-based Mimic server
//!
//! Accepts physical connections, performs the handshake, and either
//! adopts the connection into an existing session (roaming) or starts
//! a new multiplexed session over it. Substreams are handed to the
//! echo application.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use governor::clock::{QuantaClock, QuantaInstant};
use governor::middleware::NoOpMiddleware;
use governor::{Quota, RateLimiter};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::time::sleep;
use tokio_yamux::{config::Config as YamuxConfig, session::Session};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::constants::{ECHO_BUFFER_SIZE, ROTATE_GRACE};
use crate::presets::PresetRegistry;
use crate::protocol;
use crate::transport::VirtualConn;

type ConnRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    QuantaClock,
    NoOpMiddleware<QuantaInstant>,
>;

/// One live logical session owned by the session table
struct SessionEntry {
    vconn: VirtualConn<TcpStream>,
}

/// Mimic server instance
pub struct Server {
    config: ServerConfig,
    registry: PresetRegistry,
    /// Session table: the sole owner of every live session; removal
    /// on multiplexer termination is the unique destruction path
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let mut registry = PresetRegistry::new();
        registry.load_custom(config.domains_file.as_deref(), config.presets_dir.as_deref());
        Self {
            config,
            registry,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live sessions in the table
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Bind the configured port and serve until shutdown. A bind
    /// failure is fatal.
    pub async fn run(self: Arc<Self>, shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let addr = format!("0.0.0.0:{}", self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!("mimic server listening on {addr}");
        self.run_on(listener, shutdown).await
    }

    /// Serve on an already-bound listener (used by tests)
    pub async fn run_on(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let limiter: Option<ConnRateLimiter> = NonZeroU32::new(self.config.rate_limit)
            .map(|rate| RateLimiter::direct(Quota::per_second(rate)));

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("server accept loop shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((conn, peer)) => {
                            if let Some(limiter) = &limiter {
                                if limiter.check().is_err() {
                                    warn!("connection rate limit exceeded, dropping {peer}");
                                    continue;
                                }
                            }
                            let server = Arc::clone(&self);
                            tokio::spawn(async move {
                                server.handle_connection(conn, peer).await;
                            });
                        }
                        Err(err) => {
                            warn!("accept error: {err}");
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, mut conn: TcpStream, peer: SocketAddr) {
        let hello = match protocol::server_read_hello(&mut conn).await {
            Ok(hello) => hello,
            Err(err) => {
                // close without a reply
                warn!("[{peer}] handshake failed: {err}");
                return;
            }
        };

        let profile = self.registry.detect(&hello.sni);
        debug!(
            "[{peer}] connection accepted, sni={} sid={} profile={}",
            hello.sni, hello.session_id, profile.name
        );

        // legacy hellos without a session id always open a fresh session
        let session_id = if hello.session_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            hello.session_id.clone()
        };

        // admission is decided before any reply is written; a rejected
        // connection closes without one, exactly like a framing failure
        let mut sessions = self.sessions.lock().await;
        if let Some(entry) = sessions.get(&session_id) {
            // roaming: the new socket adopts the existing session, and
            // the OK reply precedes the swap
            if let Err(err) = protocol::server_send_ok(&mut conn).await {
                warn!("[{peer}] handshake reply failed: {err}");
                return;
            }
            info!("[{peer}] roaming session {session_id} to sni={}", hello.sni);
            let retired = entry.vconn.swap(conn);
            drop(sessions);
            if let Some(retired) = retired {
                // dispose the displaced socket once the peer has
                // swapped to the new one and in-flight bytes drained
                tokio::spawn(async move {
                    sleep(ROTATE_GRACE).await;
                    drop(retired);
                });
            }
            return;
        }

        if sessions.len() >= self.config.max_clients {
            warn!("[{peer}] max_clients reached, rejecting session {session_id}");
            return;
        }

        if let Err(err) = protocol::server_send_ok(&mut conn).await {
            warn!("[{peer}] handshake reply failed: {err}");
            return;
        }

        info!("[{peer}] creating session {session_id}");
        let vconn = VirtualConn::new(conn);
        let mut session = Session::new_server(vconn.clone(), YamuxConfig::default());
        sessions.insert(session_id.clone(), SessionEntry { vconn });
        drop(sessions);

        let server = Arc::clone(&self);
        tokio::spawn(async move {
            while let Some(stream) = session.next().await {
                match stream {
                    Ok(stream) => {
                        tokio::spawn(echo_stream(stream));
                    }
                    Err(err) => {
                        debug!("session {session_id} multiplexer error: {err}");
                        break;
                    }
                }
            }
            info!("session {session_id} closed");
            server.remove_session(&session_id).await;
        });
    }

    async fn remove_session(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(entry) = sessions.remove(session_id) {
            entry.vconn.close();
        }
    }
}

/// Reference application: echo every substream byte back to its sender
async fn echo_stream<S: AsyncRead + AsyncWrite + Unpin>(mut stream: S) {
    let mut buf = vec![0u8; ECHO_BUFFER_SIZE];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => {
                if stream.write_all(&buf[..n]).await.is_err() {
                    return;
                }
            }
        }
    }
}
