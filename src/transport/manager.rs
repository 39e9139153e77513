//! Client-side transport lifecycle: initial session and rotation
//!
//! The manager owns the current physical connection and the rotation
//! sequence: dial new, handshake with the same session id, swap the
//! virtual connection, retire the old socket after a grace delay. The
//! multiplexer session above never notices the exchange.

use anyhow::{bail, Context, Result};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_yamux::{config::Config as YamuxConfig, session::Session};
use tracing::{debug, info, warn};

use crate::constants::ROTATE_GRACE;
use crate::protocol;
use crate::transport::VirtualConn;

/// Manages the physical connections under one logical session
pub struct Manager {
    server_addr: String,
    session_id: String,
    /// Current virtual connection; rotations serialize on this lock
    state: Mutex<Option<VirtualConn<TcpStream>>>,
}

impl Manager {
    pub fn new(server_addr: String, session_id: String) -> Self {
        Self {
            server_addr,
            session_id,
            state: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Establish the initial connection and the multiplexer session
    /// over it. Returns the session; the caller drives it and opens
    /// substreams.
    pub async fn start_session(
        &self,
        initial_domain: &str,
    ) -> Result<Session<VirtualConn<TcpStream>>> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            bail!("session already started");
        }

        let mut conn = protocol::dial(&self.server_addr)
            .await
            .with_context(|| format!("failed to dial {}", self.server_addr))?;
        protocol::client_handshake(&mut conn, initial_domain, &self.session_id)
            .await
            .context("initial handshake failed")?;

        let vconn = VirtualConn::new(conn);
        let session = Session::new_client(vconn.clone(), YamuxConfig::default());
        if let (Ok(local), Ok(peer)) = (vconn.local_addr(), vconn.peer_addr()) {
            debug!("transport bound {local} -> {peer}");
        }
        *state = Some(vconn);

        info!(
            domain = initial_domain,
            session_id = %self.session_id,
            "session established with {}",
            self.server_addr
        );
        Ok(session)
    }

    /// Rotate the transport to a fresh physical connection fronted as
    /// `new_domain`, keeping the multiplexer session alive.
    ///
    /// A dial or handshake failure leaves the current transport
    /// untouched; only the new socket is closed. The displaced socket
    /// is closed on a detached task after a short grace delay so
    /// in-flight bytes can drain.
    pub async fn rotate_transport(&self, new_domain: &str) -> Result<()> {
        let state = self.state.lock().await;
        let vconn = state.as_ref().context("session not initialized")?;
        if vconn.is_closed() {
            bail!("virtual transport is closed");
        }

        debug!("rotating transport to {new_domain}");

        let mut conn = protocol::dial(&self.server_addr)
            .await
            .context("failed to dial new transport")?;
        protocol::client_handshake(&mut conn, new_domain, &self.session_id)
            .await
            .context("handshake failed for new transport")?;

        let retired = vconn.swap(conn);
        drop(state);

        // grace close runs outside the manager lock; dropping the
        // handle closes the displaced socket
        if let Some(retired) = retired {
            tokio::spawn(async move {
                sleep(ROTATE_GRACE).await;
                drop(retired);
            });
        }

        info!("transport rotated to {new_domain}");
        Ok(())
    }

    /// Tear down the current transport; the multiplexer session above
    /// will observe the close and terminate.
    pub async fn close(&self) {
        if let Some(vconn) = self.state.lock().await.as_ref() {
            if !vconn.is_closed() {
                vconn.close();
                debug!("virtual transport closed");
            }
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        if let Ok(state) = self.state.try_lock() {
            if let Some(vconn) = state.as_ref() {
                vconn.close();
            }
        } else {
            warn!("manager dropped while a rotation was in progress");
        }
    }
}
