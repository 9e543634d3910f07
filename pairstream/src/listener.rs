//! Server-side listener.
//!
//! `accept` blocks the calling task until one peer connects. A failed accept
//! leaves the listener open so the caller can retry. `accept_in_background`
//! moves the wait onto its own task, which the caller may cancel.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::connection::{with_deadline, ChannelConfig, Connection, Role};
use crate::error::{PairStreamError, Result};

/// A bound accept socket.
#[derive(Debug)]
pub struct Listener {
    local_addr: SocketAddr,
    config: ChannelConfig,
    socket: Mutex<Option<Arc<TcpListener>>>,
}

impl Listener {
    /// Bind `addr` and start listening.
    pub async fn bind(addr: SocketAddr, config: ChannelConfig) -> Result<Self> {
        let socket = TcpListener::bind(addr)
            .await
            .map_err(|source| PairStreamError::Bind { addr, source })?;
        let local_addr = socket.local_addr()?;
        tracing::info!(%local_addr, "listening");
        Ok(Self {
            local_addr,
            config,
            socket: Mutex::new(Some(Arc::new(socket))),
        })
    }

    /// The bound address (with the real port when bound to port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_open(&self) -> bool {
        self.socket.lock().is_some()
    }

    /// Wait for one peer and return a Responder connection.
    pub async fn accept(&self) -> Result<Connection> {
        let socket = self
            .socket
            .lock()
            .clone()
            .ok_or(PairStreamError::ListenerClosed)?;

        let (stream, peer) = with_deadline(self.config.accept_timeout, async {
            socket.accept().await.map_err(PairStreamError::AcceptFailed)
        })
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "accept failed, listener stays open");
            e
        })?;

        let conn = Connection::from_stream(stream, Role::Responder, &self.config)?;
        tracing::info!(%peer, "accepted connection");
        Ok(conn)
    }

    /// Run `accept` on a dedicated task.
    pub fn accept_in_background(self: Arc<Self>) -> AcceptTask {
        let handle = tokio::spawn(async move { self.accept().await });
        AcceptTask { handle }
    }

    /// Release the accept socket. Idempotent.
    ///
    /// An accept already in flight keeps its own handle to the socket until
    /// it completes or is cancelled.
    pub fn close(&self) {
        if self.socket.lock().take().is_some() {
            tracing::debug!(local_addr = %self.local_addr, "listener closed");
        }
    }
}

/// A pending background accept.
#[derive(Debug)]
pub struct AcceptTask {
    handle: JoinHandle<Result<Connection>>,
}

impl AcceptTask {
    /// Abandon the wait. `wait` then reports `Cancelled`.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the accept to finish.
    pub async fn wait(self) -> Result<Connection> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(PairStreamError::Cancelled),
            Err(e) => Err(PairStreamError::Io(std::io::Error::other(e))),
        }
    }
}
