//! Established duplex connection and the client-side connect path.
//!
//! A `Connection` is either fully live (both stream halves present, role
//! assigned) or fully torn down. Sends are serialized behind one lock and
//! receives behind another, so a frame is never interleaved with another
//! frame on the wire. A transport error tears the connection down; a framing
//! error leaves it open for the caller to decide.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::{PairStreamError, Result};
use crate::frame::{encode_frame, parse_header, HEADER_LEN};

/// Which side of the session this process plays. Fixed for the lifetime of
/// a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The connecting party. Speaks second during key exchange.
    Initiator,
    /// The listening party. Sends its public key first.
    Responder,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "Initiator"),
            Role::Responder => write!(f, "Responder"),
        }
    }
}

/// Deadlines applied by the channel. `None` blocks indefinitely.
#[derive(Debug, Clone, Default)]
pub struct ChannelConfig {
    /// Applies to connect, to each `send`, and to each `receive`.
    pub io_timeout: Option<Duration>,
    /// Applies to each `accept`.
    pub accept_timeout: Option<Duration>,
}

pub(crate) async fn with_deadline<T, F>(deadline: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| PairStreamError::Timeout(limit))?,
        None => fut.await,
    }
}

/// A live framed connection to one peer.
pub struct Connection {
    role: Role,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    io_timeout: Option<Duration>,
    live: AtomicBool,
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("peer_addr", &self.peer_addr)
            .field("local_addr", &self.local_addr)
            .field("live", &self.is_live())
            .finish()
    }
}

impl Connection {
    /// Wrap an already-connected stream.
    pub fn from_stream(stream: TcpStream, role: Role, config: &ChannelConfig) -> Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            role,
            peer_addr,
            local_addr,
            io_timeout: config.io_timeout,
            live: AtomicBool::new(true),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `false` once the connection has been closed or hit a transport error.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Send one frame: the 8-byte length header immediately followed by
    /// `payload`.
    ///
    /// Concurrent callers are serialized; each frame reaches the wire whole.
    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        // Oversized payloads fail before anything touches the stream.
        let frame = encode_frame(payload)?;
        if !self.is_live() {
            return Err(PairStreamError::ConnectionClosed);
        }

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(PairStreamError::ConnectionClosed)?;
        let result = with_deadline(self.io_timeout, async {
            writer.write_all(&frame).await?;
            writer.flush().await?;
            Ok::<(), PairStreamError>(())
        })
        .await;

        match result {
            Ok(()) => {
                tracing::debug!(role = %self.role, len = payload.len(), "frame sent");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(role = %self.role, error = %e, "send failed, tearing down");
                guard.take();
                drop(guard);
                self.teardown_reader();
                Err(e)
            }
        }
    }

    /// Receive one frame and return its payload.
    ///
    /// A malformed header or a stream that ends before the declared length
    /// yields a framing error and leaves the connection open. A clean end of
    /// stream at a frame boundary, an I/O error, or an expired deadline tears
    /// the connection down.
    pub async fn receive(&self) -> Result<Bytes> {
        if !self.is_live() {
            return Err(PairStreamError::ConnectionClosed);
        }

        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(PairStreamError::ConnectionClosed)?;
        let result = with_deadline(self.io_timeout, read_frame(reader)).await;

        match result {
            Ok(payload) => {
                tracing::debug!(role = %self.role, len = payload.len(), "frame received");
                Ok(payload)
            }
            Err(e) if e.is_framing() => {
                tracing::warn!(role = %self.role, error = %e, "discarding invalid frame");
                Err(e)
            }
            Err(e) => {
                tracing::warn!(role = %self.role, error = %e, "receive failed, tearing down");
                guard.take();
                drop(guard);
                self.teardown_writer().await;
                Err(e)
            }
        }
    }

    /// Release the stream. Closing an already-closed connection is a no-op.
    ///
    /// A `receive` blocked on another task is not interrupted; drop or
    /// cancel that future to abandon it.
    pub async fn close(&self) {
        if !self.live.swap(false, Ordering::AcqRel) {
            tracing::debug!(role = %self.role, "close on already-closed connection");
        }
        self.teardown_writer().await;
        self.teardown_reader();
        tracing::debug!(role = %self.role, peer = %self.peer_addr, "connection closed");
    }

    async fn teardown_writer(&self) {
        self.live.store(false, Ordering::Release);
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(error = %e, "shutdown on close");
            }
        }
    }

    fn teardown_reader(&self) {
        self.live.store(false, Ordering::Release);
        // A reader blocked in `receive` holds the lock; it drops its half
        // itself when it fails.
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
    }
}

/// Read one frame from `reader`.
pub(crate) async fn read_frame<R>(reader: &mut R) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let header = read_up_to(reader, HEADER_LEN).await?;
    if header.is_empty() {
        return Err(PairStreamError::ConnectionClosed);
    }
    if header.len() < HEADER_LEN {
        return Err(PairStreamError::Truncated {
            expected: HEADER_LEN,
            actual: header.len(),
        });
    }
    let mut fixed = [0u8; HEADER_LEN];
    fixed.copy_from_slice(&header);
    let len = parse_header(&fixed)?;

    let payload = read_up_to(reader, len).await?;
    if payload.len() < len {
        return Err(PairStreamError::Truncated {
            expected: len,
            actual: payload.len(),
        });
    }
    Ok(Bytes::from(payload))
}

/// Read until `n` bytes have arrived or the stream ends. The buffer grows
/// with the data rather than trusting the declared length up front.
async fn read_up_to<R>(reader: &mut R, n: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(n.min(64 * 1024));
    (&mut *reader).take(n as u64).read_to_end(&mut buf).await?;
    Ok(buf)
}

// ── Client side ──────────────────────────────────────────────────────────

/// Result of a liveness check against a listening address.
///
/// A successful probe keeps its socket so that connecting afterwards does not
/// open a second, redundant connection. Dropping the probe releases it.
#[derive(Debug)]
pub struct Probe {
    addr: SocketAddr,
    stream: Option<TcpStream>,
}

impl Probe {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `true` if a peer accepted the probe connection.
    pub fn is_live(&self) -> bool {
        self.stream.is_some()
    }

    /// Promote the probe socket into an Initiator connection.
    pub fn into_connection(self, config: &ChannelConfig) -> Result<Connection> {
        let stream = self
            .stream
            .ok_or(PairStreamError::NotListening(self.addr))?;
        let conn = Connection::from_stream(stream, Role::Initiator, config)?;
        tracing::info!(peer = %conn.peer_addr(), "connected (reused probe)");
        Ok(conn)
    }
}

/// Attempt a transient connection to `addr`.
pub async fn probe(addr: SocketAddr, config: &ChannelConfig) -> Probe {
    let attempt = with_deadline(config.io_timeout, async {
        Ok::<_, PairStreamError>(TcpStream::connect(addr).await?)
    })
    .await;
    match attempt {
        Ok(stream) => {
            tracing::debug!(%addr, "probe: peer is listening");
            Probe {
                addr,
                stream: Some(stream),
            }
        }
        Err(e) => {
            tracing::debug!(%addr, error = %e, "probe: nobody listening");
            Probe { addr, stream: None }
        }
    }
}

/// Liveness check that does not retain the socket.
pub async fn is_listening(addr: SocketAddr, config: &ChannelConfig) -> bool {
    probe(addr, config).await.is_live()
}

/// Open a fresh connection to `addr` as the Initiator.
pub async fn connect(addr: SocketAddr, config: &ChannelConfig) -> Result<Connection> {
    let stream = with_deadline(config.io_timeout, async {
        TcpStream::connect(addr)
            .await
            .map_err(|source| PairStreamError::Connect { addr, source })
    })
    .await?;
    let conn = Connection::from_stream(stream, Role::Initiator, config)?;
    tracing::info!(peer = %conn.peer_addr(), "connected");
    Ok(conn)
}
