//! TCP connection roles and length-prefixed frame I/O.
//!
//! A `Connection` is either a listener (binds, accepts exactly one peer)
//! or a dialer (connects out). Either way the result is a `PeerHandle`
//! over one duplex stream, split into a `FrameReader` and `FrameWriter`
//! so the receive loop and send path never contend for the same half.
//!
//! TCP has no message boundaries, so every frame travels as a u32 LE
//! length prefix followed by the frame bytes. The prefix bounds reads at
//! `MAX_FRAME_LEN` in both directions.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

/// Largest frame accepted on the wire. Declared lengths above this are
/// a protocol violation and close the connection.
pub const MAX_FRAME_LEN: usize = 4096;

const LEN_PREFIX: usize = 4;

// ── Roles ─────────────────────────────────────────────────────────────────────

/// How this end of the channel came to hold its peer stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Bound and waited for exactly one inbound peer.
    Listener,
    /// Connected out to a remote listener.
    Dialer,
}

// ── Connection ────────────────────────────────────────────────────────────────

/// One end of the channel transport. At most one live peer at a time.
pub struct Connection {
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
    closed: bool,
}

impl Connection {
    /// Bind and start listening. No peer yet; call [`Connection::accept`].
    pub async fn listen(bind_addr: &str, port: u16) -> Result<Self, NetError> {
        let addr = format!("{bind_addr}:{port}");
        let listener = TcpListener::bind(&addr).await.map_err(|source| NetError::Bind {
            addr: addr.clone(),
            source,
        })?;
        let local_addr = listener.local_addr().ok();
        tracing::info!(addr = %addr, "listening");
        Ok(Self {
            listener: Some(listener),
            local_addr,
            closed: false,
        })
    }

    /// Wait for the single inbound peer.
    ///
    /// The listening socket is released once a peer has connected:
    /// this is a two-party channel, there is never a second accept.
    pub async fn accept(&mut self) -> Result<PeerHandle, NetError> {
        if self.closed {
            return Err(NetError::Closed);
        }
        let listener = self.listener.take().ok_or(NetError::Closed)?;
        let (stream, peer_addr) = listener.accept().await.map_err(NetError::Accept)?;
        tracing::info!(peer = %peer_addr, "peer connected");
        Ok(PeerHandle::new(stream, peer_addr, Role::Listener))
    }

    /// Connect to a remote listener, optionally bounded by a timeout.
    pub async fn dial(
        addr: &str,
        port: u16,
        timeout: Option<Duration>,
    ) -> Result<PeerHandle, NetError> {
        let target = format!("{addr}:{port}");
        let connect = TcpStream::connect(&target);
        let stream = match timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| NetError::Timeout(target.clone()))?,
            None => connect.await,
        }
        .map_err(|source| NetError::ConnectFailed {
            addr: target.clone(),
            source,
        })?;
        let peer_addr = stream.peer_addr().map_err(|source| NetError::ConnectFailed {
            addr: target.clone(),
            source,
        })?;
        tracing::info!(peer = %peer_addr, "connected");
        Ok(PeerHandle::new(stream, peer_addr, Role::Dialer))
    }

    /// The locally bound address (listener role). Useful when binding
    /// port 0 and needing the OS-assigned port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Idempotent. Drops the listening socket; later calls on this
    /// Connection fail with [`NetError::Closed`].
    pub fn close(&mut self) {
        self.closed = true;
        self.listener = None;
    }
}

// ── PeerHandle ────────────────────────────────────────────────────────────────

/// A connected peer stream with frame-level I/O on both halves.
pub struct PeerHandle {
    reader: FrameReader,
    writer: FrameWriter,
    role: Role,
}

impl std::fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle")
            .field("peer_addr", &self.reader.peer_addr)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl PeerHandle {
    fn new(stream: TcpStream, peer_addr: SocketAddr, role: Role) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: FrameReader {
                inner: BufReader::new(read_half),
                peer_addr,
            },
            writer: FrameWriter {
                inner: BufWriter::new(write_half),
                peer_addr,
            },
            role,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.reader.peer_addr
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Split into independent halves: the receive loop takes the reader,
    /// the send path takes the writer.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        (self.reader, self.writer)
    }

    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, NetError> {
        self.reader.read_frame().await
    }

    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), NetError> {
        self.writer.write_frame(frame).await
    }
}

/// Read half, the exclusive property of the receive loop.
pub struct FrameReader {
    inner: BufReader<OwnedReadHalf>,
    peer_addr: SocketAddr,
}

impl FrameReader {
    /// Read one length-prefixed frame.
    ///
    /// Returns `Ok(None)` when the peer closed the stream before the
    /// next length prefix, the clean-disconnect signal. EOF in the
    /// middle of a frame body is an error, not a disconnect.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, NetError> {
        let mut len_bytes = [0u8; LEN_PREFIX];
        match self.inner.read_exact(&mut len_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(NetError::Read(e)),
        }
        let len = u32::from_le_bytes(len_bytes) as usize;
        if len > MAX_FRAME_LEN {
            return Err(NetError::FrameTooLarge { got: len });
        }
        let mut frame = vec![0u8; len];
        self.inner
            .read_exact(&mut frame)
            .await
            .map_err(NetError::Read)?;
        Ok(Some(frame))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

/// Write half, shared behind one mutex by the send path.
pub struct FrameWriter {
    inner: BufWriter<OwnedWriteHalf>,
    peer_addr: SocketAddr,
}

impl FrameWriter {
    /// Write one length-prefixed frame and flush it.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), NetError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(NetError::FrameTooLarge { got: frame.len() });
        }
        self.inner
            .write_all(&(frame.len() as u32).to_le_bytes())
            .await
            .map_err(NetError::Write)?;
        self.inner.write_all(frame).await.map_err(NetError::Write)?;
        self.inner.flush().await.map_err(NetError::Write)?;
        Ok(())
    }

    /// Flush and shut down the write half, signalling EOF to the peer.
    pub async fn shutdown(&mut self) -> Result<(), NetError> {
        self.inner.flush().await.map_err(NetError::Write)?;
        self.inner.shutdown().await.map_err(NetError::Write)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum NetError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        source: std::io::Error,
    },

    #[error("connect to {0} timed out")]
    Timeout(String),

    #[error("accept failed: {0}")]
    Accept(std::io::Error),

    #[error("read failed: {0}")]
    Read(std::io::Error),

    #[error("write failed: {0}")]
    Write(std::io::Error),

    #[error("frame of {got} bytes exceeds the {MAX_FRAME_LEN}-byte limit")]
    FrameTooLarge { got: usize },

    #[error("connection is closed")]
    Closed,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
