//! Connection state machine (§3 "Connection", §4.C, §9 "Close-but-not-nil").
//!
//! A [`Connection`] owns one TLS (or, for test doubles, plain TCP) socket.
//! `transition_to(Disconnected)` closes the socket but does **not** drop the
//! underlying I/O handle: a reader that is mid-flight on another task must
//! observe an I/O error, not a null-pointer fault. [`Connection::clear_refs`]
//! is the separate, explicit operation that actually releases the handle,
//! and must only be called once the owner knows no borrowed reader remains.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;

use super::envelope::RequestEnvelope;
use super::framer::Framer;

/// The three states from spec.md §3/§4.C.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    TlsConnected,
    Operational,
}

impl ConnState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnState::TlsConnected | ConnState::Operational)
    }

    pub fn is_operational(self) -> bool {
        matches!(self, ConnState::Operational)
    }
}

/// The underlying duplex stream. `Closed` is the "closed but not nil" state:
/// the variant is still present (never behind an `Option::None`) so a
/// concurrent reader sees `io::ErrorKind::NotConnected` rather than a panic.
pub enum IoHandle {
    Tcp(TcpStream),
    Tls(Box<ClientTlsStream<TcpStream>>),
    /// A "dummy" simulation handle, installed by some preconditions (§9).
    /// Zone dispatch detects this and returns simulated outputs without
    /// touching a socket.
    Dummy,
    Closed,
}

impl IoHandle {
    fn poll_closed_read() -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::NotConnected,
            "connection is disconnected",
        )))
    }

    fn poll_closed_write<T>() -> Poll<io::Result<T>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::NotConnected,
            "connection is disconnected",
        )))
    }
}

impl AsyncRead for IoHandle {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            IoHandle::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            IoHandle::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
            IoHandle::Dummy | IoHandle::Closed => Self::poll_closed_read(),
        }
    }
}

impl AsyncWrite for IoHandle {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            IoHandle::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            IoHandle::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
            IoHandle::Dummy | IoHandle::Closed => Self::poll_closed_write(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            IoHandle::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            IoHandle::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
            IoHandle::Dummy | IoHandle::Closed => Self::poll_closed_write(),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            IoHandle::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            IoHandle::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
            IoHandle::Dummy | IoHandle::Closed => Self::poll_closed_write(),
        }
    }
}

impl From<TcpStream> for IoHandle {
    fn from(stream: TcpStream) -> Self {
        IoHandle::Tcp(stream)
    }
}

impl From<ClientTlsStream<TcpStream>> for IoHandle {
    fn from(stream: ClientTlsStream<TcpStream>) -> Self {
        IoHandle::Tls(Box::new(stream))
    }
}

/// One TLS (or dummy) connection to the DUT, carrying a framer and a queue
/// of notifications buffered while a synchronous response was awaited.
pub struct Connection {
    state: ConnState,
    /// Stays `true` for the rest of the test once any connect ever
    /// succeeded, even after the socket is closed (§3 "hadConnection").
    had_connection: bool,
    framer: Option<Framer<IoHandle>>,
    pending_notifications: VecDeque<RequestEnvelope>,
    is_dummy: bool,
}

impl Connection {
    pub fn disconnected() -> Self {
        Connection {
            state: ConnState::Disconnected,
            had_connection: false,
            framer: None,
            pending_notifications: VecDeque::new(),
            is_dummy: false,
        }
    }

    /// A "dummy" simulation connection, installed by some preconditions
    /// (§9): state is Operational, framer is absent, and zone dispatch
    /// returns simulated success for reads/subscribes without touching a
    /// socket.
    pub fn dummy_operational() -> Self {
        Connection {
            state: ConnState::Operational,
            had_connection: true,
            framer: None,
            pending_notifications: VecDeque::new(),
            is_dummy: true,
        }
    }

    pub fn from_handle(handle: IoHandle) -> Self {
        Connection {
            state: ConnState::TlsConnected,
            had_connection: true,
            framer: Some(Framer::new(handle)),
            pending_notifications: VecDeque::new(),
            is_dummy: false,
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn is_operational(&self) -> bool {
        self.state.is_operational()
    }

    pub fn had_connection(&self) -> bool {
        self.had_connection
    }

    pub fn is_dummy(&self) -> bool {
        self.is_dummy
    }

    pub fn framer_mut(&mut self) -> Option<&mut Framer<IoHandle>> {
        self.framer.as_mut()
    }

    pub fn mark_operational(&mut self) {
        if self.state == ConnState::TlsConnected {
            self.state = ConnState::Operational;
        }
    }

    pub fn push_notification(&mut self, notification: RequestEnvelope) {
        self.pending_notifications.push_back(notification);
    }

    pub fn pop_notification(&mut self) -> Option<RequestEnvelope> {
        self.pending_notifications.pop_front()
    }

    pub fn clear_notifications(&mut self) {
        self.pending_notifications.clear();
    }

    /// Transition to `Disconnected`. Idempotent: closing an already-closed
    /// connection is a no-op, and the shutdown below only runs once.
    /// Crucially, this does **not** drop the framer or its underlying
    /// handle — [`clear_refs`](Self::clear_refs) does that, once no reader
    /// is borrowing it. The socket itself *is* shut down here (§9 "closes
    /// the socket but does not nil handles"): a reader still polling the
    /// same handle must see an I/O error, not silently block forever.
    pub fn transition_to_disconnected(&mut self) {
        if self.state == ConnState::Disconnected {
            return;
        }
        self.state = ConnState::Disconnected;
        if let Some(framer) = self.framer.as_mut() {
            framer.shutdown_best_effort();
        }
    }

    /// Nil the handle once the owner knows no borrowed reader remains
    /// (§9). After this call the connection can be safely reused as a
    /// fresh `Connection::disconnected()`-equivalent.
    pub fn clear_refs(&mut self) {
        self.framer = None;
        self.pending_notifications.clear();
    }

    pub fn set_had_connection(&mut self, value: bool) {
        self.had_connection = value;
    }
}

impl Default for Connection {
    fn default() -> Self {
        Connection::disconnected()
    }
}
