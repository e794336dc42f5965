//! Session: a shared handle to one bidirectional byte stream with a peer.
//!
//! A [`Session`] exists before its stream does.  A client handshake creates
//! the handle as soon as it knows the (peer, service) pair, then attaches the
//! stream once the transport resolves the connect.  A server handshake builds
//! a session directly from an accepted stream.
//!
//! # Closing (for beginners)
//!
//! The handle is cheap to clone: every clone refers to the same stream.  Any
//! clone may call [`Session::close`] at any time, from any thread, even while
//! another task is blocked in [`Session::read`].  `close` never waits: it
//! flips a `watch` flag and drops whatever stream halves are not currently
//! in use.  A task blocked on the stream observes the flag, drops its half,
//! and returns end-of-file (reads) or `BrokenPipe` (writes).
//!
//! ```text
//! Session::new ──► attach(stream) ──► read / write_all ──► close
//!      │                                                    ▲
//!      └──────────────── close (no stream yet) ─────────────┘
//! ```

use std::fmt;
use std::io;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::domain::{peer::PeerAddress, service_id::ServiceId};

/// Any async byte stream a transport can hand to a session.
pub trait PeerStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> PeerStream for T {}

/// A type-erased transport stream.
pub type BoxedStream = Box<dyn PeerStream>;

struct Inner {
    peer: PeerAddress,
    service_id: ServiceId,
    reader: Mutex<Option<ReadHalf<BoxedStream>>>,
    writer: Mutex<Option<WriteHalf<BoxedStream>>>,
    attached: AtomicBool,
    closed: watch::Sender<bool>,
}

/// Cloneable handle to a peer byte stream.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Creates a handle with no stream attached yet.
    pub fn new(peer: PeerAddress, service_id: ServiceId) -> Self {
        Self::build(peer, service_id, None)
    }

    /// Creates a handle around an already-established stream.
    pub fn from_stream(peer: PeerAddress, service_id: ServiceId, stream: BoxedStream) -> Self {
        Self::build(peer, service_id, Some(stream))
    }

    fn build(peer: PeerAddress, service_id: ServiceId, stream: Option<BoxedStream>) -> Self {
        let attached = stream.is_some();
        let (reader, writer) = match stream {
            Some(s) => {
                let (r, w) = tokio::io::split(s);
                (Some(r), Some(w))
            }
            None => (None, None),
        };
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                peer,
                service_id,
                reader: Mutex::new(reader),
                writer: Mutex::new(writer),
                attached: AtomicBool::new(attached),
                closed,
            }),
        }
    }

    pub fn peer(&self) -> PeerAddress {
        self.inner.peer
    }

    pub fn service_id(&self) -> ServiceId {
        self.inner.service_id
    }

    /// Attaches the transport stream.
    ///
    /// Returns `false`, dropping `stream`, when the session was closed
    /// before or while the stream was being attached.
    pub async fn attach(&self, stream: BoxedStream) -> bool {
        if self.is_closed() {
            return false;
        }
        let (r, w) = tokio::io::split(stream);
        *self.inner.reader.lock().await = Some(r);
        *self.inner.writer.lock().await = Some(w);
        self.inner.attached.store(true, Ordering::SeqCst);

        if self.is_closed() {
            self.inner.reader.lock().await.take();
            self.inner.writer.lock().await.take();
            return false;
        }
        true
    }

    /// Returns `true` when a stream is attached and the session is open.
    pub fn is_connected(&self) -> bool {
        self.inner.attached.load(Ordering::SeqCst) && !self.is_closed()
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Reads into `buf`, returning the number of bytes read.
    ///
    /// Returns `Ok(0)` at end of stream or once the session is closed.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::NotConnected`] when no stream has been
    /// attached yet, or the underlying transport error.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Ok(0);
        }
        let mut guard = self.inner.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            return if self.is_closed() {
                Ok(0)
            } else {
                Err(io::ErrorKind::NotConnected.into())
            };
        };

        let outcome = tokio::select! {
            res = reader.read(buf) => Some(res),
            _ = wait_closed(self.inner.closed.subscribe()) => None,
        };
        if self.is_closed() {
            guard.take();
        }
        outcome.unwrap_or(Ok(0))
    }

    /// Writes all of `data` and flushes.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::BrokenPipe`] when the session is or becomes
    /// closed, [`io::ErrorKind::NotConnected`] when no stream is attached.
    pub async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let mut guard = self.inner.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(if self.is_closed() {
                io::ErrorKind::BrokenPipe.into()
            } else {
                io::ErrorKind::NotConnected.into()
            });
        };

        let outcome = tokio::select! {
            res = async {
                writer.write_all(data).await?;
                writer.flush().await
            } => Some(res),
            _ = wait_closed(self.inner.closed.subscribe()) => None,
        };
        if self.is_closed() {
            guard.take();
        }
        outcome.unwrap_or_else(|| Err(io::ErrorKind::BrokenPipe.into()))
    }

    /// Closes the session.  Idempotent and never blocks.
    ///
    /// Stream halves held by an in-flight read or write are released by
    /// that call as soon as it observes the close.
    pub fn close(&self) {
        if self.inner.closed.send_replace(true) {
            return;
        }
        if let Ok(mut reader) = self.inner.reader.try_lock() {
            reader.take();
        }
        if let Ok(mut writer) = self.inner.writer.try_lock() {
            writer.take();
        }
        debug!(peer = %self.inner.peer, service = %self.inner.service_id, "session closed");
    }
}

async fn wait_closed(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|closed| *closed).await;
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.inner.peer)
            .field("service_id", &self.inner.service_id)
            .field("connected", &self.is_connected())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
