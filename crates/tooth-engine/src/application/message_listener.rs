//! Background reader turning a session's byte stream into text messages.
//!
//! Framing is loose.  A message ends with the read that
//! returns less than a full buffer, or with a full buffer whose last byte is
//! NUL.  Trailing NULs are stripped and the bytes are decoded as lossy
//! UTF-8.  This matches peers that write one short message per call.
//! A peer that never ends a message is cut into pieces of at most
//! [`MAX_MESSAGE`] bytes.
//!
//! Every message is passed to the callback and appended to an inbox.
//! [`MessageListener::take_inbox`] hands the inbox over and clears the
//! "new message" flag.  [`send_message`] writes the matching frame.

use std::io;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use tokio::task::JoinHandle;
use tooth_core::Session;
use tracing::{debug, trace};

use super::lock;

/// Read buffer size; also the framing unit.
const READ_BUFFER: usize = 1024;

/// Terminates every frame written by [`send_message`].
const STOP_BYTE: u8 = 0;

/// Longest message held back waiting for its end.
pub const MAX_MESSAGE: usize = 64 * READ_BUFFER;

/// A callback receiving one decoded message.
pub type MessageCallback = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Default)]
struct Inbox {
    text: Mutex<String>,
    unread: AtomicBool,
}

pub struct MessageListener {
    session: Session,
    inbox: Arc<Inbox>,
    task: JoinHandle<()>,
}

impl MessageListener {
    /// Starts reading `session` in the background.
    pub fn spawn(session: Session, on_message: Option<MessageCallback>) -> Self {
        let inbox = Arc::new(Inbox::default());
        let task = tokio::spawn(read_messages(session.clone(), Arc::clone(&inbox), on_message));
        Self {
            session,
            inbox,
            task,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Returns `true` if a message arrived since the last
    /// [`take_inbox`](Self::take_inbox).
    pub fn has_message(&self) -> bool {
        self.inbox.unread.load(Ordering::SeqCst)
    }

    /// Returns everything received so far and clears the unread flag.
    pub fn take_inbox(&self) -> String {
        self.inbox.unread.store(false, Ordering::SeqCst);
        std::mem::take(&mut *lock(&self.inbox.text))
    }

    /// Returns `false` once the stream has ended or the listener stopped.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops reading.  The session stays open.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for MessageListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Writes `message` followed by the stop byte.
///
/// # Errors
///
/// Returns the session's write error.
pub async fn send_message(session: &Session, message: &str) -> io::Result<()> {
    let mut frame = Vec::with_capacity(message.len() + 1);
    frame.extend_from_slice(message.as_bytes());
    frame.push(STOP_BYTE);
    session.write_all(&frame).await
}

async fn read_messages(session: Session, inbox: Arc<Inbox>, on_message: Option<MessageCallback>) {
    let mut buffer = vec![0u8; READ_BUFFER];
    let mut pending = Vec::new();
    loop {
        let n = match session.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(peer = %session.peer(), error = %e, "message stream failed");
                break;
            }
        };
        pending.extend_from_slice(&buffer[..n]);
        if n == READ_BUFFER
            && buffer[READ_BUFFER - 1] != STOP_BYTE
            && pending.len() < MAX_MESSAGE
        {
            continue;
        }

        while pending.last() == Some(&STOP_BYTE) {
            pending.pop();
        }
        let message = String::from_utf8_lossy(&pending).into_owned();
        pending.clear();
        trace!(peer = %session.peer(), len = message.len(), "message received");

        lock(&inbox.text).push_str(&message);
        inbox.unread.store(true, Ordering::SeqCst);
        if let Some(callback) = &on_message {
            callback(message);
        }
    }
    debug!(peer = %session.peer(), "message listener finished");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
