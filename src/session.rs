//! Live session handle, its asynchronous resolution, and the audio transmitter.
//!
//! Opening a session returns before the session is usable. The handle is
//! therefore modelled as a single-assignment [`PendingSession`]: the connect
//! task owns the [`SessionResolver`], everything that needs the session awaits
//! [`PendingSession::resolved`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::audio::EncodedAudioPacket;
use crate::controller::LiveEvent;
use crate::error::LiveError;
use crate::protocol::LiveMessage;

/// An open bidirectional session.
#[async_trait]
pub trait LiveSession: Send + Sync {
    /// Stream one encoded audio block as realtime input.
    async fn send_realtime_input(&self, packet: EncodedAudioPacket) -> Result<(), LiveError>;

    /// Ask the server side to close. The close callback reports completion.
    async fn close(&self);
}

/// Opens sessions. Implemented by the WebSocket link and by test fakes.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, callbacks: SessionCallbacks) -> Result<Arc<dyn LiveSession>, LiveError>;
}

/// Callback hooks of one session, as events for the controller loop.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Open,
    Message(LiveMessage),
    Error(String),
    Close(String),
}

/// The four session callbacks (open/message/error/close), bound to one session generation.
#[derive(Clone)]
pub struct SessionCallbacks {
    generation: u64,
    tx: mpsc::UnboundedSender<LiveEvent>,
}

impl SessionCallbacks {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<LiveEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn on_open(&self) {
        self.emit(SessionEvent::Open);
    }

    pub fn on_message(&self, message: LiveMessage) {
        self.emit(SessionEvent::Message(message));
    }

    pub fn on_error(&self, message: impl Into<String>) {
        self.emit(SessionEvent::Error(message.into()));
    }

    pub fn on_close(&self, reason: impl Into<String>) {
        self.emit(SessionEvent::Close(reason.into()));
    }

    fn emit(&self, event: SessionEvent) {
        let event = LiveEvent::Session {
            generation: self.generation,
            event,
        };
        if self.tx.send(event).is_err() {
            log::debug!("Controller gone, dropping session event");
        }
    }
}

enum SessionSlot {
    Pending,
    Ready(Arc<dyn LiveSession>),
    Failed,
}

/// Write side of a [`PendingSession`]. Consumed on resolution, so it resolves at most once.
pub struct SessionResolver {
    tx: watch::Sender<SessionSlot>,
}

/// A session handle that may still be opening.
#[derive(Clone)]
pub struct PendingSession {
    rx: watch::Receiver<SessionSlot>,
}

pub fn pending_session() -> (SessionResolver, PendingSession) {
    let (tx, rx) = watch::channel(SessionSlot::Pending);
    (SessionResolver { tx }, PendingSession { rx })
}

impl SessionResolver {
    pub fn resolve(self, session: Arc<dyn LiveSession>) {
        self.tx.send_replace(SessionSlot::Ready(session));
    }

    pub fn fail(self) {
        self.tx.send_replace(SessionSlot::Failed);
    }
}

impl PendingSession {
    /// Wait for the session. `None` if opening failed or was abandoned.
    pub async fn resolved(&self) -> Option<Arc<dyn LiveSession>> {
        let mut rx = self.rx.clone();
        let slot = match rx.wait_for(|slot| !matches!(slot, SessionSlot::Pending)).await {
            Ok(slot) => slot,
            Err(_) => return None,
        };
        let session = match &*slot {
            SessionSlot::Ready(session) => Some(Arc::clone(session)),
            _ => None,
        };
        session
    }

    #[cfg(test)]
    /// The session if it is already open, without waiting.
    pub fn current(&self) -> Option<Arc<dyn LiveSession>> {
        match &*self.rx.borrow() {
            SessionSlot::Ready(session) => Some(Arc::clone(session)),
            _ => None,
        }
    }
}

/// Forwards encoded audio to the session in capture order.
///
/// `send` never blocks: packets go into an unbounded FIFO drained by a single
/// task that first waits for the pending session to resolve.
#[derive(Clone)]
pub struct Transmitter {
    tx: mpsc::UnboundedSender<EncodedAudioPacket>,
}

impl Transmitter {
    /// Start the forwarding task. `on_failure` receives every failed send.
    pub fn spawn<F>(pending: PendingSession, on_failure: F) -> (Self, JoinHandle<()>)
    where
        F: Fn(LiveError) + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(forward_packets(pending, rx, on_failure));
        (Self { tx }, handle)
    }

    pub fn send(&self, packet: EncodedAudioPacket) {
        if self.tx.send(packet).is_err() {
            log::debug!("Transmitter stopped, dropping audio block");
        }
    }
}

async fn forward_packets<F>(
    pending: PendingSession,
    mut rx: mpsc::UnboundedReceiver<EncodedAudioPacket>,
    on_failure: F,
) where
    F: Fn(LiveError),
{
    let Some(session) = pending.resolved().await else {
        log::warn!("Session never opened, discarding {} queued audio blocks", rx.len());
        return;
    };

    while let Some(packet) = rx.recv().await {
        // 不重试，失败只上报
        if let Err(e) = session.send_realtime_input(packet).await {
            log::warn!("Realtime input send failed: {}", e);
            on_failure(e);
        }
    }
    log::debug!("Transmitter drained");
}
