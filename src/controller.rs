use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::audio::playback::EndedNotifier;
use crate::audio::{AudioBackend, CapturePipeline, PlaybackScheduler, SourceId};
use crate::config::Config;
use crate::error::LiveError;
use crate::protocol::LiveMessage;
use crate::session::{
    pending_session, PendingSession, SessionCallbacks, SessionConnector, SessionEvent, Transmitter,
};
use crate::state_machine::SessionState;
use crate::transcript::TurnAggregator;

/// Everything that drives the controller, delivered over one channel.
#[derive(Debug)]
pub enum LiveEvent {
    /// A callback of the session opened as `generation`.
    Session { generation: u64, event: SessionEvent },
    /// The connect call itself failed.
    OpenFailed { generation: u64, error: LiveError },
    TransmitFailed { generation: u64, error: LiveError },
    PlaybackEnded(SourceId),
}

/// Pushed to the UI as the session progresses.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiUpdate {
    Status {
        state: SessionState,
        active: bool,
        session_id: Option<String>,
    },
    Transcript {
        input: String,
        output: String,
    },
    TurnComplete {
        input: String,
        output: String,
    },
    Error {
        message: String,
        fatal: bool,
    },
}

/// What the UI reads for display. Sent as `{"type":"status",...}` like [`UiUpdate::Status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "status")]
pub struct StatusSnapshot {
    pub state: SessionState,
    pub active: bool,
    pub session_id: Option<String>,
    pub error: Option<String>,
    pub history: Vec<String>,
    pub current_input: String,
    pub current_output: String,
}

pub struct LiveController {
    config: Config,
    connector: Arc<dyn SessionConnector>,
    backend: Arc<dyn AudioBackend>,
    events_tx: mpsc::UnboundedSender<LiveEvent>,
    ui_tx: mpsc::UnboundedSender<UiUpdate>,

    state: SessionState,
    active: bool,
    last_error: Option<String>,
    generation: u64,
    session_id: Option<Uuid>,
    pending: Option<PendingSession>,
    transmitter: Option<(Transmitter, JoinHandle<()>)>,

    capture: CapturePipeline,
    playback: PlaybackScheduler,
    turns: TurnAggregator,
}

impl LiveController {
    pub fn new(
        config: Config,
        connector: Arc<dyn SessionConnector>,
        backend: Arc<dyn AudioBackend>,
        ui_tx: mpsc::UnboundedSender<UiUpdate>,
    ) -> (Self, mpsc::UnboundedReceiver<LiveEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let ended_tx = events_tx.clone();
        let notify_ended: EndedNotifier = Arc::new(move |id| {
            let _ = ended_tx.send(LiveEvent::PlaybackEnded(id));
        });

        let controller = Self {
            capture: CapturePipeline::new(config.capture_sample_rate, config.block_size),
            playback: PlaybackScheduler::new(config.playback_sample_rate, notify_ended),
            turns: TurnAggregator::new(),
            config,
            connector,
            backend,
            events_tx,
            ui_tx,
            state: SessionState::Idle,
            active: false,
            last_error: None,
            generation: 0,
            session_id: None,
            pending: None,
            transmitter: None,
        };
        (controller, events_rx)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[cfg(test)]
    pub fn turns(&self) -> &TurnAggregator {
        &self.turns
    }

    #[cfg(test)]
    pub fn playback(&self) -> &PlaybackScheduler {
        &self.playback
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state,
            active: self.active,
            session_id: self.session_id.map(|id| id.to_string()),
            error: self.last_error.clone(),
            history: self.turns.history().to_vec(),
            current_input: self.turns.current_input().to_string(),
            current_output: self.turns.current_output().to_string(),
        }
    }

    /// Acquire audio and start opening a session. Returns before the session is open.
    ///
    /// A session still in flight is closed and torn down first.
    pub fn start(&mut self) -> Result<(), LiveError> {
        if self.state.is_live() || self.state == SessionState::Closing {
            log::warn!("start() while {:?}, closing the previous session", self.state);
            self.set_active(false);
            self.request_close();
            self.release_resources();
        }

        self.generation += 1;
        self.turns.reset();
        self.last_error = None;
        let session_id = Uuid::new_v4();
        self.session_id = Some(session_id);
        self.set_state(SessionState::Connecting);

        // 先拿麦克风，失败则不建立会话
        if let Err(e) = self.acquire_audio() {
            self.fail(e.clone());
            return Err(e);
        }

        let generation = self.generation;
        let (resolver, pending) = pending_session();

        let failures = self.events_tx.clone();
        let transmitter = Transmitter::spawn(pending.clone(), move |error| {
            let _ = failures.send(LiveEvent::TransmitFailed { generation, error });
        });
        self.transmitter = Some(transmitter);
        self.pending = Some(pending);

        let callbacks = SessionCallbacks::new(generation, self.events_tx.clone());
        let connector = Arc::clone(&self.connector);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            match connector.connect(callbacks).await {
                Ok(session) => resolver.resolve(session),
                Err(error) => {
                    resolver.fail();
                    let _ = events.send(LiveEvent::OpenFailed { generation, error });
                }
            }
        });

        log::info!("[{}] Opening live session ({})", session_id, self.config.model);
        Ok(())
    }

    /// User-initiated stop. Marks inactive at once; teardown waits for the close callback.
    pub fn stop(&mut self) {
        match self.state {
            SessionState::Idle | SessionState::Closing => {
                log::debug!("stop() ignored in state {:?}", self.state);
            }
            SessionState::Error => {
                // 资源在进入 Error 时已释放
                self.request_close();
                self.set_state(SessionState::Idle);
            }
            _ => {
                self.set_active(false);
                if self.pending.is_some() {
                    // 请求关闭后不再发送音频
                    self.capture.teardown();
                    self.request_close();
                    self.set_state(SessionState::Closing);
                } else {
                    self.release_resources();
                    self.set_state(SessionState::Idle);
                }
            }
        }
    }

    pub fn handle_event(&mut self, event: LiveEvent) {
        match event {
            LiveEvent::PlaybackEnded(id) => self.playback.on_source_ended(id),
            LiveEvent::Session { generation, event } => {
                if generation != self.generation {
                    log::debug!("Ignoring {:?} from superseded session {}", event, generation);
                    return;
                }
                match event {
                    SessionEvent::Open => self.on_open(),
                    SessionEvent::Message(message) => self.on_message(message),
                    SessionEvent::Error(message) => self.on_error(LiveError::SessionError(message)),
                    SessionEvent::Close(reason) => self.on_close(&reason),
                }
            }
            LiveEvent::OpenFailed { generation, error } => {
                if generation != self.generation {
                    return;
                }
                if self.state == SessionState::Closing {
                    // 用户已经停止，不会再有 close 回调
                    log::info!("Session open failed after stop: {}", error);
                    self.pending = None;
                    self.release_resources();
                    self.set_state(SessionState::Idle);
                } else {
                    self.on_error(error);
                }
            }
            LiveEvent::TransmitFailed { generation, error } => {
                if generation != self.generation {
                    return;
                }
                if !self.state.accepts_messages() {
                    log::debug!("Ignoring transmit failure in state {:?}: {}", self.state, error);
                    return;
                }
                log::warn!("{}", error);
                self.notify(UiUpdate::Error {
                    message: error.to_string(),
                    fatal: error.is_fatal(),
                });
            }
        }
    }

    fn on_open(&mut self) {
        if self.state != SessionState::Connecting {
            log::warn!("Open callback in state {:?}, ignoring", self.state);
            return;
        }
        self.set_state(SessionState::Open);

        let Some((transmitter, _)) = self.transmitter.as_ref() else {
            self.on_error(LiveError::SessionError("transmitter missing at open".into()));
            return;
        };
        if let Err(e) = self.capture.connect(transmitter.clone()) {
            self.on_error(e);
            return;
        }

        self.set_state(SessionState::Active);
        self.set_active(true);
    }

    fn on_message(&mut self, message: LiveMessage) {
        if !self.state.accepts_messages() {
            log::debug!("Dropping server message in state {:?}", self.state);
            return;
        }

        let mut transcript_changed = false;
        if let Some(text) = message.input_transcript.as_deref() {
            self.turns.append_input(text);
            transcript_changed = true;
        }
        if let Some(text) = message.output_transcript.as_deref() {
            self.turns.append_output(text);
            transcript_changed = true;
        }
        if transcript_changed {
            self.notify(UiUpdate::Transcript {
                input: self.turns.current_input().to_string(),
                output: self.turns.current_output().to_string(),
            });
        }

        if message.interrupted {
            let stopped = self.playback.interrupt();
            log::info!("Interrupted, stopped {} playback sources", stopped);
            self.set_state(SessionState::Interrupted);
        }

        for chunk in &message.audio_chunks {
            match self.playback.enqueue_chunk(&chunk.data) {
                Ok(_) => {
                    if self.state == SessionState::Interrupted {
                        self.set_state(SessionState::Active);
                    }
                }
                Err(e) => log::warn!("Skipping audio chunk: {}", e),
            }
        }

        if message.turn_complete {
            let (input, output) = self.turns.complete_turn();
            log::info!("Turn complete: user={:?} model={:?}", input, output);
            self.notify(UiUpdate::TurnComplete { input, output });
        }
    }

    fn on_error(&mut self, error: LiveError) {
        log::error!("{}", error);
        self.fail(error);
        self.request_close();
    }

    fn on_close(&mut self, reason: &str) {
        log::info!("Session closed: {}", reason);
        self.set_state(SessionState::Closing);
        self.set_active(false);
        self.pending = None;
        self.release_resources();
        self.set_state(SessionState::Idle);
    }

    fn acquire_audio(&mut self) -> Result<(), LiveError> {
        self.capture.acquire(self.backend.as_ref())?;
        let context = self.backend.open_playback(self.config.playback_sample_rate)?;
        self.playback.attach(context);
        Ok(())
    }

    /// Enter `Error`: surface the message, deactivate, release audio.
    fn fail(&mut self, error: LiveError) {
        self.last_error = Some(error.to_string());
        self.set_active(false);
        self.release_resources();
        self.set_state(SessionState::Error);
        self.notify(UiUpdate::Error {
            message: error.to_string(),
            fatal: error.is_fatal(),
        });
    }

    /// Ask the current session to close once it resolves. At most once per session.
    fn request_close(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let session_id = self.session_id;
        tokio::spawn(async move {
            if let Some(session) = pending.resolved().await {
                session.close().await;
                log::debug!("Close requested for session {:?}", session_id);
            }
        });
    }

    /// Tear down capture, playback and transmitter. Safe with partially released state.
    fn release_resources(&mut self) {
        self.capture.teardown();
        self.playback.close();
        if let Some((_, handle)) = self.transmitter.take() {
            handle.abort();
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        log::info!("State: {:?} -> {:?}", self.state, state);
        self.state = state;
        self.publish_status();
    }

    fn set_active(&mut self, active: bool) {
        if self.active == active {
            return;
        }
        self.active = active;
        self.publish_status();
    }

    fn publish_status(&self) {
        self.notify(UiUpdate::Status {
            state: self.state,
            active: self.active,
            session_id: self.session_id.map(|id| id.to_string()),
        });
    }

    fn notify(&self, update: UiUpdate) {
        if self.ui_tx.send(update).is_err() {
            log::debug!("UI receiver gone");
        }
    }
}
