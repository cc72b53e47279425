//! In-memory stand-ins for the audio hardware and the live session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::audio::{
    AudioBackend, AudioBlock, BlockCallback, EncodedAudioPacket, EndedCallback, Microphone,
    PlaybackBuffer, PlaybackContext, SourceId,
};
use crate::error::LiveError;
use crate::session::{LiveSession, SessionCallbacks, SessionConnector};

// ======================== Session ========================

#[derive(Default)]
pub struct FakeSession {
    sent: Mutex<Vec<EncodedAudioPacket>>,
    attempts: Mutex<usize>,
    fail_sends: Mutex<bool>,
    close_count: Mutex<usize>,
}

impl FakeSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_sends(&self, fail: bool) {
        *self.fail_sends.lock().unwrap() = fail;
    }

    pub fn sent(&self) -> Vec<EncodedAudioPacket> {
        self.sent.lock().unwrap().clone()
    }

    pub fn send_attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    pub fn close_count(&self) -> usize {
        *self.close_count.lock().unwrap()
    }
}

#[async_trait]
impl LiveSession for FakeSession {
    async fn send_realtime_input(&self, packet: EncodedAudioPacket) -> Result<(), LiveError> {
        *self.attempts.lock().unwrap() += 1;
        if *self.fail_sends.lock().unwrap() {
            return Err(LiveError::TransmitFailure("socket closed".into()));
        }
        self.sent.lock().unwrap().push(packet);
        Ok(())
    }

    async fn close(&self) {
        *self.close_count.lock().unwrap() += 1;
    }
}

/// Hands out one [`FakeSession`] per connect and keeps the callbacks so tests
/// can play the server side.
#[derive(Default)]
pub struct FakeConnector {
    sessions: Mutex<Vec<Arc<FakeSession>>>,
    callbacks: Mutex<Vec<SessionCallbacks>>,
    fail_with: Mutex<Option<LiveError>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self, error: LiveError) {
        *self.fail_with.lock().unwrap() = Some(error);
    }

    pub fn connect_count(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }

    pub fn session(&self, index: usize) -> Arc<FakeSession> {
        Arc::clone(&self.sessions.lock().unwrap()[index])
    }

    pub fn callbacks(&self, index: usize) -> SessionCallbacks {
        self.callbacks.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(&self, callbacks: SessionCallbacks) -> Result<Arc<dyn LiveSession>, LiveError> {
        self.callbacks.lock().unwrap().push(callbacks);
        if let Some(error) = self.fail_with.lock().unwrap().take() {
            return Err(error);
        }
        let session = FakeSession::new();
        self.sessions.lock().unwrap().push(Arc::clone(&session));
        Ok(session)
    }
}

// ======================== Microphone ========================

#[derive(Default)]
struct MicState {
    callback: Option<BlockCallback>,
    block_size: Option<usize>,
    release_count: usize,
}

/// Shared handle: clones observe the same microphone.
#[derive(Clone, Default)]
pub struct FakeMicrophone {
    state: Arc<Mutex<MicState>>,
}

impl FakeMicrophone {
    /// Deliver a block as the audio thread would. `false` if nothing is tapped.
    pub fn push(&self, block: AudioBlock) -> bool {
        let mut state = self.state.lock().unwrap();
        match state.callback.as_mut() {
            Some(callback) => {
                callback(&block);
                true
            }
            None => false,
        }
    }

    pub fn block_size(&self) -> Option<usize> {
        self.state.lock().unwrap().block_size
    }

    pub fn release_count(&self) -> usize {
        self.state.lock().unwrap().release_count
    }
}

impl Microphone for FakeMicrophone {
    fn tap(&mut self, block_size: usize, on_block: BlockCallback) -> Result<(), LiveError> {
        let mut state = self.state.lock().unwrap();
        state.block_size = Some(block_size);
        state.callback = Some(on_block);
        Ok(())
    }

    fn release(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.callback = None;
        state.release_count += 1;
    }
}

// ======================== Playback ========================

#[derive(Debug, Clone, PartialEq)]
pub struct StartedSource {
    pub id: SourceId,
    pub when: f64,
    pub frames: usize,
}

#[derive(Default)]
struct PlaybackState {
    now: f64,
    started: Vec<StartedSource>,
    stopped: Vec<SourceId>,
    pending_ended: HashMap<SourceId, EndedCallback>,
    close_count: usize,
}

/// Playback context with a manually driven clock.
#[derive(Clone, Default)]
pub struct FakePlayback {
    state: Arc<Mutex<PlaybackState>>,
}

impl FakePlayback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_time(&self, now: f64) {
        self.state.lock().unwrap().now = now;
    }

    pub fn started(&self) -> Vec<StartedSource> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn stopped(&self) -> Vec<SourceId> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().close_count
    }

    /// Let source `id` end naturally.
    pub fn finish(&self, id: SourceId) {
        let callback = self.state.lock().unwrap().pending_ended.remove(&id);
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl PlaybackContext for FakePlayback {
    fn current_time(&self) -> f64 {
        self.state.lock().unwrap().now
    }

    fn start_source(
        &mut self,
        id: SourceId,
        buffer: PlaybackBuffer,
        when: f64,
        on_ended: EndedCallback,
    ) -> Result<(), LiveError> {
        let mut state = self.state.lock().unwrap();
        state.started.push(StartedSource {
            id,
            when,
            frames: buffer.frames(),
        });
        state.pending_ended.insert(id, on_ended);
        Ok(())
    }

    fn stop_source(&mut self, id: SourceId) {
        let mut state = self.state.lock().unwrap();
        state.pending_ended.remove(&id);
        state.stopped.push(id);
    }

    fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.pending_ended.clear();
        state.close_count += 1;
    }
}

// ======================== Backend ========================

#[derive(Default)]
struct BackendState {
    deny_microphone: bool,
    microphones: Vec<FakeMicrophone>,
    playbacks: Vec<FakePlayback>,
}

#[derive(Clone, Default)]
pub struct FakeAudioBackend {
    state: Arc<Mutex<BackendState>>,
}

impl FakeAudioBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny_microphone(&self) {
        self.state.lock().unwrap().deny_microphone = true;
    }

    /// The most recently opened microphone.
    pub fn microphone(&self) -> FakeMicrophone {
        self.state.lock().unwrap().microphones.last().cloned().unwrap_or_default()
    }

    pub fn microphone_at(&self, index: usize) -> FakeMicrophone {
        self.state.lock().unwrap().microphones[index].clone()
    }

    /// The most recently opened playback context.
    pub fn playback(&self) -> FakePlayback {
        self.state.lock().unwrap().playbacks.last().cloned().unwrap_or_default()
    }

    pub fn playback_at(&self, index: usize) -> FakePlayback {
        self.state.lock().unwrap().playbacks[index].clone()
    }
}

impl AudioBackend for FakeAudioBackend {
    fn open_microphone(&self, _sample_rate: u32) -> Result<Box<dyn Microphone>, LiveError> {
        let mut state = self.state.lock().unwrap();
        if state.deny_microphone {
            return Err(LiveError::CaptureUnavailable("permission denied".into()));
        }
        let microphone = FakeMicrophone::default();
        state.microphones.push(microphone.clone());
        Ok(Box::new(microphone))
    }

    fn open_playback(&self, _sample_rate: u32) -> Result<Box<dyn PlaybackContext>, LiveError> {
        let playback = FakePlayback::new();
        self.state.lock().unwrap().playbacks.push(playback.clone());
        Ok(Box::new(playback))
    }
}
