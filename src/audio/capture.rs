//! Microphone capture: fixed-size blocks → PCM packets → transmitter.

use super::pcm_codec;
use super::{AudioBackend, AudioBlock, Microphone};
use crate::error::LiveError;
use crate::session::Transmitter;

pub struct CapturePipeline {
    sample_rate: u32,
    block_size: usize,
    microphone: Option<Box<dyn Microphone>>,
    connected: bool,
}

impl CapturePipeline {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        Self {
            sample_rate,
            block_size,
            microphone: None,
            connected: false,
        }
    }

    /// Request microphone access. Called once at session setup.
    pub fn acquire(&mut self, backend: &dyn AudioBackend) -> Result<(), LiveError> {
        self.teardown();
        let microphone = backend.open_microphone(self.sample_rate)?;
        log::info!("Microphone acquired: rate={}Hz, block={}", self.sample_rate, self.block_size);
        self.microphone = Some(microphone);
        Ok(())
    }

    #[cfg(test)]
    pub fn is_acquired(&self) -> bool {
        self.microphone.is_some()
    }

    #[cfg(test)]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Tap the microphone and forward every block to `transmitter`.
    pub fn connect(&mut self, transmitter: Transmitter) -> Result<(), LiveError> {
        let Some(microphone) = self.microphone.as_mut() else {
            return Err(LiveError::CaptureUnavailable("microphone was not acquired".into()));
        };
        if self.connected {
            return Ok(());
        }

        microphone.tap(
            self.block_size,
            Box::new(move |block: &AudioBlock| {
                if let Some(packet) = encode_block(block) {
                    transmitter.send(packet);
                }
            }),
        )?;
        self.connected = true;
        log::debug!("Capture tap connected");
        Ok(())
    }

    /// Disconnect the tap and release the microphone. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        if let Some(mut microphone) = self.microphone.take() {
            microphone.release();
            log::info!("Microphone released");
        }
        self.connected = false;
    }
}

/// Single-channel capture: only channel 0 is sent, tagged with the rate it was captured at.
fn encode_block(block: &AudioBlock) -> Option<pcm_codec::EncodedAudioPacket> {
    let samples = block.channels.first()?;
    Some(pcm_codec::encode_samples(samples, block.sample_rate))
}
