//! audio - capture, playback scheduling and PCM codec for the live session
//!
//! The hardware side is reached only through the [`AudioBackend`],
//! [`Microphone`] and [`PlaybackContext`] traits. With the `alsa` feature
//! enabled (the default), `alsa_device` provides ALSA implementations of all three.

#[cfg(feature = "alsa")]
pub mod alsa_device;
pub mod capture;
pub mod pcm_codec;
pub mod playback;

pub use capture::CapturePipeline;
pub use pcm_codec::{EncodedAudioPacket, PlaybackBuffer};
pub use playback::PlaybackScheduler;

use crate::error::LiveError;

/// Identifies one scheduled playback source.
pub type SourceId = u64;

/// Callback invoked with one fixed-size, multi-channel block of samples.
///
/// Runs on the platform's audio thread and must not block.
pub type BlockCallback = Box<dyn FnMut(&AudioBlock) + Send>;

/// Natural end-of-playback notification for one source.
pub type EndedCallback = Box<dyn FnOnce() + Send>;

/// One capture tick: `channels[c][i]` is sample `i` of channel `c`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

/// An acquired microphone stream.
pub trait Microphone: Send {
    /// Connect a tap delivering `block_size` frames per callback.
    fn tap(&mut self, block_size: usize, on_block: BlockCallback) -> Result<(), LiveError>;

    /// Disconnect the tap and release the device. No callback fires after this returns.
    fn release(&mut self);
}

/// A playback clock plus the ability to start and stop buffers on it.
pub trait PlaybackContext: Send {
    /// Current position of the context clock, in seconds.
    fn current_time(&self) -> f64;

    /// Schedule `buffer` to start at `when` (context seconds).
    ///
    /// `on_ended` fires once when the buffer finished playing naturally. It is
    /// not called for sources stopped through [`PlaybackContext::stop_source`].
    fn start_source(
        &mut self,
        id: SourceId,
        buffer: PlaybackBuffer,
        when: f64,
        on_ended: EndedCallback,
    ) -> Result<(), LiveError>;

    fn stop_source(&mut self, id: SourceId);

    /// Release the output device.
    fn close(&mut self);
}

/// Factory for the audio hardware used by one session.
pub trait AudioBackend: Send + Sync {
    fn open_microphone(&self, sample_rate: u32) -> Result<Box<dyn Microphone>, LiveError>;

    fn open_playback(&self, sample_rate: u32) -> Result<Box<dyn PlaybackContext>, LiveError>;
}

/// Backend for builds without audio hardware support: every acquisition fails.
#[cfg(not(feature = "alsa"))]
pub struct NoAudioBackend;

#[cfg(not(feature = "alsa"))]
impl AudioBackend for NoAudioBackend {
    fn open_microphone(&self, _sample_rate: u32) -> Result<Box<dyn Microphone>, LiveError> {
        Err(LiveError::CaptureUnavailable(
            "built without audio capture support (enable the `alsa` feature)".into(),
        ))
    }

    fn open_playback(&self, _sample_rate: u32) -> Result<Box<dyn PlaybackContext>, LiveError> {
        Err(LiveError::CaptureUnavailable(
            "built without audio playback support (enable the `alsa` feature)".into(),
        ))
    }
}
