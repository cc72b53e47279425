//! 16-bit PCM codec for the live session.
//!
//! - Encoder: f32 block → i16 little-endian bytes → base64 transport text
//! - Decoder: i16 little-endian bytes → de-interleaved f32 channels

use base64::{Engine as _, engine::general_purpose};

use crate::error::LiveError;

const PCM_SCALE: f32 = 32768.0;

/// One encoded block ready for realtime input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAudioPacket {
    /// Base64 of the little-endian i16 samples.
    pub data: String,
    /// e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
}

/// Decoded multi-channel float audio, one `Vec` per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl PlaybackBuffer {
    /// Frames per channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Converts one normalized sample to i16.
///
/// Truncates toward zero and wraps on overflow, so `1.0` becomes `-32768`.
fn sample_to_i16(sample: f32) -> i16 {
    (sample * PCM_SCALE) as i32 as i16
}

/// Encode float samples into a transport packet tagged with `sample_rate`.
pub fn encode_samples(samples: &[f32], sample_rate: u32) -> EncodedAudioPacket {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }

    EncodedAudioPacket {
        data: encode_transport(&bytes),
        mime_type: pcm_mime_type(sample_rate),
    }
}

/// Reinterpret `bytes` as interleaved i16 and split into `channel_count` float channels.
pub fn decode_to_playback_buffer(
    bytes: &[u8],
    sample_rate: u32,
    channel_count: usize,
) -> Result<PlaybackBuffer, LiveError> {
    if channel_count == 0 {
        return Err(LiveError::DecodeFailure("channel count must be positive".into()));
    }
    let frame_bytes = 2 * channel_count;
    if bytes.len() % frame_bytes != 0 {
        return Err(LiveError::DecodeFailure(format!(
            "{} bytes is not a whole number of {}-channel frames",
            bytes.len(),
            channel_count
        )));
    }

    let frames = bytes.len() / frame_bytes;
    let mut channels: Vec<Vec<f32>> = (0..channel_count).map(|_| Vec::with_capacity(frames)).collect();

    // Split interleaved → per-channel
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        channels[i % channel_count].push(value as f32 / PCM_SCALE);
    }

    Ok(PlaybackBuffer { sample_rate, channels })
}

pub fn encode_transport(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

pub fn decode_transport(text: &str) -> Result<Vec<u8>, LiveError> {
    general_purpose::STANDARD
        .decode(text)
        .map_err(|e| LiveError::DecodeFailure(format!("invalid base64: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(samples: &[f32], rate: u32) -> PlaybackBuffer {
        let packet = encode_samples(samples, rate);
        let bytes = decode_transport(&packet.data).unwrap();
        decode_to_playback_buffer(&bytes, rate, 1).unwrap()
    }

    #[test]
    fn packet_is_tagged_with_rate() {
        let packet = encode_samples(&[0.0, 0.5], 16000);
        assert_eq!(packet.mime_type, "audio/pcm;rate=16000");
        assert_eq!(decode_transport(&packet.data).unwrap().len(), 4);
    }

    #[test]
    fn samples_are_little_endian_and_truncated() {
        let packet = encode_samples(&[0.5, -0.5, 0.99999], 16000);
        let bytes = decode_transport(&packet.data).unwrap();
        assert_eq!(&bytes[0..2], &16384i16.to_le_bytes());
        assert_eq!(&bytes[2..4], &(-16384i16).to_le_bytes());
        // 0.99999 * 32768 = 32767.67, truncated rather than rounded
        assert_eq!(&bytes[4..6], &32767i16.to_le_bytes());
    }

    #[test]
    fn full_scale_positive_wraps() {
        let packet = encode_samples(&[1.0], 16000);
        let bytes = decode_transport(&packet.data).unwrap();
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MIN);
    }

    #[test]
    fn round_trip_is_within_quantization_error() {
        let samples: Vec<f32> = (0..2000)
            .map(|i| ((i as f32) * 0.013).sin() * 0.999)
            .chain([-1.0, 0.0, 0.999_969, -0.5, 1.0e-6])
            .collect();
        let decoded = round_trip(&samples, 16000);
        assert_eq!(decoded.frames(), samples.len());
        for (original, restored) in samples.iter().zip(&decoded.channels[0]) {
            assert!(
                (original - restored).abs() <= 1.0 / 32768.0,
                "{} -> {}",
                original,
                restored
            );
        }
    }

    #[test]
    fn silent_block_round_trips_to_silence() {
        let silence = vec![0.0f32; 4096];
        let decoded = round_trip(&silence, 16000);
        assert_eq!(decoded.channels.len(), 1);
        assert_eq!(decoded.channels[0].len(), 4096);
        assert!(decoded.channels[0].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn stereo_is_deinterleaved() {
        let mut bytes = Vec::new();
        for value in [100i16, -100, 200, -200] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        let buffer = decode_to_playback_buffer(&bytes, 24000, 2).unwrap();
        assert_eq!(buffer.channels[0], vec![100.0 / 32768.0, 200.0 / 32768.0]);
        assert_eq!(buffer.channels[1], vec![-100.0 / 32768.0, -200.0 / 32768.0]);
        assert_eq!(buffer.frames(), 2);
    }

    #[test]
    fn misaligned_length_is_rejected() {
        let err = decode_to_playback_buffer(&[1, 2, 3], 24000, 1).unwrap_err();
        assert!(matches!(err, LiveError::DecodeFailure(_)));
        assert!(decode_to_playback_buffer(&[0; 6], 24000, 2).is_err());
    }

    #[test]
    fn duration_follows_sample_rate() {
        let buffer = decode_to_playback_buffer(&vec![0u8; 48000], 24000, 1).unwrap();
        assert!((buffer.duration() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn transport_is_binary_safe() {
        let bytes: Vec<u8> = (0..=255).collect();
        assert_eq!(decode_transport(&encode_transport(&bytes)).unwrap(), bytes);
        assert!(decode_transport("not base64!").is_err());
    }
}
