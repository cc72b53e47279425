//! Gemini Live wire messages (camelCase JSON over the WebSocket).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audio::EncodedAudioPacket;
use crate::config::Config;

// ======================== Client → Server ========================

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub input_audio_transcription: Value,
    pub output_audio_transcription: Value,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

// ======================== Shared ========================

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

// ======================== Server → Client ========================

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<Value>,
    pub server_content: Option<ServerContent>,
    pub go_away: Option<GoAway>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Deserialize, Debug)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    pub time_left: Option<String>,
}

/// The part of one server message the live session core consumes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveMessage {
    pub input_transcript: Option<String>,
    pub output_transcript: Option<String>,
    pub audio_chunks: Vec<Blob>,
    pub interrupted: bool,
    pub turn_complete: bool,
}

impl From<ServerContent> for LiveMessage {
    fn from(content: ServerContent) -> Self {
        let audio_chunks = content
            .model_turn
            .map(|turn| {
                turn.parts
                    .into_iter()
                    .filter_map(|part| part.inline_data)
                    .filter(|blob| blob.mime_type.starts_with("audio/"))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            input_transcript: content.input_transcription.map(|t| t.text),
            output_transcript: content.output_transcription.map(|t| t.text),
            audio_chunks,
            interrupted: content.interrupted,
            turn_complete: content.turn_complete,
        }
    }
}

pub fn setup_message(config: &Config) -> ClientMessage {
    let system_instruction = if config.system_instruction.trim().is_empty() {
        None
    } else {
        Some(Content {
            parts: vec![Part {
                text: Some(config.system_instruction.to_string()),
                inline_data: None,
            }],
        })
    };

    ClientMessage::Setup(Setup {
        model: format!("models/{}", config.model),
        generation_config: GenerationConfig {
            response_modalities: vec!["AUDIO".to_string()],
            speech_config: SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: config.voice_name.to_string(),
                    },
                },
            },
        },
        system_instruction,
        input_audio_transcription: Value::Object(Default::default()),
        output_audio_transcription: Value::Object(Default::default()),
    })
}

pub fn realtime_input_message(packet: EncodedAudioPacket) -> ClientMessage {
    ClientMessage::RealtimeInput(RealtimeInput {
        media_chunks: vec![Blob {
            mime_type: packet.mime_type,
            data: packet.data,
        }],
    })
}
