//! Wire messages for the live interpreter session (BidiGenerateContent)
//!
//! Outbound: a JSON setup frame, then realtime media frames. Inbound: JSON
//! frames decoded once at the boundary into an ordered list of
//! [`ServerEvent`]s. A single server message may carry several event kinds
//! at once; the parser emits them in the order the session controller must
//! dispatch them: tool calls, transcript deltas, turn completion, audio,
//! interruption.

use base64::Engine;
use serde::Serialize;
use tracing::warn;

use crate::audio::MediaBlob;
use crate::catalog::VoiceGender;

// ── Setup ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: SetupPayload,
}

#[derive(Debug, Serialize)]
pub struct SetupPayload {
    pub model: String,
    #[serde(rename = "generationConfig")]
    pub generation_config: GenerationConfig,
    #[serde(rename = "systemInstruction")]
    pub system_instruction: SystemInstruction,
    #[serde(rename = "inputAudioTranscription")]
    pub input_audio_transcription: TranscriptionConfig,
    #[serde(rename = "outputAudioTranscription")]
    pub output_audio_transcription: TranscriptionConfig,
}

#[derive(Debug, Serialize)]
pub struct GenerationConfig {
    #[serde(rename = "responseModalities")]
    pub response_modalities: Vec<String>,
    #[serde(rename = "speechConfig")]
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
pub struct SpeechConfig {
    #[serde(rename = "voiceConfig")]
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
pub struct VoiceConfig {
    #[serde(rename = "prebuiltVoiceConfig")]
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
pub struct PrebuiltVoiceConfig {
    #[serde(rename = "voiceName")]
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct SystemInstruction {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Serializes to `{}` — presence alone enables transcription.
#[derive(Debug, Serialize)]
pub struct TranscriptionConfig {}

/// Interpreter role directive embedding both language names and the voice
/// gender the model should match.
pub fn build_system_directive(
    source_name: &str,
    target_name: &str,
    gender: VoiceGender,
) -> String {
    format!(
        "ROLE: Specialized Bi-directional Simultaneous Interpreter.\n\
         CONTEXT: You are facilitating a live conversation between a speaker of {source_name} and a speaker of {target_name}.\n\
         CORE DIRECTIVE:\n\
         1. When you hear {source_name}, translate it immediately and accurately into {target_name} audio output.\n\
         2. When you hear {target_name}, translate it immediately and accurately into {source_name} audio output.\n\
         3. ACT AS THE VOICE of the person speaking. Use a natural, native-sounding tone for the target language.\n\
         4. ABSOLUTELY NO metadata, greetings from the AI, or conversational fillers. Only the translation.\n\
         5. Start output as soon as context is clear to minimize latency.\n\
         VOICE GENDER: {}.",
        gender.as_str()
    )
}

pub fn build_setup_message(model: &str, directive: &str, voice_name: &str) -> SetupMessage {
    SetupMessage {
        setup: SetupPayload {
            model: model.to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice_name.to_string(),
                        },
                    },
                },
            },
            system_instruction: SystemInstruction {
                parts: vec![TextPart { text: directive.to_string() }],
            },
            input_audio_transcription: TranscriptionConfig {},
            output_audio_transcription: TranscriptionConfig {},
        },
    }
}

// ── Realtime input ─────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct RealtimeInputMessage {
    #[serde(rename = "realtimeInput")]
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
pub struct RealtimeInput {
    #[serde(rename = "mediaChunks")]
    pub media_chunks: Vec<MediaBlob>,
}

pub fn build_media_message(blob: MediaBlob) -> RealtimeInputMessage {
    RealtimeInputMessage {
        realtime_input: RealtimeInput { media_chunks: vec![blob] },
    }
}

// ── Server events ──────────────────────────────────────────────────

/// One decoded inbound event. `Closed` is synthesized by the client on
/// WebSocket close; everything else comes out of [`parse_server_message`].
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SetupComplete,
    ToolCall { name: String, args: serde_json::Value },
    InputTranscript { text: String },
    OutputTranscript { text: String },
    TurnComplete,
    /// Raw PCM16 bytes, already base64-decoded
    AudioFragment { data: Vec<u8> },
    Interrupted,
    ServerError { message: String },
    Closed { code: u16, reason: String },
}

/// Parse one inbound JSON frame into the ordered event list.
pub fn parse_server_message(json_text: &str) -> Vec<ServerEvent> {
    let mut events = Vec::new();

    let value: serde_json::Value = match serde_json::from_str(json_text) {
        Ok(v) => v,
        Err(e) => {
            events.push(ServerEvent::ServerError {
                message: format!("failed to parse server message: {e}"),
            });
            return events;
        }
    };

    if value.get("setupComplete").is_some() {
        events.push(ServerEvent::SetupComplete);
    }

    if let Some(calls) = value
        .pointer("/toolCall/functionCalls")
        .and_then(|v| v.as_array())
    {
        for call in calls {
            if let Some(name) = call.get("name").and_then(|v| v.as_str()) {
                events.push(ServerEvent::ToolCall {
                    name: name.to_string(),
                    args: call.get("args").cloned().unwrap_or_default(),
                });
            }
        }
    }

    if let Some(content) = value.get("serverContent") {
        if let Some(text) = content
            .pointer("/inputTranscription/text")
            .and_then(|v| v.as_str())
        {
            if !text.is_empty() {
                events.push(ServerEvent::InputTranscript { text: text.to_string() });
            }
        }

        if let Some(text) = content
            .pointer("/outputTranscription/text")
            .and_then(|v| v.as_str())
        {
            if !text.is_empty() {
                events.push(ServerEvent::OutputTranscript { text: text.to_string() });
            }
        }

        if content.get("turnComplete").and_then(|v| v.as_bool()) == Some(true) {
            events.push(ServerEvent::TurnComplete);
        }

        // Only the first model-turn part carries audio in this protocol
        if let Some(data_b64) = content
            .pointer("/modelTurn/parts/0/inlineData/data")
            .and_then(|v| v.as_str())
        {
            match base64::engine::general_purpose::STANDARD.decode(data_b64) {
                Ok(data) => events.push(ServerEvent::AudioFragment { data }),
                Err(e) => {
                    // A corrupt fragment is dropped; playback continues
                    warn!(error = %e, "dropping undecodable audio fragment");
                }
            }
        }

        if content.get("interrupted").and_then(|v| v.as_bool()) == Some(true) {
            events.push(ServerEvent::Interrupted);
        }
    }

    if let Some(err) = value.get("error") {
        let message = err
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown server error");
        events.push(ServerEvent::ServerError { message: message.to_string() });
    }

    events
}
