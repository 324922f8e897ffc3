pub mod backend;
pub mod capture;
pub mod encoder;
pub mod file;
pub mod gate;
pub mod microphone;
pub mod playback;

pub use backend::{
    AudioBackend, AudioBackendFactory, AudioChunk, CaptureConfig, CaptureError, CaptureSource,
};
pub use capture::spawn_capture_pipeline;
pub use encoder::{decode_pcm16, encode_pcm_blob, MediaBlob, INPUT_AUDIO_MIME};
pub use file::FileBackend;
pub use gate::{GateConfig, VoiceGate};
pub use microphone::MicrophoneBackend;
pub use playback::{CpalQueueSink, NullSink, PlaybackScheduler, PlaybackSink};
