pub mod audio;
pub mod catalog;
pub mod config;
pub mod http;
pub mod live;
pub mod session;

pub use audio::{
    AudioBackend, AudioBackendFactory, AudioChunk, CaptureConfig, CaptureError, CaptureSource,
    FileBackend, MicrophoneBackend, PlaybackScheduler, PlaybackSink,
};
pub use catalog::{Language, VoiceGender, VoiceOption};
pub use config::Config;
pub use http::{create_router, AppState};
pub use live::{LiveSession, ServerEvent};
pub use session::{
    FreeTierUsage, PartialTranscript, SessionController, SessionSignal, SessionState,
    TranslationRecord, UsagePolicy,
};
