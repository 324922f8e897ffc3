use serde::Serialize;
use thiserror::Error;

use crate::session::transcript::{PartialTranscript, TranslationRecord};

/// Connection state of the one live session.
///
/// `PermissionDenied` is sticky: automatic teardown paths never overwrite it
/// back to `Disconnected`; only an explicit new start clears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
    PermissionDenied,
}

/// Signals emitted by the session controller for external consumers
/// (logging, UI push, quota persistence).
#[derive(Debug, Clone)]
pub enum SessionSignal {
    StateChanged(SessionState),
    PartialTranscript(PartialTranscript),
    RecordFinalized(TranslationRecord),
    SpeakingChanged(bool),
    UsageTick { seconds_used: u64 },
    PaywallRequired { reason: Option<String> },
    VoiceSwitched { voice_id: String },
}

/// Errors surfaced by session start. Transient in-session failures (send
/// failures, corrupt fragments) are contained and logged, never returned.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("microphone permission denied: {0}")]
    MicPermissionDenied(String),
    #[error("failed to open live session: {0}")]
    OpenFailure(String),
    #[error("usage limit reached")]
    UsageLocked,
}
