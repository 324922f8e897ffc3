//! Session orchestration: state machine, transcripts, usage metering

pub mod controller;
pub mod state;
pub mod transcript;
pub mod usage;

pub use controller::{SelectionInfo, SessionController};
pub use state::{SessionError, SessionSignal, SessionState};
pub use transcript::{PartialTranscript, TranslationHistory, TranslationRecord};
pub use usage::{FreeTierUsage, UsagePolicy};
