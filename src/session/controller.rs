//! Session controller
//!
//! Owns the lifecycle of the one live interpreter session: microphone
//! backend, live WebSocket client, capture pipeline, playback scheduler,
//! transcript aggregator, and the usage tick. Inbound events arrive on a
//! single-consumer channel and are dispatched in arrival order, so playback
//! enqueue order always matches network arrival order.
//!
//! Every per-session handle lives in [`SessionRuntime`], constructed fresh
//! on start and torn down explicitly. Spawned tasks capture the generation
//! current at their start and no-op once it moves on, so a callback firing
//! after teardown never acts on a stale session.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audio::{
    decode_pcm16, spawn_capture_pipeline, AudioBackend, AudioBackendFactory, CaptureConfig,
    CaptureError, CaptureSource, GateConfig, PlaybackScheduler, PlaybackSink,
};
use crate::catalog::{
    default_source_language, default_target_language, default_voice, find_language, find_voice,
    voice_for_gender, Language, VoiceGender, VoiceOption,
};
use crate::config::Config;
use crate::live::{build_setup_message, build_system_directive, LiveSession, ServerEvent};
use crate::session::state::{SessionError, SessionSignal, SessionState};
use crate::session::transcript::{
    PartialTranscript, TranscriptAggregator, TranslationHistory, TranslationRecord,
};
use crate::session::usage::UsagePolicy;

/// Delay between teardown and restart on a voice change, giving the old
/// connection time to drain.
const VOICE_RESTART_DELAY: Duration = Duration::from_millis(300);

/// Current language/voice selection.
#[derive(Debug, Clone, Copy)]
struct Selection {
    source: &'static Language,
    target: &'static Language,
    voice: &'static VoiceOption,
}

/// Selection as reported over the control API.
#[derive(Debug, Clone, Serialize)]
pub struct SelectionInfo {
    pub source_lang: String,
    pub target_lang: String,
    pub voice_id: String,
    pub voice_gender: VoiceGender,
}

/// Everything owned by one live session.
struct SessionRuntime {
    backend: Box<dyn AudioBackend>,
    live: LiveSession,
    scheduler: PlaybackScheduler,
    capture_task: JoinHandle<()>,
    event_task: JoinHandle<()>,
    tick_task: JoinHandle<()>,
    speaking_task: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

struct ControllerInner {
    config: Arc<Config>,
    usage: Arc<dyn UsagePolicy>,
    sink: Arc<dyn PlaybackSink>,
    capture_source: CaptureSource,
    signals: mpsc::UnboundedSender<SessionSignal>,
    state: StdMutex<SessionState>,
    selection: StdMutex<Selection>,
    aggregator: StdMutex<TranscriptAggregator>,
    history: StdMutex<TranslationHistory>,
    speaking: AtomicBool,
    /// Bumped on every start and teardown; stale tasks check it and no-op
    generation: AtomicU64,
    runtime: Mutex<Option<SessionRuntime>>,
}

#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    pub fn new(
        config: Arc<Config>,
        usage: Arc<dyn UsagePolicy>,
        sink: Arc<dyn PlaybackSink>,
        capture_source: CaptureSource,
        signals: mpsc::UnboundedSender<SessionSignal>,
    ) -> Self {
        let history_capacity = config.limits.history_capacity;
        Self {
            inner: Arc::new(ControllerInner {
                config,
                usage,
                sink,
                capture_source,
                signals,
                state: StdMutex::new(SessionState::Disconnected),
                selection: StdMutex::new(Selection {
                    source: default_source_language(),
                    target: default_target_language(),
                    voice: default_voice(),
                }),
                aggregator: StdMutex::new(TranscriptAggregator::new()),
                history: StdMutex::new(TranslationHistory::new(history_capacity)),
                speaking: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                runtime: Mutex::new(None),
            }),
        }
    }

    /// Start a session. A no-op when one is already connecting/connected,
    /// unless `forced_voice` asks for a restart with a specific voice.
    pub async fn start(
        &self,
        forced_voice: Option<&'static VoiceOption>,
    ) -> Result<(), SessionError> {
        if self.inner.usage.is_locked() {
            self.emit(SessionSignal::PaywallRequired { reason: None });
            return Err(SessionError::UsageLocked);
        }

        // The runtime lock is held across the state check, teardown, and
        // wiring, so a racing start serializes behind this one and then
        // no-ops on the state check instead of wiring a second session.
        let mut runtime_slot = self.inner.runtime.lock().await;

        {
            let state = *self.inner.state.lock().unwrap();
            if matches!(state, SessionState::Connecting | SessionState::Connected)
                && forced_voice.is_none()
            {
                debug!("session already live, start ignored");
                return Ok(());
            }
        }

        // No overlap: any prior session is fully torn down first.
        self.release_runtime(&mut runtime_slot, SessionState::Disconnected).await;

        if let Some(voice) = forced_voice {
            self.inner.selection.lock().unwrap().voice = voice;
            self.emit(SessionSignal::VoiceSwitched { voice_id: voice.id.to_string() });
        }

        self.force_state(SessionState::Connecting);
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let cfg = &self.inner.config;
        let capture_config = CaptureConfig {
            sample_rate: cfg.audio.input_sample_rate,
            chunk_samples: cfg.audio.chunk_samples,
        };
        let mut backend =
            match AudioBackendFactory::create(self.inner.capture_source.clone(), capture_config) {
                Ok(backend) => backend,
                Err(e) => return Err(self.fail_capture(e)),
            };
        let chunks = match backend.start().await {
            Ok(chunks) => chunks,
            Err(e) => return Err(self.fail_capture(e)),
        };

        let selection = *self.inner.selection.lock().unwrap();
        let directive = build_system_directive(
            selection.source.name,
            selection.target.name,
            selection.voice.gender,
        );
        let setup = build_setup_message(&cfg.live.model, &directive, selection.voice.id);

        let api_key = match cfg.live.resolve_api_key() {
            Ok(key) => key,
            Err(e) => {
                let _ = backend.stop().await;
                self.force_state(SessionState::Error);
                return Err(SessionError::OpenFailure(e.to_string()));
            }
        };

        let (live, events) = match LiveSession::connect(&cfg.live.endpoint, &api_key, setup).await
        {
            Ok(connected) => connected,
            Err(e) => {
                let _ = backend.stop().await;
                self.force_state(SessionState::Error);
                return Err(SessionError::OpenFailure(e.to_string()));
            }
        };

        info!(
            session_id = live.session_id(),
            source = selection.source.code,
            target = selection.target.code,
            voice = selection.voice.id,
            "session connected"
        );
        self.force_state(SessionState::Connected);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let scheduler =
            PlaybackScheduler::new(self.inner.sink.clone(), cfg.audio.output_sample_rate);
        let gate_config = GateConfig {
            threshold: cfg.audio.silence_threshold,
            holdoff: Duration::from_millis(cfg.audio.silence_holdoff_ms),
        };

        let capture_task = spawn_capture_pipeline(
            chunks,
            cfg.audio.gain,
            gate_config,
            live.media_sender(),
            shutdown_rx,
        );
        let event_task =
            tokio::spawn(self.clone().event_loop(events, scheduler.clone(), generation, selection));
        let tick_task = tokio::spawn(self.clone().usage_tick(generation));
        let speaking_task =
            tokio::spawn(self.clone().speaking_watch(scheduler.subscribe_speaking(), generation));

        *runtime_slot = Some(SessionRuntime {
            backend,
            live,
            scheduler,
            capture_task,
            event_task,
            tick_task,
            speaking_task,
            shutdown_tx,
        });
        Ok(())
    }

    /// Stop the session. Idempotent and safe from any state, including
    /// mid-connect.
    pub async fn stop(&self) {
        self.teardown(SessionState::Disconnected).await;
    }

    /// Change languages and/or voice. Validates against the catalogs first;
    /// a live session restarts with the new selection.
    pub async fn update_selection(
        &self,
        source: Option<&str>,
        target: Option<&str>,
        voice: Option<&str>,
    ) -> Result<()> {
        let source = source
            .map(|code| find_language(code).ok_or_else(|| anyhow!("unknown language code: {code}")))
            .transpose()?;
        let target = target
            .map(|code| find_language(code).ok_or_else(|| anyhow!("unknown language code: {code}")))
            .transpose()?;
        let voice = voice
            .map(|id| find_voice(id).ok_or_else(|| anyhow!("unknown voice id: {id}")))
            .transpose()?;

        let (was_live, voice_changed) = {
            let mut selection = self.inner.selection.lock().unwrap();
            if let Some(language) = source {
                selection.source = language;
            }
            if let Some(language) = target {
                selection.target = language;
            }
            let mut voice_changed = false;
            if let Some(option) = voice {
                voice_changed = option.id != selection.voice.id;
                selection.voice = option;
            }
            let state = *self.inner.state.lock().unwrap();
            (
                matches!(state, SessionState::Connecting | SessionState::Connected),
                voice_changed,
            )
        };

        if was_live {
            self.stop().await;
            if voice_changed {
                tokio::time::sleep(VOICE_RESTART_DELAY).await;
            }
            if let Err(e) = self.start(None).await {
                warn!(error = %e, "restart after selection change failed");
            }
        }
        Ok(())
    }

    // ── Introspection ─────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        *self.inner.state.lock().unwrap()
    }

    pub fn is_speaking(&self) -> bool {
        self.inner.speaking.load(Ordering::SeqCst)
    }

    pub fn partial_transcript(&self) -> PartialTranscript {
        self.inner.aggregator.lock().unwrap().partial()
    }

    pub fn history(&self) -> Vec<TranslationRecord> {
        self.inner.history.lock().unwrap().records()
    }

    pub fn selection_info(&self) -> SelectionInfo {
        let selection = *self.inner.selection.lock().unwrap();
        SelectionInfo {
            source_lang: selection.source.code.to_string(),
            target_lang: selection.target.code.to_string(),
            voice_id: selection.voice.id.to_string(),
            voice_gender: selection.voice.gender,
        }
    }

    pub fn usage_seconds(&self) -> u64 {
        self.inner.usage.seconds_used()
    }

    pub fn usage_locked(&self) -> bool {
        self.inner.usage.is_locked()
    }

    // ── Internals ─────────────────────────────────────────────────

    /// Release everything owned by the current session and settle on
    /// `final_state` (unless the sticky `PermissionDenied` is in effect).
    async fn teardown(&self, final_state: SessionState) {
        let mut runtime_slot = self.inner.runtime.lock().await;
        self.release_runtime(&mut runtime_slot, final_state).await;
    }

    /// Teardown body for callers that already hold the runtime lock.
    async fn release_runtime(
        &self,
        runtime_slot: &mut Option<SessionRuntime>,
        final_state: SessionState,
    ) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(mut runtime) = runtime_slot.take() {
            let _ = runtime.shutdown_tx.send(true);
            runtime.capture_task.abort();
            runtime.event_task.abort();
            runtime.tick_task.abort();
            runtime.speaking_task.abort();
            runtime.live.close().await;
            if let Err(e) = runtime.backend.stop().await {
                warn!(error = %e, "capture backend stop failed");
            }
            runtime.scheduler.interrupt();
            debug!("session runtime released");
        }

        self.inner.aggregator.lock().unwrap().clear();
        self.emit(SessionSignal::PartialTranscript(PartialTranscript::default()));
        self.inner.speaking.store(false, Ordering::SeqCst);
        self.set_state(final_state);
    }

    fn fail_capture(&self, error: CaptureError) -> SessionError {
        match error {
            CaptureError::PermissionDenied(msg) => {
                error!(error = %msg, "microphone acquisition failed");
                self.force_state(SessionState::PermissionDenied);
                SessionError::MicPermissionDenied(msg)
            }
            CaptureError::Device(msg) => {
                error!(error = %msg, "capture device failed");
                self.force_state(SessionState::Error);
                SessionError::OpenFailure(msg)
            }
        }
    }

    async fn event_loop(
        self,
        mut events: mpsc::Receiver<ServerEvent>,
        scheduler: PlaybackScheduler,
        generation: u64,
        selection: Selection,
    ) {
        while let Some(event) = events.recv().await {
            if self.inner.generation.load(Ordering::SeqCst) != generation {
                break;
            }
            match event {
                ServerEvent::SetupComplete => {}
                ServerEvent::ToolCall { name, args } => {
                    self.handle_tool_call(&name, &args, selection.voice, generation);
                }
                ServerEvent::InputTranscript { text } => {
                    let partial = {
                        let mut aggregator = self.inner.aggregator.lock().unwrap();
                        aggregator.append_input(&text);
                        aggregator.partial()
                    };
                    self.emit(SessionSignal::PartialTranscript(partial));
                }
                ServerEvent::OutputTranscript { text } => {
                    let partial = {
                        let mut aggregator = self.inner.aggregator.lock().unwrap();
                        aggregator.append_output(&text);
                        aggregator.partial()
                    };
                    self.emit(SessionSignal::PartialTranscript(partial));
                }
                ServerEvent::TurnComplete => {
                    let record = self
                        .inner
                        .aggregator
                        .lock()
                        .unwrap()
                        .complete_turn(selection.source.code, selection.target.code);
                    self.emit(SessionSignal::PartialTranscript(PartialTranscript::default()));
                    if let Some(record) = record {
                        info!(
                            original = %record.original_text,
                            translated = %record.translated_text,
                            "turn finalized"
                        );
                        self.inner.history.lock().unwrap().push(record.clone());
                        self.emit(SessionSignal::RecordFinalized(record));
                    }
                }
                ServerEvent::AudioFragment { data } => {
                    let samples = decode_pcm16(&data);
                    if samples.is_empty() {
                        continue;
                    }
                    scheduler.enqueue(samples);
                }
                ServerEvent::Interrupted => {
                    debug!("remote interruption, stopping playback");
                    scheduler.interrupt();
                }
                ServerEvent::ServerError { message } => {
                    error!(error = %message, "live session error");
                    self.finish_remote(generation, SessionState::Error);
                    break;
                }
                ServerEvent::Closed { code, reason } => {
                    info!(code, reason = %reason, "live session closed");
                    self.finish_remote(generation, SessionState::Disconnected);
                    break;
                }
            }
        }
        debug!("event loop terminated");
    }

    /// Smart Voice Sync: when the model reports a speaker gender that does
    /// not match the active voice, restart once with the matching voice.
    fn handle_tool_call(
        &self,
        name: &str,
        args: &serde_json::Value,
        active_voice: &'static VoiceOption,
        generation: u64,
    ) {
        if name != "sync_voice_gender" {
            debug!(name, "ignoring unknown tool call");
            return;
        }
        let Some(gender) = args
            .get("gender")
            .and_then(|v| v.as_str())
            .and_then(VoiceGender::parse)
        else {
            warn!(?args, "tool call without a usable gender argument");
            return;
        };
        if gender == active_voice.gender {
            debug!(gender = gender.as_str(), "voice gender already matches");
            return;
        }
        let Some(voice) = voice_for_gender(gender) else {
            return;
        };

        info!(voice = voice.id, "voice sync requested, restarting session");
        let controller = self.clone();
        tokio::spawn(async move {
            if controller.inner.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            controller.teardown(SessionState::Disconnected).await;
            tokio::time::sleep(VOICE_RESTART_DELAY).await;
            if let Err(e) = controller.start(Some(voice)).await {
                warn!(error = %e, "voice sync restart failed");
            }
        });
    }

    /// Teardown driven by a remote error or close. Runs detached so the
    /// event task never joins itself.
    fn finish_remote(&self, generation: u64, final_state: SessionState) {
        let controller = self.clone();
        tokio::spawn(async move {
            if controller.inner.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            controller.teardown(final_state).await;
        });
    }

    async fn usage_tick(self, generation: u64) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.tick().await; // the first tick completes immediately
        loop {
            interval.tick().await;
            if self.inner.generation.load(Ordering::SeqCst) != generation {
                break;
            }
            if *self.inner.state.lock().unwrap() != SessionState::Connected {
                continue;
            }
            let ceiling_reached = self.inner.usage.record_second();
            self.emit(SessionSignal::UsageTick {
                seconds_used: self.inner.usage.seconds_used(),
            });
            if ceiling_reached {
                warn!("free tier ceiling reached, stopping session");
                self.emit(SessionSignal::PaywallRequired {
                    reason: Some("free tier time exhausted".to_string()),
                });
                let controller = self.clone();
                tokio::spawn(async move {
                    controller.stop().await;
                });
                break;
            }
        }
    }

    async fn speaking_watch(self, mut speaking_rx: watch::Receiver<bool>, generation: u64) {
        while speaking_rx.changed().await.is_ok() {
            if self.inner.generation.load(Ordering::SeqCst) != generation {
                break;
            }
            let speaking = *speaking_rx.borrow();
            self.inner.speaking.store(speaking, Ordering::SeqCst);
            self.emit(SessionSignal::SpeakingChanged(speaking));
        }
    }

    /// Sticky-aware state transition: `PermissionDenied` is only left via
    /// `force_state` (a fresh start or a new denial).
    fn set_state(&self, new_state: SessionState) {
        let changed = {
            let mut state = self.inner.state.lock().unwrap();
            if *state == SessionState::PermissionDenied
                && new_state != SessionState::PermissionDenied
            {
                false
            } else if *state != new_state {
                *state = new_state;
                true
            } else {
                false
            }
        };
        if changed {
            self.emit(SessionSignal::StateChanged(new_state));
        }
    }

    fn force_state(&self, new_state: SessionState) {
        let changed = {
            let mut state = self.inner.state.lock().unwrap();
            if *state != new_state {
                *state = new_state;
                true
            } else {
                false
            }
        };
        if changed {
            self.emit(SessionSignal::StateChanged(new_state));
        }
    }

    fn emit(&self, signal: SessionSignal) {
        let _ = self.inner.signals.send(signal);
    }
}
