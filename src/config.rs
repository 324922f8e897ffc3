use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub live: LiveConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Microphone capture rate in Hz
    pub input_sample_rate: u32,
    /// Synthesized audio rate in Hz
    pub output_sample_rate: u32,
    /// Samples per capture chunk
    pub chunk_samples: usize,
    /// Input gain applied before the gate
    pub gain: f32,
    /// Peak amplitude below which a chunk counts as silence
    pub silence_threshold: f32,
    /// How long silence must persist before the gate closes
    pub silence_holdoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    /// WebSocket endpoint of the live interpreter API
    pub endpoint: String,
    /// API key; falls back to the GEMINI_API_KEY environment variable
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Free-tier usage ceiling in seconds
    pub free_tier_seconds: u64,
    /// Maximum retained translation records
    pub history_capacity: usize,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

impl LiveConfig {
    pub fn resolve_api_key(&self) -> Result<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .context("no API key: set live.api_key or the GEMINI_API_KEY environment variable")
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "voicebridge".to_string(),
            http: HttpConfig { bind: "127.0.0.1".to_string(), port: 8080 },
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            chunk_samples: 2048,
            gain: 1.1,
            silence_threshold: 0.002,
            silence_holdoff_ms: 1500,
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            api_key: None,
            model: "models/gemini-2.5-flash-native-audio-latest".to_string(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self { free_tier_seconds: 60, history_capacity: 50 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            audio: AudioConfig::default(),
            live: LiveConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}
