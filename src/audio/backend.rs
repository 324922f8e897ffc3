use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// One fixed-length window of mono f32 samples from a capture device.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Normalized samples in [-1, 1]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Milliseconds since capture started
    pub timestamp_ms: u64,
}

/// Configuration for a capture backend
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Target sample rate (will downsample if the device runs faster)
    pub sample_rate: u32,
    /// Samples per emitted chunk
    pub chunk_samples: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000, // what the live model expects
            chunk_samples: 2048,
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    /// The capture device could not be acquired. Sticky at the session level:
    /// the user has to explicitly retry.
    #[error("capture device unavailable: {0}")]
    PermissionDenied(String),
    /// Any other device or stream failure.
    #[error("capture device error: {0}")]
    Device(String),
}

/// Audio capture backend trait
///
/// Implementations:
/// - Microphone: cpal default input device
/// - File: WAV file (tests, offline runs)
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing; returns the chunk stream.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioChunk>, CaptureError>;

    /// Stop capturing and release the device.
    async fn stop(&mut self) -> Result<(), CaptureError>;

    /// Whether the backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Where capture audio comes from
#[derive(Debug, Clone)]
pub enum CaptureSource {
    Microphone,
    File(String),
}

pub struct AudioBackendFactory;

impl AudioBackendFactory {
    pub fn create(
        source: CaptureSource,
        config: CaptureConfig,
    ) -> Result<Box<dyn AudioBackend>, CaptureError> {
        match source {
            CaptureSource::Microphone => {
                let backend = super::microphone::MicrophoneBackend::new(config);
                Ok(Box::new(backend))
            }
            CaptureSource::File(path) => {
                // Offline runs pace the file like a live microphone
                let backend = super::file::FileBackend::new(path, config).with_realtime(true);
                Ok(Box::new(backend))
            }
        }
    }
}

/// Average interleaved channels down to mono.
pub(crate) fn downmix_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Downsample to the target rate: integer ratios decimate, non-integer
/// ratios (44.1 kHz devices) interpolate linearly. Upsampling is not
/// attempted; the input is returned unchanged when the target rate is not
/// lower.
pub(crate) fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if to_rate == 0 || from_rate <= to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    if from_rate % to_rate == 0 {
        let step = (from_rate / to_rate) as usize;
        return samples.iter().step_by(step).copied().collect();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx];
            let b = samples.get(idx + 1).copied().unwrap_or(a);
            a + (b - a) * frac
        })
        .collect()
}
