//! WAV file capture backend for tests and offline runs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hound::{SampleFormat, WavReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use super::backend::{
    downmix_mono, resample, AudioBackend, AudioChunk, CaptureConfig, CaptureError,
};

pub struct FileBackend {
    path: String,
    config: CaptureConfig,
    /// Pace emission at real time instead of as fast as possible
    realtime: bool,
    capturing: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn new(path: String, config: CaptureConfig) -> Self {
        Self {
            path,
            config,
            realtime: false,
            capturing: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    fn read_samples(&self) -> Result<Vec<f32>, CaptureError> {
        // An unreadable file is an acquisition failure, same class as a
        // missing microphone.
        let reader = WavReader::open(&self.path)
            .map_err(|e| CaptureError::PermissionDenied(format!("{}: {e}", self.path)))?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| CaptureError::Device(e.to_string()))?,
            SampleFormat::Int => {
                if spec.bits_per_sample != 16 {
                    return Err(CaptureError::Device(format!(
                        "unsupported bit depth: {}",
                        spec.bits_per_sample
                    )));
                }
                reader
                    .into_samples::<i16>()
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| CaptureError::Device(e.to_string()))?
                    .into_iter()
                    .map(|s| s as f32 / 32768.0)
                    .collect()
            }
        };

        info!(
            path = %self.path,
            rate = spec.sample_rate,
            channels = spec.channels,
            samples = samples.len(),
            "audio file loaded"
        );

        let mono = downmix_mono(&samples, spec.channels);
        Ok(resample(&mono, spec.sample_rate, self.config.sample_rate))
    }
}

#[async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioChunk>, CaptureError> {
        let samples = self.read_samples()?;

        let (chunk_tx, chunk_rx) = mpsc::channel(32);
        let capturing = Arc::clone(&self.capturing);
        capturing.store(true, Ordering::SeqCst);

        let chunk_samples = self.config.chunk_samples;
        let sample_rate = self.config.sample_rate;
        let realtime = self.realtime;
        let chunk_period =
            Duration::from_secs_f64(chunk_samples as f64 / sample_rate as f64);

        self.task = Some(tokio::spawn(async move {
            let mut timestamp_ms = 0u64;
            // A trailing partial chunk is dropped, matching the fixed-size
            // window the capture devices emit.
            for window in samples.chunks_exact(chunk_samples) {
                if !capturing.load(Ordering::SeqCst) {
                    break;
                }
                let chunk = AudioChunk {
                    samples: window.to_vec(),
                    sample_rate,
                    timestamp_ms,
                };
                if chunk_tx.send(chunk).await.is_err() {
                    break;
                }
                timestamp_ms += chunk_period.as_millis() as u64;
                if realtime {
                    tokio::time::sleep(chunk_period).await;
                }
            }
            capturing.store(false, Ordering::SeqCst);
        }));

        Ok(chunk_rx)
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "file"
    }
}
