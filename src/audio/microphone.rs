//! Microphone capture via cpal
//!
//! The cpal stream is not Send, so it lives on a dedicated thread that parks
//! until stop. The audio callback only appends to a shared buffer; a tokio
//! task drains the buffer, downmixes/resamples to the target format, and
//! emits fixed-size chunks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::backend::{
    downmix_mono, resample, AudioBackend, AudioChunk, CaptureConfig, CaptureError,
};

/// How often the chunker drains the capture buffer
const DRAIN_INTERVAL: Duration = Duration::from_millis(30);

pub struct MicrophoneBackend {
    config: CaptureConfig,
    capturing: Arc<AtomicBool>,
    stream_stop: Option<std::sync::mpsc::Sender<()>>,
    chunker: Option<JoinHandle<()>>,
}

impl MicrophoneBackend {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            capturing: Arc::new(AtomicBool::new(false)),
            stream_stop: None,
            chunker: None,
        }
    }
}

#[async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioChunk>, CaptureError> {
        if self.capturing.load(Ordering::SeqCst) {
            return Err(CaptureError::Device("already capturing".to_string()));
        }

        let buffer: Arc<Mutex<Vec<f32>>> = Arc::new(Mutex::new(Vec::new()));
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<(u32, u16), CaptureError>>();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let target_rate = self.config.sample_rate;
        let cb_buffer = Arc::clone(&buffer);
        std::thread::spawn(move || {
            let setup = move || -> Result<(cpal::Stream, u32, u16), CaptureError> {
                let host = cpal::default_host();
                let device = host.default_input_device().ok_or_else(|| {
                    CaptureError::PermissionDenied("no input device available".to_string())
                })?;

                // Prefer mono f32 at the target rate; fall back to whatever
                // the device offers and convert in the chunker.
                let supported = device
                    .supported_input_configs()
                    .map_err(|e| CaptureError::PermissionDenied(e.to_string()))?
                    .find(|c| {
                        c.channels() == 1
                            && c.sample_format() == SampleFormat::F32
                            && c.min_sample_rate() <= SampleRate(target_rate)
                            && c.max_sample_rate() >= SampleRate(target_rate)
                    })
                    .map(|c| c.with_sample_rate(SampleRate(target_rate)));
                let supported = match supported {
                    Some(c) => c,
                    None => device
                        .default_input_config()
                        .map_err(|e| CaptureError::PermissionDenied(e.to_string()))?,
                };
                if supported.sample_format() != SampleFormat::F32 {
                    return Err(CaptureError::Device(format!(
                        "unsupported sample format: {:?}",
                        supported.sample_format()
                    )));
                }

                let config = supported.config();
                let rate = config.sample_rate.0;
                let channels = config.channels;

                debug!(
                    device = device.name().unwrap_or_default(),
                    rate, channels, "microphone capture initialized"
                );

                let stream = device
                    .build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            if let Ok(mut buf) = cb_buffer.lock() {
                                buf.extend_from_slice(data);
                            }
                        },
                        |err| {
                            error!(error = %err, "microphone capture error");
                        },
                        None,
                    )
                    .map_err(|e| CaptureError::Device(e.to_string()))?;
                stream.play().map_err(|e| CaptureError::Device(e.to_string()))?;
                Ok((stream, rate, channels))
            };

            match setup() {
                Ok((stream, rate, channels)) => {
                    let _ = ready_tx.send(Ok((rate, channels)));
                    // Park until stop; dropping the stream releases the device.
                    let _ = stop_rx.recv();
                    drop(stream);
                    debug!("microphone stream released");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        });

        let setup_result = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| CaptureError::Device(e.to_string()))?
            .map_err(|_| {
                CaptureError::Device("capture thread exited during setup".to_string())
            })?;
        let (device_rate, device_channels) = setup_result?;

        self.capturing.store(true, Ordering::SeqCst);
        self.stream_stop = Some(stop_tx);

        let (chunk_tx, chunk_rx) = mpsc::channel(32);
        let capturing = Arc::clone(&self.capturing);
        let chunk_samples = self.config.chunk_samples;
        let started = tokio::time::Instant::now();

        self.chunker = Some(tokio::spawn(async move {
            let mut pending: Vec<f32> = Vec::new();
            let mut ticker = tokio::time::interval(DRAIN_INTERVAL);
            while capturing.load(Ordering::SeqCst) {
                ticker.tick().await;

                let taken = buffer
                    .lock()
                    .map(|mut buf| std::mem::take(&mut *buf))
                    .unwrap_or_default();
                if taken.is_empty() {
                    continue;
                }

                let mono = downmix_mono(&taken, device_channels);
                pending.extend(resample(&mono, device_rate, target_rate));

                while pending.len() >= chunk_samples {
                    let rest = pending.split_off(chunk_samples);
                    let samples = std::mem::replace(&mut pending, rest);
                    let chunk = AudioChunk {
                        samples,
                        sample_rate: target_rate,
                        timestamp_ms: started.elapsed().as_millis() as u64,
                    };
                    if chunk_tx.send(chunk).await.is_err() {
                        capturing.store(false, Ordering::SeqCst);
                        return;
                    }
                }
            }
        }));

        Ok(chunk_rx)
    }

    async fn stop(&mut self) -> Result<(), CaptureError> {
        self.capturing.store(false, Ordering::SeqCst);
        if let Some(stop) = self.stream_stop.take() {
            let _ = stop.send(());
        }
        if let Some(chunker) = self.chunker.take() {
            chunker.abort();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "microphone"
    }
}
