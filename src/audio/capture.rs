//! Capture pipeline
//!
//! One task per session: drains the backend's chunk stream, applies gain,
//! runs the voice activity gate, encodes accepted chunks, and hands them to
//! the live session's outbound sender. Send failures are swallowed — a
//! missed chunk is preferable to stalling capture.

use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::AudioChunk;
use super::encoder::encode_pcm_blob;
use super::gate::{GateConfig, VoiceGate};
use crate::live::OutboundMessage;

pub fn spawn_capture_pipeline(
    mut chunks: mpsc::Receiver<AudioChunk>,
    gain: f32,
    gate_config: GateConfig,
    outbound: mpsc::Sender<OutboundMessage>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("capture pipeline started");
        let mut gate = VoiceGate::new(gate_config);
        let mut forwarded: u64 = 0;
        let mut suppressed: u64 = 0;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                chunk = chunks.recv() => {
                    let Some(chunk) = chunk else { break };

                    let samples: Vec<f32> =
                        chunk.samples.iter().map(|s| s * gain).collect();

                    if !gate.evaluate(&samples, Instant::now()) {
                        suppressed += 1;
                        continue;
                    }

                    let blob = encode_pcm_blob(&samples);
                    // Fire-and-forget: drop the chunk if the outbound queue
                    // is full or closed.
                    if let Err(e) = outbound.try_send(OutboundMessage::Media(blob)) {
                        debug!(error = %e, "dropping chunk, outbound send failed");
                        continue;
                    }

                    forwarded += 1;
                    if forwarded % 100 == 1 {
                        debug!(forwarded, suppressed, "capture pipeline progress");
                    }
                }
            }
        }

        info!(forwarded, suppressed, "capture pipeline stopped");
    })
}
