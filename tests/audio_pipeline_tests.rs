//! Capture pipeline tests against WAV fixtures: chunking, downmix,
//! decimation, gain, and the silence gate.

use std::path::Path;
use std::time::Duration;

use base64::Engine as _;
use tokio::sync::{mpsc, watch};
use voicebridge::audio::{
    decode_pcm16, spawn_capture_pipeline, AudioBackend, AudioChunk, CaptureConfig, CaptureError,
    FileBackend, GateConfig,
};
use voicebridge::live::OutboundMessage;

fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

async fn collect_chunks(mut rx: mpsc::Receiver<AudioChunk>) -> Vec<AudioChunk> {
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    chunks
}

#[tokio::test]
async fn file_backend_emits_fixed_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.wav");
    // 5000 samples: two full 2048 windows, trailing 904 dropped
    write_wav(&path, 16000, 1, &vec![1000i16; 5000]);

    let mut backend = FileBackend::new(
        path.to_string_lossy().to_string(),
        CaptureConfig { sample_rate: 16000, chunk_samples: 2048 },
    );
    let rx = backend.start().await.unwrap();
    let chunks = collect_chunks(rx).await;

    assert_eq!(chunks.len(), 2);
    for chunk in &chunks {
        assert_eq!(chunk.samples.len(), 2048);
        assert_eq!(chunk.sample_rate, 16000);
    }
    assert_eq!(chunks[0].timestamp_ms, 0);
    assert!(chunks[1].timestamp_ms > 0);
}

#[tokio::test]
async fn file_backend_downmixes_and_decimates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stereo32k.wav");
    // Stereo 32 kHz: 8192 frames interleaved, downmixed to 8192 mono then
    // decimated 2:1 to 4096 samples at 16 kHz
    write_wav(&path, 32000, 2, &vec![2000i16; 8192 * 2]);

    let mut backend = FileBackend::new(
        path.to_string_lossy().to_string(),
        CaptureConfig { sample_rate: 16000, chunk_samples: 2048 },
    );
    let rx = backend.start().await.unwrap();
    let chunks = collect_chunks(rx).await;

    assert_eq!(chunks.len(), 2);
    let expected = 2000.0 / 32768.0;
    assert!((chunks[0].samples[0] - expected).abs() < 1e-6);
}

#[tokio::test]
async fn realtime_file_backend_paces_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("paced.wav");
    // Two 2048-sample chunks at 16 kHz, 128ms of audio each
    write_wav(&path, 16000, 1, &vec![1000i16; 4096]);

    let mut backend = FileBackend::new(
        path.to_string_lossy().to_string(),
        CaptureConfig { sample_rate: 16000, chunk_samples: 2048 },
    )
    .with_realtime(true);

    let started = std::time::Instant::now();
    let rx = backend.start().await.unwrap();
    let chunks = collect_chunks(rx).await;

    assert_eq!(chunks.len(), 2);
    // The second chunk only arrives after the first chunk's duration
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn missing_file_is_an_acquisition_failure() {
    let mut backend = FileBackend::new(
        "/nonexistent/never-there.wav".to_string(),
        CaptureConfig::default(),
    );
    match backend.start().await {
        Err(CaptureError::PermissionDenied(_)) => {}
        other => panic!("expected acquisition failure, got {other:?}"),
    }
}

#[tokio::test]
async fn pipeline_applies_gain_and_gates_silence() {
    let (chunk_tx, chunk_rx) = mpsc::channel::<AudioChunk>(16);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(16);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    // Zero hold-off: the gate closes on the silent chunk after the one
    // that started the timer
    let gate = GateConfig { threshold: 0.002, holdoff: Duration::ZERO };
    let task = spawn_capture_pipeline(chunk_rx, 2.0, gate, outbound_tx, shutdown_rx);

    let loud = AudioChunk { samples: vec![0.25_f32; 64], sample_rate: 16000, timestamp_ms: 0 };
    let quiet = AudioChunk { samples: vec![0.0005_f32; 64], sample_rate: 16000, timestamp_ms: 0 };

    chunk_tx.send(loud.clone()).await.unwrap();
    chunk_tx.send(quiet.clone()).await.unwrap();
    chunk_tx.send(quiet.clone()).await.unwrap();
    chunk_tx.send(loud).await.unwrap();
    drop(chunk_tx);
    task.await.unwrap();

    let mut blobs = Vec::new();
    while let Ok(msg) = outbound_rx.try_recv() {
        match msg {
            OutboundMessage::Media(blob) => blobs.push(blob),
            other => panic!("unexpected outbound message: {other:?}"),
        }
    }

    // Loud chunks pass; the first silent chunk starts the hold-off timer
    // and still goes through, the second one is suppressed
    assert_eq!(blobs.len(), 3);

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(blobs[0].data.as_bytes())
        .unwrap();
    let samples = decode_pcm16(&bytes);
    assert_eq!(samples.len(), 64);
    // 0.25 boosted by the 2.0 gain
    assert!((samples[0] - 0.5).abs() < 1e-3);
}

#[tokio::test]
async fn pipeline_keeps_forwarding_inside_holdoff() {
    let (chunk_tx, chunk_rx) = mpsc::channel::<AudioChunk>(16);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(16);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let gate = GateConfig { threshold: 0.002, holdoff: Duration::from_secs(60) };
    let task = spawn_capture_pipeline(chunk_rx, 1.0, gate, outbound_tx, shutdown_rx);

    let loud = AudioChunk { samples: vec![0.25_f32; 64], sample_rate: 16000, timestamp_ms: 0 };
    let quiet = AudioChunk { samples: vec![0.0_f32; 64], sample_rate: 16000, timestamp_ms: 0 };

    chunk_tx.send(loud).await.unwrap();
    chunk_tx.send(quiet.clone()).await.unwrap();
    chunk_tx.send(quiet).await.unwrap();
    drop(chunk_tx);
    task.await.unwrap();

    let mut forwarded = 0;
    while outbound_rx.try_recv().is_ok() {
        forwarded += 1;
    }
    // Trailing silence is still sent while the hold-off window is open
    assert_eq!(forwarded, 3);
}

#[tokio::test]
async fn pipeline_stops_on_shutdown_signal() {
    let (chunk_tx, chunk_rx) = mpsc::channel::<AudioChunk>(16);
    let (outbound_tx, _outbound_rx) = mpsc::channel::<OutboundMessage>(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = spawn_capture_pipeline(
        chunk_rx,
        1.0,
        GateConfig::default(),
        outbound_tx,
        shutdown_rx,
    );

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("pipeline did not stop")
        .unwrap();
    drop(chunk_tx);
}
