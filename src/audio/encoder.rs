//! PCM wire codec
//!
//! Outbound audio goes to the live session as signed 16-bit little-endian
//! PCM, base64-framed with a MIME type. Inbound synthesized audio arrives in
//! the same raw format at 24 kHz and is decoded back to f32 for playback.

use base64::Engine;
use serde::{Deserialize, Serialize};

/// MIME type for outbound microphone audio (16 kHz PCM mono)
pub const INPUT_AUDIO_MIME: &str = "audio/pcm;rate=16000";

/// Base64-framed media payload as the wire protocol expects it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaBlob {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// base64-encoded PCM bytes
    pub data: String,
}

/// Encode normalized f32 samples into a base64 PCM16 blob.
///
/// Samples are clamped to [-1, 1] and NaN collapses to 0. Positive values
/// scale by 32767 and negative by 32768 so both endpoints of the i16 range
/// are reachable.
pub fn encode_pcm_blob(samples: &[f32]) -> MediaBlob {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
        let quantized = if value >= 0.0 {
            (value * 32767.0) as i16
        } else {
            (value * 32768.0) as i16
        };
        bytes.extend_from_slice(&quantized.to_le_bytes());
    }

    MediaBlob {
        mime_type: INPUT_AUDIO_MIME.to_string(),
        data: base64::engine::general_purpose::STANDARD.encode(&bytes),
    }
}

/// Decode raw PCM16 little-endian bytes into normalized f32 samples.
/// An odd trailing byte is ignored.
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_blob(blob: &MediaBlob) -> Vec<f32> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&blob.data)
            .unwrap();
        decode_pcm16(&bytes)
    }

    #[test]
    fn roundtrip_within_quantization_error() {
        let samples = vec![0.0, 0.25, -0.25, 0.9999, -1.0, 0.5];
        let blob = encode_pcm_blob(&samples);
        let decoded = decode_blob(&blob);
        assert_eq!(decoded.len(), samples.len());
        for (orig, round) in samples.iter().zip(&decoded) {
            assert!((orig - round).abs() <= 1.0 / 32767.0, "{orig} vs {round}");
        }
    }

    #[test]
    fn out_of_range_samples_clamp() {
        let blob = encode_pcm_blob(&[2.0, -2.0]);
        let decoded = decode_blob(&blob);
        assert!((decoded[0] - 32767.0 / 32768.0).abs() < 1e-6);
        assert!((decoded[1] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn nan_clamps_to_zero() {
        let blob = encode_pcm_blob(&[f32::NAN]);
        let decoded = decode_blob(&blob);
        assert_eq!(decoded, vec![0.0]);
    }

    #[test]
    fn blob_carries_input_mime_type() {
        let blob = encode_pcm_blob(&[0.0]);
        assert_eq!(blob.mime_type, "audio/pcm;rate=16000");
    }

    #[test]
    fn decode_ignores_odd_trailing_byte() {
        let samples = decode_pcm16(&[0x00, 0x40, 0x7f]);
        assert_eq!(samples.len(), 1);
        assert!((samples[0] - 0.5).abs() < 1e-6);
    }
}
