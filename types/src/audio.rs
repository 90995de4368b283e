use base64::Engine;

/// Audio data encoded as base64
pub type Base64EncodedAudioBytes = String;

/// Sample rate of outbound microphone audio, mono.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of inbound synthesized audio, mono.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

pub const CAPTURE_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Prebuilt synthesized voice identities offered by the live endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Voice {
    Puck,
    Charon,
    Kore,
    Fenrir,
    Aoede,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("pcm16 payload has an odd byte length: {0}")]
    TruncatedSample(usize),
}

/// Transport-encodes float samples as little-endian PCM16 wrapped in base64.
///
/// Samples are expected in `[-1.0, 1.0]`; out-of-range input saturates at the
/// i16 bounds rather than wrapping.
pub fn encode(samples: &[f32]) -> Base64EncodedAudioBytes {
    let pcm16: Vec<u8> = samples
        .iter()
        .flat_map(|&sample| {
            let v = (sample * 32768.0)
                .round()
                .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            v.to_le_bytes()
        })
        .collect();
    base64::engine::general_purpose::STANDARD.encode(&pcm16)
}

/// Decodes a base64 fragment of little-endian PCM16 into normalized floats.
pub fn decode(fragment: &str) -> Result<Vec<f32>, DecodeError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(fragment)?;
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::TruncatedSample(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}
