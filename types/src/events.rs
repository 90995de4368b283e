mod server;

pub use server::{InlineBlob, ModelTurn, ServerContent, ServerMessage, ServerPart, SetupComplete};

use crate::audio::{Base64EncodedAudioBytes, CAPTURE_MIME_TYPE};
use crate::setup::Setup;

/// Messages the client writes to the live endpoint, serialized as the
/// single-key objects the wire expects (`{"setup": ...}` and so on).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ClientMessage {
    #[serde(rename = "setup")]
    Setup(Setup),
    #[serde(rename = "realtimeInput")]
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    /// Wraps one transport-encoded capture frame for transmission.
    pub fn audio_frame(data: Base64EncodedAudioBytes) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaBlob {
                mime_type: CAPTURE_MIME_TYPE.to_string(),
                data,
            }],
        })
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaBlob>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: Base64EncodedAudioBytes,
}

/// One inbound occurrence on a live connection, flattened out of the
/// optional-field [`ServerMessage`] shape into an explicit variant.
///
/// `Error` and `Closed` are injected by the transport layer; the rest are
/// decoded from server JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// The endpoint acknowledged the setup message; the session is live.
    Open,
    /// A block of synthesized audio, still transport-encoded.
    AudioFragment { data: Base64EncodedAudioBytes },
    /// A text part of a model turn.
    TextFragment { text: String },
    /// The user spoke over the model; queued playback must be discarded.
    Interrupted,
    Error { detail: String },
    Closed { reason: Option<String> },
}
