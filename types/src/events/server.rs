use crate::audio::Base64EncodedAudioBytes;
use crate::events::InboundEvent;

/// Raw server message: a bundle of optional sections, any of which may be
/// absent. Decoded permissively; [`ServerMessage::into_events`] turns it into
/// explicit [`InboundEvent`]s.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMessage {
    pub setup_complete: Option<SetupComplete>,
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SetupComplete {}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub interrupted: Option<bool>,
    pub turn_complete: Option<bool>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ModelTurn {
    pub parts: Vec<ServerPart>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerPart {
    pub text: Option<String>,
    pub inline_data: Option<InlineBlob>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InlineBlob {
    pub mime_type: Option<String>,
    pub data: Base64EncodedAudioBytes,
}

impl ServerMessage {
    /// Flattens the present sections into events, preserving wire order:
    /// model-turn parts first, then the interruption marker. A message with
    /// nothing actionable produces no events.
    pub fn into_events(self) -> Vec<InboundEvent> {
        let mut events = Vec::new();
        if self.setup_complete.is_some() {
            events.push(InboundEvent::Open);
        }
        if let Some(content) = self.server_content {
            if let Some(turn) = content.model_turn {
                for part in turn.parts {
                    if let Some(blob) = part.inline_data {
                        events.push(InboundEvent::AudioFragment { data: blob.data });
                    }
                    if let Some(text) = part.text {
                        events.push(InboundEvent::TextFragment { text });
                    }
                }
            }
            if content.interrupted == Some(true) {
                events.push(InboundEvent::Interrupted);
            }
        }
        events
    }
}
