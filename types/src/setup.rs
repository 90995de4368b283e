use crate::audio::Voice;

/// Session configuration sent as the first message on a live connection.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// The conversational model to stream against.
    model: String,

    /// Response modality and synthesized voice selection.
    generation_config: GenerationConfig,

    /// The roleplay persona prepended to every model turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

impl Setup {
    pub fn new() -> SetupConfigurator {
        SetupConfigurator::new()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system_instruction(&self) -> Option<&str> {
        self.system_instruction
            .as_ref()
            .and_then(|content| content.parts.first())
            .map(|part| part.text.as_str())
    }

    pub fn voice(&self) -> Option<Voice> {
        self.generation_config
            .speech_config
            .as_ref()
            .map(|speech| speech.voice_config.prebuilt_voice_config.voice_name)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    response_modalities: Vec<Modality>,

    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Modality {
    #[serde(rename = "AUDIO")]
    Audio,
    #[serde(rename = "TEXT")]
    Text,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    voice_name: Voice,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Content {
    parts: Vec<TextPart>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TextPart {
    text: String,
}

pub struct SetupConfigurator {
    setup: Setup,
}

impl SetupConfigurator {
    pub fn new() -> Self {
        Self {
            setup: Setup {
                model: String::new(),
                generation_config: GenerationConfig {
                    response_modalities: vec![Modality::Audio],
                    speech_config: None,
                },
                system_instruction: None,
            },
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.setup.model = model.to_string();
        self
    }

    pub fn with_response_modality(mut self, modality: Modality) -> Self {
        self.setup.generation_config.response_modalities = vec![modality];
        self
    }

    pub fn with_voice(mut self, voice: Voice) -> Self {
        self.setup.generation_config.speech_config = Some(SpeechConfig {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig { voice_name: voice },
            },
        });
        self
    }

    pub fn with_system_instruction(mut self, instruction: &str) -> Self {
        self.setup.system_instruction = Some(Content {
            parts: vec![TextPart {
                text: instruction.to_string(),
            }],
        });
        self
    }

    pub fn build(self) -> Setup {
        self.setup
    }
}

impl Default for SetupConfigurator {
    fn default() -> Self {
        Self::new()
    }
}
