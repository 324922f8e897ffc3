use serde::{Deserialize, Serialize};

/// A supported conversation language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Language {
    /// BCP-47 code, e.g. "pt-BR"
    pub code: &'static str,
    /// Display name used in the interpreter directive
    pub name: &'static str,
}

/// Gender of a prebuilt synthesis voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceGender {
    Male,
    Female,
}

impl VoiceGender {
    /// Parse the gender string carried by a `sync_voice_gender` tool call.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "male" => Some(Self::Male),
            "female" => Some(Self::Female),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
        }
    }
}

/// A prebuilt voice offered by the live model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoiceOption {
    pub id: &'static str,
    pub gender: VoiceGender,
}

pub const SUPPORTED_LANGUAGES: &[Language] = &[
    Language { code: "pt-BR", name: "Português" },
    Language { code: "en-US", name: "English" },
    Language { code: "es-ES", name: "Español" },
    Language { code: "fr-FR", name: "Français" },
    Language { code: "de-DE", name: "Deutsch" },
    Language { code: "it-IT", name: "Italiano" },
    Language { code: "ja-JP", name: "日本語" },
    Language { code: "zh-CN", name: "中文" },
];

pub const VOICE_OPTIONS: &[VoiceOption] = &[
    VoiceOption { id: "Fenrir", gender: VoiceGender::Male },
    VoiceOption { id: "Kore", gender: VoiceGender::Female },
];

pub fn default_source_language() -> &'static Language {
    &SUPPORTED_LANGUAGES[0]
}

pub fn default_target_language() -> &'static Language {
    &SUPPORTED_LANGUAGES[1]
}

/// Kore is the default voice.
pub fn default_voice() -> &'static VoiceOption {
    &VOICE_OPTIONS[1]
}

pub fn find_language(code: &str) -> Option<&'static Language> {
    SUPPORTED_LANGUAGES.iter().find(|l| l.code == code)
}

pub fn find_voice(id: &str) -> Option<&'static VoiceOption> {
    VOICE_OPTIONS.iter().find(|v| v.id == id)
}

pub fn voice_for_gender(gender: VoiceGender) -> Option<&'static VoiceOption> {
    VOICE_OPTIONS.iter().find(|v| v.gender == gender)
}
