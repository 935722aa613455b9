use serde::{Deserialize, Serialize};

/// One described person in the Subject section. Gender is always classified
/// explicitly even though identities are anonymized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectEntity {
    pub gender: String,
    pub description: String,
    pub apparel: String,
    pub pose: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectSection {
    pub general_summary: String,
    pub entities: Vec<SubjectEntity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundSection {
    pub general_summary: String,
    pub location: String,
    pub elements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightingSection {
    pub description: String,
    pub source: String,
    pub quality: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositionSection {
    pub description: String,
    pub perspective: String,
    pub framing: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AestheticSection {
    pub description: String,
    pub style: String,
    pub mood: String,
}

/// The root analysis record. Strictly the five requested sections; a payload
/// missing any section or required field does not deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(rename = "Subject")]
    pub subject: SubjectSection,
    #[serde(rename = "Background")]
    pub background: BackgroundSection,
    #[serde(rename = "Lighting")]
    pub lighting: LightingSection,
    #[serde(rename = "Composition")]
    pub composition: CompositionSection,
    #[serde(rename = "Aesthetic")]
    pub aesthetic: AestheticSection,
}

impl AnalysisResult {
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisStatus {
    #[default]
    Idle,
    Analyzing,
    Success,
    Error,
}

impl AnalysisStatus {
    pub fn label(&self) -> &'static str {
        match self {
            AnalysisStatus::Idle => "idle",
            AnalysisStatus::Analyzing => "analyzing",
            AnalysisStatus::Success => "success",
            AnalysisStatus::Error => "error",
        }
    }
}

/// Viewer tabs, one per section of [`AnalysisResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisSection {
    #[default]
    Subject,
    Background,
    Lighting,
    Composition,
    Aesthetic,
}

impl AnalysisSection {
    pub const ALL: [AnalysisSection; 5] = [
        AnalysisSection::Subject,
        AnalysisSection::Background,
        AnalysisSection::Lighting,
        AnalysisSection::Composition,
        AnalysisSection::Aesthetic,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            AnalysisSection::Subject => "Subject",
            AnalysisSection::Background => "Background",
            AnalysisSection::Lighting => "Lighting",
            AnalysisSection::Composition => "Composition",
            AnalysisSection::Aesthetic => "Aesthetic",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "subject" => Some(AnalysisSection::Subject),
            "background" => Some(AnalysisSection::Background),
            "lighting" => Some(AnalysisSection::Lighting),
            "composition" => Some(AnalysisSection::Composition),
            "aesthetic" => Some(AnalysisSection::Aesthetic),
            _ => None,
        }
    }
}
