use serde::{Deserialize, Serialize};

/// Output-shape hint accepted by the edit model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "9:16")]
    Story,
    #[serde(rename = "16:9")]
    Cinema,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Portrait,
        AspectRatio::Landscape,
        AspectRatio::Story,
        AspectRatio::Cinema,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "3:4",
            AspectRatio::Landscape => "4:3",
            AspectRatio::Story => "9:16",
            AspectRatio::Cinema => "16:9",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "1:1" => Some(AspectRatio::Square),
            "3:4" => Some(AspectRatio::Portrait),
            "4:3" => Some(AspectRatio::Landscape),
            "9:16" => Some(AspectRatio::Story),
            "16:9" => Some(AspectRatio::Cinema),
            _ => None,
        }
    }
}

/// Target output size. The current edit model ignores it, so the value is
/// stored but never transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageSize {
    #[default]
    #[serde(rename = "1K")]
    OneK,
    #[serde(rename = "2K")]
    TwoK,
    #[serde(rename = "4K")]
    FourK,
}

impl ImageSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSize::OneK => "1K",
            ImageSize::TwoK => "2K",
            ImageSize::FourK => "4K",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_uppercase().as_str() {
            "1K" => Some(ImageSize::OneK),
            "2K" => Some(ImageSize::TwoK),
            "4K" => Some(ImageSize::FourK),
            _ => None,
        }
    }
}

/// User-editable edit request parameters. Mutated incrementally before
/// submission; the requester reads a snapshot at submission time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EditConfig {
    pub prompt: String,
    pub aspect_ratio: AspectRatio,
    pub image_size: ImageSize,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{AspectRatio, EditConfig, ImageSize};

    #[test]
    fn aspect_ratio_parses_the_five_supported_values() {
        for ratio in AspectRatio::ALL {
            assert_eq!(AspectRatio::parse(ratio.as_str()), Some(ratio));
        }
        assert_eq!(AspectRatio::parse("2:1"), None);
        assert_eq!(AspectRatio::parse(""), None);
    }

    #[test]
    fn aspect_ratio_serializes_as_literal_ratio() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_value(AspectRatio::Story)?, json!("9:16"));
        assert_eq!(
            serde_json::from_value::<AspectRatio>(json!("16:9"))?,
            AspectRatio::Cinema
        );
        Ok(())
    }

    #[test]
    fn image_size_parse_is_case_insensitive() {
        assert_eq!(ImageSize::parse("2k"), Some(ImageSize::TwoK));
        assert_eq!(ImageSize::parse("8K"), None);
    }

    #[test]
    fn default_config_matches_initial_controls() {
        let config = EditConfig::default();
        assert!(config.prompt.is_empty());
        assert_eq!(config.aspect_ratio, AspectRatio::Square);
        assert_eq!(config.image_size, ImageSize::OneK);
    }
}
