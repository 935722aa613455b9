use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use anyedit_contracts::analysis::AnalysisResult;
use anyedit_contracts::edit::EditConfig;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

pub const ANALYSIS_MODEL: &str = "gemini-3-flash-preview";
pub const EDIT_MODEL: &str = "gemini-2.5-flash-image";

/// Shown verbatim whenever an edit fails on a permission denial, regardless
/// of the provider's own message text.
pub const PERMISSION_DENIED_MESSAGE: &str =
    "Permission denied. Please sign in again with a valid paid API key.";

const PERMISSION_DENIAL_MARKERS: &[&str] = &[
    "The caller does not have permission",
    "PERMISSION_DENIED",
    "403",
    "Requested entity was not found",
];

const PREVIEW_MAX_DIM: u32 = 512;
const REQUEST_TIMEOUT_S: f64 = 90.0;

const ANALYSIS_SYSTEM_INSTRUCTION: &str = "You are an expert visual analyst. You prioritize privacy by anonymizing identities but accurately classify gender and visual features.";

const ANALYSIS_PROMPT: &str = "\
Analyze the provided image.

CRITICAL PRIVACY INSTRUCTION:
- Do NOT identify specific real people, celebrities, or public figures by name.
- Instead, describe them generally (e.g., \"adult female\", \"young male\").
- You MUST explicitly identify the gender of subjects as a feature (e.g., Male, Female, Non-binary, Androgynous).

Structure the analysis into exactly these five categories:
1. Subject: Who is in the photo? (Gender, apparel, pose).
2. Background: What is the setting?
3. Lighting: Sources and quality.
4. Composition: Framing and perspective.
5. Aesthetic: Style and mood.";

/// A validated, fully loaded source image.
#[derive(Debug, Clone)]
pub struct SelectedImage {
    path: PathBuf,
    mime: &'static str,
    bytes: Vec<u8>,
}

impl SelectedImage {
    /// Accepts the path only when its media type is an image type; any other
    /// file fails here and leaves caller state untouched.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let Some(mime) = image_mime_for_path(&path) else {
            bail!("{} is not an image file", path.display());
        };
        let bytes =
            fs::read(&path).with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Self { path, mime, bytes })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mime(&self) -> &'static str {
        self.mime
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }

    pub fn base64_payload(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn inline_part(&self) -> Value {
        inline_data_part(&self.bytes, self.mime)
    }
}

pub fn image_mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "heic" | "heif" => Some("image/heic"),
        "avif" => Some("image/avif"),
        _ => None,
    }
}

/// The pure (bytes, mime) -> request-part transform behind every upload.
pub fn inline_data_part(bytes: &[u8], mime: &str) -> Value {
    json!({
        "inlineData": {
            "mimeType": mime,
            "data": BASE64.encode(bytes),
        }
    })
}

/// Strips a `data:<mime>;base64,` prefix when present, so both raw base64
/// strings and full data URLs are accepted.
pub fn base64_from_data_url(value: &str) -> &str {
    if !value.starts_with("data:") {
        return value;
    }
    value.split_once(',').map(|(_, tail)| tail).unwrap_or(value)
}

pub fn decode_image_data_url(value: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(base64_from_data_url(value).as_bytes())
        .context("image data URL base64 decode failed")
}

/// Transient on-disk preview. Deleted exactly once: on the first `release`
/// call, or on drop when the handle is superseded or torn down.
#[derive(Debug)]
pub struct PreviewHandle {
    path: PathBuf,
    released: bool,
}

impl PreviewHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(&mut self) {
        if !self.released {
            let _ = fs::remove_file(&self.path);
            self.released = true;
        }
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Writes a downscaled JPEG preview of the selected image. Alpha is
/// flattened against white before encoding.
pub fn write_preview(image: &SelectedImage, dir: &Path) -> Result<PreviewHandle> {
    let decoded = image::load_from_memory(image.bytes())
        .with_context(|| format!("failed decoding {}", image.path().display()))?;
    let rgba = decoded.to_rgba8();
    let mut flattened = RgbaImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(
            x,
            y,
            Rgba([blend(pixel[0]), blend(pixel[1]), blend(pixel[2]), 255]),
        );
    }
    let resized = DynamicImage::ImageRgba8(flattened)
        .resize(PREVIEW_MAX_DIM, PREVIEW_MAX_DIM, FilterType::Triangle)
        .to_rgb8();
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, 90);
    encoder
        .encode_image(&DynamicImage::ImageRgb8(resized))
        .context("preview encode failed")?;

    fs::create_dir_all(dir)?;
    let path = dir.join(format!("preview-{}.jpg", timestamp_millis()));
    fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(PreviewHandle {
        path,
        released: false,
    })
}

/// The two model operations the orchestrator dispatches to.
pub trait VisionBackend {
    fn analyze(&self, image: &SelectedImage) -> Result<AnalysisResult>;
    fn edit(&self, image: &SelectedImage, config: &EditConfig) -> Result<String>;
}

pub struct GeminiClient {
    api_base: String,
    http: HttpClient,
    record_dir: Option<PathBuf>,
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl GeminiClient {
    pub fn new() -> Self {
        Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            http: HttpClient::new(),
            record_dir: None,
        }
    }

    /// Writes a sanitized request record beside the artifacts for every
    /// completed call.
    pub fn with_record_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.record_dir = Some(dir.into());
        self
    }

    fn api_key() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    pub fn has_api_key() -> bool {
        Self::api_key().is_some()
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn post_generate(&self, model: &str, payload: &Value) -> Result<Value> {
        let Some(api_key) = Self::api_key() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint_for_model(model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key.as_str())])
            .timeout(Duration::from_secs_f64(REQUEST_TIMEOUT_S))
            .json(payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        response_json_or_error("Gemini", response)
    }

    fn record_exchange(
        &self,
        kind: &str,
        model: &str,
        payload: &Value,
        response: &Value,
    ) -> Result<()> {
        let Some(dir) = self.record_dir.as_ref() else {
            return Ok(());
        };
        let record = json!({
            "kind": kind,
            "model": model,
            "request": sanitize_payload(payload),
            "response": {
                "candidates": response
                    .get("candidates")
                    .and_then(Value::as_array)
                    .map(|rows| rows.len())
                    .unwrap_or(0),
                "usage_metadata": response.get("usageMetadata").cloned().unwrap_or(Value::Null),
            },
        });
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("request-{kind}-{}.json", timestamp_millis()));
        fs::write(&path, serde_json::to_string_pretty(&record)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// One atomic analysis call: fixed prompt, fixed structured-output
    /// schema, strict parse of the returned text.
    pub fn analyze_image(&self, image: &SelectedImage) -> Result<AnalysisResult> {
        let payload = build_analysis_payload(image);
        let response = self.post_generate(ANALYSIS_MODEL, &payload)?;
        self.record_exchange("analysis", ANALYSIS_MODEL, &payload, &response)?;
        analysis_from_response(&response)
    }

    /// One atomic edit call. Returns the first inline image from the
    /// response re-encoded as a PNG data URL.
    pub fn generate_edited_image(&self, image: &SelectedImage, config: &EditConfig) -> Result<String> {
        let payload = build_edit_payload(image, config);
        let response = self.post_generate(EDIT_MODEL, &payload)?;
        self.record_exchange("edit", EDIT_MODEL, &payload, &response)?;
        edited_image_from_response(&response)
    }
}

impl VisionBackend for GeminiClient {
    fn analyze(&self, image: &SelectedImage) -> Result<AnalysisResult> {
        self.analyze_image(image)
    }

    fn edit(&self, image: &SelectedImage, config: &EditConfig) -> Result<String> {
        self.generate_edited_image(image, config)
    }
}

/// Response schema mirroring [`AnalysisResult`] exactly.
pub fn analysis_response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "Subject": {
                "type": "OBJECT",
                "properties": {
                    "general_summary": {
                        "type": "STRING",
                        "description": "Overview of subjects without naming identities.",
                    },
                    "entities": {
                        "type": "ARRAY",
                        "items": {
                            "type": "OBJECT",
                            "properties": {
                                "gender": {
                                    "type": "STRING",
                                    "description": "Explicit gender identification (e.g. Female, Male).",
                                },
                                "description": {
                                    "type": "STRING",
                                    "description": "Physical appearance without identity.",
                                },
                                "apparel": {"type": "STRING"},
                                "pose": {"type": "STRING"},
                            },
                            "required": ["gender", "description", "apparel", "pose"],
                        },
                    },
                },
                "required": ["general_summary", "entities"],
            },
            "Background": {
                "type": "OBJECT",
                "properties": {
                    "general_summary": {"type": "STRING"},
                    "location": {"type": "STRING"},
                    "elements": {"type": "ARRAY", "items": {"type": "STRING"}},
                },
                "required": ["general_summary", "location", "elements"],
            },
            "Lighting": {
                "type": "OBJECT",
                "properties": {
                    "description": {"type": "STRING"},
                    "source": {"type": "STRING"},
                    "quality": {"type": "STRING"},
                },
                "required": ["description", "source", "quality"],
            },
            "Composition": {
                "type": "OBJECT",
                "properties": {
                    "description": {"type": "STRING"},
                    "perspective": {"type": "STRING"},
                    "framing": {"type": "STRING"},
                },
                "required": ["description", "perspective", "framing"],
            },
            "Aesthetic": {
                "type": "OBJECT",
                "properties": {
                    "description": {"type": "STRING"},
                    "style": {"type": "STRING"},
                    "mood": {"type": "STRING"},
                },
                "required": ["description", "style", "mood"],
            },
        },
        "required": ["Subject", "Background", "Lighting", "Composition", "Aesthetic"],
    })
}

fn build_analysis_payload(image: &SelectedImage) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [image.inline_part(), {"text": ANALYSIS_PROMPT}],
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": analysis_response_schema(),
        },
        "systemInstruction": {
            "parts": [{"text": ANALYSIS_SYSTEM_INSTRUCTION}],
        },
    })
}

// The edit model accepts no responseMimeType or responseSchema, only the
// aspect-ratio shape hint; the configured image size is not transmitted.
fn build_edit_payload(image: &SelectedImage, config: &EditConfig) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [image.inline_part(), {"text": config.prompt}],
        }],
        "generationConfig": {
            "imageConfig": {
                "aspectRatio": config.aspect_ratio.as_str(),
            },
        },
    })
}

pub fn analysis_from_response(response: &Value) -> Result<AnalysisResult> {
    let text = first_candidate_text(response);
    if text.trim().is_empty() {
        bail!("Gemini returned no analysis text");
    }
    serde_json::from_str(&text).context("analysis response did not match the expected schema")
}

fn first_candidate_text(response: &Value) -> String {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<&str>>()
                .join("")
        })
        .unwrap_or_default()
}

pub fn edited_image_from_response(response: &Value) -> Result<String> {
    let Some(data) = first_inline_image_data(response) else {
        bail!("No image data found in response");
    };
    Ok(format!("data:image/png;base64,{data}"))
}

fn first_inline_image_data(response: &Value) -> Option<String> {
    let candidates = response.get("candidates").and_then(Value::as_array)?;
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            let data = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
                .and_then(|inline| inline.get("data"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !data.is_empty() {
                return Some(data.to_string());
            }
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditFailureKind {
    Permission,
    Generic,
}

/// Typed classification of an edit error chain. Permission denials carry the
/// fixed user-facing message instead of the provider text.
#[derive(Debug, Clone)]
pub struct EditFailure {
    pub kind: EditFailureKind,
    pub message: String,
}

impl EditFailure {
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let chain = error_chain_text(err, 512);
        if is_permission_denial(&chain) {
            Self {
                kind: EditFailureKind::Permission,
                message: PERMISSION_DENIED_MESSAGE.to_string(),
            }
        } else {
            Self {
                kind: EditFailureKind::Generic,
                message: chain,
            }
        }
    }
}

pub fn is_permission_denial(text: &str) -> bool {
    PERMISSION_DENIAL_MARKERS
        .iter()
        .any(|marker| text.contains(marker))
}

pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                if key.to_ascii_lowercase() == "data" {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}
