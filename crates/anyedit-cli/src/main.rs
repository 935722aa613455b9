use std::env;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use anyedit_contracts::analysis::{AnalysisResult, AnalysisSection, AnalysisStatus};
use anyedit_contracts::console::{parse_intent, CONSOLE_HELP_COMMANDS};
use anyedit_contracts::edit::{AspectRatio, EditConfig, ImageSize};
use anyedit_contracts::events::{EventFields, EventLog};
use anyedit_contracts::session::{KeySelector, LoginOutcome, Plan, SessionStore, UserProfile};
use anyedit_engine::{
    decode_image_data_url, error_chain_text, timestamp_millis, write_preview, EditFailure,
    EditFailureKind, GeminiClient, PreviewHandle, SelectedImage, VisionBackend, ANALYSIS_MODEL,
    EDIT_MODEL,
};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "anyedit", version, about = "AnyEdit visual analysis console")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Studio(StudioArgs),
    Analyze(AnalyzeArgs),
    Edit(EditArgs),
}

#[derive(Debug, Parser)]
struct StudioArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct EditArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = "1:1")]
    aspect_ratio: String,
    #[arg(long)]
    out: PathBuf,
}

const COPY_ACK_WINDOW: Duration = Duration::from_secs(2);

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("anyedit error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Studio(args) => {
            run_studio(args)?;
            Ok(0)
        }
        Command::Analyze(args) => run_analyze_once(args),
        Command::Edit(args) => run_edit_once(args),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum StudioMode {
    #[default]
    Analyze,
    Edit,
}

impl StudioMode {
    fn label(&self) -> &'static str {
        match self {
            StudioMode::Analyze => "analyze",
            StudioMode::Edit => "edit",
        }
    }

    fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "analyze" => Some(StudioMode::Analyze),
            "edit" => Some(StudioMode::Edit),
            _ => None,
        }
    }
}

/// Top-level controller for the studio: selected file, per-request status,
/// edit configuration, and the session record.
struct StudioState {
    backend: Box<dyn VisionBackend>,
    session: SessionStore,
    events: EventLog,
    out_dir: PathBuf,
    mode: StudioMode,
    file: Option<SelectedImage>,
    preview: Option<PreviewHandle>,
    analysis_result: Option<AnalysisResult>,
    analysis_status: AnalysisStatus,
    analysis_error: Option<String>,
    active_tab: AnalysisSection,
    edit_config: EditConfig,
    edit_result: Option<String>,
    edit_artifact: Option<PathBuf>,
    edit_in_flight: bool,
    edit_error: Option<String>,
    copied_at: Option<Instant>,
}

impl StudioState {
    fn new(
        backend: Box<dyn VisionBackend>,
        session: SessionStore,
        events: EventLog,
        out_dir: PathBuf,
    ) -> Self {
        Self {
            backend,
            session,
            events,
            out_dir,
            mode: StudioMode::default(),
            file: None,
            preview: None,
            analysis_result: None,
            analysis_status: AnalysisStatus::Idle,
            analysis_error: None,
            active_tab: AnalysisSection::default(),
            edit_config: EditConfig::default(),
            edit_result: None,
            edit_artifact: None,
            edit_in_flight: false,
            edit_error: None,
            copied_at: None,
        }
    }

    /// Intake. Rejection leaves every prior field untouched; acceptance
    /// supersedes the preview and clears results that belonged to the old
    /// file.
    fn select_file(&mut self, path: &Path) -> Result<()> {
        let image = SelectedImage::open(path)?;
        if let Some(mut previous) = self.preview.take() {
            previous.release();
        }
        match write_preview(&image, &self.out_dir) {
            Ok(handle) => self.preview = Some(handle),
            Err(err) => {
                self.events.emit(
                    "preview_failed",
                    fields(json!({"error": error_chain_text(&err, 256)})),
                )?;
            }
        }
        self.events.emit(
            "file_selected",
            fields(json!({
                "path": path.to_string_lossy(),
                "mime": image.mime(),
                "sha256": image.digest(),
            })),
        )?;
        self.file = Some(image);
        self.analysis_result = None;
        self.analysis_status = AnalysisStatus::Idle;
        self.edit_result = None;
        self.edit_artifact = None;
        self.edit_error = None;
        Ok(())
    }

    /// Returns false when no file is selected (the operation is a no-op).
    fn run_analysis(&mut self) -> Result<bool> {
        let Some(image) = self.file.clone() else {
            return Ok(false);
        };
        self.analysis_status = AnalysisStatus::Analyzing;
        self.analysis_error = None;
        self.events
            .emit("analysis_started", fields(json!({"model": ANALYSIS_MODEL})))?;
        match self.backend.analyze(&image) {
            Ok(result) => {
                self.events.emit(
                    "analysis_succeeded",
                    fields(json!({"entities": result.subject.entities.len()})),
                )?;
                self.analysis_result = Some(result);
                self.analysis_status = AnalysisStatus::Success;
            }
            Err(err) => {
                let message = error_chain_text(&err, 512);
                self.events
                    .emit("analysis_failed", fields(json!({"error": message.as_str()})))?;
                self.analysis_status = AnalysisStatus::Error;
                self.analysis_error = Some(message);
            }
        }
        Ok(true)
    }

    /// Returns false when no file is selected. Permission denials invalidate
    /// the session and surface the fixed message.
    fn run_edit(&mut self) -> Result<bool> {
        let Some(image) = self.file.clone() else {
            return Ok(false);
        };
        self.edit_in_flight = true;
        self.edit_error = None;
        self.events.emit(
            "edit_started",
            fields(json!({
                "model": EDIT_MODEL,
                "aspect_ratio": self.edit_config.aspect_ratio.as_str(),
            })),
        )?;
        let outcome = self.login_then_edit(&image);
        self.edit_in_flight = false;
        match outcome {
            Ok(data_url) => {
                match persist_edit_artifact(&self.out_dir, &data_url) {
                    Ok((path, width, height)) => {
                        self.events.emit(
                            "edit_succeeded",
                            fields(json!({
                                "artifact": path.to_string_lossy(),
                                "width": width,
                                "height": height,
                            })),
                        )?;
                        self.edit_artifact = Some(path);
                    }
                    Err(err) => {
                        self.events.emit(
                            "artifact_write_failed",
                            fields(json!({"error": error_chain_text(&err, 256)})),
                        )?;
                        self.edit_artifact = None;
                    }
                }
                self.edit_result = Some(data_url);
            }
            Err(err) => {
                let failure = EditFailure::from_anyhow(&err);
                if failure.kind == EditFailureKind::Permission {
                    self.session.logout();
                }
                self.events.emit(
                    "edit_failed",
                    fields(json!({
                        "kind": match failure.kind {
                            EditFailureKind::Permission => "permission",
                            EditFailureKind::Generic => "generic",
                        },
                        "error": failure.message.as_str(),
                    })),
                )?;
                self.edit_error = Some(failure.message);
            }
        }
        Ok(true)
    }

    // A login that resolves without establishing a session still proceeds to
    // the edit call (observed behavior, kept intentionally).
    fn login_then_edit(&mut self, image: &SelectedImage) -> Result<String> {
        if !self.session.is_authenticated() {
            match self.session.login()? {
                LoginOutcome::Established => {
                    self.events.emit("login_succeeded", EventFields::new())?;
                }
                LoginOutcome::Unavailable => {
                    self.events.emit("login_unavailable", EventFields::new())?;
                }
            }
        }
        self.backend.edit(image, &self.edit_config)
    }

    fn analysis_json(&self) -> Option<String> {
        self.analysis_result.as_ref().map(AnalysisResult::to_pretty_json)
    }

    fn mark_copied(&mut self, now: Instant) {
        self.copied_at = Some(now);
    }

    fn copy_ack_active(&self, now: Instant) -> bool {
        self.copied_at
            .map(|at| now.duration_since(at) < COPY_ACK_WINDOW)
            .unwrap_or(false)
    }

    fn copy_button_label(&self, now: Instant) -> &'static str {
        if self.copy_ack_active(now) {
            "Copied!"
        } else {
            "Copy JSON"
        }
    }

    fn save_edit_result(&mut self, target: Option<&Path>) -> Result<Option<PathBuf>> {
        let Some(data_url) = self.edit_result.clone() else {
            return Ok(None);
        };
        let bytes = decode_image_data_url(&data_url)?;
        let path = match target {
            Some(path) => path.to_path_buf(),
            None => self
                .out_dir
                .join(format!("edited-{}.png", timestamp_millis())),
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&path, &bytes).with_context(|| format!("failed to write {}", path.display()))?;
        self.events.emit(
            "artifact_saved",
            fields(json!({"path": path.to_string_lossy()})),
        )?;
        Ok(Some(path))
    }
}

fn persist_edit_artifact(out_dir: &Path, data_url: &str) -> Result<(PathBuf, u32, u32)> {
    let bytes = decode_image_data_url(data_url)?;
    let decoded = image::load_from_memory(&bytes).context("edited image decode failed")?;
    fs::create_dir_all(out_dir)?;
    let path = out_dir.join(format!("edited-{}.png", timestamp_millis()));
    fs::write(&path, &bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok((path, decoded.width(), decoded.height()))
}

fn edit_blocker(state: &StudioState) -> Option<&'static str> {
    if state.file.is_none() {
        return Some("Select an image first (/open <path>).");
    }
    if state.edit_config.prompt.trim().is_empty() {
        return Some("Set an edit instruction first (/prompt <text>).");
    }
    None
}

fn render_section(result: &AnalysisResult, section: AnalysisSection) -> String {
    let mut out = format!("[{}]\n", section.label());
    match section {
        AnalysisSection::Subject => {
            out.push_str(&format!("Summary: {}\n", result.subject.general_summary));
            for (idx, entity) in result.subject.entities.iter().enumerate() {
                out.push_str(&format!("Entity {} ({})\n", idx + 1, entity.gender));
                out.push_str(&format!("  Appearance: {}\n", entity.description));
                out.push_str(&format!("  Apparel: {}\n", entity.apparel));
                out.push_str(&format!("  Pose: {}\n", entity.pose));
            }
        }
        AnalysisSection::Background => {
            out.push_str(&format!("Location: {}\n", result.background.location));
            out.push_str(&format!(
                "Description: {}\n",
                result.background.general_summary
            ));
            if !result.background.elements.is_empty() {
                out.push_str("Key elements:\n");
                for element in &result.background.elements {
                    out.push_str(&format!("  - {element}\n"));
                }
            }
        }
        AnalysisSection::Lighting => {
            out.push_str(&format!("Source: {}\n", result.lighting.source));
            out.push_str(&format!("Quality: {}\n", result.lighting.quality));
            out.push_str(&format!("Analysis: {}\n", result.lighting.description));
        }
        AnalysisSection::Composition => {
            out.push_str(&format!("Perspective: {}\n", result.composition.perspective));
            out.push_str(&format!("Framing: {}\n", result.composition.framing));
            out.push_str(&format!("Structure: {}\n", result.composition.description));
        }
        AnalysisSection::Aesthetic => {
            out.push_str(&format!("Style: {}\n", result.aesthetic.style));
            out.push_str(&format!("Mood: {}\n", result.aesthetic.mood));
            out.push_str(&format!("Notes: {}\n", result.aesthetic.description));
        }
    }
    out
}

fn render_status(state: &StudioState, now: Instant) -> String {
    let file = state
        .file
        .as_ref()
        .map(|image| image.path().display().to_string())
        .unwrap_or_else(|| "none".to_string());
    let edit = if state.edit_in_flight {
        "generating"
    } else if state.edit_error.is_some() {
        "error"
    } else if state.edit_result.is_some() {
        "result ready"
    } else {
        "idle"
    };
    format!(
        "mode: {} | file: {} | analysis: {} | edit: {} | ratio: {} | {}",
        state.mode.label(),
        file,
        state.analysis_status.label(),
        edit,
        state.edit_config.aspect_ratio.as_str(),
        state.copy_button_label(now),
    )
}

fn render_edit_panel(state: &StudioState) -> String {
    let mut out = String::from("[Edit]\n");
    let prompt = state.edit_config.prompt.trim();
    out.push_str(&format!(
        "Instruction: {}\n",
        if prompt.is_empty() { "(not set)" } else { prompt }
    ));
    out.push_str(&format!(
        "Aspect ratio: {} | size: {} (ignored by the model)\n",
        state.edit_config.aspect_ratio.as_str(),
        state.edit_config.image_size.as_str(),
    ));
    match (&state.edit_artifact, &state.edit_result) {
        (Some(path), _) => out.push_str(&format!("Result: {}\n", path.display())),
        (None, Some(_)) => out.push_str("Result: in memory (use /save <path>)\n"),
        (None, None) => out.push_str("Result: none\n"),
    }
    if let Some(message) = state.edit_error.as_deref() {
        out.push_str(&format!("Error: {message}\n"));
    }
    out
}

fn render_profile(user: Option<&UserProfile>) -> String {
    match user {
        Some(user) => {
            let plan = match user.plan {
                Plan::Free => "Free",
                Plan::Pro => "Pro",
            };
            format!("{} <{}> ({plan} plan)", user.name, user.email)
        }
        None => "Signed out".to_string(),
    }
}

fn copy_to_clipboard(text: &str) -> Result<()> {
    let mut clipboard = arboard::Clipboard::new().context("clipboard unavailable")?;
    clipboard
        .set_text(text.to_string())
        .context("clipboard write failed")?;
    Ok(())
}

/// Key selection backed by the process environment, with an interactive
/// prompt when no key is configured yet.
struct StdinKeySelector;

impl KeySelector for StdinKeySelector {
    fn has_selected_key(&self) -> bool {
        GeminiClient::has_api_key()
    }

    fn open_select_key(&self) -> Result<()> {
        if GeminiClient::has_api_key() {
            return Ok(());
        }
        print!("Paste a Gemini API key: ");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().read_line(&mut line)?;
        let key = line.trim();
        if key.is_empty() {
            bail!("no API key entered");
        }
        env::set_var("GEMINI_API_KEY", key);
        Ok(())
    }
}

fn run_studio(args: StudioArgs) -> Result<()> {
    fs::create_dir_all(&args.out)?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let events = EventLog::new(events_path, Uuid::new_v4().to_string());

    let mut session = SessionStore::new(Some(Box::new(StdinKeySelector)));
    session.initialize();
    let client = GeminiClient::new().with_record_dir(&args.out);
    let mut state = StudioState::new(Box::new(client), session, events, args.out.clone());
    state.events.emit(
        "studio_started",
        fields(json!({"out_dir": args.out.to_string_lossy()})),
    )?;

    println!("AnyEdit studio started. Type /help for commands.");
    if state.session.is_authenticated() {
        println!("{}", render_profile(state.session.current_user()));
    }

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        match intent.action.as_str() {
            "noop" => continue,
            "help" => {
                println!("Commands: {}", CONSOLE_HELP_COMMANDS.join(" "));
            }
            "select_file" => {
                let Some(path_text) = value_as_non_empty_string(intent.command_args.get("path"))
                else {
                    println!("/open requires a path");
                    continue;
                };
                match state.select_file(Path::new(&path_text)) {
                    Ok(()) => {
                        let mime = state
                            .file
                            .as_ref()
                            .map(|image| image.mime())
                            .unwrap_or("image");
                        println!("Loaded {path_text} ({mime}).");
                        if let Some(preview) = state.preview.as_ref() {
                            println!("Preview written to {}", preview.path().display());
                        }
                    }
                    Err(err) => println!("Please choose a valid image file ({err:#})."),
                }
            }
            "set_mode" => {
                let requested = value_as_non_empty_string(intent.command_args.get("mode"));
                match requested.as_deref().and_then(StudioMode::parse) {
                    Some(mode) => {
                        state.mode = mode;
                        println!("Mode set to {}.", mode.label());
                    }
                    None => println!("/mode expects analyze or edit"),
                }
            }
            "analyze" => {
                if state.file.is_none() {
                    println!("Select an image first (/open <path>).");
                    continue;
                }
                println!("Analyzing image...");
                state.run_analysis()?;
                match state.analysis_status {
                    AnalysisStatus::Success => {
                        if let Some(result) = state.analysis_result.as_ref() {
                            println!("{}", render_section(result, state.active_tab));
                            println!("Use /tab <section> to switch sections, /json for the full result.");
                        }
                    }
                    AnalysisStatus::Error => {
                        println!(
                            "Error processing image: {}",
                            state.analysis_error.as_deref().unwrap_or("unknown error")
                        );
                    }
                    _ => {}
                }
            }
            "set_tab" => {
                let requested = value_as_non_empty_string(intent.command_args.get("tab"));
                match requested.as_deref().and_then(AnalysisSection::parse) {
                    Some(section) => {
                        state.active_tab = section;
                        match state.analysis_result.as_ref() {
                            Some(result) => println!("{}", render_section(result, section)),
                            None => println!("Tab set to {}. No analysis yet.", section.label()),
                        }
                    }
                    None => {
                        let labels: Vec<&str> = AnalysisSection::ALL
                            .iter()
                            .map(|section| section.label())
                            .collect();
                        println!("/tab expects one of: {}", labels.join(", "));
                    }
                }
            }
            "show_json" => match state.analysis_json() {
                Some(text) => {
                    println!("{text}");
                    println!("Use /copy to copy the JSON to the clipboard.");
                }
                None => println!("No analysis yet. Run /analyze first."),
            },
            "copy_json" => match state.analysis_json() {
                Some(text) => match copy_to_clipboard(&text) {
                    Ok(()) => {
                        state.mark_copied(Instant::now());
                        state.events.emit("json_copied", EventFields::new())?;
                        println!("Copied!");
                    }
                    Err(err) => println!("Clipboard unavailable: {err:#}"),
                },
                None => println!("No analysis to copy."),
            },
            "set_edit_prompt" => {
                match value_as_non_empty_string(intent.command_args.get("prompt")) {
                    Some(prompt) => {
                        state.edit_config.prompt = prompt;
                        println!("Edit instruction set.");
                    }
                    None => println!("/prompt requires the instruction text"),
                }
            }
            "instruction" => {
                if state.mode == StudioMode::Edit {
                    if let Some(prompt) = intent.prompt.clone() {
                        state.edit_config.prompt = prompt;
                        println!("Edit instruction set. Run /generate when ready.");
                    }
                } else {
                    println!("Switch to edit mode (/mode edit) to set an edit instruction.");
                }
            }
            "set_aspect_ratio" => {
                let requested = value_as_non_empty_string(intent.command_args.get("ratio"));
                match requested.as_deref().and_then(AspectRatio::parse) {
                    Some(ratio) => {
                        state.edit_config.aspect_ratio = ratio;
                        println!("Aspect ratio set to {}.", ratio.as_str());
                    }
                    None => {
                        let labels: Vec<&str> =
                            AspectRatio::ALL.iter().map(|ratio| ratio.as_str()).collect();
                        println!("/ratio expects one of: {}", labels.join(", "));
                    }
                }
            }
            "set_image_size" => {
                let requested = value_as_non_empty_string(intent.command_args.get("size"));
                match requested.as_deref().and_then(ImageSize::parse) {
                    Some(size) => {
                        state.edit_config.image_size = size;
                        println!(
                            "Image size set to {} (the edit model ignores it).",
                            size.as_str()
                        );
                    }
                    None => println!("/size expects 1K, 2K, or 4K"),
                }
            }
            "generate" => {
                if let Some(reason) = edit_blocker(&state) {
                    println!("{reason}");
                    continue;
                }
                println!("Generating edit...");
                state.run_edit()?;
                if let Some(message) = state.edit_error.as_deref() {
                    println!("{message}");
                } else if let Some(path) = state.edit_artifact.as_ref() {
                    println!("Edited image saved to {}", path.display());
                } else if state.edit_result.is_some() {
                    println!("Edited image ready (use /save <path> to write it).");
                }
            }
            "save_result" => {
                let target =
                    value_as_non_empty_string(intent.command_args.get("path")).map(PathBuf::from);
                match state.save_edit_result(target.as_deref()) {
                    Ok(Some(path)) => println!("Saved to {}", path.display()),
                    Ok(None) => println!("No edited image to save."),
                    Err(err) => println!("Save failed: {err:#}"),
                }
            }
            "login" => match state.session.login() {
                Ok(LoginOutcome::Established) => {
                    state.events.emit("login_succeeded", EventFields::new())?;
                    println!("{}", render_profile(state.session.current_user()));
                }
                Ok(LoginOutcome::Unavailable) => {
                    state.events.emit("login_unavailable", EventFields::new())?;
                    println!("Key selection is not available; continuing in analyze-only mode.");
                }
                Err(err) => println!("Login failed: {err:#}"),
            },
            "logout" => {
                state.session.logout();
                state.events.emit("logout", EventFields::new())?;
                println!("Signed out.");
            }
            "whoami" => println!("{}", render_profile(state.session.current_user())),
            "status" => {
                println!("{}", render_status(&state, Instant::now()));
                if state.mode == StudioMode::Edit {
                    print!("{}", render_edit_panel(&state));
                }
            }
            "quit" => break,
            "unknown" => {
                let command = value_as_non_empty_string(intent.command_args.get("command"))
                    .unwrap_or_default();
                println!("Unknown command /{command}. Type /help for commands.");
            }
            _ => {}
        }
    }

    state.events.emit("studio_stopped", EventFields::new())?;
    Ok(())
}

fn run_analyze_once(args: AnalyzeArgs) -> Result<i32> {
    let image = SelectedImage::open(&args.image)?;
    let mut client = GeminiClient::new();
    if let Some(out) = args.out.as_ref() {
        fs::create_dir_all(out)?;
        client = client.with_record_dir(out);
    }
    println!("Analyzing {} ...", args.image.display());
    let result = client.analyze_image(&image)?;
    println!("{}", result.to_pretty_json());
    if let Some(out) = args.out.as_ref() {
        let path = out.join("analysis.json");
        fs::write(&path, result.to_pretty_json())
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Result written to {}", path.display());
    }
    Ok(0)
}

fn run_edit_once(args: EditArgs) -> Result<i32> {
    let image = SelectedImage::open(&args.image)?;
    let Some(ratio) = AspectRatio::parse(&args.aspect_ratio) else {
        let labels: Vec<&str> = AspectRatio::ALL.iter().map(|ratio| ratio.as_str()).collect();
        bail!(
            "unsupported aspect ratio '{}' (expected one of: {})",
            args.aspect_ratio,
            labels.join(", ")
        );
    };
    let config = EditConfig {
        prompt: args.prompt.clone(),
        aspect_ratio: ratio,
        image_size: ImageSize::default(),
    };
    fs::create_dir_all(&args.out)?;
    let client = GeminiClient::new().with_record_dir(&args.out);
    println!("Generating edit of {} ...", args.image.display());
    let data_url = client.generate_edited_image(&image, &config)?;
    let (path, width, height) = persist_edit_artifact(&args.out, &data_url)?;
    println!("Edited image ({width}x{height}) saved to {}", path.display());
    Ok(0)
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn fields(value: Value) -> EventFields {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::rc::Rc;
    use std::time::{Duration, Instant};

    use anyhow::{anyhow, bail};
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde_json::{json, Value};

    use anyedit_contracts::analysis::{AnalysisResult, AnalysisSection, AnalysisStatus};
    use anyedit_contracts::edit::EditConfig;
    use anyedit_contracts::events::EventLog;
    use anyedit_contracts::session::{KeySelector, SessionStore};
    use anyedit_engine::{SelectedImage, VisionBackend, PERMISSION_DENIED_MESSAGE};

    use super::{
        edit_blocker, render_edit_panel, render_profile, render_section, render_status,
        StudioState,
    };

    #[derive(Default)]
    struct ScriptedBackend {
        analysis: Option<AnalysisResult>,
        analysis_error: Option<String>,
        edit_data_url: Option<String>,
        edit_error: Option<String>,
        edit_calls: Rc<Cell<usize>>,
    }

    impl VisionBackend for ScriptedBackend {
        fn analyze(&self, _image: &SelectedImage) -> anyhow::Result<AnalysisResult> {
            if let Some(message) = self.analysis_error.as_ref() {
                bail!("{message}");
            }
            self.analysis
                .clone()
                .ok_or_else(|| anyhow!("no scripted analysis"))
        }

        fn edit(&self, _image: &SelectedImage, _config: &EditConfig) -> anyhow::Result<String> {
            self.edit_calls.set(self.edit_calls.get() + 1);
            if let Some(message) = self.edit_error.as_ref() {
                bail!("{message}");
            }
            self.edit_data_url
                .clone()
                .ok_or_else(|| anyhow!("no scripted edit"))
        }
    }

    struct KeyPresent;

    impl KeySelector for KeyPresent {
        fn has_selected_key(&self) -> bool {
            true
        }

        fn open_select_key(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn sample_result() -> AnalysisResult {
        serde_json::from_value(json!({
            "Subject": {
                "general_summary": "One adult male by a brick wall.",
                "entities": [{
                    "gender": "Male",
                    "description": "Adult with a short beard.",
                    "apparel": "Green rain jacket.",
                    "pose": "Leaning against the wall."
                }]
            },
            "Background": {
                "general_summary": "A painted brick wall.",
                "location": "City alley",
                "elements": ["brick wall", "mural"]
            },
            "Lighting": {
                "description": "Flat overcast light.",
                "source": "Overcast sky",
                "quality": "Even"
            },
            "Composition": {
                "description": "Subject off-center right.",
                "perspective": "Eye level",
                "framing": "Three-quarter shot"
            },
            "Aesthetic": {
                "description": "Urban street portrait.",
                "style": "Street",
                "mood": "Moody"
            }
        }))
        .expect("sample analysis")
    }

    fn sample_image_path(dir: &Path) -> PathBuf {
        let path = dir.join("photo.png");
        image::RgbImage::new(4, 4)
            .save(&path)
            .expect("write sample image");
        path
    }

    fn sample_png_data_url() -> String {
        let mut bytes: Vec<u8> = Vec::new();
        image::DynamicImage::ImageRgb8(image::RgbImage::new(2, 2))
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .expect("encode png");
        format!("data:image/png;base64,{}", BASE64.encode(&bytes))
    }

    fn test_state(
        backend: ScriptedBackend,
        selector: Option<Box<dyn KeySelector>>,
        dir: &Path,
    ) -> StudioState {
        let events = EventLog::new(dir.join("events.jsonl"), "studio-test");
        StudioState::new(
            Box::new(backend),
            SessionStore::new(selector),
            events,
            dir.to_path_buf(),
        )
    }

    #[test]
    fn rejecting_a_non_image_preserves_all_state() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut state = test_state(ScriptedBackend::default(), None, temp.path());
        state.analysis_result = Some(sample_result());
        state.analysis_status = AnalysisStatus::Success;
        state.edit_result = Some(sample_png_data_url());
        state.edit_error = Some("old edit error".to_string());

        let bad = temp.path().join("notes.txt");
        fs::write(&bad, b"plain text")?;
        assert!(state.select_file(&bad).is_err());

        assert!(state.file.is_none());
        assert!(state.analysis_result.is_some());
        assert_eq!(state.analysis_status, AnalysisStatus::Success);
        assert!(state.edit_result.is_some());
        assert_eq!(state.edit_error.as_deref(), Some("old edit error"));
        Ok(())
    }

    #[test]
    fn selecting_an_image_clears_results_for_the_old_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut state = test_state(ScriptedBackend::default(), None, temp.path());
        state.analysis_result = Some(sample_result());
        state.analysis_status = AnalysisStatus::Success;
        state.analysis_error = Some("stale analysis error".to_string());
        state.edit_result = Some(sample_png_data_url());
        state.edit_error = Some("stale edit error".to_string());

        state.select_file(&sample_image_path(temp.path()))?;

        assert!(state.file.is_some());
        assert!(state.analysis_result.is_none());
        assert_eq!(state.analysis_status, AnalysisStatus::Idle);
        assert!(state.edit_result.is_none());
        assert!(state.edit_error.is_none());
        // The stale analysis error text stays; returning to idle is what
        // stops it from rendering.
        assert_eq!(
            state.analysis_error.as_deref(),
            Some("stale analysis error")
        );
        Ok(())
    }

    #[test]
    fn new_selection_supersedes_the_preview() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut state = test_state(ScriptedBackend::default(), None, temp.path());

        state.select_file(&sample_image_path(temp.path()))?;
        let first = state
            .preview
            .as_ref()
            .map(|preview| preview.path().to_path_buf())
            .expect("first preview");
        assert!(first.exists());

        let second_source = temp.path().join("other.png");
        image::RgbImage::new(3, 5).save(&second_source)?;
        state.select_file(&second_source)?;

        assert!(!first.exists());
        assert!(state
            .preview
            .as_ref()
            .map(|preview| preview.path().exists())
            .unwrap_or(false));
        Ok(())
    }

    #[test]
    fn analysis_without_a_file_is_a_noop() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut state = test_state(ScriptedBackend::default(), None, temp.path());
        assert!(!state.run_analysis()?);
        assert_eq!(state.analysis_status, AnalysisStatus::Idle);
        Ok(())
    }

    #[test]
    fn analysis_success_stores_the_result() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = ScriptedBackend {
            analysis: Some(sample_result()),
            ..ScriptedBackend::default()
        };
        let mut state = test_state(backend, None, temp.path());
        state.select_file(&sample_image_path(temp.path()))?;

        assert!(state.run_analysis()?);
        assert_eq!(state.analysis_status, AnalysisStatus::Success);
        let result = state.analysis_result.as_ref().expect("analysis result");
        assert_eq!(result.subject.entities.len(), 1);
        assert!(state.analysis_error.is_none());
        Ok(())
    }

    #[test]
    fn analysis_failure_surfaces_the_message() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = ScriptedBackend {
            analysis_error: Some("Gemini returned no analysis text".to_string()),
            ..ScriptedBackend::default()
        };
        let mut state = test_state(backend, None, temp.path());
        state.select_file(&sample_image_path(temp.path()))?;

        assert!(state.run_analysis()?);
        assert_eq!(state.analysis_status, AnalysisStatus::Error);
        assert!(state
            .analysis_error
            .as_deref()
            .unwrap_or_default()
            .contains("no analysis text"));
        assert!(state.analysis_result.is_none());
        Ok(())
    }

    #[test]
    fn selecting_another_file_resets_analysis_before_the_next_run() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = ScriptedBackend {
            analysis: Some(sample_result()),
            ..ScriptedBackend::default()
        };
        let mut state = test_state(backend, None, temp.path());
        state.select_file(&sample_image_path(temp.path()))?;
        state.run_analysis()?;
        assert_eq!(state.analysis_status, AnalysisStatus::Success);

        let second = temp.path().join("second.png");
        image::RgbImage::new(2, 2).save(&second)?;
        state.select_file(&second)?;

        assert_eq!(state.analysis_status, AnalysisStatus::Idle);
        assert!(state.analysis_result.is_none());
        Ok(())
    }

    #[test]
    fn edit_success_saves_an_artifact_and_overwrites_the_result() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = ScriptedBackend {
            edit_data_url: Some(sample_png_data_url()),
            ..ScriptedBackend::default()
        };
        let mut state = test_state(backend, Some(Box::new(KeyPresent)), temp.path());
        state.session.initialize();
        state.select_file(&sample_image_path(temp.path()))?;
        state.edit_config.prompt = "add a red hat".to_string();
        state.edit_result = Some("data:image/png;base64,b2xk".to_string());

        assert!(state.run_edit()?);
        assert!(state.edit_error.is_none());
        assert!(!state.edit_in_flight);
        let data_url = state.edit_result.as_deref().expect("edit result");
        assert!(data_url.starts_with("data:image/png;base64,"));
        assert_ne!(data_url, "data:image/png;base64,b2xk");
        let artifact = state.edit_artifact.as_ref().expect("artifact path");
        assert!(artifact.exists());
        Ok(())
    }

    #[test]
    fn permission_failure_invalidates_the_session() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = ScriptedBackend {
            edit_error: Some(
                "Gemini request failed (403): The caller does not have permission".to_string(),
            ),
            ..ScriptedBackend::default()
        };
        let mut state = test_state(backend, Some(Box::new(KeyPresent)), temp.path());
        state.session.initialize();
        assert!(state.session.is_authenticated());
        state.select_file(&sample_image_path(temp.path()))?;
        state.edit_config.prompt = "remove the mural".to_string();

        assert!(state.run_edit()?);
        assert!(!state.session.is_authenticated());
        assert_eq!(state.edit_error.as_deref(), Some(PERMISSION_DENIED_MESSAGE));
        Ok(())
    }

    #[test]
    fn generic_failure_keeps_the_session() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = ScriptedBackend {
            edit_error: Some("model is overloaded, try again later".to_string()),
            ..ScriptedBackend::default()
        };
        let mut state = test_state(backend, Some(Box::new(KeyPresent)), temp.path());
        state.session.initialize();
        state.select_file(&sample_image_path(temp.path()))?;
        state.edit_config.prompt = "remove the mural".to_string();

        assert!(state.run_edit()?);
        assert!(state.session.is_authenticated());
        assert!(state
            .edit_error
            .as_deref()
            .unwrap_or_default()
            .contains("overloaded"));
        Ok(())
    }

    // Observed behavior, kept as-is: a login that resolves without a
    // session does not stop the edit call.
    #[test]
    fn edit_is_still_attempted_when_login_cannot_establish_a_session() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let calls = Rc::new(Cell::new(0));
        let backend = ScriptedBackend {
            edit_data_url: Some(sample_png_data_url()),
            edit_calls: Rc::clone(&calls),
            ..ScriptedBackend::default()
        };
        let mut state = test_state(backend, None, temp.path());
        state.select_file(&sample_image_path(temp.path()))?;
        state.edit_config.prompt = "add rain".to_string();

        assert!(state.run_edit()?);
        assert!(!state.session.is_authenticated());
        assert_eq!(calls.get(), 1);
        assert!(state.edit_result.is_some());
        Ok(())
    }

    #[test]
    fn edit_without_a_file_is_a_noop() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let calls = Rc::new(Cell::new(0));
        let backend = ScriptedBackend {
            edit_data_url: Some(sample_png_data_url()),
            edit_calls: Rc::clone(&calls),
            ..ScriptedBackend::default()
        };
        let mut state = test_state(backend, None, temp.path());
        assert!(!state.run_edit()?);
        assert_eq!(calls.get(), 0);
        Ok(())
    }

    #[test]
    fn copy_acknowledgment_reverts_after_the_window() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut state = test_state(ScriptedBackend::default(), None, temp.path());
        let t0 = Instant::now();

        assert_eq!(state.copy_button_label(t0), "Copy JSON");
        state.mark_copied(t0);
        assert!(state.copy_ack_active(t0 + Duration::from_millis(1500)));
        assert!(!state.copy_ack_active(t0 + Duration::from_secs(2)));

        // A re-copy inside the window restarts it.
        state.mark_copied(t0 + Duration::from_millis(1500));
        assert!(state.copy_ack_active(t0 + Duration::from_millis(3400)));
        assert_eq!(
            state.copy_button_label(t0 + Duration::from_millis(3400)),
            "Copied!"
        );
        assert!(!state.copy_ack_active(t0 + Duration::from_millis(3600)));
        Ok(())
    }

    #[test]
    fn edit_blocker_requires_file_then_instruction() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut state = test_state(ScriptedBackend::default(), None, temp.path());
        assert!(edit_blocker(&state)
            .unwrap_or_default()
            .contains("/open"));

        state.select_file(&sample_image_path(temp.path()))?;
        assert!(edit_blocker(&state)
            .unwrap_or_default()
            .contains("/prompt"));

        state.edit_config.prompt = "add a red hat".to_string();
        assert!(edit_blocker(&state).is_none());
        Ok(())
    }

    #[test]
    fn save_without_a_result_is_a_noop() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut state = test_state(ScriptedBackend::default(), None, temp.path());
        assert_eq!(state.save_edit_result(None)?, None);
        Ok(())
    }

    #[test]
    fn save_writes_the_decoded_artifact() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut state = test_state(ScriptedBackend::default(), None, temp.path());
        state.edit_result = Some(sample_png_data_url());

        let target = temp.path().join("exports").join("hat.png");
        let saved = state.save_edit_result(Some(&target))?;
        assert_eq!(saved.as_deref(), Some(target.as_path()));
        assert!(target.exists());
        assert!(image::open(&target).is_ok());
        Ok(())
    }

    #[test]
    fn events_trace_the_analysis_lifecycle() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let backend = ScriptedBackend {
            analysis_error: Some("empty response".to_string()),
            ..ScriptedBackend::default()
        };
        let mut state = test_state(backend, None, temp.path());
        state.select_file(&sample_image_path(temp.path()))?;
        state.run_analysis()?;

        let raw = fs::read_to_string(temp.path().join("events.jsonl"))?;
        let names: Vec<String> = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("event").and_then(Value::as_str).map(str::to_string))
            .collect();
        assert!(names.contains(&"file_selected".to_string()));
        assert!(names.contains(&"analysis_started".to_string()));
        assert!(names.contains(&"analysis_failed".to_string()));
        Ok(())
    }

    #[test]
    fn section_renderers_cover_the_result_fields() {
        let result = sample_result();
        let subject = render_section(&result, AnalysisSection::Subject);
        assert!(subject.contains("Entity 1 (Male)"));
        assert!(subject.contains("Green rain jacket."));

        let background = render_section(&result, AnalysisSection::Background);
        assert!(background.contains("City alley"));
        assert!(background.contains("- mural"));

        let aesthetic = render_section(&result, AnalysisSection::Aesthetic);
        assert!(aesthetic.contains("Mood: Moody"));
    }

    #[test]
    fn edit_panel_shows_config_result_and_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut state = test_state(ScriptedBackend::default(), None, temp.path());

        let panel = render_edit_panel(&state);
        assert!(panel.contains("Instruction: (not set)"));
        assert!(panel.contains("Result: none"));
        assert!(!panel.contains("Error:"));

        state.edit_config.prompt = "add a red hat".to_string();
        state.edit_artifact = Some(temp.path().join("edited-1.png"));
        state.edit_error = Some("model is overloaded".to_string());
        let panel = render_edit_panel(&state);
        assert!(panel.contains("Instruction: add a red hat"));
        assert!(panel.contains("edited-1.png"));
        assert!(panel.contains("Error: model is overloaded"));
        Ok(())
    }

    #[test]
    fn status_line_reflects_mode_and_copy_label() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let state = test_state(ScriptedBackend::default(), None, temp.path());
        let line = render_status(&state, Instant::now());
        assert!(line.contains("mode: analyze"));
        assert!(line.contains("file: none"));
        assert!(line.contains("Copy JSON"));
        assert_eq!(render_profile(state.session.current_user()), "Signed out");
        Ok(())
    }
}
