use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, NO_ARG_COMMANDS, SINGLE_PATH_COMMANDS, VALUE_ARG_COMMANDS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn value_arg_key(action: &str) -> &'static str {
    match action {
        "set_mode" => "mode",
        "set_tab" => "tab",
        "set_aspect_ratio" => "ratio",
        "set_image_size" => "size",
        _ => "prompt",
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    if arg.trim().is_empty() {
        return String::new();
    }
    let parts = match shell_words::split(arg) {
        Ok(parts) => parts,
        Err(_) => arg.split_whitespace().map(str::to_string).collect(),
    };
    let parts: Vec<String> = parts.into_iter().filter(|value| !value.is_empty()).collect();
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let remainder = &slash_tail[command_len..];
            let arg = if remainder.is_empty() {
                ""
            } else {
                remainder.trim()
            };

            if let Some(action) = find_action(&command, VALUE_ARG_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    value_arg_key(action).to_string(),
                    Value::String(arg.to_string()),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "path".to_string(),
                    Value::String(parse_single_path_arg(arg)),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("instruction", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn parse_open_with_quoted_path() {
        let intent = parse_intent("/open \"/tmp/golden hour.png\"");
        assert_eq!(intent.action, "select_file");
        assert_eq!(intent.command_args["path"], json!("/tmp/golden hour.png"));
    }

    #[test]
    fn parse_save_without_arg_yields_empty_path() {
        let intent = parse_intent("/save");
        assert_eq!(intent.action, "save_result");
        assert_eq!(intent.command_args["path"], json!(""));
    }

    #[test]
    fn parse_value_arg_commands() {
        let mode = parse_intent("/mode edit");
        assert_eq!(mode.action, "set_mode");
        assert_eq!(mode.command_args["mode"], json!("edit"));

        let tab = parse_intent("/tab Lighting");
        assert_eq!(tab.action, "set_tab");
        assert_eq!(tab.command_args["tab"], json!("Lighting"));

        let ratio = parse_intent("/ratio 16:9");
        assert_eq!(ratio.action, "set_aspect_ratio");
        assert_eq!(ratio.command_args["ratio"], json!("16:9"));

        let prompt = parse_intent("/prompt add a red hat");
        assert_eq!(prompt.action, "set_edit_prompt");
        assert_eq!(prompt.command_args["prompt"], json!("add a red hat"));
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_intent("/analyze").action, "analyze");
        assert_eq!(parse_intent("/generate").action, "generate");
        assert_eq!(parse_intent("/copy").action, "copy_json");
        assert_eq!(parse_intent("/logout").action, "logout");
        assert_eq!(parse_intent("/exit").action, "quit");
    }

    #[test]
    fn bare_text_becomes_instruction() {
        let intent = parse_intent("  turn the background into a cyberpunk city  ");
        assert_eq!(intent.action, "instruction");
        assert_eq!(
            intent.prompt.as_deref(),
            Some("turn the background into a cyberpunk city")
        );
    }

    #[test]
    fn empty_input_is_noop() {
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/blend a.png b.png");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("blend"));
        assert_eq!(intent.command_args["arg"], json!("a.png b.png"));
    }
}
