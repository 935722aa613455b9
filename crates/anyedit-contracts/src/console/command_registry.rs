#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const VALUE_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "mode",
        action: "set_mode",
    },
    CommandSpec {
        command: "tab",
        action: "set_tab",
    },
    CommandSpec {
        command: "prompt",
        action: "set_edit_prompt",
    },
    CommandSpec {
        command: "ratio",
        action: "set_aspect_ratio",
    },
    CommandSpec {
        command: "size",
        action: "set_image_size",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "open",
        action: "select_file",
    },
    CommandSpec {
        command: "save",
        action: "save_result",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "analyze",
        action: "analyze",
    },
    CommandSpec {
        command: "generate",
        action: "generate",
    },
    CommandSpec {
        command: "json",
        action: "show_json",
    },
    CommandSpec {
        command: "copy",
        action: "copy_json",
    },
    CommandSpec {
        command: "login",
        action: "login",
    },
    CommandSpec {
        command: "logout",
        action: "logout",
    },
    CommandSpec {
        command: "whoami",
        action: "whoami",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub const CONSOLE_HELP_COMMANDS: &[&str] = &[
    "/open",
    "/mode",
    "/analyze",
    "/tab",
    "/json",
    "/copy",
    "/prompt",
    "/ratio",
    "/size",
    "/generate",
    "/save",
    "/login",
    "/logout",
    "/whoami",
    "/status",
    "/help",
    "/quit",
];
