//! `/start` and `/model` command parsing.

/// Models the operator has made selectable via `/model`. The agent-CLI's
/// own default is represented by `"auto"`.
pub const AVAILABLE_MODELS: &[&str] = &["auto", "claude-opus", "claude-sonnet", "gpt-5"];

/// A parsed inbound command, or `None` if the text is an ordinary prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    ModelList,
    ModelSet(String),
}

/// Parse `text` as a slash command, if it looks like one.
#[must_use]
pub fn parse(text: &str) -> Option<Command> {
    let trimmed = text.trim();
    if trimmed == "/start" {
        return Some(Command::Start);
    }
    if trimmed == "/model" {
        return Some(Command::ModelList);
    }
    if let Some(arg) = trimmed.strip_prefix("/model ") {
        return Some(Command::ModelSet(arg.trim().to_owned()));
    }
    None
}

/// Render the `/model` list reply, marking the currently selected model.
#[must_use]
pub fn render_model_list(current: &str) -> String {
    let mut lines = vec!["Available models:".to_owned()];
    for &model in AVAILABLE_MODELS {
        let marker = if model == current { " (current)" } else { "" };
        lines.push(format!("  {model}{marker}"));
    }
    lines.push("Use /model <name> to switch.".to_owned());
    lines.join("\n")
}

/// Whether `model` is one of [`AVAILABLE_MODELS`].
#[must_use]
pub fn is_valid_model(model: &str) -> bool {
    AVAILABLE_MODELS.contains(&model)
}
