use anyhow::Result;
use serde::Deserialize;

use super::example::{ChatMessage, Role};

pub const DEFAULT_SYSTEM_PROMPT: &str = "A conversation between a user and an LLM-based AI assistant. The assistant gives helpful and honest answers.";

const IM_START: &str = "<|im_start|>";
const IM_END: &str = "<|im_end|>";

/// Date injected into templates that render one, e.g. `19 Oct 2026`.
pub fn current_date_string() -> String {
    chrono::Local::now().format("%d %b %Y").to_string()
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TemplateOptions {
    pub add_generation_prompt: bool,
    pub date_string: Option<String>,
}

impl TemplateOptions {
    pub fn new(add_generation_prompt: bool, date_string: Option<String>) -> Self {
        Self {
            add_generation_prompt,
            date_string,
        }
    }
}

/// Renders a conversation into the text a model is trained on.
pub trait ChatTemplate: Send + Sync {
    /// Identifies the template in error messages.
    fn name(&self) -> &str;

    fn apply(&self, messages: &[ChatMessage], options: &TemplateOptions) -> Result<String>;
}

impl<F> ChatTemplate for F
where
    F: Fn(&[ChatMessage], &TemplateOptions) -> Result<String> + Send + Sync,
{
    fn name(&self) -> &str {
        "custom"
    }

    fn apply(&self, messages: &[ChatMessage], options: &TemplateOptions) -> Result<String> {
        self(messages, options)
    }
}

/// ChatML renderer. A leading system message (or the default system prompt)
/// opens the first turn without an end marker; later turns are separated by
/// newlines.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct ChatMlTemplate {
    #[serde(default)]
    pub default_system_prompt: Option<String>,
    /// Prefix every rendering with a `Today Date:` line.
    #[serde(default)]
    pub include_date: bool,
}

impl ChatMlTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.default_system_prompt = Some(prompt.into());
        self
    }

    pub fn with_date(mut self, include_date: bool) -> Self {
        self.include_date = include_date;
        self
    }

    fn push_turn(out: &mut String, role: Role, content: &str) {
        out.push_str(IM_START);
        out.push_str(role.as_str());
        out.push('\n');
        out.push_str(content);
        out.push_str(IM_END);
    }
}

impl ChatTemplate for ChatMlTemplate {
    fn name(&self) -> &str {
        "chatml"
    }

    fn apply(&self, messages: &[ChatMessage], options: &TemplateOptions) -> Result<String> {
        let mut out = String::new();
        if self.include_date {
            let date = options
                .date_string
                .clone()
                .unwrap_or_else(current_date_string);
            out.push_str("Today Date: ");
            out.push_str(&date);
            out.push('\n');
        }

        let (system_message, loop_messages) = match messages.split_first() {
            Some((first, rest)) if first.role == Role::System => (Some(first.content.as_str()), rest),
            _ => (self.default_system_prompt.as_deref(), messages),
        };

        for (idx, message) in loop_messages.iter().enumerate() {
            if idx == 0 {
                if let Some(system) = system_message {
                    out.push_str(IM_START);
                    out.push_str("system\n");
                    out.push_str(system.trim());
                    out.push('\n');
                }
            } else {
                out.push('\n');
            }
            Self::push_turn(&mut out, message.role, &message.content);

            if options.add_generation_prompt && idx + 1 == loop_messages.len() {
                out.push('\n');
                out.push_str(IM_START);
                out.push_str("assistant\n");
            }
        }

        Ok(out)
    }
}
