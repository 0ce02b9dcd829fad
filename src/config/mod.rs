use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use toml::Value;

use crate::eval::{JsonlScatterLogger, ScatterLogger, TracingScatterLogger};
use crate::finetuning::{ChatMlTemplate, TargetResponses, current_date_string};
use crate::kernel::AttentionModConfig;
use crate::prompts::PROMPTFILE_PREFIX;
use crate::tokenizer::TokenizerConfig;

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct PromptsConfig {
    /// Literal prompts or `file::<path>` references.
    #[serde(default)]
    pub entries: Vec<String>,
    #[serde(default)]
    pub delimiter: Option<String>,
}

impl PromptsConfig {
    pub fn has_file_entries(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.starts_with(PROMPTFILE_PREFIX))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AttentionConfig {
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default)]
    pub mask_mods: Vec<AttentionModConfig>,
    #[serde(default)]
    pub score_mods: Vec<AttentionModConfig>,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            mask_mods: Vec::new(),
            score_mods: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct ChatConfig {
    #[serde(default)]
    pub default_system_prompt: Option<String>,
    #[serde(default)]
    pub include_date: bool,
    /// Fixed date for templates; today when unset.
    #[serde(default)]
    pub date_string: Option<String>,
}

impl ChatConfig {
    pub fn template(&self) -> ChatMlTemplate {
        ChatMlTemplate {
            default_system_prompt: self.default_system_prompt.clone(),
            include_date: self.include_date,
        }
    }

    pub fn date_string(&self) -> String {
        self.date_string.clone().unwrap_or_else(current_date_string)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FinetuningConfig {
    #[serde(default = "default_max_seq_len")]
    pub max_seq_len: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub target_responses: TargetResponses,
    /// Registered preprocessor name applied to every raw row.
    #[serde(default)]
    pub preprocessor: Option<String>,
}

impl Default for FinetuningConfig {
    fn default() -> Self {
        Self {
            max_seq_len: default_max_seq_len(),
            batch_size: default_batch_size(),
            target_responses: TargetResponses::default(),
            preprocessor: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct EvalConfig {
    /// JSON-lines destination for scatter tables; tracing only when unset.
    #[serde(default)]
    pub scatter_log_path: Option<PathBuf>,
}

impl EvalConfig {
    pub fn scatter_logger(&self) -> Result<Box<dyn ScatterLogger>> {
        Ok(match &self.scatter_log_path {
            Some(path) => Box::new(JsonlScatterLogger::new(path)?),
            None => Box::new(TracingScatterLogger),
        })
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct FoundryConfig {
    #[serde(default)]
    pub prompts: PromptsConfig,
    #[serde(default)]
    pub attention: AttentionConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub finetuning: FinetuningConfig,
    #[serde(default)]
    pub eval: EvalConfig,
    #[serde(default)]
    pub tokenizer: TokenizerConfig,
}

/// Loads the given TOML files in order, later files overriding earlier keys.
pub fn load_config(paths: &[PathBuf]) -> Result<FoundryConfig> {
    if paths.is_empty() {
        return Err(anyhow!("at least one configuration path is required"));
    }

    let mut iter = paths.iter();
    let first_path = iter
        .next()
        .ok_or_else(|| anyhow!("configuration iterator unexpectedly empty"))?;
    let mut value = load_value(first_path)?;

    for path in iter {
        let overlay = load_value(path)?;
        merge_values(&mut value, overlay);
    }

    value
        .try_into::<FoundryConfig>()
        .map_err(|err| anyhow!(err))
}

fn load_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {}", path.display()))?;
    let table: toml::value::Table = toml::from_str(&content)
        .with_context(|| format!("failed to parse {} as TOML", path.display()))?;
    Ok(Value::Table(table))
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_table), Value::Table(overlay_table)) => {
            for (key, overlay_value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(base_value) => merge_values(base_value, overlay_value),
                    None => {
                        base_table.insert(key, overlay_value);
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value;
        }
    }
}

fn default_block_size() -> usize {
    128
}

fn default_max_seq_len() -> usize {
    2048
}

fn default_batch_size() -> usize {
    8
}
