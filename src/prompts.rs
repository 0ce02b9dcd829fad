//! Prompt lists mixing free text with `file::<path>` references.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

pub const PROMPTFILE_PREFIX: &str = "file::";

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt path {0:?} must start with {prefix}", prefix = PROMPTFILE_PREFIX)]
    MissingPrefix(String),
    #[error("prompt file {} does not match any existing file", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read prompt file {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Expands every `file::` entry into the prompts it holds and keeps free-text
/// entries unchanged, preserving order.
pub fn load_prompts<S: AsRef<str>>(
    prompts: &[S],
    prompt_delimiter: Option<&str>,
) -> Result<Vec<String>, PromptError> {
    let mut prompt_strings = Vec::with_capacity(prompts.len());
    for prompt in prompts {
        let prompt = prompt.as_ref();
        if prompt.starts_with(PROMPTFILE_PREFIX) {
            prompt_strings.extend(load_prompts_from_file(prompt, prompt_delimiter)?);
        } else {
            prompt_strings.push(prompt.to_string());
        }
    }
    Ok(prompt_strings)
}

/// Reads a `file::<path>` reference. Without a delimiter the whole file is one
/// prompt; with one, the file is split and empty pieces are dropped.
pub fn load_prompts_from_file(
    prompt_path: &str,
    prompt_delimiter: Option<&str>,
) -> Result<Vec<String>, PromptError> {
    let raw_path = prompt_path
        .strip_prefix(PROMPTFILE_PREFIX)
        .ok_or_else(|| PromptError::MissingPrefix(prompt_path.to_string()))?;
    let path = expand_home(raw_path);
    if !path.is_file() {
        return Err(PromptError::NotFound(path));
    }

    let prompt_string = fs::read_to_string(&path).map_err(|source| PromptError::Io {
        path: path.clone(),
        source,
    })?;

    let prompts: Vec<String> = match prompt_delimiter {
        None => vec![prompt_string],
        Some(delimiter) => prompt_string
            .split(delimiter)
            .filter(|piece| !piece.is_empty())
            .map(str::to_string)
            .collect(),
    };
    debug!(path = %path.display(), count = prompts.len(), "loaded prompt file");
    Ok(prompts)
}

fn expand_home(path: &str) -> PathBuf {
    let home = || std::env::var_os("HOME").map(PathBuf::from);
    if path == "~" {
        return home().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = home()
    {
        return home.join(rest);
    }
    Path::new(path).to_path_buf()
}
