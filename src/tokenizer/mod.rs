pub mod byte;

use std::sync::Arc;

use byte::ByteTokenizer;
use serde::Deserialize;

pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str, add_bos: bool, add_eos: bool) -> Vec<u32>;
    fn decode(&self, ids: &[u32]) -> String;
    fn len(&self) -> usize;
    fn bos_id(&self) -> Option<u32>;
    fn eos_id(&self) -> Option<u32>;
    fn pad_id(&self) -> Option<u32>;

    /// Whether the tokenizer prepends its BOS marker to every encoded text on
    /// its own, the way some pretrained tokenizers are configured.
    fn add_bos_token(&self) -> bool {
        false
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encodes with the tokenizer's own special-token behavior.
    fn encode_default(&self, text: &str) -> Vec<u32> {
        self.encode(text, self.add_bos_token(), false)
    }
}

pub type SharedTokenizer = Arc<dyn Tokenizer>;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TokenizerConfig {
    Byte(ByteTokenizerConfig),
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        TokenizerConfig::Byte(ByteTokenizerConfig::default())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ByteTokenizerConfig {
    #[serde(default = "default_true")]
    pub add_special_tokens: bool,
    #[serde(default)]
    pub add_bos_token: bool,
}

impl Default for ByteTokenizerConfig {
    fn default() -> Self {
        Self {
            add_special_tokens: true,
            add_bos_token: false,
        }
    }
}

impl TokenizerConfig {
    pub fn build(&self) -> SharedTokenizer {
        match self {
            TokenizerConfig::Byte(config) => Arc::new(
                ByteTokenizer::new(config.add_special_tokens)
                    .with_add_bos_token(config.add_bos_token),
            ),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            TokenizerConfig::Byte(_) => "byte",
        }
    }
}

fn default_true() -> bool {
    true
}
