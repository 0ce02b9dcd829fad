pub mod config;
pub mod eval;
pub mod finetuning;
pub mod kernel;
pub mod prompts;
pub mod tokenizer;

pub use config::{
    AttentionConfig, ChatConfig, EvalConfig, FinetuningConfig, FoundryConfig, PromptsConfig,
    load_config,
};
pub use eval::{
    JsonlScatterLogger, LossVsContextLengthEvaluator, ScatterLogger, ScatterPoint,
    TracingScatterLogger, token_perplexity,
};
pub use finetuning::{
    ChatMlTemplate, ChatTemplate, FinetuningError, slice_chat_formatted_example,
    tokenize_formatted_example,
};
pub use kernel::{
    AttentionMod, AttentionModConfig, AttentionModError, BlockMask, SequenceIdInfo,
    flex_attention, generate_block_mask, generate_mask_mod, generate_score_mod,
};
pub use prompts::{PROMPTFILE_PREFIX, PromptError, load_prompts, load_prompts_from_file};
pub use tokenizer::{SharedTokenizer, Tokenizer, TokenizerConfig};
