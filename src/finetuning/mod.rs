//! Chat and instruction fine-tuning data: validation, chat-template slicing,
//! tokenization and batching.

pub mod collate;
pub mod error;
pub mod example;
pub mod loader;
pub mod preprocess;
pub mod slicing;
pub mod template;
pub mod tokenize;

pub use collate::{FinetuningBatch, FinetuningCollator, IGNORE_INDEX, TargetResponses};
pub use error::FinetuningError;
pub use example::{
    ALLOWED_CONTENT_KEYS, ALLOWED_MESSAGES_KEYS, ALLOWED_PROMPT_KEYS, ALLOWED_RESPONSE_KEYS,
    ALLOWED_ROLE_KEYS, ChatExample, ChatMessage, ExampleFormat, FormattedExample,
    PromptResponseExample, Role, classify_example, parse_chat_example,
    parse_prompt_response_example,
};
pub use loader::{FinetuningDataLoader, load_tokenized_jsonl};
pub use preprocess::{PreprocessFn, preprocessor_for, sharegpt_preprocess};
pub use slicing::{slice_chat, slice_chat_formatted_example, slice_chat_formatted_example_with_date};
pub use template::{
    ChatMlTemplate, ChatTemplate, DEFAULT_SYSTEM_PROMPT, TemplateOptions, current_date_string,
};
pub use tokenize::{
    TokenizedExample, TokenizedTurn, tokenize_formatted_example,
    tokenize_formatted_example_with_date, tokenize_with_bos_removal,
};
