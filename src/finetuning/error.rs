use thiserror::Error;

/// Failures while validating, templating or tokenizing a formatted example.
#[derive(Debug, Error)]
pub enum FinetuningError {
    #[error("expected a JSON object as example, found {found}")]
    InvalidExampleType { found: &'static str },
    #[error(
        "unknown example format with keys {keys:?}; expected a single `messages` key or one prompt key and one response key"
    )]
    UnknownExampleType { keys: Vec<String> },
    #[error("expected `messages` to be a list of messages, found {found}")]
    InvalidMessageType { found: &'static str },
    #[error("chat examples need at least two messages, found {count}")]
    NotEnoughChatData { count: usize },
    #[error("the last message of a chat example must come from the assistant, found {role:?}")]
    InvalidLastChatMessageRole { role: String },
    #[error("message {index} must have exactly a role and a content key, found {count} keys")]
    IncorrectMessageKeyQuantity { index: usize, count: usize },
    #[error("message {index} is missing the {key:?} key")]
    MissingMessageKey { index: usize, key: &'static str },
    #[error("message {index} has invalid role {role:?}")]
    InvalidRole { index: usize, role: String },
    #[error("message {index} content must be a string")]
    InvalidContentType { index: usize },
    #[error("message {index} repeats the previous {role:?} turn")]
    ConsecutiveRoles { index: usize, role: String },
    #[error("example has {count} {kind} keys, expected exactly one")]
    TooManyKeysInExample { kind: &'static str, count: usize },
    #[error("prompt must be a string")]
    InvalidPromptType,
    #[error("response must be a string")]
    InvalidResponseType,
    #[error("failed to apply chat template {template}: {message}")]
    ChatTemplate { template: String, message: String },
    #[error("chat template output for turn ending at message {index} does not extend the previous {stage}")]
    TemplatePrefixMismatch { index: usize, stage: &'static str },
    #[error("no preprocessing function registered for {0:?}")]
    UnknownPreprocessor(String),
}
