use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::FinetuningError;

pub const ALLOWED_MESSAGES_KEYS: &[&str] = &["messages"];
pub const ALLOWED_ROLE_KEYS: &[&str] = &["role"];
pub const ALLOWED_CONTENT_KEYS: &[&str] = &["content"];
pub const ALLOWED_PROMPT_KEYS: &[&str] = &["prompt"];
pub const ALLOWED_RESPONSE_KEYS: &[&str] = &["response", "completion"];

/// Author of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn parse(role: &str) -> Option<Self> {
        match role {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatExample {
    pub messages: Vec<ChatMessage>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptResponseExample {
    pub prompt: String,
    pub response: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExampleFormat {
    Chat,
    PromptResponse,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormattedExample {
    Chat(ChatExample),
    PromptResponse(PromptResponseExample),
}

impl FormattedExample {
    pub fn parse(example: &Value) -> Result<Self, FinetuningError> {
        match classify_example(example)? {
            ExampleFormat::Chat => parse_chat_example(example).map(FormattedExample::Chat),
            ExampleFormat::PromptResponse => {
                parse_prompt_response_example(example).map(FormattedExample::PromptResponse)
            }
        }
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

fn as_object(example: &Value) -> Result<&Map<String, Value>, FinetuningError> {
    example
        .as_object()
        .ok_or(FinetuningError::InvalidExampleType {
            found: json_type_name(example),
        })
}

fn find_key(object: &Map<String, Value>, allowed: &[&'static str]) -> Vec<&'static str> {
    allowed
        .iter()
        .copied()
        .filter(|key| object.contains_key(*key))
        .collect()
}

/// Decides whether an example is a chat conversation (a single `messages`
/// key) or a prompt/response pair (exactly one key of each kind).
pub fn classify_example(example: &Value) -> Result<ExampleFormat, FinetuningError> {
    let object = as_object(example)?;
    let has_messages = !find_key(object, ALLOWED_MESSAGES_KEYS).is_empty();
    let has_prompt = !find_key(object, ALLOWED_PROMPT_KEYS).is_empty();
    let has_response = !find_key(object, ALLOWED_RESPONSE_KEYS).is_empty();

    if object.len() == 1 && has_messages {
        Ok(ExampleFormat::Chat)
    } else if object.len() == 2 && has_prompt && has_response {
        Ok(ExampleFormat::PromptResponse)
    } else {
        Err(FinetuningError::UnknownExampleType {
            keys: object.keys().cloned().collect(),
        })
    }
}

pub fn parse_chat_example(example: &Value) -> Result<ChatExample, FinetuningError> {
    let object = as_object(example)?;
    let messages_key = find_key(object, ALLOWED_MESSAGES_KEYS)
        .first()
        .copied()
        .ok_or_else(|| FinetuningError::UnknownExampleType {
            keys: object.keys().cloned().collect(),
        })?;
    let raw_messages = &object[messages_key];
    let raw_messages = raw_messages
        .as_array()
        .ok_or(FinetuningError::InvalidMessageType {
            found: json_type_name(raw_messages),
        })?;

    if raw_messages.len() <= 1 {
        return Err(FinetuningError::NotEnoughChatData {
            count: raw_messages.len(),
        });
    }

    let messages = raw_messages
        .iter()
        .enumerate()
        .map(|(index, message)| parse_message(index, message))
        .collect::<Result<Vec<_>, _>>()?;

    for (index, pair) in messages.windows(2).enumerate() {
        let repeated = pair[0].role == pair[1].role
            && matches!(pair[1].role, Role::User | Role::Assistant);
        if repeated {
            return Err(FinetuningError::ConsecutiveRoles {
                index: index + 1,
                role: pair[1].role.to_string(),
            });
        }
    }

    if let Some(last) = messages.last()
        && last.role != Role::Assistant
    {
        return Err(FinetuningError::InvalidLastChatMessageRole {
            role: last.role.to_string(),
        });
    }

    Ok(ChatExample { messages })
}

fn parse_message(index: usize, message: &Value) -> Result<ChatMessage, FinetuningError> {
    let object = message
        .as_object()
        .ok_or(FinetuningError::InvalidMessageType {
            found: json_type_name(message),
        })?;

    let role_key = find_key(object, ALLOWED_ROLE_KEYS)
        .first()
        .copied()
        .ok_or(FinetuningError::MissingMessageKey { index, key: "role" })?;
    let content_key = find_key(object, ALLOWED_CONTENT_KEYS)
        .first()
        .copied()
        .ok_or(FinetuningError::MissingMessageKey {
            index,
            key: "content",
        })?;
    if object.len() != 2 {
        return Err(FinetuningError::IncorrectMessageKeyQuantity {
            index,
            count: object.len(),
        });
    }

    let role = match &object[role_key] {
        Value::String(role) => Role::parse(role).ok_or_else(|| FinetuningError::InvalidRole {
            index,
            role: role.clone(),
        })?,
        other => {
            return Err(FinetuningError::InvalidRole {
                index,
                role: other.to_string(),
            });
        }
    };
    let content = object[content_key]
        .as_str()
        .ok_or(FinetuningError::InvalidContentType { index })?;

    Ok(ChatMessage::new(role, content))
}

pub fn parse_prompt_response_example(
    example: &Value,
) -> Result<PromptResponseExample, FinetuningError> {
    let object = as_object(example)?;
    let prompt_keys = find_key(object, ALLOWED_PROMPT_KEYS);
    let response_keys = find_key(object, ALLOWED_RESPONSE_KEYS);

    let &[prompt_key] = prompt_keys.as_slice() else {
        return Err(FinetuningError::TooManyKeysInExample {
            kind: "prompt",
            count: prompt_keys.len(),
        });
    };
    let &[response_key] = response_keys.as_slice() else {
        return Err(FinetuningError::TooManyKeysInExample {
            kind: "response",
            count: response_keys.len(),
        });
    };

    let prompt = object[prompt_key]
        .as_str()
        .ok_or(FinetuningError::InvalidPromptType)?;
    let response = object[response_key]
        .as_str()
        .ok_or(FinetuningError::InvalidResponseType)?;

    Ok(PromptResponseExample {
        prompt: prompt.to_string(),
        response: response.to_string(),
    })
}
