use serde_json::{Value, json};

use super::error::FinetuningError;
use super::example::json_type_name;

/// Converts a raw dataset row into a formatted example.
pub type PreprocessFn = fn(&Value) -> Result<Value, FinetuningError>;

/// Converts ShareGPT rows (`conversations` of `from`/`value` pairs) into the
/// `messages` chat format.
pub fn sharegpt_preprocess(row: &Value) -> Result<Value, FinetuningError> {
    let object = row.as_object().ok_or(FinetuningError::InvalidExampleType {
        found: json_type_name(row),
    })?;
    let conversation = object
        .get("conversations")
        .ok_or_else(|| FinetuningError::UnknownExampleType {
            keys: object.keys().cloned().collect(),
        })?;
    let conversation = conversation
        .as_array()
        .ok_or(FinetuningError::InvalidMessageType {
            found: json_type_name(conversation),
        })?;

    let mut messages = Vec::with_capacity(conversation.len());
    for (index, turn) in conversation.iter().enumerate() {
        let speaker = turn
            .get("from")
            .and_then(Value::as_str)
            .ok_or(FinetuningError::MissingMessageKey { index, key: "from" })?;
        let role = match speaker {
            "human" => "user",
            "gpt" => "assistant",
            "system" => "system",
            "tool" => "tool",
            other => {
                return Err(FinetuningError::InvalidRole {
                    index,
                    role: other.to_string(),
                });
            }
        };
        let value = turn
            .get("value")
            .ok_or(FinetuningError::MissingMessageKey { index, key: "value" })?;
        messages.push(json!({"role": role, "content": value}));
    }

    Ok(json!({ "messages": messages }))
}

/// Looks up a preprocessing function by dataset name.
pub fn preprocessor_for(name: &str) -> Result<PreprocessFn, FinetuningError> {
    match name {
        "sharegpt" | "teknium/OpenHermes-2.5" => Ok(sharegpt_preprocess),
        other => Err(FinetuningError::UnknownPreprocessor(other.to_string())),
    }
}
