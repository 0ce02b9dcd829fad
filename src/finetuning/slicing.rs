use serde_json::Value;
use tracing::trace;

use super::error::FinetuningError;
use super::example::{ChatExample, ChatMessage, Role, parse_chat_example};
use super::template::{ChatTemplate, TemplateOptions, current_date_string};

/// Splits a validated chat example into one `(prompt, response)` pair per
/// assistant message, dated with today's date.
pub fn slice_chat_formatted_example(
    example: &Value,
    template: &dyn ChatTemplate,
) -> Result<Vec<(String, String)>, FinetuningError> {
    slice_chat_formatted_example_with_date(example, template, &current_date_string())
}

pub fn slice_chat_formatted_example_with_date(
    example: &Value,
    template: &dyn ChatTemplate,
    date_string: &str,
) -> Result<Vec<(String, String)>, FinetuningError> {
    let chat = parse_chat_example(example)?;
    slice_chat(&chat, template, date_string)
}

/// Each prompt is the templated text between the end of the previous response
/// and the generation prompt for the current assistant turn; each response is
/// the rest of the turn. Concatenating every pair reproduces the full render.
pub fn slice_chat(
    chat: &ChatExample,
    template: &dyn ChatTemplate,
    date_string: &str,
) -> Result<Vec<(String, String)>, FinetuningError> {
    let messages = &chat.messages;
    let mut turns = Vec::new();
    let mut conversation_through_previous_turn = String::new();

    for (idx, message) in messages.iter().enumerate() {
        if message.role != Role::Assistant {
            continue;
        }
        let (prompt, response) = slice_out_last_turn(
            template,
            &messages[..=idx],
            &conversation_through_previous_turn,
            date_string,
        )?;
        conversation_through_previous_turn.push_str(&prompt);
        conversation_through_previous_turn.push_str(&response);
        turns.push((prompt, response));
    }

    Ok(turns)
}

fn render(
    template: &dyn ChatTemplate,
    messages: &[ChatMessage],
    add_generation_prompt: bool,
    date_string: &str,
) -> Result<String, FinetuningError> {
    let options = TemplateOptions::new(add_generation_prompt, Some(date_string.to_string()));
    template
        .apply(messages, &options)
        .map_err(|err| FinetuningError::ChatTemplate {
            template: template.name().to_string(),
            message: format!("{err:#}"),
        })
}

fn slice_out_last_turn(
    template: &dyn ChatTemplate,
    messages_through_current_turn: &[ChatMessage],
    conversation_through_previous_turn: &str,
    date_string: &str,
) -> Result<(String, String), FinetuningError> {
    let index = messages_through_current_turn.len() - 1;
    let full_conversation = render(template, messages_through_current_turn, false, date_string)?;
    let prompt_with_history = render(
        template,
        &messages_through_current_turn[..index],
        true,
        date_string,
    )?;

    let response = full_conversation
        .strip_prefix(prompt_with_history.as_str())
        .ok_or(FinetuningError::TemplatePrefixMismatch {
            index,
            stage: "prompt",
        })?;
    let prompt = prompt_with_history
        .strip_prefix(conversation_through_previous_turn)
        .ok_or(FinetuningError::TemplatePrefixMismatch {
            index,
            stage: "conversation",
        })?;

    trace!(index, prompt_len = prompt.len(), response_len = response.len(), "sliced chat turn");
    Ok((prompt.to_string(), response.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finetuning::template::ChatMlTemplate;
    use anyhow::anyhow;
    use serde_json::json;

    #[test]
    fn assistant_first_turn_has_empty_prompt() {
        let example = json!({
            "messages": [
                {"role": "assistant", "content": "welcome"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
            ]
        });
        let turns =
            slice_chat_formatted_example_with_date(&example, &ChatMlTemplate::new(), "01 Jan 2030")
                .unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].0, "");
        assert_eq!(turns[0].1, "<|im_start|>assistant\nwelcome<|im_end|>");
    }

    #[test]
    fn inconsistent_template_is_reported() {
        let template = |messages: &[ChatMessage], options: &TemplateOptions| -> anyhow::Result<String> {
            // re-orders turns when a generation prompt is requested
            let mut parts: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
            if options.add_generation_prompt {
                parts.reverse();
            }
            Ok(parts.concat())
        };
        let example = json!({
            "messages": [
                {"role": "user", "content": "a"},
                {"role": "assistant", "content": "b"},
                {"role": "user", "content": "c"},
                {"role": "assistant", "content": "d"},
            ]
        });
        let err = slice_chat_formatted_example_with_date(&example, &template, "x").unwrap_err();
        assert!(matches!(err, FinetuningError::TemplatePrefixMismatch { index: 3, .. }));
    }

    #[test]
    fn template_failures_are_wrapped() {
        let template = |_: &[ChatMessage], _: &TemplateOptions| -> anyhow::Result<String> {
            Err(anyhow!("no system role"))
        };
        let example = json!({
            "messages": [
                {"role": "user", "content": "a"},
                {"role": "assistant", "content": "b"},
            ]
        });
        let err = slice_chat_formatted_example(&example, &template).unwrap_err();
        match err {
            FinetuningError::ChatTemplate { template, message } => {
                assert_eq!(template, "custom");
                assert!(message.contains("no system role"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
