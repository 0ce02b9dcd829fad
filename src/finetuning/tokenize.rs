use serde::Serialize;
use serde_json::Value;

use crate::tokenizer::Tokenizer;

use super::error::FinetuningError;
use super::example::{FormattedExample, PromptResponseExample};
use super::slicing::slice_chat;
use super::template::{ChatTemplate, current_date_string};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TokenizedTurn {
    pub input_ids: Vec<u32>,
    pub labels: Vec<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TokenizedExample {
    pub turns: Vec<TokenizedTurn>,
}

/// Tokenizes a prompt and its target with the tokenizer's own special-token
/// behavior. A BOS marker the tokenizer prepends by itself is kept on the
/// input and dropped from the front of the labels.
pub fn tokenize_with_bos_removal(
    tokenizer: &dyn Tokenizer,
    prompt: &str,
    response: &str,
) -> TokenizedTurn {
    let input_ids = tokenizer.encode_default(prompt);
    let mut labels = tokenizer.encode_default(response);

    if tokenizer.add_bos_token()
        && let Some(bos) = tokenizer.bos_id()
        && labels.first() == Some(&bos)
    {
        labels.remove(0);
    }

    TokenizedTurn { input_ids, labels }
}

pub fn tokenize_formatted_example(
    example: &Value,
    template: &dyn ChatTemplate,
    tokenizer: &dyn Tokenizer,
) -> Result<TokenizedExample, FinetuningError> {
    tokenize_formatted_example_with_date(example, template, tokenizer, &current_date_string())
}

pub fn tokenize_formatted_example_with_date(
    example: &Value,
    template: &dyn ChatTemplate,
    tokenizer: &dyn Tokenizer,
    date_string: &str,
) -> Result<TokenizedExample, FinetuningError> {
    let turns = match FormattedExample::parse(example)? {
        FormattedExample::Chat(chat) => slice_chat(&chat, template, date_string)?
            .iter()
            .map(|(prompt, response)| tokenize_with_bos_removal(tokenizer, prompt, response))
            .collect(),
        FormattedExample::PromptResponse(PromptResponseExample { prompt, response }) => {
            vec![tokenize_with_bos_removal(tokenizer, &prompt, &response)]
        }
    };
    Ok(TokenizedExample { turns })
}
