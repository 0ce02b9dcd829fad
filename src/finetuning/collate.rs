use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};
use serde::Deserialize;

use crate::kernel::PADDING_SEQUENCE_ID;
use crate::tokenizer::Tokenizer;

use super::tokenize::TokenizedExample;

/// Label value excluded from the loss.
pub const IGNORE_INDEX: i64 = -100;

/// Which responses of a multi-turn example contribute to the loss.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetResponses {
    #[default]
    Last,
    All,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollatedSequence {
    pub input_ids: Vec<i64>,
    pub labels: Vec<i64>,
}

#[derive(Clone, Debug)]
pub struct FinetuningBatch<B: Backend> {
    pub input_ids: Tensor<B, 2, Int>,
    pub labels: Tensor<B, 2, Int>,
    pub attention_mask: Tensor<B, 2, Int>,
    pub sequence_id: Tensor<B, 2, Int>,
}

/// Packs tokenized turns into fixed-length decoder-only training rows.
#[derive(Clone, Debug)]
pub struct FinetuningCollator {
    max_seq_len: usize,
    pad_id: u32,
    target_responses: TargetResponses,
}

impl FinetuningCollator {
    pub fn new(max_seq_len: usize, pad_id: u32, target_responses: TargetResponses) -> Self {
        Self {
            max_seq_len: max_seq_len.max(1),
            pad_id,
            target_responses,
        }
    }

    /// Pads with the tokenizer's pad id, or 0 when it has none.
    pub fn for_tokenizer(
        tokenizer: &dyn Tokenizer,
        max_seq_len: usize,
        target_responses: TargetResponses,
    ) -> Self {
        let pad_id = tokenizer.pad_id().unwrap_or(0);
        Self::new(max_seq_len, pad_id, target_responses)
    }

    pub fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    /// Concatenates every turn's prompt and response, masking prompts (and
    /// non-target responses) out of the labels, then truncates.
    pub fn collate_example(&self, example: &TokenizedExample) -> CollatedSequence {
        let mut input_ids = Vec::new();
        let mut labels = Vec::new();
        let last = example.turns.len().saturating_sub(1);

        for (idx, turn) in example.turns.iter().enumerate() {
            input_ids.extend(turn.input_ids.iter().map(|&id| id as i64));
            labels.extend(std::iter::repeat_n(IGNORE_INDEX, turn.input_ids.len()));

            let targeted = match self.target_responses {
                TargetResponses::All => true,
                TargetResponses::Last => idx == last,
            };
            input_ids.extend(turn.labels.iter().map(|&id| id as i64));
            if targeted {
                labels.extend(turn.labels.iter().map(|&id| id as i64));
            } else {
                labels.extend(std::iter::repeat_n(IGNORE_INDEX, turn.labels.len()));
            }
        }

        input_ids.truncate(self.max_seq_len);
        labels.truncate(self.max_seq_len);
        CollatedSequence { input_ids, labels }
    }

    pub fn collate<B: Backend>(
        &self,
        examples: &[TokenizedExample],
        device: &B::Device,
    ) -> FinetuningBatch<B> {
        let rows = examples.len();
        let len = self.max_seq_len;
        let mut input_ids = vec![self.pad_id as i64; rows * len];
        let mut labels = vec![IGNORE_INDEX; rows * len];
        let mut attention_mask = vec![0i64; rows * len];
        let mut sequence_id = vec![PADDING_SEQUENCE_ID; rows * len];

        for (row, example) in examples.iter().enumerate() {
            let collated = self.collate_example(example);
            let start = row * len;
            let used = collated.input_ids.len();
            input_ids[start..start + used].copy_from_slice(&collated.input_ids);
            labels[start..start + used].copy_from_slice(&collated.labels);
            attention_mask[start..start + used].fill(1);
            sequence_id[start..start + used].fill(0);
        }

        let tensor = |data: Vec<i64>| {
            Tensor::<B, 2, Int>::from_data(TensorData::new(data, [rows, len]), device)
        };

        FinetuningBatch {
            input_ids: tensor(input_ids),
            labels: tensor(labels),
            attention_mask: tensor(attention_mask),
            sequence_id: tensor(sequence_id),
        }
    }
}
