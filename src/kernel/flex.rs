use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData, activation};

use super::AttentionModError;
use super::block_sparse::BlockMask;
use super::compose::ScoreMod;
use super::mods::AttnIndex;

const MASKED_SCORE: f32 = -1.0e9;

/// Scaled dot-product attention with pluggable score and mask modifiers.
///
/// Inputs are `[batch, heads, time, dim]`. The score modifier sees the scaled
/// raw score of every edge; edges the block mask disallows are dropped before
/// the softmax, and query rows with no allowed key produce zeros.
pub fn flex_attention<B: Backend>(
    query: Tensor<B, 4>,
    key: Tensor<B, 4>,
    value: Tensor<B, 4>,
    score_mod: Option<&ScoreMod>,
    block_mask: Option<&BlockMask>,
) -> Result<Tensor<B, 4>, AttentionModError> {
    let [batch, heads, q_len, dim] = query.dims();
    let [_, _, kv_len, _] = key.dims();
    let device = query.device();

    let scale = 1.0 / (dim.max(1) as f32).sqrt();
    let mut scores = query.matmul(key.swap_dims(2, 3)).mul_scalar(scale);

    if let Some(score_mod) = score_mod {
        scores = apply_score_mod(scores, score_mod, [batch, heads, q_len, kv_len])?;
    }

    let Some(block_mask) = block_mask else {
        return Ok(activation::softmax(scores, 3).matmul(value));
    };

    if block_mask.batch() != batch || block_mask.q_len() != q_len || block_mask.kv_len() != kv_len {
        return Err(AttentionModError::ShapeMismatch {
            what: "block mask",
            expected: batch * q_len * kv_len,
            found: block_mask.batch() * block_mask.q_len() * block_mask.kv_len(),
        });
    }

    let allowed = block_mask.to_tensor::<B>(heads, &device);
    let blocked = allowed.clone().equal_elem(0.0);
    let weights = activation::softmax(scores.mask_fill(blocked, MASKED_SCORE), 3) * allowed;

    Ok(weights.matmul(value))
}

fn apply_score_mod<B: Backend>(
    scores: Tensor<B, 4>,
    score_mod: &ScoreMod,
    shape: [usize; 4],
) -> Result<Tensor<B, 4>, AttentionModError> {
    let [batch, heads, q_len, kv_len] = shape;
    let device = scores.device();
    let mut values = scores
        .into_data()
        .convert::<f32>()
        .into_vec::<f32>()
        .map_err(|err| AttentionModError::TensorData(format!("{err:?}")))?;

    let mut offset = 0;
    for b in 0..batch {
        for h in 0..heads {
            for q in 0..q_len {
                for kv in 0..kv_len {
                    values[offset] = score_mod.apply(values[offset], AttnIndex::new(b, h, q, kv))?;
                    offset += 1;
                }
            }
        }
    }

    Ok(Tensor::<B, 4>::from_data(TensorData::new(values, shape), &device))
}
