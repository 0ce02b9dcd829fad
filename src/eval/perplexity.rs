use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, activation};

/// Value written for positions whose target is ignored. Real perplexities
/// are never below 1.
pub const IGNORED_PERPLEXITY: f32 = -1.0;

/// Per-token perplexity `exp(-log p(target))`, shape `[batch, time]`.
///
/// Negative targets (such as the `-100` labels on prompt and padding tokens)
/// are not looked up; their positions hold [`IGNORED_PERPLEXITY`].
pub fn token_perplexity<B: Backend>(
    logits: Tensor<B, 3>,
    targets: Tensor<B, 2, Int>,
) -> Tensor<B, 2> {
    let [batch, time, _vocab] = logits.dims();
    let ignored = targets.clone().lower_elem(0);
    let targets = targets.mask_fill(ignored.clone(), 0);

    let log_probs = activation::log_softmax(logits, 2);
    log_probs
        .gather(2, targets.reshape([batch, time, 1]))
        .reshape([batch, time])
        .neg()
        .exp()
        .mask_fill(ignored, IGNORED_PERPLEXITY)
}
