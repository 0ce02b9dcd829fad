use anyhow::{Result, anyhow, ensure};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use tracing::debug;

use crate::kernel::positions_in_sequence;

use super::logger::{ScatterLogger, ScatterPoint};
use super::perplexity::IGNORED_PERPLEXITY;

pub const LONG_CONTEXT_PERPLEXITY: &str = "long_context_perplexity";

/// Tracks how perplexity evolves with a token's position inside its packed
/// sequence, logging a `(seq_length, perplexity)` scatter after every batch.
///
/// The running sums belong to the evaluator and are only touched through
/// `&mut self`; merging across data-parallel ranks is left to the caller.
#[derive(Debug)]
pub struct LossVsContextLengthEvaluator<L: ScatterLogger> {
    sum_perplexity: Vec<f64>,
    sum_length: Vec<u64>,
    logger: L,
}

impl<L: ScatterLogger> LossVsContextLengthEvaluator<L> {
    pub fn new(logger: L) -> Self {
        Self {
            sum_perplexity: Vec::new(),
            sum_length: Vec::new(),
            logger,
        }
    }

    pub fn logger(&self) -> &L {
        &self.logger
    }

    pub fn reset(&mut self) {
        self.sum_perplexity.clear();
        self.sum_length.clear();
    }

    /// Adds a batch of per-token perplexities (`[batch, time]`) bucketed by
    /// position in sequence.
    ///
    /// Padding tokens (negative sequence id) are left out entirely rather
    /// than counted at position 0, so bucket 0 only averages real first
    /// tokens. Positions marked [`IGNORED_PERPLEXITY`] (unlabeled targets)
    /// are skipped as well.
    pub fn accumulate(
        &mut self,
        perplexity: &[f32],
        sequence_id: &[i64],
        batch: usize,
        time: usize,
    ) -> Result<()> {
        ensure!(
            perplexity.len() == batch * time && sequence_id.len() == batch * time,
            "expected {} perplexities and sequence ids, got {} and {}",
            batch * time,
            perplexity.len(),
            sequence_id.len()
        );
        if time > self.sum_length.len() {
            self.sum_perplexity.resize(time, 0.0);
            self.sum_length.resize(time, 0);
        }

        for row in 0..batch {
            let span = row * time..(row + 1) * time;
            let ids = &sequence_id[span.clone()];
            let positions = positions_in_sequence(ids);
            for ((&id, position), value) in ids.iter().zip(positions).zip(&perplexity[span]) {
                if id < 0 || position < 0 || *value < 0.0 {
                    continue;
                }
                self.sum_perplexity[position as usize] += f64::from(*value);
                self.sum_length[position as usize] += 1;
            }
        }
        Ok(())
    }

    /// Average perplexity per position; `-1` where no token was seen.
    pub fn average_perplexity(&self) -> Vec<f32> {
        self.sum_perplexity
            .iter()
            .zip(&self.sum_length)
            .map(|(&sum, &count)| {
                if count == 0 {
                    -1.0
                } else {
                    (sum / count as f64) as f32
                }
            })
            .collect()
    }

    pub fn points(&self) -> Vec<ScatterPoint> {
        self.average_perplexity()
            .into_iter()
            .enumerate()
            .map(|(seq_length, perplexity)| ScatterPoint {
                seq_length,
                perplexity,
            })
            .collect()
    }

    /// Accumulates one evaluation batch and logs the updated scatter at `step`.
    pub fn eval_batch_end<B: Backend>(
        &mut self,
        perplexity: Tensor<B, 2>,
        sequence_id: Tensor<B, 2, Int>,
        step: usize,
    ) -> Result<Vec<ScatterPoint>> {
        let [batch, time] = perplexity.dims();
        ensure!(
            sequence_id.dims() == [batch, time],
            "sequence_id shape {:?} does not match perplexity shape {:?}",
            sequence_id.dims(),
            [batch, time]
        );

        let perplexity = perplexity
            .into_data()
            .convert::<f32>()
            .into_vec::<f32>()
            .map_err(|err| anyhow!("{err:?}"))?;
        let sequence_id = sequence_id
            .into_data()
            .convert::<i64>()
            .into_vec::<i64>()
            .map_err(|err| anyhow!("{err:?}"))?;

        self.accumulate(&perplexity, &sequence_id, batch, time)?;
        let points = self.points();
        debug!(step, positions = points.len(), "context length perplexity updated");
        self.logger
            .log_scatter(LONG_CONTEXT_PERPLEXITY, step, &points)?;
        Ok(points)
    }
}
