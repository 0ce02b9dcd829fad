use std::collections::HashSet;

use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

use super::AttentionModError;

/// Sparse layout over `(query block, key block)` pairs.
#[derive(Clone, Debug)]
pub struct BlockPattern2d {
    block_size: usize,
    active_pairs: Option<HashSet<(usize, usize)>>,
}

impl BlockPattern2d {
    /// Lower-triangular (causal) layout.
    pub fn dense(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            active_pairs: None,
        }
    }

    pub fn from_pairs(block_size: usize, pairs: impl IntoIterator<Item = (usize, usize)>) -> Self {
        Self {
            block_size: block_size.max(1),
            active_pairs: Some(pairs.into_iter().collect()),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn is_active(&self, row: usize, col: usize) -> bool {
        match &self.active_pairs {
            Some(set) => set.contains(&(row, col)),
            None => col <= row,
        }
    }

    pub fn iter_cols(&self, row: usize, total_blocks: usize) -> Vec<usize> {
        match &self.active_pairs {
            Some(set) => {
                let mut cols: Vec<usize> = set
                    .iter()
                    .filter_map(|(r, c)| (*r == row && *c < total_blocks).then_some(*c))
                    .collect();
                cols.sort_unstable();
                cols
            }
            None => (0..=row.min(total_blocks.saturating_sub(1))).collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockState {
    /// No edge in the tile is allowed; the kernel may skip it.
    Empty,
    /// Some edges are allowed; the dense mask must be consulted.
    Partial,
    /// Every edge is allowed; no masking is needed inside the tile.
    Full,
}

/// A materialized attention mask with a block-level summary.
#[derive(Clone, Debug)]
pub struct BlockMask {
    batch: usize,
    q_len: usize,
    kv_len: usize,
    block_size: usize,
    q_blocks: usize,
    kv_blocks: usize,
    dense: Vec<bool>,
    blocks: Vec<BlockState>,
}

impl BlockMask {
    /// `dense` is row-major `[batch, q_len, kv_len]`.
    pub fn from_dense(
        batch: usize,
        q_len: usize,
        kv_len: usize,
        block_size: usize,
        dense: Vec<bool>,
    ) -> Result<Self, AttentionModError> {
        let expected = batch * q_len * kv_len;
        if dense.len() != expected {
            return Err(AttentionModError::ShapeMismatch {
                what: "dense mask",
                expected,
                found: dense.len(),
            });
        }

        let block_size = block_size.max(1);
        let q_blocks = q_len.div_ceil(block_size);
        let kv_blocks = kv_len.div_ceil(block_size);
        let mut blocks = Vec::with_capacity(batch * q_blocks * kv_blocks);

        for b in 0..batch {
            for qb in 0..q_blocks {
                let q_range = qb * block_size..usize::min((qb + 1) * block_size, q_len);
                for kb in 0..kv_blocks {
                    let kv_range = kb * block_size..usize::min((kb + 1) * block_size, kv_len);
                    let mut allowed = 0usize;
                    let mut total = 0usize;
                    for q in q_range.clone() {
                        let row = (b * q_len + q) * kv_len;
                        for kv in kv_range.clone() {
                            total += 1;
                            if dense[row + kv] {
                                allowed += 1;
                            }
                        }
                    }
                    blocks.push(match allowed {
                        0 => BlockState::Empty,
                        n if n == total => BlockState::Full,
                        _ => BlockState::Partial,
                    });
                }
            }
        }

        Ok(Self {
            batch,
            q_len,
            kv_len,
            block_size,
            q_blocks,
            kv_blocks,
            dense,
            blocks,
        })
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn q_len(&self) -> usize {
        self.q_len
    }

    pub fn kv_len(&self) -> usize {
        self.kv_len
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// `(query blocks, key blocks)` per batch row.
    pub fn num_blocks(&self) -> (usize, usize) {
        (self.q_blocks, self.kv_blocks)
    }

    pub fn is_allowed(&self, batch: usize, query: usize, key: usize) -> bool {
        if batch >= self.batch || query >= self.q_len || key >= self.kv_len {
            return false;
        }
        self.dense[(batch * self.q_len + query) * self.kv_len + key]
    }

    pub fn block_state(&self, batch: usize, q_block: usize, kv_block: usize) -> BlockState {
        if batch >= self.batch || q_block >= self.q_blocks || kv_block >= self.kv_blocks {
            return BlockState::Empty;
        }
        self.blocks[(batch * self.q_blocks + q_block) * self.kv_blocks + kv_block]
    }

    /// Key blocks a query block has to visit.
    pub fn active_blocks(&self, batch: usize, q_block: usize) -> Vec<usize> {
        (0..self.kv_blocks)
            .filter(|&kb| self.block_state(batch, q_block, kb) != BlockState::Empty)
            .collect()
    }

    /// Fraction of tiles that can be skipped entirely.
    pub fn sparsity(&self) -> f32 {
        if self.blocks.is_empty() {
            return 0.0;
        }
        let empty = self
            .blocks
            .iter()
            .filter(|state| **state == BlockState::Empty)
            .count();
        empty as f32 / self.blocks.len() as f32
    }

    pub fn to_pattern(&self, batch: usize) -> BlockPattern2d {
        let pairs = (0..self.q_blocks).flat_map(|qb| {
            self.active_blocks(batch, qb)
                .into_iter()
                .map(move |kb| (qb, kb))
        });
        BlockPattern2d::from_pairs(self.block_size, pairs)
    }

    /// Float `[batch, heads, q_len, kv_len]` tensor holding 1 where attention
    /// is allowed and 0 elsewhere; every head shares the same mask.
    pub fn to_tensor<B: Backend>(&self, heads: usize, device: &B::Device) -> Tensor<B, 4> {
        let plane = self.q_len * self.kv_len;
        let mut data = Vec::with_capacity(self.batch * heads * plane);
        for b in 0..self.batch {
            let row = &self.dense[b * plane..(b + 1) * plane];
            for _ in 0..heads {
                data.extend(row.iter().map(|&allowed| if allowed { 1.0f32 } else { 0.0 }));
            }
        }
        Tensor::<B, 4>::from_data(
            TensorData::new(data, [self.batch, heads, self.q_len, self.kv_len]),
            device,
        )
    }

    /// One character per tile: `#` full, `+` partial, `.` empty.
    pub fn render(&self, batch: usize) -> String {
        let mut out = String::with_capacity(self.q_blocks * (self.kv_blocks + 1));
        for qb in 0..self.q_blocks {
            for kb in 0..self.kv_blocks {
                out.push(match self.block_state(batch, qb, kb) {
                    BlockState::Full => '#',
                    BlockState::Partial => '+',
                    BlockState::Empty => '.',
                });
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn causal_dense(len: usize) -> Vec<bool> {
        (0..len)
            .flat_map(|q| (0..len).map(move |kv| q >= kv))
            .collect()
    }

    #[test]
    fn causal_blocks_classify_diagonal_as_partial() {
        let mask = BlockMask::from_dense(1, 4, 4, 2, causal_dense(4)).expect("mask");
        assert_eq!(mask.num_blocks(), (2, 2));
        assert_eq!(mask.block_state(0, 0, 0), BlockState::Partial);
        assert_eq!(mask.block_state(0, 0, 1), BlockState::Empty);
        assert_eq!(mask.block_state(0, 1, 0), BlockState::Full);
        assert_eq!(mask.block_state(0, 1, 1), BlockState::Partial);
        assert!((mask.sparsity() - 0.25).abs() < f32::EPSILON);
        assert_eq!(mask.render(0), "+.\n#+\n");
    }

    #[test]
    fn ragged_tail_blocks_are_sized_to_fit() {
        let mask = BlockMask::from_dense(1, 3, 3, 2, vec![true; 9]).expect("mask");
        assert_eq!(mask.num_blocks(), (2, 2));
        assert_eq!(mask.block_state(0, 1, 1), BlockState::Full);
    }

    #[test]
    fn pattern_matches_non_empty_blocks() {
        let mask = BlockMask::from_dense(1, 4, 4, 2, causal_dense(4)).expect("mask");
        let pattern = mask.to_pattern(0);
        let dense = BlockPattern2d::dense(2);
        for row in 0..2 {
            assert_eq!(pattern.iter_cols(row, 2), dense.iter_cols(row, 2));
            for col in 0..2 {
                assert_eq!(pattern.is_active(row, col), dense.is_active(row, col));
            }
        }
    }

    #[test]
    fn rejects_wrong_dense_length() {
        assert!(BlockMask::from_dense(1, 2, 2, 1, vec![true; 3]).is_err());
    }

    #[test]
    fn out_of_range_queries_are_masked() {
        let mask = BlockMask::from_dense(1, 2, 2, 1, vec![true; 4]).expect("mask");
        assert!(!mask.is_allowed(0, 2, 0));
        assert_eq!(mask.block_state(1, 0, 0), BlockState::Empty);
    }
}
