use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

use super::AttentionModError;

/// Sequence id used for padding tokens in a packed batch.
pub const PADDING_SEQUENCE_ID: i64 = -1;

/// Per-token packing metadata for a `[batch, seq_len]` batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequenceIdInfo {
    batch: usize,
    seq_len: usize,
    sequence_id: Vec<i64>,
    pos_in_seq: Vec<i64>,
}

impl SequenceIdInfo {
    pub fn new(
        batch: usize,
        seq_len: usize,
        sequence_id: Vec<i64>,
        pos_in_seq: Vec<i64>,
    ) -> Result<Self, AttentionModError> {
        let expected = batch * seq_len;
        for (name, len) in [("sequence_id", sequence_id.len()), ("pos_in_seq", pos_in_seq.len())] {
            if len != expected {
                return Err(AttentionModError::ShapeMismatch {
                    what: name,
                    expected,
                    found: len,
                });
            }
        }

        Ok(Self {
            batch,
            seq_len,
            sequence_id,
            pos_in_seq,
        })
    }

    /// Builds the metadata from sequence ids alone, deriving each token's
    /// position inside its sequence.
    pub fn from_sequence_id(
        batch: usize,
        seq_len: usize,
        sequence_id: Vec<i64>,
    ) -> Result<Self, AttentionModError> {
        let expected = batch * seq_len;
        if sequence_id.len() != expected {
            return Err(AttentionModError::ShapeMismatch {
                what: "sequence_id",
                expected,
                found: sequence_id.len(),
            });
        }

        let pos_in_seq = if seq_len == 0 {
            Vec::new()
        } else {
            sequence_id
                .chunks(seq_len)
                .flat_map(positions_in_sequence)
                .collect()
        };

        Self::new(batch, seq_len, sequence_id, pos_in_seq)
    }

    pub fn from_tensor<B: Backend>(sequence_id: Tensor<B, 2, Int>) -> Result<Self, AttentionModError> {
        let [batch, seq_len] = sequence_id.dims();
        let ids = sequence_id
            .into_data()
            .convert::<i64>()
            .into_vec::<i64>()
            .map_err(|err| AttentionModError::TensorData(format!("{err:?}")))?;
        Self::from_sequence_id(batch, seq_len, ids)
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn sequence_id(&self, batch: usize, index: usize) -> Result<i64, AttentionModError> {
        self.lookup(&self.sequence_id, batch, index)
    }

    pub fn pos_in_seq(&self, batch: usize, index: usize) -> Result<i64, AttentionModError> {
        self.lookup(&self.pos_in_seq, batch, index)
    }

    fn lookup(&self, data: &[i64], batch: usize, index: usize) -> Result<i64, AttentionModError> {
        if batch >= self.batch || index >= self.seq_len {
            return Err(AttentionModError::IndexOutOfRange {
                batch,
                index,
                shape: [self.batch, self.seq_len],
            });
        }
        Ok(data[batch * self.seq_len + index])
    }
}

/// Position of every token within its own sequence: the number of earlier
/// tokens in the row that carry the same sequence id. Padding stays `-1`.
pub fn positions_in_sequence(row: &[i64]) -> Vec<i64> {
    let mut seen: Vec<(i64, i64)> = Vec::new();
    row.iter()
        .map(|&id| {
            if id == PADDING_SEQUENCE_ID {
                return PADDING_SEQUENCE_ID;
            }
            match seen.iter_mut().find(|(seq, _)| *seq == id) {
                Some((_, count)) => {
                    let position = *count;
                    *count += 1;
                    position
                }
                None => {
                    seen.push((id, 1));
                    0
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_restart_per_sequence() {
        let positions = positions_in_sequence(&[0, 0, 0, 1, 1, 2, -1, -1]);
        assert_eq!(positions, vec![0, 1, 2, 0, 1, 0, -1, -1]);
    }

    #[test]
    fn positions_follow_interleaved_ids() {
        assert_eq!(positions_in_sequence(&[3, 4, 3, 4, 3]), vec![0, 0, 1, 1, 2]);
    }

    #[test]
    fn from_sequence_id_derives_rows_independently() {
        let info = SequenceIdInfo::from_sequence_id(2, 3, vec![0, 0, 1, 5, 5, 5]).expect("info");
        assert_eq!(info.pos_in_seq(0, 2).expect("pos"), 0);
        assert_eq!(info.pos_in_seq(1, 2).expect("pos"), 2);
        assert_eq!(info.sequence_id(1, 0).expect("id"), 5);
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let err = SequenceIdInfo::from_sequence_id(2, 3, vec![0, 0, 1]).unwrap_err();
        assert!(matches!(
            err,
            AttentionModError::ShapeMismatch { expected: 6, found: 3, .. }
        ));
    }

    #[test]
    fn out_of_range_lookup_errors() {
        let info = SequenceIdInfo::from_sequence_id(1, 2, vec![0, 0]).expect("info");
        assert!(matches!(
            info.sequence_id(0, 2),
            Err(AttentionModError::IndexOutOfRange { index: 2, .. })
        ));
    }
}
