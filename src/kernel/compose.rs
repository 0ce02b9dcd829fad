use std::sync::Arc;

use tracing::debug;

use super::AttentionModError;
use super::block_sparse::BlockMask;
use super::mods::{AttnIndex, ModKind, SharedAttentionMod};
use super::sequence::SequenceIdInfo;

fn validate_members(
    mods: &[SharedAttentionMod],
    expected: ModKind,
    info: Option<&SequenceIdInfo>,
) -> Result<(), AttentionModError> {
    for member in mods {
        if member.kind() != expected {
            return Err(AttentionModError::KindMismatch {
                name: member.name(),
                expected,
                found: member.kind(),
            });
        }
        if member.requires_sequence_info() && info.is_none() {
            return Err(AttentionModError::MissingSequenceInfo {
                name: member.name(),
            });
        }
    }
    Ok(())
}

/// Mask modifiers bound to the batch's sequence metadata, combined with AND.
#[derive(Clone, Debug)]
pub struct MaskMod {
    mods: Vec<SharedAttentionMod>,
    info: Option<Arc<SequenceIdInfo>>,
}

impl MaskMod {
    pub fn allowed(&self, index: AttnIndex) -> Result<bool, AttentionModError> {
        let info = self.info.as_deref();
        for member in &self.mods {
            if !member.mask(index, info)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }
}

/// Score modifiers bound to the batch's sequence metadata, applied in order
/// with each one receiving the previous output.
#[derive(Clone, Debug)]
pub struct ScoreMod {
    mods: Vec<SharedAttentionMod>,
    info: Option<Arc<SequenceIdInfo>>,
}

impl ScoreMod {
    pub fn apply(&self, score: f32, index: AttnIndex) -> Result<f32, AttentionModError> {
        let info = self.info.as_deref();
        self.mods
            .iter()
            .try_fold(score, |acc, member| member.score(acc, index, info))
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }
}

pub fn generate_mask_mod(
    mask_mods: Option<&[SharedAttentionMod]>,
    info: Option<Arc<SequenceIdInfo>>,
) -> Result<Option<MaskMod>, AttentionModError> {
    let Some(mods) = mask_mods.filter(|mods| !mods.is_empty()) else {
        return Ok(None);
    };
    validate_members(mods, ModKind::Mask, info.as_deref())?;
    Ok(Some(MaskMod {
        mods: mods.to_vec(),
        info,
    }))
}

pub fn generate_score_mod(
    score_mods: Option<&[SharedAttentionMod]>,
    info: Option<Arc<SequenceIdInfo>>,
) -> Result<Option<ScoreMod>, AttentionModError> {
    let Some(mods) = score_mods.filter(|mods| !mods.is_empty()) else {
        return Ok(None);
    };
    validate_members(mods, ModKind::Score, info.as_deref())?;
    Ok(Some(ScoreMod {
        mods: mods.to_vec(),
        info,
    }))
}

/// Evaluates the composed mask over every `(batch, query, key)` edge and
/// groups the result into `block_size` tiles. The mask is shared by all heads.
pub fn generate_block_mask(
    q_len: usize,
    kv_len: usize,
    batch: usize,
    mask_mods: Option<&[SharedAttentionMod]>,
    block_size: usize,
    info: Option<Arc<SequenceIdInfo>>,
) -> Result<Option<BlockMask>, AttentionModError> {
    let Some(mask_mod) = generate_mask_mod(mask_mods, info)? else {
        return Ok(None);
    };

    if let Some(info) = mask_mod.info.as_deref()
        && (info.batch() != batch || info.seq_len() < q_len.max(kv_len))
    {
        return Err(AttentionModError::ShapeMismatch {
            what: "sequence_id_info",
            expected: batch * q_len.max(kv_len),
            found: info.batch() * info.seq_len(),
        });
    }

    let mut dense = Vec::with_capacity(batch * q_len * kv_len);
    for b in 0..batch {
        for q in 0..q_len {
            for kv in 0..kv_len {
                dense.push(mask_mod.allowed(AttnIndex::new(b, 0, q, kv))?);
            }
        }
    }

    let block_mask = BlockMask::from_dense(batch, q_len, kv_len, block_size, dense)?;
    debug!(
        batch,
        q_len,
        kv_len,
        block_size = block_mask.block_size(),
        mods = mask_mod.len(),
        sparsity = block_mask.sparsity(),
        "generated block mask"
    );
    Ok(Some(block_mask))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::mods::{
        AlibiScoreMod, AttentionMod, CausalMaskMod, SequenceIdMaskMod, SlidingWindowMaskMod,
        SoftcapScoreMod,
    };

    fn shared<M: AttentionMod + 'static>(m: M) -> SharedAttentionMod {
        Arc::new(m)
    }

    #[test]
    fn missing_list_yields_none() {
        assert!(generate_mask_mod(None, None).unwrap().is_none());
        let empty: Vec<SharedAttentionMod> = Vec::new();
        assert!(generate_score_mod(Some(empty.as_slice()), None).unwrap().is_none());
        assert!(generate_block_mask(4, 4, 1, None, 2, None).unwrap().is_none());
    }

    #[test]
    fn masks_combine_with_and() {
        let mods = vec![shared(CausalMaskMod), shared(SlidingWindowMaskMod::new(1))];
        let mask = generate_mask_mod(Some(mods.as_slice()), None).unwrap().unwrap();
        assert!(mask.allowed(AttnIndex::new(0, 0, 3, 2)).unwrap());
        assert!(!mask.allowed(AttnIndex::new(0, 0, 3, 1)).unwrap());
        assert!(!mask.allowed(AttnIndex::new(0, 0, 1, 2)).unwrap());
    }

    #[test]
    fn scores_apply_sequentially() {
        let mods = vec![
            shared(AlibiScoreMod::new(vec![1.0])),
            shared(SoftcapScoreMod::new(2.0)),
        ];
        let score = generate_score_mod(Some(mods.as_slice()), None).unwrap().unwrap();
        let out = score.apply(0.0, AttnIndex::new(0, 0, 3, 0)).unwrap();
        assert!((out - 2.0 * (-1.5f32).tanh()).abs() < 1e-6);

        let reversed = vec![mods[1].clone(), mods[0].clone()];
        let score = generate_score_mod(Some(reversed.as_slice()), None).unwrap().unwrap();
        let out = score.apply(0.0, AttnIndex::new(0, 0, 3, 0)).unwrap();
        assert!((out + 3.0).abs() < 1e-6);
    }

    #[test]
    fn wrong_kind_is_rejected_at_composition() {
        let mods = vec![shared(CausalMaskMod), shared(SoftcapScoreMod::new(1.0))];
        let err = generate_mask_mod(Some(mods.as_slice()), None).unwrap_err();
        assert!(matches!(
            err,
            AttentionModError::KindMismatch { name: "softcap_score_mod", .. }
        ));
    }

    #[test]
    fn missing_sequence_info_is_rejected_up_front() {
        let mods = vec![shared(SlidingWindowMaskMod::new(0)), shared(SequenceIdMaskMod)];
        let err = generate_block_mask(2, 2, 1, Some(mods.as_slice()), 1, None).unwrap_err();
        assert!(matches!(err, AttentionModError::MissingSequenceInfo { .. }));
    }

    #[test]
    fn block_mask_respects_packing() {
        let info = Arc::new(SequenceIdInfo::from_sequence_id(1, 4, vec![0, 0, 1, 1]).unwrap());
        let mods = vec![shared(CausalMaskMod), shared(SequenceIdMaskMod)];
        let mask = generate_block_mask(4, 4, 1, Some(mods.as_slice()), 2, Some(info))
            .unwrap()
            .unwrap();
        assert!(mask.is_allowed(0, 1, 0));
        assert!(!mask.is_allowed(0, 2, 1));
        assert!(mask.is_allowed(0, 3, 2));
        assert_eq!(mask.active_blocks(0, 1), vec![1]);
    }

    #[test]
    fn undersized_sequence_info_is_rejected() {
        let info = Arc::new(SequenceIdInfo::from_sequence_id(1, 2, vec![0, 0]).unwrap());
        let mods = vec![shared(SequenceIdMaskMod)];
        assert!(matches!(
            generate_block_mask(4, 4, 1, Some(mods.as_slice()), 2, Some(info)),
            Err(AttentionModError::ShapeMismatch { what: "sequence_id_info", .. })
        ));
    }

    #[test]
    fn no_mask_mods_ignores_sequence_info_shape() {
        let info = Arc::new(SequenceIdInfo::from_sequence_id(1, 2, vec![0, 0]).unwrap());
        assert!(
            generate_block_mask(4, 4, 1, None, 2, Some(info.clone()))
                .unwrap()
                .is_none()
        );
        let empty: Vec<SharedAttentionMod> = Vec::new();
        assert!(
            generate_block_mask(4, 4, 1, Some(empty.as_slice()), 2, Some(info))
                .unwrap()
                .is_none()
        );
    }
}
