pub mod block_sparse;
pub mod compose;
pub mod flex;
pub mod mods;
pub mod sequence;

use thiserror::Error;

pub use block_sparse::{BlockMask, BlockPattern2d, BlockState};
pub use compose::{MaskMod, ScoreMod, generate_block_mask, generate_mask_mod, generate_score_mod};
pub use flex::flex_attention;
pub use mods::{
    AlibiScoreMod, AttentionMod, AttentionModConfig, AttnIndex, CausalMaskMod, LocalGlobalMaskMod,
    ModKind, SequenceIdMaskMod, SharedAttentionMod, SlidingWindowMaskMod, SoftcapScoreMod,
    gen_alibi_slopes,
};
pub use sequence::{PADDING_SEQUENCE_ID, SequenceIdInfo, positions_in_sequence};

#[derive(Debug, Error)]
pub enum AttentionModError {
    #[error("{name} requires sequence id info")]
    MissingSequenceInfo { name: &'static str },
    #[error("{name} is a {found} modifier but was used as a {expected} modifier")]
    KindMismatch {
        name: &'static str,
        expected: ModKind,
        found: ModKind,
    },
    #[error("no alibi slope for head {head} ({heads} slopes configured)")]
    MissingHeadSlope { head: usize, heads: usize },
    #[error("{what} has {found} elements, expected {expected}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("index ({batch}, {index}) out of range for shape {shape:?}")]
    IndexOutOfRange {
        batch: usize,
        index: usize,
        shape: [usize; 2],
    },
    #[error("invalid attention modifier config: {0}")]
    InvalidConfig(String),
    #[error("failed to read tensor data: {0}")]
    TensorData(String),
}
