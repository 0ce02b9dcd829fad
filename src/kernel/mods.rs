use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use super::AttentionModError;
use super::sequence::{PADDING_SEQUENCE_ID, SequenceIdInfo};

/// Capability tag of an attention modifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModKind {
    Mask,
    Score,
}

impl fmt::Display for ModKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModKind::Mask => write!(f, "mask"),
            ModKind::Score => write!(f, "score"),
        }
    }
}

/// Coordinates of a single attention edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttnIndex {
    pub batch: usize,
    pub head: usize,
    pub query: usize,
    pub key: usize,
}

impl AttnIndex {
    pub fn new(batch: usize, head: usize, query: usize, key: usize) -> Self {
        Self {
            batch,
            head,
            query,
            key,
        }
    }

    /// Signed query-minus-key distance.
    pub fn distance(&self) -> i64 {
        self.query as i64 - self.key as i64
    }
}

/// A mask or score modifier for blocked attention.
///
/// Mask modifiers answer whether an edge may be attended; score modifiers
/// transform the raw score of an edge. Implementors override the method that
/// matches their [`ModKind`]; calling the other one is an error.
pub trait AttentionMod: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> ModKind;

    fn requires_sequence_info(&self) -> bool {
        false
    }

    fn mask(
        &self,
        _index: AttnIndex,
        _info: Option<&SequenceIdInfo>,
    ) -> Result<bool, AttentionModError> {
        Err(AttentionModError::KindMismatch {
            name: self.name(),
            expected: ModKind::Mask,
            found: self.kind(),
        })
    }

    fn score(
        &self,
        _score: f32,
        _index: AttnIndex,
        _info: Option<&SequenceIdInfo>,
    ) -> Result<f32, AttentionModError> {
        Err(AttentionModError::KindMismatch {
            name: self.name(),
            expected: ModKind::Score,
            found: self.kind(),
        })
    }
}

fn require_info<'a>(
    name: &'static str,
    info: Option<&'a SequenceIdInfo>,
) -> Result<&'a SequenceIdInfo, AttentionModError> {
    info.ok_or(AttentionModError::MissingSequenceInfo { name })
}

fn same_sequence(info: &SequenceIdInfo, index: AttnIndex) -> Result<bool, AttentionModError> {
    let query_seq = info.sequence_id(index.batch, index.query)?;
    let key_seq = info.sequence_id(index.batch, index.key)?;
    Ok(query_seq == key_seq && query_seq != PADDING_SEQUENCE_ID)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CausalMaskMod;

impl AttentionMod for CausalMaskMod {
    fn name(&self) -> &'static str {
        "causal_mask"
    }

    fn kind(&self) -> ModKind {
        ModKind::Mask
    }

    fn mask(&self, index: AttnIndex, _info: Option<&SequenceIdInfo>) -> Result<bool, AttentionModError> {
        Ok(index.query >= index.key)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SlidingWindowMaskMod {
    pub sliding_window_size: i64,
}

impl SlidingWindowMaskMod {
    pub fn new(sliding_window_size: i64) -> Self {
        Self {
            sliding_window_size,
        }
    }
}

impl AttentionMod for SlidingWindowMaskMod {
    fn name(&self) -> &'static str {
        "sliding_window_mask"
    }

    fn kind(&self) -> ModKind {
        ModKind::Mask
    }

    fn mask(&self, index: AttnIndex, _info: Option<&SequenceIdInfo>) -> Result<bool, AttentionModError> {
        Ok(index.distance() <= self.sliding_window_size)
    }
}

/// Keeps attention inside a packed sequence and drops padding queries.
#[derive(Clone, Copy, Debug, Default)]
pub struct SequenceIdMaskMod;

impl AttentionMod for SequenceIdMaskMod {
    fn name(&self) -> &'static str {
        "sequence_id_mask"
    }

    fn kind(&self) -> ModKind {
        ModKind::Mask
    }

    fn requires_sequence_info(&self) -> bool {
        true
    }

    fn mask(&self, index: AttnIndex, info: Option<&SequenceIdInfo>) -> Result<bool, AttentionModError> {
        let info = require_info(self.name(), info)?;
        same_sequence(info, index)
    }
}

/// Sequence-local attention restricted to a sliding window, except for the
/// first `global_window_size` positions of each sequence which stay visible.
#[derive(Clone, Copy, Debug)]
pub struct LocalGlobalMaskMod {
    pub sliding_window_size: i64,
    pub global_window_size: i64,
}

impl LocalGlobalMaskMod {
    pub fn new(sliding_window_size: i64, global_window_size: i64) -> Self {
        Self {
            sliding_window_size,
            global_window_size,
        }
    }
}

impl AttentionMod for LocalGlobalMaskMod {
    fn name(&self) -> &'static str {
        "local_global_mask"
    }

    fn kind(&self) -> ModKind {
        ModKind::Mask
    }

    fn requires_sequence_info(&self) -> bool {
        true
    }

    fn mask(&self, index: AttnIndex, info: Option<&SequenceIdInfo>) -> Result<bool, AttentionModError> {
        let info = require_info(self.name(), info)?;
        if !same_sequence(info, index)? {
            return Ok(false);
        }
        let global = info.pos_in_seq(index.batch, index.key)? <= self.global_window_size;
        let sliding = index.distance() <= self.sliding_window_size;
        Ok(global || sliding)
    }
}

#[derive(Clone, Debug)]
pub struct AlibiScoreMod {
    slopes: Vec<f32>,
}

impl AlibiScoreMod {
    pub fn new(slopes: Vec<f32>) -> Self {
        Self { slopes }
    }

    pub fn from_heads(n_heads: usize, alibi_bias_max: f32) -> Self {
        Self::new(gen_alibi_slopes(n_heads, alibi_bias_max))
    }

    pub fn slopes(&self) -> &[f32] {
        &self.slopes
    }
}

impl AttentionMod for AlibiScoreMod {
    fn name(&self) -> &'static str {
        "alibi_score_mod"
    }

    fn kind(&self) -> ModKind {
        ModKind::Score
    }

    fn score(
        &self,
        score: f32,
        index: AttnIndex,
        _info: Option<&SequenceIdInfo>,
    ) -> Result<f32, AttentionModError> {
        let slope = self
            .slopes
            .get(index.head)
            .copied()
            .ok_or(AttentionModError::MissingHeadSlope {
                head: index.head,
                heads: self.slopes.len(),
            })?;
        Ok(score - slope * index.distance() as f32)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SoftcapScoreMod {
    pub attn_logit_softcapping: f32,
}

impl SoftcapScoreMod {
    pub fn new(attn_logit_softcapping: f32) -> Self {
        Self {
            attn_logit_softcapping,
        }
    }
}

impl AttentionMod for SoftcapScoreMod {
    fn name(&self) -> &'static str {
        "softcap_score_mod"
    }

    fn kind(&self) -> ModKind {
        ModKind::Score
    }

    fn score(
        &self,
        score: f32,
        _index: AttnIndex,
        _info: Option<&SequenceIdInfo>,
    ) -> Result<f32, AttentionModError> {
        let cap = self.attn_logit_softcapping;
        Ok(cap * (score / cap).tanh())
    }
}

/// ALiBi head slopes. Head counts that are not a power of two take the odd
/// then even slopes of the next power of two.
pub fn gen_alibi_slopes(n_heads: usize, alibi_bias_max: f32) -> Vec<f32> {
    if n_heads == 0 {
        return Vec::new();
    }
    let padded = n_heads.next_power_of_two();
    let slopes: Vec<f32> = (1..=padded)
        .map(|idx| {
            let m = idx as f32 * alibi_bias_max / padded as f32;
            1.0 / 2f32.powf(m)
        })
        .collect();

    if padded == n_heads {
        return slopes;
    }

    slopes
        .iter()
        .skip(1)
        .step_by(2)
        .chain(slopes.iter().step_by(2))
        .take(n_heads)
        .copied()
        .collect()
}

pub type SharedAttentionMod = Arc<dyn AttentionMod>;

/// Registry of the built-in modifiers, addressable from configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AttentionModConfig {
    CausalMask,
    SlidingWindowMask {
        sliding_window_size: i64,
    },
    SequenceIdMask,
    LocalGlobalMask {
        sliding_window_size: i64,
        global_window_size: i64,
    },
    AlibiScoreMod {
        #[serde(default)]
        alibi_slopes: Option<Vec<f32>>,
        #[serde(default)]
        n_heads: Option<usize>,
        #[serde(default = "default_alibi_bias_max")]
        alibi_bias_max: f32,
    },
    SoftcapScoreMod {
        attn_logit_softcapping: f32,
    },
}

impl AttentionModConfig {
    pub fn build(&self) -> Result<SharedAttentionMod, AttentionModError> {
        let built: SharedAttentionMod = match self {
            AttentionModConfig::CausalMask => Arc::new(CausalMaskMod),
            AttentionModConfig::SlidingWindowMask {
                sliding_window_size,
            } => Arc::new(SlidingWindowMaskMod::new(*sliding_window_size)),
            AttentionModConfig::SequenceIdMask => Arc::new(SequenceIdMaskMod),
            AttentionModConfig::LocalGlobalMask {
                sliding_window_size,
                global_window_size,
            } => Arc::new(LocalGlobalMaskMod::new(
                *sliding_window_size,
                *global_window_size,
            )),
            AttentionModConfig::AlibiScoreMod {
                alibi_slopes,
                n_heads,
                alibi_bias_max,
            } => match (alibi_slopes, n_heads) {
                (Some(slopes), _) => Arc::new(AlibiScoreMod::new(slopes.clone())),
                (None, Some(heads)) => Arc::new(AlibiScoreMod::from_heads(*heads, *alibi_bias_max)),
                (None, None) => {
                    return Err(AttentionModError::InvalidConfig(
                        "alibi_score_mod needs either `alibi_slopes` or `n_heads`".to_string(),
                    ));
                }
            },
            AttentionModConfig::SoftcapScoreMod {
                attn_logit_softcapping,
            } => {
                if *attn_logit_softcapping == 0.0 {
                    return Err(AttentionModError::InvalidConfig(
                        "softcap_score_mod needs a non-zero `attn_logit_softcapping`".to_string(),
                    ));
                }
                Arc::new(SoftcapScoreMod::new(*attn_logit_softcapping))
            }
        };
        Ok(built)
    }

    pub fn build_all(configs: &[AttentionModConfig]) -> Result<Vec<SharedAttentionMod>, AttentionModError> {
        configs.iter().map(AttentionModConfig::build).collect()
    }
}

fn default_alibi_bias_max() -> f32 {
    8.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(head: usize, query: usize, key: usize) -> AttnIndex {
        AttnIndex::new(0, head, query, key)
    }

    #[test]
    fn causal_allows_past_and_present() {
        let m = CausalMaskMod;
        assert!(m.mask(idx(0, 3, 3), None).unwrap());
        assert!(m.mask(idx(0, 3, 0), None).unwrap());
        assert!(!m.mask(idx(0, 2, 3), None).unwrap());
    }

    #[test]
    fn sliding_window_bounds_distance_only() {
        let m = SlidingWindowMaskMod::new(2);
        assert!(m.mask(idx(0, 5, 3), None).unwrap());
        assert!(!m.mask(idx(0, 5, 2), None).unwrap());
        // future keys have negative distance and are not excluded by the window
        assert!(m.mask(idx(0, 1, 4), None).unwrap());
    }

    #[test]
    fn sequence_mask_requires_metadata() {
        let err = SequenceIdMaskMod.mask(idx(0, 0, 0), None).unwrap_err();
        assert!(matches!(
            err,
            AttentionModError::MissingSequenceInfo { name: "sequence_id_mask" }
        ));
    }

    #[test]
    fn sequence_mask_blocks_padding_and_cross_sequence() {
        let info = SequenceIdInfo::from_sequence_id(1, 4, vec![0, 0, 1, -1]).unwrap();
        let m = SequenceIdMaskMod;
        assert!(m.mask(idx(0, 1, 0), Some(&info)).unwrap());
        assert!(!m.mask(idx(0, 2, 1), Some(&info)).unwrap());
        assert!(!m.mask(idx(0, 3, 3), Some(&info)).unwrap());
    }

    #[test]
    fn local_global_keeps_sequence_prefix_visible() {
        let info = SequenceIdInfo::from_sequence_id(1, 6, vec![0; 6]).unwrap();
        let m = LocalGlobalMaskMod::new(1, 0);
        assert!(m.mask(idx(0, 5, 0), Some(&info)).unwrap());
        assert!(m.mask(idx(0, 5, 4), Some(&info)).unwrap());
        assert!(!m.mask(idx(0, 5, 2), Some(&info)).unwrap());
    }

    #[test]
    fn local_global_stays_inside_packed_sequences() {
        let info = SequenceIdInfo::from_sequence_id(1, 5, vec![0, 0, 1, 1, -1]).unwrap();
        let m = LocalGlobalMaskMod::new(4, 4);
        assert!(m.mask(idx(0, 1, 0), Some(&info)).unwrap());
        assert!(m.mask(idx(0, 3, 2), Some(&info)).unwrap());
        assert!(!m.mask(idx(0, 2, 1), Some(&info)).unwrap());
        assert!(!m.mask(idx(0, 3, 0), Some(&info)).unwrap());
        assert!(!m.mask(idx(0, 4, 4), Some(&info)).unwrap());
        assert!(!m.mask(idx(0, 4, 3), Some(&info)).unwrap());
    }

    #[test]
    fn local_global_requires_metadata() {
        let m = LocalGlobalMaskMod::new(1, 1);
        assert!(m.requires_sequence_info());
        assert!(matches!(
            m.mask(idx(0, 1, 0), None),
            Err(AttentionModError::MissingSequenceInfo { name: "local_global_mask" })
        ));
    }

    #[test]
    fn alibi_penalizes_distance_per_head() {
        let m = AlibiScoreMod::new(vec![0.5, 0.25]);
        assert_eq!(m.score(1.0, idx(0, 4, 0), None).unwrap(), -1.0);
        assert_eq!(m.score(1.0, idx(1, 4, 0), None).unwrap(), 0.0);
        assert!(matches!(
            m.score(1.0, idx(2, 0, 0), None),
            Err(AttentionModError::MissingHeadSlope { head: 2, heads: 2 })
        ));
    }

    #[test]
    fn softcap_saturates() {
        let m = SoftcapScoreMod::new(5.0);
        let capped = m.score(1_000.0, idx(0, 0, 0), None).unwrap();
        assert!((capped - 5.0).abs() < 1e-4);
        let small = m.score(0.01, idx(0, 0, 0), None).unwrap();
        assert!((small - 0.01).abs() < 1e-4);
    }

    #[test]
    fn calling_the_wrong_capability_fails() {
        assert!(matches!(
            CausalMaskMod.score(0.0, idx(0, 0, 0), None),
            Err(AttentionModError::KindMismatch { expected: ModKind::Score, found: ModKind::Mask, .. })
        ));
        assert!(SoftcapScoreMod::new(1.0).mask(idx(0, 0, 0), None).is_err());
    }

    #[test]
    fn alibi_slopes_power_of_two() {
        let slopes = gen_alibi_slopes(4, 8.0);
        assert_eq!(slopes, vec![0.25, 0.0625, 0.015625, 0.00390625]);
    }

    #[test]
    fn alibi_slopes_interleave_for_other_counts() {
        let padded = gen_alibi_slopes(4, 8.0);
        let slopes = gen_alibi_slopes(3, 8.0);
        assert_eq!(slopes, vec![padded[1], padded[3], padded[0]]);
    }

    #[test]
    fn config_builds_registry_entries() {
        let configs: Vec<AttentionModConfig> = toml::from_str::<toml::Table>(
            r#"
            mods = [
                { type = "causal_mask" },
                { type = "sliding_window_mask", sliding_window_size = 4 },
                { type = "alibi_score_mod", n_heads = 2 },
            ]
            "#,
        )
        .unwrap()["mods"]
            .clone()
            .try_into()
            .unwrap();
        let built = AttentionModConfig::build_all(&configs).unwrap();
        let names: Vec<_> = built.iter().map(|m| m.name()).collect();
        assert_eq!(names, ["causal_mask", "sliding_window_mask", "alibi_score_mod"]);
        assert_eq!(built[2].kind(), ModKind::Score);
    }

    #[test]
    fn alibi_config_without_slopes_or_heads_is_rejected() {
        let config = AttentionModConfig::AlibiScoreMod {
            alibi_slopes: None,
            n_heads: None,
            alibi_bias_max: 8.0,
        };
        assert!(matches!(config.build(), Err(AttentionModError::InvalidConfig(_))));
    }

    #[test]
    fn explicit_alibi_slopes_take_precedence() {
        let config = AttentionModConfig::AlibiScoreMod {
            alibi_slopes: Some(vec![0.5, 0.25]),
            n_heads: Some(8),
            alibi_bias_max: 8.0,
        };
        let built = config.build().unwrap();
        assert_eq!(built.score(1.0, idx(0, 4, 0), None).unwrap(), -1.0);
        assert_eq!(built.score(1.0, idx(1, 4, 0), None).unwrap(), 0.0);
        assert!(matches!(
            built.score(1.0, idx(2, 4, 0), None),
            Err(AttentionModError::MissingHeadSlope { head: 2, heads: 2 })
        ));
    }

    #[test]
    fn zero_softcap_is_rejected() {
        let config = AttentionModConfig::SoftcapScoreMod {
            attn_logit_softcapping: 0.0,
        };
        assert!(matches!(config.build(), Err(AttentionModError::InvalidConfig(_))));

        let config = AttentionModConfig::SoftcapScoreMod {
            attn_logit_softcapping: 2.0,
        };
        let built = config.build().unwrap();
        assert!((built.score(1_000.0, idx(0, 0, 0), None).unwrap() - 2.0).abs() < 1e-4);
    }
}
