use std::sync::Arc;

use burn::tensor::{Int, Tensor, TensorData};
use burn_foundry::kernel::{
    AlibiScoreMod, AttentionModConfig, AttentionModError, BlockState, CausalMaskMod,
    SequenceIdInfo, SequenceIdMaskMod, SharedAttentionMod, SoftcapScoreMod, flex_attention,
    generate_block_mask, generate_mask_mod, generate_score_mod,
};
use burn_ndarray::NdArray;

type Backend = NdArray<f32>;

fn column(values: &[f32]) -> Tensor<Backend, 4> {
    let device = Default::default();
    Tensor::from_data(TensorData::new(values.to_vec(), [1, 1, values.len(), 1]), &device)
}

fn to_vec(tensor: Tensor<Backend, 4>) -> Vec<f32> {
    tensor.into_data().convert::<f32>().into_vec::<f32>().unwrap()
}

fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-4, "{actual:?} != {expected:?}");
    }
}

#[test]
fn causal_mask_averages_the_prefix() {
    let zeros = column(&[0.0; 4]);
    let values = column(&[0.0, 1.0, 2.0, 3.0]);
    let mods: Vec<SharedAttentionMod> = vec![Arc::new(CausalMaskMod)];
    let block_mask = generate_block_mask(4, 4, 1, Some(mods.as_slice()), 2, None)
        .unwrap()
        .unwrap();

    assert_eq!(block_mask.block_state(0, 0, 0), BlockState::Partial);
    assert_eq!(block_mask.block_state(0, 0, 1), BlockState::Empty);
    assert_eq!(block_mask.block_state(0, 1, 0), BlockState::Full);

    let out = flex_attention(zeros.clone(), zeros, values, None, Some(&block_mask)).unwrap();
    assert_close(&to_vec(out), &[0.0, 0.5, 1.0, 1.5]);
}

#[test]
fn packed_sequences_do_not_attend_across_boundaries() {
    let device = Default::default();
    let sequence_id = Tensor::<Backend, 2, Int>::from_data(
        TensorData::new(vec![0i64, 0, 1, -1], [1, 4]),
        &device,
    );
    let info = Arc::new(SequenceIdInfo::from_tensor(sequence_id).unwrap());
    assert_eq!(info.pos_in_seq(0, 2).unwrap(), 0);
    assert_eq!(info.pos_in_seq(0, 3).unwrap(), -1);

    let mods: Vec<SharedAttentionMod> = vec![Arc::new(CausalMaskMod), Arc::new(SequenceIdMaskMod)];
    let block_mask = generate_block_mask(4, 4, 1, Some(mods.as_slice()), 4, Some(info))
        .unwrap()
        .unwrap();

    let zeros = column(&[0.0; 4]);
    let values = column(&[2.0, 4.0, 6.0, 8.0]);
    let out = flex_attention(zeros.clone(), zeros, values, None, Some(&block_mask)).unwrap();
    assert_close(&to_vec(out), &[2.0, 3.0, 6.0, 0.0]);
}

#[test]
fn score_mods_apply_in_order_before_masking() {
    let zeros = column(&[0.0; 2]);
    let values = column(&[0.0, 1.0]);
    let mask_mods: Vec<SharedAttentionMod> = vec![Arc::new(CausalMaskMod)];
    let block_mask = generate_block_mask(2, 2, 1, Some(mask_mods.as_slice()), 2, None)
        .unwrap()
        .unwrap();

    let alibi: Vec<SharedAttentionMod> = vec![Arc::new(AlibiScoreMod::new(vec![1.0]))];
    let score_mod = generate_score_mod(Some(alibi.as_slice()), None)
        .unwrap()
        .unwrap();
    let out = flex_attention(
        zeros.clone(),
        zeros.clone(),
        values.clone(),
        Some(&score_mod),
        Some(&block_mask),
    )
    .unwrap();
    let expected = 1.0 / (1.0 + (-1.0f32).exp());
    assert_close(&to_vec(out), &[0.0, expected]);

    // Capping after the bias squashes it toward zero.
    let capped: Vec<SharedAttentionMod> = vec![
        Arc::new(AlibiScoreMod::new(vec![1.0])),
        Arc::new(SoftcapScoreMod::new(0.5)),
    ];
    let score_mod = generate_score_mod(Some(capped.as_slice()), None)
        .unwrap()
        .unwrap();
    let out = flex_attention(zeros.clone(), zeros, values, Some(&score_mod), Some(&block_mask)).unwrap();
    let biased = 0.5 * (-1.0f32 / 0.5).tanh();
    let expected = 1.0 / (1.0 + biased.exp());
    assert_close(&to_vec(out), &[0.0, expected]);
}

#[test]
fn composition_rejects_misuse_up_front() {
    let mixed: Vec<SharedAttentionMod> = vec![Arc::new(CausalMaskMod), Arc::new(SoftcapScoreMod::new(1.0))];
    assert!(matches!(
        generate_mask_mod(Some(mixed.as_slice()), None),
        Err(AttentionModError::KindMismatch { .. })
    ));
    assert!(matches!(
        generate_score_mod(Some(mixed.as_slice()), None),
        Err(AttentionModError::KindMismatch { .. })
    ));

    let needs_info: Vec<SharedAttentionMod> = vec![Arc::new(SequenceIdMaskMod)];
    assert!(matches!(
        generate_mask_mod(Some(needs_info.as_slice()), None),
        Err(AttentionModError::MissingSequenceInfo { .. })
    ));

    assert!(generate_mask_mod(None, None).unwrap().is_none());
    assert!(generate_block_mask(4, 4, 1, None, 2, None).unwrap().is_none());
}

#[test]
fn block_mask_shape_must_match_inputs() {
    let mods: Vec<SharedAttentionMod> = vec![Arc::new(CausalMaskMod)];
    let block_mask = generate_block_mask(3, 3, 1, Some(mods.as_slice()), 2, None)
        .unwrap()
        .unwrap();
    let zeros = column(&[0.0; 4]);
    let err = flex_attention(zeros.clone(), zeros.clone(), zeros, None, Some(&block_mask)).unwrap_err();
    assert!(matches!(err, AttentionModError::ShapeMismatch { .. }));
}

#[test]
fn modifiers_build_from_configuration() {
    #[derive(serde::Deserialize)]
    struct Mods {
        mask_mods: Vec<AttentionModConfig>,
    }

    let mods: Mods = toml::from_str(
        r#"
        mask_mods = [
            { type = "causal_mask" },
            { type = "sliding_window_mask", sliding_window_size = 1 },
        ]
        "#,
    )
    .unwrap();
    let built = AttentionModConfig::build_all(&mods.mask_mods).unwrap();
    let block_mask = generate_block_mask(4, 4, 1, Some(built.as_slice()), 1, None)
        .unwrap()
        .unwrap();

    assert_eq!(block_mask.render(0), "#...\n##..\n.##.\n..##\n");
    assert!(block_mask.is_allowed(0, 3, 2));
    assert!(!block_mask.is_allowed(0, 3, 1));
}
