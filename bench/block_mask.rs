use std::sync::Arc;

use burn::tensor::{Tensor, TensorData};
use burn_foundry::kernel::{
    AlibiScoreMod, CausalMaskMod, SequenceIdInfo, SequenceIdMaskMod, SharedAttentionMod,
    SlidingWindowMaskMod, flex_attention, generate_block_mask, generate_score_mod,
};
use burn_ndarray::NdArray;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

#[derive(Clone, Copy)]
struct MaskConfig {
    name: &'static str,
    batch: usize,
    seq_len: usize,
    block_size: usize,
    docs_per_row: usize,
}

const MASK_CONFIGS: &[MaskConfig] = &[
    MaskConfig {
        name: "b1_t256_bs32",
        batch: 1,
        seq_len: 256,
        block_size: 32,
        docs_per_row: 1,
    },
    MaskConfig {
        name: "b4_t512_bs64_packed",
        batch: 4,
        seq_len: 512,
        block_size: 64,
        docs_per_row: 4,
    },
];

fn packed_info(cfg: &MaskConfig) -> Arc<SequenceIdInfo> {
    let doc_len = cfg.seq_len.div_ceil(cfg.docs_per_row);
    let sequence_id: Vec<i64> = (0..cfg.batch)
        .flat_map(|_| (0..cfg.seq_len).map(move |t| (t / doc_len) as i64))
        .collect();
    Arc::new(
        SequenceIdInfo::from_sequence_id(cfg.batch, cfg.seq_len, sequence_id)
            .expect("valid sequence ids"),
    )
}

fn block_mask_bench(c: &mut Criterion) {
    let mods: Vec<SharedAttentionMod> = vec![
        Arc::new(CausalMaskMod),
        Arc::new(SequenceIdMaskMod),
        Arc::new(SlidingWindowMaskMod::new(128)),
    ];

    for cfg in MASK_CONFIGS {
        let info = packed_info(cfg);
        let mask = generate_block_mask(
            cfg.seq_len,
            cfg.seq_len,
            cfg.batch,
            Some(mods.as_slice()),
            cfg.block_size,
            Some(info.clone()),
        )
        .expect("block mask")
        .expect("mods configured");
        println!(
            "[block_mask:{name}] blocks={blocks:?} sparsity={sparsity:.3}",
            name = cfg.name,
            blocks = mask.num_blocks(),
            sparsity = mask.sparsity(),
        );

        c.bench_with_input(
            BenchmarkId::new("generate_block_mask", cfg.name),
            cfg,
            |b, cfg| {
                b.iter(|| {
                    generate_block_mask(
                        cfg.seq_len,
                        cfg.seq_len,
                        cfg.batch,
                        Some(mods.as_slice()),
                        cfg.block_size,
                        Some(info.clone()),
                    )
                })
            },
        );
    }
}

fn flex_attention_bench(c: &mut Criterion) {
    type Backend = NdArray<f32>;
    let device = Default::default();
    let (batch, heads, time, dim) = (1, 4, 128, 32);

    let mask_mods: Vec<SharedAttentionMod> = vec![Arc::new(CausalMaskMod)];
    let score_mods: Vec<SharedAttentionMod> = vec![Arc::new(AlibiScoreMod::from_heads(heads, 8.0))];
    let block_mask = generate_block_mask(time, time, batch, Some(mask_mods.as_slice()), 32, None)
        .expect("block mask")
        .expect("mods configured");
    let score_mod = generate_score_mod(Some(score_mods.as_slice()), None)
        .expect("score mod")
        .expect("mods configured");

    let values: Vec<f32> = (0..batch * heads * time * dim)
        .map(|idx| ((idx % 17) as f32 - 8.0) / 8.0)
        .collect();
    let input = Tensor::<Backend, 4>::from_data(
        TensorData::new(values, [batch, heads, time, dim]),
        &device,
    );

    c.bench_function("flex_attention_causal_alibi_t128", |b| {
        b.iter(|| {
            flex_attention(
                input.clone(),
                input.clone(),
                input.clone(),
                Some(&score_mod),
                Some(&block_mask),
            )
        })
    });
}

criterion_group!(benches, block_mask_bench, flex_attention_bench);
criterion_main!(benches);
