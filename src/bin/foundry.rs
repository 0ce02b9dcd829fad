use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use burn_foundry::finetuning::{
    preprocessor_for, slice_chat_formatted_example_with_date, tokenize_formatted_example_with_date,
};
use burn_foundry::kernel::{
    AttentionModConfig, SequenceIdInfo, generate_block_mask, generate_score_mod,
};
use burn_foundry::{FoundryConfig, Tokenizer, load_config, load_prompts};

#[derive(Parser, Debug)]
#[command(author, version, about = "Fine-tuning data and attention mask utilities")]
struct Args {
    /// Configuration files applied in order (later files override earlier ones).
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    config: Vec<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the configured prompts with `file::` entries expanded.
    Prompts {
        /// Extra prompts or `file::<path>` entries appended after the configured ones.
        entries: Vec<String>,
        #[arg(long)]
        delimiter: Option<String>,
    },
    /// Render the block mask built from the configured mask mods.
    Mask {
        #[arg(long, default_value_t = 16)]
        q_len: usize,
        #[arg(long)]
        kv_len: Option<usize>,
        #[arg(long)]
        block_size: Option<usize>,
        /// Comma-separated sequence ids for a single packed row.
        #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
        sequence_id: Vec<i64>,
    },
    /// Slice (or tokenize) every row of a JSON-lines chat file into turns.
    Slice {
        input: PathBuf,
        #[arg(long)]
        tokenize: bool,
        #[arg(long)]
        preprocessor: Option<String>,
    },
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let args = Args::parse();
    let config = if args.config.is_empty() {
        FoundryConfig::default()
    } else {
        load_config(&args.config)?
    };

    match args.command {
        Command::Prompts { entries, delimiter } => run_prompts(&config, entries, delimiter),
        Command::Mask {
            q_len,
            kv_len,
            block_size,
            sequence_id,
        } => run_mask(&config, q_len, kv_len, block_size, sequence_id),
        Command::Slice {
            input,
            tokenize,
            preprocessor,
        } => run_slice(&config, &input, tokenize, preprocessor),
    }
}

fn run_prompts(
    config: &FoundryConfig,
    entries: Vec<String>,
    delimiter: Option<String>,
) -> Result<()> {
    if config.prompts.has_file_entries() {
        info!("expanding file:: prompt entries from config");
    }
    let mut all_entries = config.prompts.entries.clone();
    all_entries.extend(entries);
    let delimiter = delimiter.or_else(|| config.prompts.delimiter.clone());

    let prompts = load_prompts(&all_entries, delimiter.as_deref())?;
    info!(entries = all_entries.len(), prompts = prompts.len(), "loaded prompts");
    for prompt in prompts {
        println!("{}", serde_json::to_string(&prompt)?);
    }
    Ok(())
}

fn run_mask(
    config: &FoundryConfig,
    q_len: usize,
    kv_len: Option<usize>,
    block_size: Option<usize>,
    sequence_id: Vec<i64>,
) -> Result<()> {
    let kv_len = kv_len.unwrap_or(q_len);
    let block_size = block_size.unwrap_or(config.attention.block_size);

    let info = if sequence_id.is_empty() {
        None
    } else {
        let seq_len = sequence_id.len();
        Some(Arc::new(SequenceIdInfo::from_sequence_id(
            1,
            seq_len,
            sequence_id,
        )?))
    };

    let score_mods = AttentionModConfig::build_all(&config.attention.score_mods)?;
    if let Some(score_mod) = generate_score_mod(Some(score_mods.as_slice()), info.clone())? {
        info!(score_mods = score_mod.len(), "score mods validated");
    }

    let mask_mods = AttentionModConfig::build_all(&config.attention.mask_mods)?;
    let block_mask = generate_block_mask(
        q_len,
        kv_len,
        1,
        Some(mask_mods.as_slice()),
        block_size,
        info,
    )?
    .ok_or_else(|| anyhow!("no mask mods configured under [attention].mask_mods"))?;

    let (q_blocks, kv_blocks) = block_mask.num_blocks();
    info!(
        q_blocks,
        kv_blocks,
        sparsity = block_mask.sparsity(),
        "block mask"
    );
    print!("{}", block_mask.render(0));
    Ok(())
}

fn run_slice(
    config: &FoundryConfig,
    input: &Path,
    tokenize: bool,
    preprocessor: Option<String>,
) -> Result<()> {
    let template = config.chat.template();
    let date_string = config.chat.date_string();
    let preprocess = preprocessor
        .or_else(|| config.finetuning.preprocessor.clone())
        .map(|name| preprocessor_for(&name))
        .transpose()?;

    let content = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;

    if tokenize {
        let tokenizer = config.tokenizer.build();
        info!(
            tokenizer = config.tokenizer.kind_name(),
            vocab = tokenizer.len(),
            "tokenizing rows"
        );
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let row = parse_row(line, line_no, preprocess)?;
            let tokenized = tokenize_formatted_example_with_date(
                &row,
                &template,
                tokenizer.as_ref(),
                &date_string,
            )
            .with_context(|| format!("row {} failed to tokenize", line_no + 1))?;
            println!("{}", serde_json::to_string(&tokenized)?);
        }
    } else {
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let row = parse_row(line, line_no, preprocess)?;
            let turns = slice_chat_formatted_example_with_date(&row, &template, &date_string)
                .with_context(|| format!("row {} failed to slice", line_no + 1))?;
            println!("{}", serde_json::to_string(&turns)?);
        }
    }
    Ok(())
}

fn parse_row(
    line: &str,
    line_no: usize,
    preprocess: Option<burn_foundry::finetuning::PreprocessFn>,
) -> Result<serde_json::Value> {
    let row: serde_json::Value = serde_json::from_str(line)
        .with_context(|| format!("row {} is not valid JSON", line_no + 1))?;
    match preprocess {
        Some(preprocess) => preprocess(&row)
            .with_context(|| format!("row {} failed to preprocess", line_no + 1)),
        None => Ok(row),
    }
}
