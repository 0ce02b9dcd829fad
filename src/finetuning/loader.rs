use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use burn::data::dataloader::{DataLoader, DataLoaderIterator, Progress};
use burn::tensor::backend::Backend;
use serde_json::Value;
use tracing::info;

use crate::tokenizer::Tokenizer;

use super::collate::{FinetuningBatch, FinetuningCollator};
use super::preprocess::PreprocessFn;
use super::template::ChatTemplate;
use super::tokenize::{TokenizedExample, tokenize_formatted_example_with_date};

/// Reads a JSON-lines file, optionally preprocesses each row, and tokenizes
/// it. The first malformed row aborts the load.
pub fn load_tokenized_jsonl(
    path: &Path,
    preprocess: Option<PreprocessFn>,
    template: &dyn ChatTemplate,
    tokenizer: &dyn Tokenizer,
    date_string: &str,
) -> Result<Vec<TokenizedExample>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut examples = Vec::new();

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let row: Value = serde_json::from_str(&line)
            .with_context(|| format!("{}:{} is not valid JSON", path.display(), line_no + 1))?;
        let row = match preprocess {
            Some(preprocess) => preprocess(&row)
                .with_context(|| format!("failed to preprocess {}:{}", path.display(), line_no + 1))?,
            None => row,
        };
        let tokenized = tokenize_formatted_example_with_date(&row, template, tokenizer, date_string)
            .with_context(|| format!("failed to tokenize {}:{}", path.display(), line_no + 1))?;
        examples.push(tokenized);
    }

    info!(path = %path.display(), examples = examples.len(), "loaded finetuning examples");
    Ok(examples)
}

/// Serves tokenized examples in order as collated batches.
pub struct FinetuningDataLoader<B: Backend> {
    examples: Arc<Vec<TokenizedExample>>,
    start: usize,
    end: usize,
    batch_size: usize,
    collator: FinetuningCollator,
    device: B::Device,
}

impl<B: Backend> Clone for FinetuningDataLoader<B> {
    fn clone(&self) -> Self {
        Self {
            examples: Arc::clone(&self.examples),
            start: self.start,
            end: self.end,
            batch_size: self.batch_size,
            collator: self.collator.clone(),
            device: self.device.clone(),
        }
    }
}

impl<B: Backend> FinetuningDataLoader<B> {
    pub fn new(
        examples: Arc<Vec<TokenizedExample>>,
        collator: FinetuningCollator,
        batch_size: usize,
        device: &B::Device,
    ) -> Self {
        let end = examples.len();
        Self {
            examples,
            start: 0,
            end,
            batch_size: batch_size.max(1),
            collator,
            device: device.clone(),
        }
    }

    pub fn num_batches(&self) -> usize {
        (self.end - self.start).div_ceil(self.batch_size)
    }
}

impl<B> DataLoader<B, FinetuningBatch<B>> for FinetuningDataLoader<B>
where
    B: Backend + 'static,
    B::Device: Clone,
{
    fn iter<'a>(&'a self) -> Box<dyn DataLoaderIterator<FinetuningBatch<B>> + 'a> {
        Box::new(FinetuningIterator {
            loader: self,
            cursor: self.start,
        })
    }

    fn num_items(&self) -> usize {
        self.end - self.start
    }

    fn to_device(&self, device: &B::Device) -> Arc<dyn DataLoader<B, FinetuningBatch<B>>> {
        let mut loader = self.clone();
        loader.device = device.clone();
        Arc::new(loader)
    }

    fn slice(&self, start: usize, end: usize) -> Arc<dyn DataLoader<B, FinetuningBatch<B>>> {
        let end = (self.start + end).min(self.end);
        let start = (self.start + start).min(end);
        let mut loader = self.clone();
        loader.start = start;
        loader.end = end;
        Arc::new(loader)
    }
}

struct FinetuningIterator<'a, B: Backend> {
    loader: &'a FinetuningDataLoader<B>,
    cursor: usize,
}

impl<B: Backend> Iterator for FinetuningIterator<'_, B> {
    type Item = FinetuningBatch<B>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.loader.end {
            return None;
        }
        let stop = (self.cursor + self.loader.batch_size).min(self.loader.end);
        let batch = self
            .loader
            .collator
            .collate::<B>(&self.loader.examples[self.cursor..stop], &self.loader.device);
        self.cursor = stop;
        Some(batch)
    }
}

impl<B: Backend> DataLoaderIterator<FinetuningBatch<B>> for FinetuningIterator<'_, B> {
    fn progress(&self) -> Progress {
        Progress::new(self.cursor - self.loader.start, self.loader.end - self.loader.start)
    }
}
