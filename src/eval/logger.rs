use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

pub const SCATTER_COLUMNS: [&str; 2] = ["seq_length", "perplexity"];

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ScatterPoint {
    pub seq_length: usize,
    pub perplexity: f32,
}

/// One logged scatter table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScatterRecord {
    pub name: String,
    pub step: usize,
    pub columns: [&'static str; 2],
    pub data: Vec<(usize, f32)>,
}

impl ScatterRecord {
    pub fn new(name: &str, step: usize, points: &[ScatterPoint]) -> Self {
        Self {
            name: name.to_string(),
            step,
            columns: SCATTER_COLUMNS,
            data: points
                .iter()
                .map(|point| (point.seq_length, point.perplexity))
                .collect(),
        }
    }
}

/// Destination for scatter plots produced during evaluation.
pub trait ScatterLogger {
    fn log_scatter(&mut self, name: &str, step: usize, points: &[ScatterPoint]) -> Result<()>;
}

impl<L: ScatterLogger + ?Sized> ScatterLogger for Box<L> {
    fn log_scatter(&mut self, name: &str, step: usize, points: &[ScatterPoint]) -> Result<()> {
        (**self).log_scatter(name, step, points)
    }
}

/// Emits each table as a structured `tracing` event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingScatterLogger;

impl ScatterLogger for TracingScatterLogger {
    fn log_scatter(&mut self, name: &str, step: usize, points: &[ScatterPoint]) -> Result<()> {
        let record = ScatterRecord::new(name, step, points);
        let data = serde_json::to_string(&record.data)?;
        info!(name, step, points = points.len(), %data, "scatter");
        Ok(())
    }
}

/// Appends each table as one JSON object per line.
#[derive(Clone, Debug)]
pub struct JsonlScatterLogger {
    path: PathBuf,
}

impl JsonlScatterLogger {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ScatterLogger for JsonlScatterLogger {
    fn log_scatter(&mut self, name: &str, step: usize, points: &[ScatterPoint]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let line = serde_json::to_string(&ScatterRecord::new(name, step, points))?;
        writeln!(file, "{line}").with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

/// Keeps every table in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryScatterLogger {
    pub records: Vec<ScatterRecord>,
}

impl ScatterLogger for MemoryScatterLogger {
    fn log_scatter(&mut self, name: &str, step: usize, points: &[ScatterPoint]) -> Result<()> {
        self.records.push(ScatterRecord::new(name, step, points));
        Ok(())
    }
}
