pub mod context_length;
pub mod logger;
pub mod perplexity;

pub use context_length::{LONG_CONTEXT_PERPLEXITY, LossVsContextLengthEvaluator};
pub use logger::{
    JsonlScatterLogger, MemoryScatterLogger, ScatterLogger, ScatterPoint, ScatterRecord,
    TracingScatterLogger,
};
pub use perplexity::{IGNORED_PERPLEXITY, token_perplexity};
