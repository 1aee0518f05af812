pub mod batch;
pub mod classify;
pub mod cli;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod group;
pub mod json_extract;
pub mod lead;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod pitch;
pub mod progress;
pub mod prompts;
pub mod retry;
pub mod scoring;

#[cfg(test)]
mod test_support;

pub use error::{AppError, ExtractError, GenerateError, PipelineError};
pub use group::{GroupSummary, UNASSIGNED_GROUP};
pub use json_extract::{extract_as, extract_json};
pub use lead::{AnnotatedLead, Lead, LeadRecord};
pub use llm::{OpenRouterClient, OpenRouterSettings, TextGenerator};
pub use pipeline::{Pipeline, PipelineOptions, PipelineRequest};
pub use progress::{CallbackResult, Phase, PipelineCallbacks, PipelineEvent, ProgressEvent};
pub use retry::RetryPolicy;
pub use scoring::{PageFetcher, SearchHit, WebSearch};

use clap::Parser;

/// Parse the command line and run it.
pub async fn run() -> Result<(), AppError> {
    cli::run(cli::Cli::parse()).await
}
