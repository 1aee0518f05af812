//! Command-line surface: `process`, `config` and `history`.
//!
//! `process` streams one JSON object per line to stdout while the pipeline
//! runs. Logs go to stderr.

use crate::config::{self, mask_key, AppConfig};
use crate::context::load_company_context;
use crate::db::{self, Database, FinishedGroup};
use crate::error::AppError;
use crate::group::GroupSummary;
use crate::lead::{AnnotatedLead, LeadRecord};
use crate::llm::OpenRouterClient;
use crate::logging;
use crate::pipeline::{Pipeline, PipelineRequest};
use crate::progress::{PipelineCallbacks, PipelineEvent, ProgressEvent};
use crate::scoring::{HttpPageFetcher, SerperSearch};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "lead-pitcher", version, about = "Group sales leads and write one pitch per group")]
pub struct Cli {
    /// Directory holding config.json and history.sqlite
    #[arg(long, global = true, env = "LEAD_PITCHER_DATA_DIR", default_value = ".lead-pitcher")]
    pub data_dir: PathBuf,

    /// Log level (overrides the configured one; RUST_LOG wins over both)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Group leads and write pitches
    Process(ProcessArgs),
    /// Show or change settings
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Inspect past runs
    #[command(subcommand)]
    History(HistoryCommand),
}

#[derive(Debug, Parser)]
pub struct ProcessArgs {
    /// JSON array of lead objects
    #[arg(long)]
    pub input: PathBuf,

    /// Where to write the annotated leads
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Company context as free text
    #[arg(long)]
    pub context: Option<String>,

    /// Directory of markdown files describing the company
    #[arg(long)]
    pub context_dir: Option<PathBuf>,

    #[arg(long)]
    pub max_groups: Option<usize>,

    /// Fixed group names, comma separated
    #[arg(long, value_delimiter = ',')]
    pub groups: Vec<String>,

    /// Score each lead's relevancy before grouping
    #[arg(long)]
    pub score: bool,

    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_size: Option<u64>,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    Show,
    Set(SetArgs),
}

#[derive(Debug, Parser)]
pub struct SetArgs {
    #[arg(long)]
    pub api_key: Option<String>,
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long)]
    pub serper_api_key: Option<String>,
    #[arg(long)]
    pub max_groups: Option<usize>,
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_size: Option<u64>,
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum HistoryCommand {
    List,
    Show { id: String },
    Delete { id: String },
}

pub async fn run(cli: Cli) -> Result<(), AppError> {
    let config = config::load_config(&cli.data_dir);
    let level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    logging::init(&level, cli.log_json);

    match cli.command {
        Command::Process(args) => process(&cli.data_dir, config, args).await,
        Command::Config(ConfigCommand::Show) => show_config(&config),
        Command::Config(ConfigCommand::Set(args)) => set_config(&cli.data_dir, config, args),
        Command::History(cmd) => history(&cli.data_dir, cmd),
    }
}

// ── NDJSON stream ──

/// One stream line: `{"type", "data", "timestamp"}`.
pub fn stream_line(kind: &str, data: Value) -> String {
    json!({
        "type": kind,
        "data": data,
        "timestamp": Utc::now().to_rfc3339(),
    })
    .to_string()
}

fn stream_message(event: &PipelineEvent) -> (&'static str, Value) {
    match event {
        PipelineEvent::Progress(p @ ProgressEvent::Started { .. }) => ("start", to_value(p)),
        PipelineEvent::Progress(p @ ProgressEvent::Degraded { .. }) => ("error", to_value(p)),
        PipelineEvent::Progress(p) => ("progress", to_value(p)),
        PipelineEvent::Lead(lead) => ("lead", to_value(lead)),
        PipelineEvent::Group(group) => ("group", to_value(group)),
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn emit(line: &str) {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
        warn!(error = %e, "failed to write stream line");
    }
}

/// What the stream writer saw by the end of a run.
#[derive(Debug, Default)]
struct StreamOutcome {
    groups: Vec<GroupSummary>,
    degraded: bool,
}

// ── process ──

/// Lead records from a JSON array of objects. Non-string scalars are
/// stringified; nulls become empty strings.
pub fn parse_leads(text: &str) -> Result<Vec<LeadRecord>, AppError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Array(items) = value else {
        return Err(AppError::Config("input must be a JSON array of lead objects".to_string()));
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::Object(fields) => Ok(fields
                .into_iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s,
                        Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    (k, v)
                })
                .collect()),
            _ => Err(AppError::Config(format!("lead {} is not a JSON object", i + 1))),
        })
        .collect()
}

/// Finalized groups with their pitch, for the history store.
fn finished_groups(summaries: &[GroupSummary], annotated: &[AnnotatedLead]) -> Vec<FinishedGroup> {
    let mut pitches: HashMap<&str, &str> = HashMap::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for lead in annotated {
        pitches.entry(lead.group_name.as_str()).or_insert(lead.pitch.as_str());
        *counts.entry(lead.group_name.as_str()).or_default() += 1;
    }

    let mut groups: Vec<FinishedGroup> = summaries
        .iter()
        .map(|s| FinishedGroup {
            name: s.name.clone(),
            description: s.description.clone(),
            pitch: pitches.get(s.name.as_str()).map(|p| p.to_string()).unwrap_or_default(),
            lead_count: counts.get(s.name.as_str()).copied().unwrap_or(0),
        })
        .collect();

    // Groups seen on leads but missing from the summaries (the degraded path).
    for lead in annotated {
        if !groups.iter().any(|g| g.name == lead.group_name) {
            groups.push(FinishedGroup {
                name: lead.group_name.clone(),
                description: String::new(),
                pitch: lead.pitch.clone(),
                lead_count: counts.get(lead.group_name.as_str()).copied().unwrap_or(0),
            });
        }
    }
    groups
}

fn open_history(data_dir: &Path) -> Result<Database, AppError> {
    fs::create_dir_all(data_dir)?;
    let path = data_dir.join("history.sqlite");
    Database::new(&path.to_string_lossy())
}

async fn process(data_dir: &Path, mut config: AppConfig, args: ProcessArgs) -> Result<(), AppError> {
    if let Some(key) = args.api_key.filter(|k| !k.trim().is_empty()) {
        config.openrouter_api_key = key;
    }
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(size) = args.batch_size {
        config.batch_size = size as usize;
    }

    let leads = parse_leads(&fs::read_to_string(&args.input)?)?;
    let company_context = load_company_context(args.context.as_deref(), args.context_dir.as_deref())?;
    if company_context.is_empty() {
        warn!("no company context given, pitches will be generic");
    }

    let client = OpenRouterClient::new(config.openrouter_settings())?;
    info!(model = client.model(), leads = leads.len(), "processing leads");
    let mut pipeline = Pipeline::new(Arc::new(client)).with_options(config.pipeline_options());
    if args.score && !config.serper_api_key.trim().is_empty() {
        let timeout = config.request_timeout();
        pipeline = pipeline.with_scoring(
            Arc::new(SerperSearch::new(config.serper_api_key.clone(), timeout)?),
            Arc::new(HttpPageFetcher::new(timeout)?),
        );
    } else if args.score {
        info!("no search key configured, scoring from lead data only");
    }

    let mut request = PipelineRequest::new(leads, company_context).with_relevancy_scoring(args.score);
    request.max_groups = args.max_groups;
    let mode = if args.groups.iter().any(|g| !g.trim().is_empty()) {
        request = request.with_predefined_groups(args.groups);
        db::MODE_PREDEFINED
    } else {
        db::MODE_DYNAMIC
    };

    let source_name = args
        .input
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| args.input.display().to_string());
    let history = open_history(data_dir)?;
    let run = history.create_run(
        &source_name,
        request.leads.len(),
        request.max_groups.unwrap_or(config.max_groups),
        mode,
    )?;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PipelineEvent>();
    let writer = tokio::spawn(async move {
        let mut outcome = StreamOutcome::default();
        while let Some(event) = rx.recv().await {
            match &event {
                PipelineEvent::Progress(ProgressEvent::Completed { groups, .. }) => {
                    outcome.groups = groups.clone();
                }
                PipelineEvent::Progress(ProgressEvent::Degraded { .. }) => outcome.degraded = true,
                _ => {}
            }
            let (kind, data) = stream_message(&event);
            emit(&stream_line(kind, data));
        }
        outcome
    });

    let callbacks = PipelineCallbacks::channel(tx);
    let annotated = pipeline.process_leads(request, &callbacks).await;
    drop(callbacks);
    let outcome = match writer.await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "stream writer stopped early");
            StreamOutcome::default()
        }
    };

    let status = if outcome.degraded {
        db::STATUS_DEGRADED
    } else {
        db::STATUS_COMPLETED
    };
    let groups = finished_groups(&outcome.groups, &annotated);
    if let Err(e) = history.complete_run(&run.id, status, &groups) {
        warn!(run = %run.id, error = %e, "failed to record run");
        history.mark_failed(&run.id)?;
    }

    if let Some(path) = &args.output {
        fs::write(path, serde_json::to_string_pretty(&annotated)?)?;
        info!(path = %path.display(), "annotated leads written");
    }

    let summary: Vec<Value> = groups
        .iter()
        .map(|g| {
            json!({
                "name": g.name,
                "description": g.description,
                "size": g.lead_count,
                "pitch": g.pitch,
            })
        })
        .collect();
    let mut complete = json!({
        "runId": run.id,
        "status": status,
        "leadCount": annotated.len(),
        "groups": summary,
        "output": args.output.as_ref().map(|p| p.display().to_string()),
    });
    if args.output.is_none() {
        complete["leads"] = serde_json::to_value(&annotated)?;
    }
    emit(&stream_line("complete", complete));
    Ok(())
}

// ── config ──

fn show_config(config: &AppConfig) -> Result<(), AppError> {
    let mut shown = config.clone();
    shown.openrouter_api_key = mask_key(&config.openrouter_api_key);
    shown.serper_api_key = mask_key(&config.serper_api_key);
    println!("{}", serde_json::to_string_pretty(&shown)?);
    Ok(())
}

fn apply_settings(config: &mut AppConfig, args: SetArgs) {
    if let Some(key) = args.api_key {
        config.openrouter_api_key = key.trim().to_string();
    }
    if let Some(model) = args.model {
        config.model = model;
    }
    if let Some(key) = args.serper_api_key {
        config.serper_api_key = key.trim().to_string();
    }
    if let Some(max_groups) = args.max_groups {
        config.max_groups = max_groups.max(1);
    }
    if let Some(size) = args.batch_size {
        config.batch_size = size as usize;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
}

fn set_config(data_dir: &Path, mut config: AppConfig, args: SetArgs) -> Result<(), AppError> {
    apply_settings(&mut config, args);
    config::save_config(data_dir, &config)?;
    println!("Saved settings to {}", config::get_config_path(data_dir).display());
    Ok(())
}

// ── history ──

fn history(data_dir: &Path, cmd: HistoryCommand) -> Result<(), AppError> {
    let db = open_history(data_dir)?;
    match cmd {
        HistoryCommand::List => {
            let runs = db.get_runs()?;
            if runs.is_empty() {
                println!("No runs yet");
            }
            for run in runs {
                println!(
                    "{}  {}  {:<9}  {:>5} leads  {:>3} groups  {}",
                    run.id, run.created_at, run.status, run.lead_count, run.group_count, run.source_name
                );
            }
        }
        HistoryCommand::Show { id } => {
            let run = db.get_run(&id)?.ok_or_else(|| AppError::RunNotFound(id.clone()))?;
            let groups = db.get_run_groups(&id)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({ "run": run, "groups": groups }))?
            );
        }
        HistoryCommand::Delete { id } => {
            if !db.delete_run(&id)? {
                return Err(AppError::RunNotFound(id));
            }
            println!("Deleted run {}", id);
        }
    }
    Ok(())
}
