#![allow(dead_code)]

use async_trait::async_trait;
use lead_pitcher::{GenerateError, LeadRecord, PipelineCallbacks, ProgressEvent, TextGenerator};
use regex::Regex;
use std::sync::{Arc, Mutex};

/// Which pipeline call a prompt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Describe,
    ClassifyExisting,
    ClassifyDynamic,
    Balance,
    Reconcile,
    Pitch,
    Score,
    Unknown,
}

pub fn prompt_kind(prompt: &str) -> PromptKind {
    if prompt.contains("generate meaningful descriptions") {
        PromptKind::Describe
    } else if prompt.contains("Classify these leads into the existing groups") {
        PromptKind::ClassifyExisting
    } else if prompt.contains("Analyze these leads and classify them") {
        PromptKind::ClassifyDynamic
    } else if prompt.contains("reorganize them into exactly") {
        PromptKind::Balance
    } else if prompt.contains("You MUST classify these leads") {
        PromptKind::Reconcile
    } else if prompt.contains("world-class B2B sales copywriter") {
        PromptKind::Pitch
    } else if prompt.contains("Rate how relevant") {
        PromptKind::Score
    } else {
        PromptKind::Unknown
    }
}

type Responder = dyn Fn(PromptKind, &str) -> Result<String, GenerateError> + Send + Sync;

/// Answers each prompt through a closure keyed on the prompt kind, and keeps
/// a log of what was asked.
pub struct PromptRouter {
    respond: Box<Responder>,
    log: Mutex<Vec<(PromptKind, String)>>,
}

impl PromptRouter {
    pub fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(PromptKind, &str) -> Result<String, GenerateError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            respond: Box::new(respond),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn calls_of(&self, kind: PromptKind) -> Vec<String> {
        self.log
            .lock()
            .expect("prompt log lock")
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl TextGenerator for PromptRouter {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        let kind = prompt_kind(prompt);
        self.log
            .lock()
            .expect("prompt log lock")
            .push((kind, prompt.to_string()));
        (self.respond)(kind, prompt)
    }
}

/// Lead ids serialized into a prompt, in order.
pub fn lead_ids_in(prompt: &str) -> Vec<String> {
    let re = Regex::new(r#""id": "([^"]+)""#).expect("lead id pattern should compile");
    re.captures_iter(prompt).map(|c| c[1].to_string()).collect()
}

/// Group names from a roster rendered with member counts.
pub fn roster_names_in(prompt: &str) -> Vec<String> {
    let re = Regex::new(r"(?m)^(.+?) \(\d+ leads\): ").expect("roster pattern should compile");
    re.captures_iter(prompt).map(|c| c[1].to_string()).collect()
}

pub fn assignments_json(pairs: &[(String, String)]) -> String {
    let items: Vec<serde_json::Value> = pairs
        .iter()
        .map(|(id, group)| serde_json::json!({"leadId": id, "groupName": group, "groupDescription": format!("{group} buyers")}))
        .collect();
    serde_json::Value::Array(items).to_string()
}

pub fn records(count: usize) -> Vec<LeadRecord> {
    (1..=count)
        .map(|i| {
            LeadRecord::from([
                ("id".to_string(), i.to_string()),
                ("Company Name".to_string(), format!("Company {i}")),
                ("Industry".to_string(), if i % 2 == 0 { "Retail" } else { "Software" }.to_string()),
            ])
        })
        .collect()
}

/// Callbacks that record every progress event, lead and group notification.
pub struct Recorded {
    pub progress: Arc<Mutex<Vec<ProgressEvent>>>,
    pub leads: Arc<Mutex<Vec<(String, String)>>>,
    pub groups: Arc<Mutex<Vec<String>>>,
}

pub fn recording_callbacks() -> (PipelineCallbacks, Recorded) {
    let recorded = Recorded {
        progress: Arc::new(Mutex::new(Vec::new())),
        leads: Arc::new(Mutex::new(Vec::new())),
        groups: Arc::new(Mutex::new(Vec::new())),
    };
    let progress = recorded.progress.clone();
    let leads = recorded.leads.clone();
    let groups = recorded.groups.clone();
    let callbacks = PipelineCallbacks::new()
        .on_progress(move |e| {
            progress.lock().expect("progress lock").push(e.clone());
            Ok(())
        })
        .on_lead(move |l| {
            leads
                .lock()
                .expect("lead lock")
                .push((l.lead.id.clone(), l.group_name.clone()));
            Ok(())
        })
        .on_group(move |g| {
            groups.lock().expect("group lock").push(g.name.clone());
            Ok(())
        });
    (callbacks, recorded)
}
