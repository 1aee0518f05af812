use crate::error::GenerateError;
use crate::lead::{assign_ids, Lead, LeadRecord};
use crate::llm::TextGenerator;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replays canned replies in order and records every prompt it was sent.
pub(crate) struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<String, GenerateError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub(crate) fn new(replies: Vec<Result<String, GenerateError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn replying(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt log lock").clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.prompts.lock().expect("prompt log lock").len()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
        self.prompts
            .lock()
            .expect("prompt log lock")
            .push(prompt.to_string());
        self.replies
            .lock()
            .expect("reply script lock")
            .pop_front()
            .unwrap_or_else(|| Err(GenerateError::Network("script exhausted".to_string())))
    }
}

/// Leads with ids `"1"`, `"2"`, ... and a company name each.
pub(crate) fn numbered_leads(count: usize) -> Vec<Lead> {
    let records: Vec<LeadRecord> = (1..=count)
        .map(|i| {
            LeadRecord::from([
                ("id".to_string(), i.to_string()),
                ("Company Name".to_string(), format!("Company {i}")),
            ])
        })
        .collect();
    assign_ids(records)
}
