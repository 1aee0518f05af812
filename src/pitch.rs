use crate::group::Group;
use crate::llm::TextGenerator;
use crate::prompts;
use crate::retry::RetryPolicy;
use tracing::{info, warn};

/// Writes one sales pitch per group.
pub struct PitchWriter<'a> {
    generator: &'a dyn TextGenerator,
    company_context: &'a str,
    retry: RetryPolicy,
}

impl<'a> PitchWriter<'a> {
    pub fn new(generator: &'a dyn TextGenerator, company_context: &'a str, retry: RetryPolicy) -> Self {
        Self {
            generator,
            company_context,
            retry,
        }
    }

    /// Pitch for `group`, trimmed. An empty string means every attempt failed
    /// or came back blank.
    pub async fn write(&self, group: &Group) -> String {
        let prompt = prompts::pitch_prompt(self.company_context, group);
        match self
            .retry
            .generate(self.generator, &prompt, "pitch", |t| !t.trim().is_empty())
            .await
        {
            Ok(text) => {
                let pitch = text.trim().to_string();
                if pitch.is_empty() {
                    warn!(group = %group.name, "pitch came back empty");
                } else {
                    info!(group = %group.name, chars = pitch.len(), "pitch written");
                }
                pitch
            }
            Err(e) => {
                warn!(group = %group.name, error = %e, "pitch generation failed");
                String::new()
            }
        }
    }
}
