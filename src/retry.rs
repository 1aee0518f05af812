use crate::error::GenerateError;
use crate::llm::TextGenerator;
use std::time::Duration;
use tracing::warn;

/// Bounded retry for a generation call site.
///
/// An attempt is retried when the call fails or when its output is rejected
/// by the call site's `accept` check. The same prompt is sent every time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Run `prompt` until `accept` passes or attempts run out.
    ///
    /// Returns the last output (accepted or not), or the last error if no
    /// attempt produced output.
    pub async fn generate<F>(
        &self,
        generator: &dyn TextGenerator,
        prompt: &str,
        label: &str,
        accept: F,
    ) -> Result<String, GenerateError>
    where
        F: Fn(&str) -> bool,
    {
        let attempts = self.attempts();
        let mut last: Result<String, GenerateError> = Err(GenerateError::Timeout);

        for attempt in 1..=attempts {
            last = generator.generate(prompt).await;
            let done = match &last {
                Ok(text) => accept(text),
                Err(_) => false,
            };
            if done {
                return last;
            }
            if attempt < attempts {
                match &last {
                    Ok(_) => warn!(call = label, attempt, "output rejected, retrying"),
                    Err(e) => warn!(call = label, attempt, error = %e, "generation failed, retrying"),
                }
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
            }
        }

        last
    }
}
