use crate::error::AppError;
use crate::llm::{OpenRouterSettings, OPENROUTER_URL};
use crate::pipeline::PipelineOptions;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub openrouter_api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_groups")]
    pub max_groups: usize,
    #[serde(default = "default_pitch_attempts")]
    pub pitch_attempts: u32,
    #[serde(default = "default_classify_attempts")]
    pub classify_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub serper_api_key: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4-5".to_string()
}

fn default_base_url() -> String {
    OPENROUTER_URL.to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_batch_size() -> usize {
    50
}

fn default_max_groups() -> usize {
    10
}

fn default_pitch_attempts() -> u32 {
    2
}

fn default_classify_attempts() -> u32 {
    1
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openrouter_api_key: String::new(),
            model: default_model(),
            base_url: default_base_url(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            batch_size: default_batch_size(),
            max_groups: default_max_groups(),
            pitch_attempts: default_pitch_attempts(),
            classify_attempts: default_classify_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            serper_api_key: String::new(),
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn openrouter_settings(&self) -> OpenRouterSettings {
        OpenRouterSettings {
            api_key: self.openrouter_api_key.clone(),
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout: self.request_timeout(),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        let delay = Duration::from_millis(self.retry_delay_ms);
        PipelineOptions {
            batch_size: self.batch_size,
            default_max_groups: self.max_groups,
            classify_retry: RetryPolicy::new(self.classify_attempts, delay),
            pitch_retry: RetryPolicy::new(self.pitch_attempts, delay),
        }
    }
}

/// `abcd...wxyz` for long keys, `****` for short ones, empty when unset.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else if !chars.is_empty() {
        "****".to_string()
    } else {
        String::new()
    }
}

pub fn get_config_path(app_data_dir: &Path) -> PathBuf {
    app_data_dir.join("config.json")
}

pub fn load_config(app_data_dir: &Path) -> AppConfig {
    let path = get_config_path(app_data_dir);
    match fs::read_to_string(&path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
        Err(_) => AppConfig::default(),
    }
}

pub fn save_config(app_data_dir: &Path, config: &AppConfig) -> Result<(), AppError> {
    let path = get_config_path(app_data_dir);
    fs::create_dir_all(app_data_dir)?;
    let content = serde_json::to_string_pretty(config)?;
    fs::write(&path, content)?;
    Ok(())
}
