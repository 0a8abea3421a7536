use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};
use crate::executor::router::BackendKind;
use crate::executor::safety;

const CONFIG_FILE: &str = "config.toml";
const API_KEY_ENV: &str = "DROIDPILOT_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub decision: DecisionConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub perception: PerceptionConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
}

/// Remote decision model endpoint and sampling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Falls back to env var DROIDPILOT_API_KEY when absent.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub stream: bool,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            model: default_model(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            stream: false,
        }
    }
}

fn default_api_base() -> String {
    "https://api.siliconflow.cn/v1/chat/completions".into()
}

fn default_model() -> String {
    "Qwen/Qwen2.5-VL-7B-Instruct".into()
}

fn default_temperature() -> f64 {
    0.3
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_adb_path")]
    pub adb_path: String,
    /// Targets a specific device when several are attached.
    #[serde(default)]
    pub device_serial: Option<String>,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            adb_path: default_adb_path(),
            device_serial: None,
            command_timeout_secs: default_command_timeout(),
        }
    }
}

fn default_adb_path() -> String {
    "adb".into()
}

fn default_command_timeout() -> u64 {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptionConfig {
    #[serde(default = "default_max_image_kb")]
    pub max_image_kb: usize,
    /// Caps for the textual screen digest.
    #[serde(default = "default_digest_text_lines")]
    pub max_text_lines: usize,
    #[serde(default = "default_digest_clickable")]
    pub max_clickable_elements: usize,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            max_image_kb: default_max_image_kb(),
            max_text_lines: default_digest_text_lines(),
            max_clickable_elements: default_digest_clickable(),
        }
    }
}

fn default_max_image_kb() -> usize {
    500
}

fn default_digest_text_lines() -> usize {
    20
}

fn default_digest_clickable() -> usize {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptConfig {
    #[serde(default = "default_prompt_elements")]
    pub max_elements: usize,
    #[serde(default = "default_prompt_text_lines")]
    pub max_text_lines: usize,
    #[serde(default = "default_prompt_history")]
    pub max_history: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_elements: default_prompt_elements(),
            max_text_lines: default_prompt_text_lines(),
            max_history: default_prompt_history(),
        }
    }
}

fn default_prompt_elements() -> usize {
    20
}

fn default_prompt_text_lines() -> usize {
    15
}

fn default_prompt_history() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Consecutive failed attempts of one step before the task fails.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_stuck_window")]
    pub stuck_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            stuck_window: default_stuck_window(),
        }
    }
}

fn default_max_steps() -> u32 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_stuck_window() -> usize {
    5
}

/// Rule tables for the safety gate. Defaults are the built-in tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_payment_apps")]
    pub payment_apps: Vec<String>,
    #[serde(default = "default_payment_keywords")]
    pub payment_keywords: Vec<String>,
    #[serde(default = "default_sensitive_keywords")]
    pub sensitive_keywords: Vec<String>,
    #[serde(default = "default_confirmation_keywords")]
    pub confirmation_keywords: Vec<String>,
    /// Stop the run after executing on a screen flagged Yellow.
    #[serde(default = "default_true")]
    pub halt_on_caution: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            payment_apps: default_payment_apps(),
            payment_keywords: default_payment_keywords(),
            sensitive_keywords: default_sensitive_keywords(),
            confirmation_keywords: default_confirmation_keywords(),
            halt_on_caution: true,
        }
    }
}

fn to_owned_list(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_payment_apps() -> Vec<String> {
    to_owned_list(safety::PAYMENT_APPS)
}

fn default_payment_keywords() -> Vec<String> {
    to_owned_list(safety::PAYMENT_KEYWORDS)
}

fn default_sensitive_keywords() -> Vec<String> {
    to_owned_list(safety::SENSITIVE_KEYWORDS)
}

fn default_confirmation_keywords() -> Vec<String> {
    to_owned_list(safety::CONFIRMATION_KEYWORDS)
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// API key from the environment wins over the file.
    pub fn resolved_api_key(&self) -> String {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.decision.api_key.clone())
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

fn resolve_config_path() -> PilotResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join(CONFIG_FILE);
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join(CONFIG_FILE);
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("droidpilot").join(CONFIG_FILE);
        if candidate.exists() {
            tracing::debug!(path = %candidate.display(), "config found in user config dir");
            return Ok(candidate);
        }
    }

    Err(PilotError::Config(
        "config.toml not found next to executable, in working directory or user config dir"
            .into(),
    ))
}

pub fn load_config() -> PilotResult<AppConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> PilotResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(
        path = %path.display(),
        backend = ?config.control.backend,
        model = %config.decision.model,
        "config loaded"
    );
    Ok(config)
}

/// Writes back to the resolved config file, or creates one in the working directory.
pub fn save_config(config: &AppConfig) -> PilotResult<()> {
    let path = match resolve_config_path() {
        Ok(p) => p,
        Err(_) => std::env::current_dir()?.join(CONFIG_FILE),
    };
    save_config_to(config, &path)
}

pub fn save_config_to(config: &AppConfig, path: &Path) -> PilotResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}
