use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::generation::RetryPolicy;
use crate::generation::retry::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_JITTER_MS};
use crate::memory::MemoryBackendConfig;
use crate::providers::ProviderConfig;
use crate::session::{SESSION_TIMEOUT_MINUTES, SWEEP_INTERVAL_SECS};
use crate::turn::DEFAULT_CONFIDENCE_THRESHOLD;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<ProviderConfig>,

    #[serde(default)]
    pub memory: MemoryBackendConfig,

    /// Where the store snapshot lives; defaults to `~/.nex/data`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Write snapshots to `data_dir`; when false everything stays in memory
    #[serde(default = "default_true")]
    pub persist: bool,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub generation: GenerationSettings,
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider_config: None,
            memory: MemoryBackendConfig::default(),
            data_dir: None,
            persist: true,
            session: SessionSettings::default(),
            generation: GenerationSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSettings {
    pub inactivity_minutes: u64,
    /// Extra cap on user turns per session; unset means no cap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns_per_session: Option<u32>,
    /// Interval of the idle sweeper; unset disables it
    pub sweep_interval_secs: Option<u64>,
    pub persistence_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            inactivity_minutes: SESSION_TIMEOUT_MINUTES as u64,
            max_turns_per_session: None,
            sweep_interval_secs: Some(SWEEP_INTERVAL_SECS),
            persistence_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationSettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_jitter_ms: u64,
    pub confidence_threshold: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classify_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_model: Option<String>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_jitter_ms: DEFAULT_MAX_JITTER_MS,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            classify_model: None,
            summary_model: None,
        }
    }
}

impl GenerationSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: std::time::Duration::from_millis(self.base_delay_ms),
            max_jitter: std::time::Duration::from_millis(self.max_jitter_ms),
        }
    }
}

/// Loggable view of the configuration, without secrets
#[derive(Debug, Clone, PartialEq)]
pub struct SafeConfigSummary {
    pub provider: Option<&'static str>,
    pub model: Option<String>,
    pub api_key_configured: bool,
    pub memory_backend: &'static str,
    pub persist: bool,
    pub inactivity_minutes: u64,
}

impl Config {
    pub fn get_safe_summary(&self) -> SafeConfigSummary {
        let api_key_configured = match &self.provider_config {
            Some(ProviderConfig::OpenRouter(cfg)) => !cfg.api_key.is_empty(),
            Some(ProviderConfig::OpenAi(cfg)) => !cfg.api_key.is_empty(),
            Some(ProviderConfig::Ollama(_)) | None => false,
        };
        SafeConfigSummary {
            provider: self.provider_config.as_ref().map(|p| p.provider_type()),
            model: self
                .provider_config
                .as_ref()
                .map(|p| p.default_model().to_string()),
            api_key_configured,
            memory_backend: self.memory.backend_type(),
            persist: self.persist,
            inactivity_minutes: self.session.inactivity_minutes,
        }
    }

    /// The snapshot directory, falling back to `~/.nex/data`
    pub fn resolved_data_dir(&self) -> Option<PathBuf> {
        self.data_dir
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".nex").join("data")))
    }
}
