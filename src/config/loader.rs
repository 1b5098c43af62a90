use crate::config::schema::Config;
use crate::providers::ProviderConfig;
use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

#[cfg(test)]
use std::sync::Mutex;

#[cfg(test)]
static CONFIG_TEST_ENV_LOCK: Mutex<()> = Mutex::new(());

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file contains invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Invalid value for {name}: '{value}'")]
    InvalidEnv { name: &'static str, value: String },
}

/// Builds the configuration: defaults, then the file, then the environment,
/// then CLI flags.
pub fn load_config(cli_model: Option<String>, cli_config_path: Option<PathBuf>) -> Result<Config> {
    tracing::debug!("Loading configuration");

    let mut config = Config::default();

    // Layer 1: config file (~/.nex/config.json)
    let config_file = cli_config_path.clone().or_else(get_default_config_path);

    if let Some(ref path) = config_file {
        if path.exists() {
            tracing::debug!(config_path = %path.display(), "Loading configuration from file");
            config = merge_config_from_file(config, path)?;
        } else {
            tracing::debug!(config_path = %path.display(), "Config file not found, using defaults");
        }
    }

    // Layer 2: environment variables
    config = merge_env_variables(config)?;

    // Layer 3: CLI flags
    if let Some(ref model) = cli_model {
        tracing::debug!(model = %model, "Applying CLI model override");
        if let Some(ref mut provider_config) = config.provider_config {
            provider_config.set_default_model(model.as_str());
        } else {
            tracing::warn!("--model given but no provider is configured, ignoring");
        }
    }

    let summary = config.get_safe_summary();
    tracing::debug!(
        provider = ?summary.provider,
        model = ?summary.model,
        api_key_configured = summary.api_key_configured,
        memory_backend = summary.memory_backend,
        persist = summary.persist,
        inactivity_minutes = summary.inactivity_minutes,
        "Configuration loaded successfully"
    );

    Ok(config)
}

fn get_default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".nex").join("config.json"))
}

fn merge_config_from_file(config: Config, path: &Path) -> Result<Config> {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(config),
        Err(e) => return Err(e).context("Failed to read metadata for config file"),
    };

    #[cfg(unix)]
    {
        let mode = metadata.permissions().mode() & 0o777;
        if mode != 0o600 {
            tracing::error!(
                "Config file {:?} has permissions {:o}, expected 0600 - skipping for security",
                path,
                mode
            );
            return Ok(config);
        }
    }
    #[cfg(not(unix))]
    let _ = metadata;

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let file_config: Config = serde_json::from_str(&content).map_err(ConfigError::InvalidJson)?;
    Ok(file_config)
}

fn merge_env_variables(mut config: Config) -> Result<Config> {
    // Empty strings are ignored so an exported-but-blank key does not win
    let env = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

    let env_provider = if let Some(key) = env("OPENAI_API_KEY") {
        Some(ProviderConfig::openai(key))
    } else if let Some(key) = env("OPENROUTER_API_KEY").or_else(|| env("NEX_API_KEY")) {
        Some(ProviderConfig::openrouter(key))
    } else {
        None
    };

    if let Some(provider) = env_provider {
        tracing::debug!(provider = provider.provider_type(), "Provider taken from environment");
        config.provider_config = Some(provider);
    }

    if let Some(host) = env("OLLAMA_HOST") {
        match config.provider_config {
            Some(ProviderConfig::Ollama(ref mut cfg)) => cfg.base_url = host,
            None => {
                let mut cfg = crate::providers::OllamaConfig::new();
                cfg.base_url = host;
                config.provider_config = Some(ProviderConfig::Ollama(cfg));
            }
            Some(_) => tracing::debug!("OLLAMA_HOST ignored, a hosted provider is configured"),
        }
    }

    if let Some(dir) = env("NEX_DATA_DIR") {
        config.data_dir = Some(PathBuf::from(dir));
    }

    if let Some(value) = env("NEX_INACTIVITY_MINUTES") {
        let minutes = value
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|m| *m > 0)
            .ok_or(ConfigError::InvalidEnv {
                name: "NEX_INACTIVITY_MINUTES",
                value,
            })?;
        config.session.inactivity_minutes = minutes;
    }

    Ok(config)
}

pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }

    let json = serde_json::to_string_pretty(config)?;

    let mut file = fs::File::create(path)
        .with_context(|| format!("Failed to create config file: {:?}", path))?;

    file.write_all(json.as_bytes())
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    // Owner read/write only
    #[cfg(unix)]
    {
        let mut permissions = file.metadata()?.permissions();
        permissions.set_mode(0o600);
        fs::set_permissions(path, permissions)
            .with_context(|| format!("Failed to set permissions on config file: {:?}", path))?;
    }

    tracing::info!("Configuration saved to {:?}", path);
    Ok(())
}

pub fn get_config_path() -> Option<PathBuf> {
    get_default_config_path()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackendConfig;
    use std::env;
    use tempfile::TempDir;

    const ENV_VARS: &[&str] = &[
        "OPENAI_API_KEY",
        "OPENROUTER_API_KEY",
        "NEX_API_KEY",
        "OLLAMA_HOST",
        "NEX_DATA_DIR",
        "NEX_INACTIVITY_MINUTES",
    ];

    fn clear_env() {
        for name in ENV_VARS {
            unsafe {
                env::remove_var(name);
            }
        }
    }

    fn setup() -> TempDir {
        TempDir::new().unwrap()
    }

    #[test]
    fn test_load_config_defaults() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();
        let temp_dir = setup();
        let nonexistent_path = temp_dir.path().join("nonexistent_config.json");

        let config = load_config(None, Some(nonexistent_path)).unwrap();
        assert!(config.provider_config.is_none());
        assert_eq!(config.session.inactivity_minutes, 20);
    }

    #[test]
    fn test_load_config_from_file() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();
        let temp_dir = setup();
        let config_path = temp_dir.path().join("config.json");

        let file_config = Config {
            provider_config: Some(ProviderConfig::openrouter("file-api-key")),
            memory: MemoryBackendConfig::Volatile,
            ..Config::default()
        };
        save_config(&file_config, &config_path).unwrap();

        let loaded = load_config(None, Some(config_path)).unwrap();
        assert_eq!(loaded, file_config);
    }

    #[test]
    fn test_load_config_invalid_json() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();
        let temp_dir = setup();
        let config_path = temp_dir.path().join("config.json");

        fs::write(&config_path, "not valid json").unwrap();
        let mut perms = fs::metadata(&config_path).unwrap().permissions();
        perms.set_mode(0o600);
        fs::set_permissions(&config_path, perms).unwrap();

        let err = load_config(None, Some(config_path)).unwrap_err();
        assert!(err.to_string().contains("invalid JSON"));
    }

    #[test]
    fn test_loose_permissions_are_skipped() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();
        let temp_dir = setup();
        let config_path = temp_dir.path().join("config.json");

        let file_config = Config {
            provider_config: Some(ProviderConfig::openai("file-key")),
            ..Config::default()
        };
        save_config(&file_config, &config_path).unwrap();
        let mut perms = fs::metadata(&config_path).unwrap().permissions();
        perms.set_mode(0o644);
        fs::set_permissions(&config_path, perms).unwrap();

        let config = load_config(None, Some(config_path)).unwrap();
        assert!(config.provider_config.is_none());
    }

    #[test]
    fn test_env_variable_override() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();
        let temp_dir = setup();
        let config_path = temp_dir.path().join("config.json");

        let file_config = Config {
            provider_config: Some(ProviderConfig::openai("file-key")),
            ..Config::default()
        };
        save_config(&file_config, &config_path).unwrap();

        unsafe {
            env::set_var("OPENROUTER_API_KEY", "env-api-key");
            env::set_var("NEX_DATA_DIR", "/tmp/nex-data");
            env::set_var("NEX_INACTIVITY_MINUTES", "45");
        }

        let config = load_config(None, Some(config_path)).unwrap();
        assert_eq!(
            config.provider_config.as_ref().map(|p| p.provider_type()),
            Some("openrouter")
        );
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/nex-data")));
        assert_eq!(config.session.inactivity_minutes, 45);

        clear_env();
    }

    #[test]
    fn test_invalid_inactivity_env_is_an_error() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("NEX_INACTIVITY_MINUTES", "soon");
        }
        let temp_dir = setup();
        let result = load_config(None, Some(temp_dir.path().join("none.json")));
        assert!(result.is_err());
        clear_env();
    }

    #[test]
    fn test_ollama_host_env() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();
        unsafe {
            env::set_var("OLLAMA_HOST", "http://gpu-box:11434");
        }
        let temp_dir = setup();
        let config = load_config(None, Some(temp_dir.path().join("none.json"))).unwrap();
        match config.provider_config {
            Some(ProviderConfig::Ollama(cfg)) => assert_eq!(cfg.base_url, "http://gpu-box:11434"),
            other => panic!("expected ollama, got {:?}", other),
        }
        clear_env();
    }

    #[test]
    fn test_cli_flag_override() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        clear_env();
        let temp_dir = setup();
        let config_path = temp_dir.path().join("config.json");

        let file_config = Config {
            provider_config: Some(ProviderConfig::openai("file-key")),
            ..Config::default()
        };
        save_config(&file_config, &config_path).unwrap();

        let config = load_config(Some("cli-model".to_string()), Some(config_path)).unwrap();
        assert_eq!(config.provider_config.unwrap().default_model(), "cli-model");
    }

    #[test]
    fn test_save_config_permissions() {
        let _lock = CONFIG_TEST_ENV_LOCK.lock().unwrap();
        let temp_dir = setup();
        let config_path = temp_dir.path().join("nested").join("config.json");

        save_config(&Config::default(), &config_path).unwrap();

        let mode = fs::metadata(&config_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "Config file should have 0600 permissions");
    }

    #[test]
    fn test_get_config_path() {
        let path = get_config_path().unwrap();
        assert!(path.to_string_lossy().contains(".nex"));
        assert!(path.to_string_lossy().ends_with("config.json"));
    }
}
