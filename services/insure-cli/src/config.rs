//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The password is loaded from INSURE_PASSWORD or session.password_file,
//! never stored in the TOML directly.

use common::Secret;
use request_pipeline::PipelineConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Backend location plus pipeline tuning
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(flatten)]
    pub pipeline: PipelineConfig,
}

/// Where the session lives and how to sign in
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Relative paths resolve against the config file's directory
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password_file: Option<PathBuf>,
    #[serde(skip)]
    pub password: Option<Secret<String>>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_file: default_token_file(),
            email: None,
            password_file: None,
            password: None,
        }
    }
}

fn default_token_file() -> PathBuf {
    PathBuf::from("session.json")
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Password resolution order:
    /// 1. INSURE_PASSWORD env var
    /// 2. password_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if !config.api.base_url.starts_with("http://")
            && !config.api.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                config.api.base_url
            )));
        }

        if config.api.pipeline.timeout_ms == 0 {
            return Err(common::Error::Config(
                "timeout_ms must be greater than 0".into(),
            ));
        }

        if config.session.token_file.is_relative() {
            if let Some(dir) = path.parent() {
                config.session.token_file = dir.join(&config.session.token_file);
            }
        }

        if let Ok(password) = std::env::var("INSURE_PASSWORD") {
            config.session.password = Some(Secret::new(password));
        } else if let Some(ref password_file) = config.session.password_file {
            let password = std::fs::read_to_string(password_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read password_file {}: {e}",
                    password_file.display()
                ))
            })?;
            let password = password.trim_end_matches(['\r', '\n']).to_owned();
            if !password.is_empty() {
                config.session.password = Some(Secret::new(password));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("insure-client.toml")
    }
}
