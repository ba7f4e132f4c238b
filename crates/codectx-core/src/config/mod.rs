mod env;
mod types;


pub use types::*;

use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

/// Used when neither `--config` nor `CODECTX_CONFIG` names a file.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Upper bound on results a single query may ask for.
pub const MAX_RESULTS_LIMIT: usize = 100;

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Self>(&content)?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(CoreError::Config(msg.to_owned()));

        if self.embedding.batch_size == 0 {
            return invalid("embedding.batch_size must be greater than 0");
        }
        if self.embedding.timeout_secs == 0 {
            return invalid("embedding.timeout_secs must be greater than 0");
        }
        if self.embedding.model.trim().is_empty() {
            return invalid("embedding.model must not be empty");
        }
        match self.embedding.provider {
            ProviderKind::OpenAi if self.secrets.openai_api_key.is_none() => {
                return invalid("embedding.provider = \"openai\" requires CODECTX_OPENAI_API_KEY");
            }
            ProviderKind::Compatible if self.embedding.base_url.is_none() => {
                return invalid("embedding.provider = \"compatible\" requires embedding.base_url");
            }
            _ => {}
        }
        if self.store.backend == StoreBackend::Qdrant && self.store.url.trim().is_empty() {
            return invalid("store.url must not be empty for the qdrant backend");
        }
        if self.indexing.max_chunk_chars == 0 {
            return invalid("indexing.max_chunk_chars must be greater than 0");
        }
        if self.indexing.max_file_bytes == 0 {
            return invalid("indexing.max_file_bytes must be greater than 0");
        }
        if self.watch.debounce_ms == 0 {
            return invalid("watch.debounce_ms must be greater than 0");
        }
        if self.query.overfetch_factor == 0 {
            return invalid("query.overfetch_factor must be greater than 0");
        }
        if !(1..=MAX_RESULTS_LIMIT).contains(&self.query.default_max_results) {
            return invalid("query.default_max_results must be between 1 and 100");
        }
        if self.query.snippet_max_chars == 0 {
            return invalid("query.snippet_max_chars must be greater than 0");
        }
        if self.query.score_threshold.is_some_and(|t| !t.is_finite()) {
            return invalid("query.score_threshold must be a finite number");
        }
        Ok(())
    }
}

/// Pick the config file: explicit path, then `CODECTX_CONFIG`, then the default.
#[must_use]
pub fn resolve_config_path(cli_arg: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_owned();
    }
    if let Ok(path) = std::env::var("CODECTX_CONFIG")
        && !path.is_empty()
    {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}
