use std::str::FromStr;

use super::Config;

/// Parse `key` into `T`, logging and ignoring values that do not parse.
fn parsed<T: FromStr>(key: &str) -> Option<T> {
    let v = std::env::var(key).ok()?;
    match v.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("ignoring invalid {key} value: {v}");
            None
        }
    }
}

/// Parse a lowercase enum name through its serde representation.
fn parsed_enum<T: serde::de::DeserializeOwned>(key: &str) -> Option<T> {
    let v = std::env::var(key).ok()?;
    match serde_json::from_value(serde_json::Value::String(v.clone())) {
        Ok(kind) => Some(kind),
        Err(_) => {
            tracing::warn!("ignoring invalid {key} value: {v}");
            None
        }
    }
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Some(kind) = parsed_enum("CODECTX_EMBEDDING_PROVIDER") {
            self.embedding.provider = kind;
        }
        if let Ok(v) = std::env::var("CODECTX_EMBEDDING_BASE_URL") {
            self.embedding.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("CODECTX_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(n) = parsed("CODECTX_EMBEDDING_BATCH_SIZE") {
            self.embedding.batch_size = n;
        }
        if let Some(n) = parsed("CODECTX_EMBEDDING_MAX_RETRIES") {
            self.embedding.max_retries = n;
        }
        if let Some(n) = parsed("CODECTX_EMBEDDING_TIMEOUT_SECS") {
            self.embedding.timeout_secs = n;
        }
        if let Ok(v) = std::env::var("CODECTX_CHAT_MODEL") {
            self.chat.model = v;
        }

        if let Some(backend) = parsed_enum("CODECTX_STORE_BACKEND") {
            self.store.backend = backend;
        }
        if let Ok(v) = std::env::var("CODECTX_STORE_URL") {
            self.store.url = v;
        }
        if let Some(distance) = parsed_enum("CODECTX_STORE_DISTANCE") {
            self.store.distance = distance;
        }

        if let Some(n) = parsed("CODECTX_INDEXING_MAX_WORKERS") {
            self.indexing.max_workers = n;
        }
        if let Some(enabled) = parsed("CODECTX_INDEXING_LOW_INTENSITY") {
            self.indexing.low_intensity = enabled;
        }
        if let Some(ms) = parsed("CODECTX_INDEXING_DISPATCH_DELAY_MS") {
            self.indexing.dispatch_delay_ms = ms;
        }
        if let Some(bytes) = parsed("CODECTX_INDEXING_MAX_FILE_BYTES") {
            self.indexing.max_file_bytes = bytes;
        }

        if let Some(enabled) = parsed("CODECTX_WATCH_ENABLED") {
            self.watch.enabled = enabled;
        }
        if let Some(ms) = parsed("CODECTX_WATCH_DEBOUNCE_MS") {
            self.watch.debounce_ms = ms;
        }

        if let Some(n) = parsed("CODECTX_QUERY_MAX_RESULTS") {
            self.query.default_max_results = n;
        }
        if let Some(score) = parsed("CODECTX_QUERY_SCORE_THRESHOLD") {
            self.query.score_threshold = Some(score);
        }
        if let Some(enabled) = parsed("CODECTX_QUERY_EXPAND") {
            self.query.expand = enabled;
        }
        if let Some(enabled) = parsed("CODECTX_QUERY_RERANK") {
            self.query.rerank = enabled;
        }

        if let Ok(v) = std::env::var("CODECTX_OPENAI_API_KEY")
            && !v.is_empty()
        {
            self.secrets.openai_api_key = Some(v);
        }
    }
}
