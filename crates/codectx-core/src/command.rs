//! Message-passing boundary between a host and the engine.
//!
//! Commands and responses are JSON objects tagged by `action` and `type`, so a
//! host can drive the engine over any line-oriented transport.

use serde::{Deserialize, Serialize};

use codectx_index::{ProgressEvent, SearchResponse, SessionReport};

use crate::config::MAX_RESULTS_LIMIT;
use crate::error::{CoreError, Result};
use crate::health::HealthReport;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    Start,
    Pause,
    Resume,
    Stop,
    Query {
        text: String,
        /// Falls back to `query.default_max_results`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_results: Option<usize>,
        #[serde(default)]
        include_content: bool,
    },
    Status,
    Health,
}

impl Command {
    /// Decode and validate one JSON command.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidCommand`] for malformed JSON, unknown actions
    /// or arguments that fail [`Command::validate`].
    pub fn parse(line: &str) -> Result<Self> {
        let command: Self = serde_json::from_str(line.trim())
            .map_err(|e| CoreError::InvalidCommand(e.to_string()))?;
        command.validate()?;
        Ok(command)
    }

    /// # Errors
    ///
    /// Rejects blank query text and `max_results` outside `1..=100`.
    pub fn validate(&self) -> Result<()> {
        if let Self::Query {
            text, max_results, ..
        } = self
        {
            if text.trim().is_empty() {
                return Err(CoreError::InvalidCommand("query text must not be empty".into()));
            }
            if let Some(n) = max_results
                && !(1..=MAX_RESULTS_LIMIT).contains(n)
            {
                return Err(CoreError::InvalidCommand(format!(
                    "max_results must be between 1 and {MAX_RESULTS_LIMIT}, got {n}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandResponse {
    Started { session_id: String },
    Paused,
    Resumed,
    Stopped { files_processed: usize },
    Results(SearchResponse),
    Status(SessionReport),
    Health(HealthReport),
    /// Pushed unprompted while a session runs.
    Progress(ProgressEvent),
    Error { message: String },
}

impl CommandResponse {
    pub fn error(err: impl std::fmt::Display) -> Self {
        Self::Error {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lifecycle_commands() {
        assert_eq!(Command::parse(r#"{"action":"start"}"#).unwrap(), Command::Start);
        assert_eq!(Command::parse(r#"{"action":"pause"}"#).unwrap(), Command::Pause);
        assert_eq!(Command::parse(r#" {"action":"resume"} "#).unwrap(), Command::Resume);
        assert_eq!(Command::parse(r#"{"action":"stop"}"#).unwrap(), Command::Stop);
        assert_eq!(Command::parse(r#"{"action":"status"}"#).unwrap(), Command::Status);
        assert_eq!(Command::parse(r#"{"action":"health"}"#).unwrap(), Command::Health);
    }

    #[test]
    fn query_defaults() {
        let cmd = Command::parse(r#"{"action":"query","text":"where is auth handled"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::Query {
                text: "where is auth handled".into(),
                max_results: None,
                include_content: false,
            }
        );
    }

    #[test]
    fn query_with_all_fields() {
        let cmd = Command::parse(
            r#"{"action":"query","text":"retry","max_results":3,"include_content":true}"#,
        )
        .unwrap();
        assert!(matches!(
            cmd,
            Command::Query {
                max_results: Some(3),
                include_content: true,
                ..
            }
        ));
    }

    #[test]
    fn rejects_blank_query() {
        let err = Command::parse(r#"{"action":"query","text":"   "}"#).unwrap_err();
        assert!(matches!(err, CoreError::InvalidCommand(_)));
    }

    #[test]
    fn rejects_max_results_out_of_range() {
        for n in [0, 101, 5000] {
            let line = format!(r#"{{"action":"query","text":"x","max_results":{n}}}"#);
            assert!(Command::parse(&line).is_err(), "max_results {n} accepted");
        }
        for n in [1, 100] {
            let line = format!(r#"{{"action":"query","text":"x","max_results":{n}}}"#);
            assert!(Command::parse(&line).is_ok(), "max_results {n} rejected");
        }
    }

    #[test]
    fn rejects_unknown_action_and_garbage() {
        assert!(Command::parse(r#"{"action":"reindex_everything"}"#).is_err());
        assert!(Command::parse("not json").is_err());
        assert!(Command::parse(r#"{"text":"missing action"}"#).is_err());
    }

    #[test]
    fn responses_are_tagged_by_type() {
        let started = serde_json::to_value(CommandResponse::Started {
            session_id: "abc".into(),
        })
        .unwrap();
        assert_eq!(started, serde_json::json!({"type": "started", "session_id": "abc"}));

        let stopped = serde_json::to_value(CommandResponse::Stopped { files_processed: 4 }).unwrap();
        assert_eq!(stopped["files_processed"], 4);

        let results = serde_json::to_value(CommandResponse::Results(SearchResponse::default())).unwrap();
        assert_eq!(results["type"], "results");
        assert_eq!(results["results"], serde_json::json!([]));

        let err = serde_json::to_value(CommandResponse::error("boom")).unwrap();
        assert_eq!(err, serde_json::json!({"type": "error", "message": "boom"}));
    }
}
