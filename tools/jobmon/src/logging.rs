use crate::config::LogConfig;
use crate::errors::MonitorError;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_BUDGET_BYTES: u64 = 8 * 1024 * 1024;

/// Append-only JSONL event log. The terminal belongs to the render actor,
/// so this is the only place a live run reports what it is doing.
#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: 2048,
            budget_bytes: DEFAULT_BUDGET_BYTES,
        }
    }

    pub fn from_config(cfg: &LogConfig) -> Option<Self> {
        let path = cfg.path.as_ref()?;
        let mut logger = Self::new(path);
        logger.max_payload_bytes = cfg.max_payload_bytes;
        logger.budget_bytes = cfg.budget_bytes;
        Some(logger)
    }

    pub fn rotated_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".1");
        PathBuf::from(name)
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), MonitorError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| MonitorError::Io(e.to_string()))?;
            }
        }
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncate_json(event.payload.clone(), self.max_payload_bytes),
        })
        .map_err(|e| MonitorError::Io(e.to_string()))?;

        self.rotate_if_over_budget(line.len() as u64 + 1)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| MonitorError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| MonitorError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| MonitorError::Io(e.to_string()))?;
        Ok(())
    }

    fn rotate_if_over_budget(&self, incoming: u64) -> Result<(), MonitorError> {
        let current = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        if current + incoming <= self.budget_bytes {
            return Ok(());
        }
        fs::rename(&self.path, self.rotated_path()).map_err(|e| MonitorError::Io(e.to_string()))
    }
}

pub fn structured_fallback_line(worker: &str, state: &str, message: &str) -> String {
    format!(
        "worker={worker} state={state} message={}",
        message.replace('\n', "\\n")
    )
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}

#[cfg(test)]
mod tests {
    use super::{structured_fallback_line, JsonlLogger, LogEvent};
    use crate::config::LogConfig;
    use serde_json::json;

    #[test]
    fn logger_truncates_large_payloads_and_writes_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs/run.jsonl");
        let mut logger = JsonlLogger::new(&path);
        logger.max_payload_bytes = 20;

        logger
            .append(&LogEvent {
                level: "info",
                event_type: "task",
                payload: json!({"text": "abcdefghijklmnopqrstuvwxyz"}),
            })
            .expect("append");

        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.contains("\"event_type\":\"task\""));
        assert!(text.contains("..."));
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn logger_rotates_once_budget_is_exceeded() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.jsonl");
        let mut logger = JsonlLogger::new(&path);
        logger.budget_bytes = 120;

        for idx in 0..6 {
            logger
                .append(&LogEvent {
                    level: "info",
                    event_type: "status",
                    payload: json!({ "idx": idx }),
                })
                .expect("append");
        }

        let rotated = std::fs::read_to_string(logger.rotated_path()).expect("rotated");
        let current = std::fs::read_to_string(&path).expect("current");
        assert!(!rotated.is_empty());
        assert!(current.len() as u64 <= logger.budget_bytes);
        assert!(current.contains("\"idx\":5"));
    }

    #[test]
    fn from_config_requires_a_path() {
        assert!(JsonlLogger::from_config(&LogConfig::default()).is_none());
        let cfg = LogConfig {
            path: Some("/tmp/jobmon.jsonl".into()),
            max_payload_bytes: 64,
            budget_bytes: 4096,
        };
        let logger = JsonlLogger::from_config(&cfg).expect("logger");
        assert_eq!(logger.max_payload_bytes, 64);
        assert_eq!(logger.budget_bytes, 4096);
    }

    #[test]
    fn fallback_line_is_deterministic() {
        let line = structured_fallback_line("worker-1", "fault", "hello\nworld");
        assert_eq!(line, "worker=worker-1 state=fault message=hello\\nworld");
    }
}
