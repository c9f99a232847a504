use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;

use crate::diagnostics::redact;
use crate::diff::diff_json;

/// How responses are written to the wire log.
pub enum MessageLogMode {
    /// Every response body in full.
    Full,
    /// First response per path in full, then only the changed JSON paths.
    Diffed,
}

pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous: HashMap<String, Value>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            mode,
            file,
            previous: HashMap::new(),
        })
    }

    pub fn log_request(&mut self, method: &str, path: &str, body: Option<&Value>) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "method": method,
            "path": path,
            "body": body.map(redact),
        });
        self.write_line(&entry);
    }

    pub fn log_response(&mut self, path: &str, status: u16, body: &Value) {
        let body = redact(body);
        match self.mode {
            MessageLogMode::Full => {
                let entry = json!({
                    "ts": Utc::now().to_rfc3339(),
                    "dir": "resp",
                    "path": path,
                    "status": status,
                    "body": body,
                });
                self.write_line(&entry);
            }
            MessageLogMode::Diffed => {
                let entry = match self.previous.get(path) {
                    None => json!({
                        "ts": Utc::now().to_rfc3339(),
                        "dir": "resp",
                        "path": path,
                        "status": status,
                        "full": true,
                        "body": body,
                    }),
                    Some(prev) => {
                        let mut changes = Vec::new();
                        diff_json(prev, &body, "", &mut changes);
                        let change_entries: Vec<Value> = changes
                            .iter()
                            .map(|(path, old, new)| json!({ "path": path, "old": old, "new": new }))
                            .collect();
                        json!({
                            "ts": Utc::now().to_rfc3339(),
                            "dir": "resp",
                            "path": path,
                            "status": status,
                            "changes": change_entries,
                        })
                    }
                };
                self.write_line(&entry);
                self.previous.insert(path.to_string(), body);
            }
        }
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn read_lines(path: &str) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn request_body_password_is_redacted() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        logger.log_request("POST", "/login", Some(&json!({"username": "me", "password": "hunter2"})));

        let lines = read_lines(path);
        assert_eq!(lines[0]["dir"], "req");
        assert_eq!(lines[0]["method"], "POST");
        assert_eq!(lines[0]["body"]["username"], "me");
        assert_ne!(lines[0]["body"]["password"], "hunter2");
        assert!(lines[0]["ts"].as_str().is_some());
    }

    #[test]
    fn diffed_mode_logs_full_first_then_changes() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Diffed, path).unwrap();

        logger.log_response("/dumstate/SN1", 200, &json!({"res": "OK", "status": {"VP": "10"}}));
        logger.log_response("/dumstate/SN2", 200, &json!({"res": "OK", "status": {"VP": "3"}}));
        logger.log_response("/dumstate/SN1", 200, &json!({"res": "OK", "status": {"VP": "12"}}));

        let lines = read_lines(path);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["full"], true);
        assert_eq!(lines[1]["full"], true, "first response of another path is logged in full");
        let changes = lines[2]["changes"].as_array().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0]["path"], "status.VP");
        assert_eq!(changes[0]["new"], "12");
    }

    #[test]
    fn diffed_mode_no_changes_logs_empty_array() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Diffed, path).unwrap();

        let body = json!({"res": "OK"});
        logger.log_response("/x", 200, &body);
        logger.log_response("/x", 200, &body);

        let lines = read_lines(path);
        assert_eq!(lines[1]["changes"].as_array().unwrap().len(), 0);
    }
}
