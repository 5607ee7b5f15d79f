//! Append-only JSONL log of asked questions and completed hints.

use anyhow::Result;
use chrono::{DateTime, Local};
use mentor_shared::UsageStats;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Local>,
    #[serde(flatten)]
    pub kind: EntryKind,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EntryKind {
    Question {
        system_prompt: String,
        question: String,
        model: String,
    },
    Hint {
        text: String,
        usage: Option<UsageStats>,
    },
    Failure {
        detail: String,
    },
    Stopped,
}

pub struct HistoryLogger {
    log_file: Option<PathBuf>,
}

impl HistoryLogger {
    pub fn new() -> Result<Self> {
        let log_dir = PathBuf::from("hint_logs");
        if !log_dir.exists() {
            fs::create_dir_all(&log_dir)?;
        }

        let started = Local::now();
        let filename = format!("hints_{}.jsonl", started.format("%Y%m%d_%H%M%S"));
        let log_file = log_dir.join(filename);
        debug!("logging hint history to {:?}", log_file);

        Ok(Self {
            log_file: Some(log_file),
        })
    }

    /// A logger that drops everything, used when the log directory cannot be
    /// created.
    pub fn disabled() -> Self {
        Self { log_file: None }
    }

    pub fn log(&self, kind: EntryKind) -> Result<()> {
        if let Some(ref log_file) = self.log_file {
            let entry = HistoryEntry {
                timestamp: Local::now(),
                kind,
            };
            let json = serde_json::to_string(&entry)?;

            use std::io::Write;
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file)?;
            writeln!(file, "{}", json)?;
        }
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

impl Default for HistoryLogger {
    fn default() -> Self {
        Self::new().unwrap_or_else(|e| {
            error!("failed to create hint history logger: {}", e);
            Self::disabled()
        })
    }
}
