//! Persisted UI settings.
//!
//! The system prompt, question template, and any user-registered custom
//! models live in `mentor-settings.json` next to the binary's working
//! directory. Loaded once at startup; saved whenever an editable field
//! changes.

use anyhow::{Context, Result};
use mentor_core::prompt::{DEFAULT_QUESTION_TEMPLATE, DEFAULT_SYSTEM_PROMPT};
use mentor_shared::ModelRecord;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const SETTINGS_FILE: &str = "mentor-settings.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_question_template")]
    pub question_template: String,
    #[serde(default)]
    pub custom_models: Vec<ModelRecord>,
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_question_template() -> String {
    DEFAULT_QUESTION_TEMPLATE.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            question_template: default_question_template(),
            custom_models: Vec::new(),
        }
    }
}

impl Settings {
    /// Loads settings from `path`, falling back to defaults when the file is
    /// missing or unreadable. A corrupt file is not an error the user can do
    /// anything about at startup; it is logged and replaced on next save.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(settings) => {
                    debug!("loaded settings from {:?}", path);
                    settings
                }
                Err(e) => {
                    warn!("ignoring corrupt settings file {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing settings to {:?}", path))?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from(SETTINGS_FILE)
    }
}
