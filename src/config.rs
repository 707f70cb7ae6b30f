use serde::Deserialize;
use std::path::Path;

/// Per-workspace settings, read from `lms.json` next to the database.
/// Every field has a default so a missing or partial file is fine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Academic year assumed for student rows that omit one.
    pub academic_year: String,
    /// Base URL for the set/reset-password page linked from emails.
    pub reset_link_base: String,
    /// From header on outgoing mail.
    pub mail_from: String,
    /// Institution name shown in mail templates.
    pub college_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            academic_year: "2025-26".to_string(),
            reset_link_base: "http://localhost:5500/reset.html".to_string(),
            mail_from: "College LMS <lms@localhost>".to_string(),
            college_name: "Modern College LMS".to_string(),
        }
    }
}

impl Config {
    /// Load from `<workspace>/lms.json`. Unreadable or invalid files fall
    /// back to defaults rather than blocking workspace selection.
    pub fn load(workspace: &Path) -> Config {
        let path = workspace.join("lms.json");
        let Ok(text) = std::fs::read_to_string(&path) else {
            return Config::default();
        };
        serde_json::from_str(&text).unwrap_or_default()
    }

    pub fn reset_link(&self, token: &str) -> String {
        format!("{}?token={}", self.reset_link_base, token)
    }
}
