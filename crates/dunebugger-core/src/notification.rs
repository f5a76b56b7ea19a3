//! Severity of transient user-facing notifications.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Level of a notification raised for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    #[default]
    Info,
    Warning,
    Error,
    Success,
}

impl NotificationLevel {
    /// Maps a controller log level to a notification level.
    ///
    /// `warning` and `error` keep their meaning; everything else, including
    /// `success`, is shown as info.
    pub fn from_log_level(level: &str) -> Self {
        match level {
            "warning" => NotificationLevel::Warning,
            "error" => NotificationLevel::Error,
            _ => NotificationLevel::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationLevel::Info => "info",
            NotificationLevel::Warning => "warning",
            NotificationLevel::Error => "error",
            NotificationLevel::Success => "success",
        }
    }
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
