//! Typed key-value preferences persisted next to the history.

use std::fmt;
use std::sync::Arc;

use rusqlite::OptionalExtension;
use serde::Serialize;
use tracing::debug;

use emoscan_core::error::EmoscanError;

use crate::db::Database;

/// Known preference keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PreferenceKey {
    FirstLaunch,
    HasUnreadNotifications,
    AutoSave,
    VideoDurationSecs,
    UserName,
    UserEmail,
}

impl PreferenceKey {
    pub const ALL: [PreferenceKey; 6] = [
        PreferenceKey::FirstLaunch,
        PreferenceKey::HasUnreadNotifications,
        PreferenceKey::AutoSave,
        PreferenceKey::VideoDurationSecs,
        PreferenceKey::UserName,
        PreferenceKey::UserEmail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PreferenceKey::FirstLaunch => "first_launch",
            PreferenceKey::HasUnreadNotifications => "has_unread_notifications",
            PreferenceKey::AutoSave => "auto_save",
            PreferenceKey::VideoDurationSecs => "video_duration_secs",
            PreferenceKey::UserName => "user_name",
            PreferenceKey::UserEmail => "user_email",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == key.trim())
    }

    /// Value returned when nothing is stored. `None` means "unset".
    pub fn default_value(&self) -> Option<PreferenceValue> {
        match self {
            PreferenceKey::FirstLaunch => Some(PreferenceValue::Bool(true)),
            PreferenceKey::HasUnreadNotifications => Some(PreferenceValue::Bool(false)),
            PreferenceKey::AutoSave => Some(PreferenceValue::Bool(true)),
            PreferenceKey::VideoDurationSecs => Some(PreferenceValue::Int(10)),
            PreferenceKey::UserName | PreferenceKey::UserEmail => None,
        }
    }

    /// Parse user-supplied text into the value type this key holds.
    pub fn parse_value(&self, raw: &str) -> Result<PreferenceValue, EmoscanError> {
        let raw = raw.trim();
        let invalid = |expected: &str| {
            EmoscanError::InvalidInput(format!(
                "{} expects {}, got '{}'",
                self.as_str(),
                expected,
                raw
            ))
        };
        match self {
            PreferenceKey::FirstLaunch
            | PreferenceKey::HasUnreadNotifications
            | PreferenceKey::AutoSave => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(PreferenceValue::Bool(true)),
                "false" | "0" | "no" | "off" => Ok(PreferenceValue::Bool(false)),
                _ => Err(invalid("a boolean")),
            },
            PreferenceKey::VideoDurationSecs => raw
                .parse::<i64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(PreferenceValue::Int)
                .ok_or_else(|| invalid("a positive number of seconds")),
            PreferenceKey::UserName | PreferenceKey::UserEmail => {
                Ok(PreferenceValue::Text(raw.to_string()))
            }
        }
    }
}

impl fmt::Display for PreferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PreferenceValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl PreferenceValue {
    fn encode(&self) -> String {
        self.to_string()
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PreferenceValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PreferenceValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PreferenceValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PreferenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreferenceValue::Bool(b) => write!(f, "{}", b),
            PreferenceValue::Int(n) => write!(f, "{}", n),
            PreferenceValue::Text(s) => f.write_str(s),
        }
    }
}

/// Preference store backed by the `preferences` table.
pub struct PreferenceStore {
    db: Arc<Database>,
}

impl PreferenceStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Stored value, or the key's default.
    pub fn get(&self, key: PreferenceKey) -> Result<Option<PreferenceValue>, EmoscanError> {
        match self.get_raw(key)? {
            // A stored value that no longer parses falls back to the default.
            Some(raw) => Ok(key.parse_value(&raw).ok().or_else(|| key.default_value())),
            None => Ok(key.default_value()),
        }
    }

    pub fn set(&self, key: PreferenceKey, value: &PreferenceValue) -> Result<(), EmoscanError> {
        // Round-trip through the key's parser so a mismatched type is rejected.
        let value = key.parse_value(&value.encode())?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO preferences (key, value, updated_at)
                 VALUES (?1, ?2, strftime('%s', 'now'))
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                     updated_at = excluded.updated_at",
                rusqlite::params![key.as_str(), value.encode()],
            )
            .map_err(|e| EmoscanError::Storage(format!("Failed to save preference: {}", e)))?;
            Ok(())
        })?;
        debug!(key = key.as_str(), "Preference saved");
        Ok(())
    }

    /// Parse `raw` for the key and store it.
    pub fn set_from_str(&self, key: PreferenceKey, raw: &str) -> Result<PreferenceValue, EmoscanError> {
        let value = key.parse_value(raw)?;
        self.set(key, &value)?;
        Ok(value)
    }

    /// Remove one stored value; the default applies again.
    pub fn remove(&self, key: PreferenceKey) -> Result<(), EmoscanError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM preferences WHERE key = ?1",
                rusqlite::params![key.as_str()],
            )
            .map_err(|e| EmoscanError::Storage(e.to_string()))?;
            Ok(())
        })
    }

    /// Remove every stored value.
    pub fn clear(&self) -> Result<(), EmoscanError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM preferences", [])
                .map_err(|e| EmoscanError::Storage(format!("Failed to clear preferences: {}", e)))?;
            Ok(())
        })
    }

    pub fn first_launch(&self) -> Result<bool, EmoscanError> {
        self.get_bool(PreferenceKey::FirstLaunch)
    }

    pub fn has_unread_notifications(&self) -> Result<bool, EmoscanError> {
        self.get_bool(PreferenceKey::HasUnreadNotifications)
    }

    pub fn auto_save(&self) -> Result<bool, EmoscanError> {
        self.get_bool(PreferenceKey::AutoSave)
    }

    pub fn video_duration_secs(&self) -> Result<i64, EmoscanError> {
        Ok(self
            .get(PreferenceKey::VideoDurationSecs)?
            .and_then(|v| v.as_int())
            .unwrap_or(10))
    }

    pub fn user_name(&self) -> Result<Option<String>, EmoscanError> {
        self.get_text(PreferenceKey::UserName)
    }

    pub fn user_email(&self) -> Result<Option<String>, EmoscanError> {
        self.get_text(PreferenceKey::UserEmail)
    }

    fn get_bool(&self, key: PreferenceKey) -> Result<bool, EmoscanError> {
        Ok(self.get(key)?.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    fn get_text(&self, key: PreferenceKey) -> Result<Option<String>, EmoscanError> {
        Ok(self.get(key)?.and_then(|v| v.as_text().map(str::to_string)))
    }

    fn get_raw(&self, key: PreferenceKey) -> Result<Option<String>, EmoscanError> {
        self.db.with_reader(|conn| {
            conn.query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                rusqlite::params![key.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| EmoscanError::Storage(e.to_string()))
        })
    }
}
