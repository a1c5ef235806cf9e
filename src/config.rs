use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::api::http::HttpSettings;
use crate::error::{MigrateError, Result};
use crate::model::TimeWindow;

/// On-disk shape, keyed the way `config.json` files are written.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
struct RawConfig {
    toggl_key: Option<String>,
    clockify_keys: Option<Vec<String>>,
    clockify_admin: Option<String>,
    start_time: Option<String>,
    end_time: Option<String>,
    workspaces: Option<Vec<String>>,
    fallback_user_mail: Option<String>,
    request_interval_ms: Option<u64>,
    max_retries: Option<u32>,
    parallelism: Option<usize>,
}

/// Validated configuration. Constructing one never touches the network.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub toggl_key: String,
    pub clockify_keys: Vec<String>,
    pub clockify_admin: String,
    pub window: TimeWindow,
    pub workspaces: Option<Vec<String>>,
    pub fallback_email: Option<String>,
    pub http: HttpSettings,
    pub parallelism: usize,
}

fn invalid(message: impl Into<String>) -> MigrateError {
    MigrateError::Config(message.into())
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(MigrateError::ConfigNotFound(path.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Self::parse(path, &raw)
    }

    /// Parse `raw` as YAML when `path` says so, JSON otherwise.
    pub fn parse(path: &Path, raw: &str) -> Result<Self> {
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
        let parsed: RawConfig = if is_yaml {
            serde_yaml::from_str(raw).map_err(|e| {
                invalid(format!("failed to parse '{}': {e}", path.display()))
            })?
        } else {
            serde_json::from_str(raw).map_err(|e| {
                invalid(format!("failed to parse '{}': {e}", path.display()))
            })?
        };
        parsed.validate()
    }
}

impl RawConfig {
    fn validate(self) -> Result<Config> {
        let toggl_key = required(self.toggl_key, "TogglKey")?;
        let clockify_admin = required(self.clockify_admin, "ClockifyAdmin")?;

        let clockify_keys = self
            .clockify_keys
            .filter(|keys| !keys.is_empty())
            .ok_or_else(|| invalid("'ClockifyKeys' must list at least one key"))?;
        if clockify_keys.iter().any(|key| key.trim().is_empty()) {
            return Err(invalid("'ClockifyKeys' contains an empty key"));
        }

        let start = timestamp(&required(self.start_time, "StartTime")?, "StartTime")?;
        let end = match self.end_time.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(timestamp(raw, "EndTime")?),
        };
        if let Some(end) = end
            && end <= start
        {
            return Err(invalid(format!(
                "'EndTime' ({end}) must be later than 'StartTime' ({start})"
            )));
        }

        if let Some(names) = &self.workspaces {
            if names.is_empty() {
                return Err(invalid("'Workspaces' is empty; omit it to migrate every workspace"));
            }
            if names.iter().any(|name| name.is_empty()) {
                return Err(invalid("'Workspaces' contains an empty name"));
            }
        }

        let parallelism = self.parallelism.unwrap_or(1);
        if parallelism == 0 {
            return Err(invalid("'Parallelism' must be at least 1"));
        }

        let defaults = HttpSettings::default();
        Ok(Config {
            toggl_key,
            clockify_keys,
            clockify_admin,
            window: TimeWindow::new(start, end),
            workspaces: self.workspaces,
            fallback_email: self
                .fallback_user_mail
                .map(|mail| mail.trim().to_string())
                .filter(|mail| !mail.is_empty()),
            http: HttpSettings {
                request_interval: self
                    .request_interval_ms
                    .map_or(defaults.request_interval, Duration::from_millis),
                max_retries: self.max_retries.unwrap_or(defaults.max_retries),
                timeout: defaults.timeout,
            },
            parallelism,
        })
    }
}

fn required(value: Option<String>, key: &str) -> Result<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        Some(_) => Err(invalid(format!("'{key}' is empty"))),
        None => Err(invalid(format!("'{key}' is missing"))),
    }
}

fn timestamp(raw: &str, key: &str) -> Result<DateTime<Utc>> {
    parse_timestamp(raw).ok_or_else(|| {
        invalid(format!(
            "'{key}' value '{raw}' is not an ISO 8601 timestamp or date"
        ))
    })
}

/// Accepts RFC 3339, a naive date-time, or a plain date. Values without an
/// offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
