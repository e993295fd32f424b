//! Configuration file handling.
//!
//! The file is JSON. Every field has a default, so a partial file (or no
//! file at all when settings come from the command line) is fine. Durations
//! are written as strings such as `"500ms"`, `"30s"` or `"2m"`.

use crate::dispatch::{RetryPolicy, TransportOptions};
use crate::error::{Result, StpError};
use crate::hotkey::{build_bindings, HotkeyOptions, HotkeyStrategy};
use crate::payload::parse_extra_config;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;
use std::time::Duration;

/// File name looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Main configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api_endpoint: String,

    #[serde(default)]
    pub token: String,

    /// Omitted from the request when empty.
    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub temperature: f64,

    /// Omitted from the request when zero.
    #[serde(default)]
    pub max_tokens: u32,

    /// Where the generated text lives in the response body.
    #[serde(default = "default_text_path")]
    pub text_path: String,

    /// JSON object string merged into every request.
    #[serde(default)]
    pub extra_config: String,

    #[serde(
        default = "default_request_timeout",
        with = "duration_format"
    )]
    pub request_timeout: Duration,

    /// Total attempts per request, including the first one.
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,

    #[serde(
        default = "default_retry_base_delay",
        with = "duration_format"
    )]
    pub retry_base_delay: Duration,

    #[serde(default = "default_true")]
    pub enable_http2: bool,

    #[serde(default = "default_true")]
    pub verify_ssl: bool,

    #[serde(
        default = "default_clipboard_timeout",
        with = "duration_format"
    )]
    pub clipboard_timeout: Duration,

    /// Paste a short placeholder when a request fails or comes back empty.
    #[serde(default)]
    pub request_failed_notification: bool,

    /// Cancels the running task and clears the queue. Empty disables it.
    #[serde(default)]
    pub stop_task_hotkey: String,

    /// Use the low-level keyboard hook instead of hotkey registration.
    #[serde(default)]
    pub hotkey_hook: bool,

    #[serde(default)]
    pub debug: bool,

    #[serde(default = "default_tasks")]
    pub tasks: Vec<TaskEntry>,
}

/// One prompt/hotkey pair as written in the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEntry {
    #[serde(default)]
    pub prompt: String,

    #[serde(default)]
    pub hotkey: String,

    /// JSON object string merged over the global extra config for this task.
    #[serde(default)]
    pub extra_config: String,
}

/// A task with its 1-based position in the `tasks` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    pub id: usize,
    pub prompt: String,
    pub hotkey: String,
    pub extra_config: String,
}

impl TaskDefinition {
    /// Only tasks with both a prompt and a hotkey get registered.
    pub fn is_eligible(&self) -> bool {
        !self.prompt.trim().is_empty() && !self.hotkey.trim().is_empty()
    }
}

/// What [`Config::load_or_create`] found.
#[derive(Debug)]
pub enum ConfigSource {
    /// Read from this file.
    File { config: Config, path: String },
    /// No file, but command line overrides were given.
    Defaults(Config),
    /// No file and nothing else to go on: a default file was written.
    Created { path: String },
}

fn default_text_path() -> String {
    "choices[0].message.content".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retry() -> u32 {
    3
}

fn default_retry_base_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_clipboard_timeout() -> Duration {
    Duration::from_millis(1000)
}

fn default_true() -> bool {
    true
}

fn default_tasks() -> Vec<TaskEntry> {
    (1..=10)
        .map(|n| TaskEntry {
            hotkey: if n <= 8 {
                format!("ctrl+f{n}")
            } else {
                String::new()
            },
            ..TaskEntry::default()
        })
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_endpoint: String::new(),
            token: String::new(),
            model: String::new(),
            temperature: 0.0,
            max_tokens: 0,
            text_path: default_text_path(),
            extra_config: String::new(),
            request_timeout: default_request_timeout(),
            max_retry: default_max_retry(),
            retry_base_delay: default_retry_base_delay(),
            enable_http2: true,
            verify_ssl: true,
            clipboard_timeout: default_clipboard_timeout(),
            request_failed_notification: false,
            stop_task_hotkey: String::new(),
            hotkey_hook: false,
            debug: false,
            tasks: default_tasks(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StpError::config_load(path, e.to_string()))?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| StpError::config_load(path, e.to_string()))?;

        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| StpError::config_save(path, e.to_string()))?;

        std::fs::write(path, content).map_err(|e| StpError::config_save(path, e.to_string()))?;

        Ok(())
    }

    /// Resolves where settings come from.
    ///
    /// An explicit path must exist. Otherwise [`DEFAULT_CONFIG_FILE`] is read
    /// when present; when it is missing, defaults are used if the command
    /// line carries overrides, and a default file is written if it doesn't.
    pub fn load_or_create(explicit: Option<&str>, has_overrides: bool) -> Result<ConfigSource> {
        Self::load_or_create_at(explicit, DEFAULT_CONFIG_FILE, has_overrides)
    }

    /// [`load_or_create`](Self::load_or_create) with a custom default location.
    pub fn load_or_create_at(
        explicit: Option<&str>,
        default_path: &str,
        has_overrides: bool,
    ) -> Result<ConfigSource> {
        if let Some(path) = explicit {
            let config = Self::from_file(path)?;
            return Ok(ConfigSource::File {
                config,
                path: path.to_string(),
            });
        }

        if Path::new(default_path).exists() {
            let config = Self::from_file(default_path)?;
            return Ok(ConfigSource::File {
                config,
                path: default_path.to_string(),
            });
        }

        if has_overrides {
            return Ok(ConfigSource::Defaults(Self::default()));
        }

        Self::default().save_to_file(default_path)?;
        tracing::info!(path = default_path, "wrote default configuration");
        Ok(ConfigSource::Created {
            path: default_path.to_string(),
        })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_retry == 0 {
            return Err(StpError::config_validation(
                "max_retry must be at least 1",
            ));
        }

        if !self.temperature.is_finite() {
            return Err(StpError::config_validation("temperature must be a number"));
        }

        parse_extra_config(&self.extra_config)
            .map_err(|e| StpError::config_validation(format!("extra_config: {e}")))?;

        build_bindings(&self.eligible_hotkeys(), &self.stop_task_hotkey)?;

        Ok(())
    }

    /// Every task entry with its 1-based id, eligible or not.
    pub fn task_definitions(&self) -> Vec<TaskDefinition> {
        self.tasks
            .iter()
            .enumerate()
            .map(|(index, entry)| TaskDefinition {
                id: index + 1,
                prompt: entry.prompt.clone(),
                hotkey: entry.hotkey.clone(),
                extra_config: entry.extra_config.clone(),
            })
            .collect()
    }

    /// `(task id, hotkey)` for tasks that should be registered.
    pub fn eligible_hotkeys(&self) -> Vec<(usize, String)> {
        self.task_definitions()
            .into_iter()
            .filter(TaskDefinition::is_eligible)
            .map(|task| (task.id, task.hotkey))
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retry, self.retry_base_delay)
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            timeout: self.request_timeout,
            enable_http2: self.enable_http2,
            verify_ssl: self.verify_ssl,
        }
    }

    pub fn hotkey_options(&self) -> HotkeyOptions {
        HotkeyOptions {
            strategy: if self.hotkey_hook {
                HotkeyStrategy::Hook
            } else {
                HotkeyStrategy::Register
            },
            task_hotkeys: self.eligible_hotkeys(),
            stop_hotkey: self.stop_task_hotkey.clone(),
        }
    }
}

/// Parse a duration string like `"500ms"`, `"2s"`, `"1m"` or `"1000"`
/// (milliseconds).
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();

    if s.is_empty() {
        return Err(StpError::invalid_duration(s, "empty duration string"));
    }

    let (number, unit_ms) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, 1)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1_000)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60_000)
    } else {
        (s.as_str(), 1)
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| StpError::invalid_duration(&s, "expected a non-negative whole number with an optional ms/s/m unit"))?;

    let millis = value
        .checked_mul(unit_ms)
        .ok_or_else(|| StpError::invalid_duration(&s, "duration too large"))?;

    Ok(Duration::from_millis(millis))
}

/// Inverse of [`parse_duration`], picking the largest unit that is exact.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis > 0 && millis % 60_000 == 0 {
        format!("{}m", millis / 60_000)
    } else if millis > 0 && millis % 1_000 == 0 {
        format!("{}s", millis / 1_000)
    } else {
        format!("{millis}ms")
    }
}

mod duration_format {
    use super::*;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
