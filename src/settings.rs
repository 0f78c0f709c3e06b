//! # Settings Module
//! This module defines the daemon settings and loads them from a JSON (or TOML) file.
//!
//! | Field | Required | Default |
//! |-------|----------|---------|
//! | `sentinelPath` | Yes | - |
//! | `telegramBotToken` | Yes | - |
//! | `telegramChatId` | Yes | - |
//! | `emailTo` / `emailFrom` | Yes | - |
//! | `msmtpAccount` | No | `idlepig` |
//! | `alertMinIntervalSeconds` | No | 60 |
//! | `startupSuppressSeconds` | No | 90 |
//! | `signatureMode` | No | `event-class` |
//! | `logFile` | No | stderr |
//! | `telegramApiBase` | No | `https://api.telegram.org` |
//! | `mailCommand` | No | `msmtp` |

use crate::error::ConfigError;
use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MSMTP_ACCOUNT: &str = "idlepig";
pub const DEFAULT_MIN_INTERVAL_SECS: i64 = 60;
pub const DEFAULT_STARTUP_SUPPRESS_SECS: i64 = 90;
pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
pub const DEFAULT_MAIL_COMMAND: &str = "msmtp";

/// How alert signatures are computed for rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureMode {
    /// Each distinct event mask is rate limited on its own.
    #[default]
    EventClass,
    /// All events share one signature.
    Collapsed,
}

/// File format of a configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// `.toml` files are TOML, everything else is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Json,
        }
    }
}

/// The configuration file exactly as written by the operator.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawSettings {
    sentinel_path: Option<String>,
    telegram_bot_token: Option<String>,
    telegram_chat_id: Option<i64>,
    email_to: Option<String>,
    email_from: Option<String>,
    msmtp_account: Option<String>,
    alert_min_interval_seconds: Option<i64>,
    startup_suppress_seconds: Option<i64>,
    signature_mode: Option<SignatureMode>,
    log_file: Option<PathBuf>,
    telegram_api_base: Option<String>,
    mail_command: Option<String>,
}

/// Validated settings consumed by the rest of the daemon.
#[derive(Debug, Clone)]
pub struct Settings {
    pub sentinel_path: PathBuf,
    pub telegram_bot_token: String,
    pub telegram_chat_id: i64,
    pub email_to: String,
    pub email_from: String,
    pub msmtp_account: String,
    pub alert_min_interval: Duration,
    pub startup_suppress: Duration,
    pub signature_mode: SignatureMode,
    pub log_file: Option<PathBuf>,
    pub telegram_api_base: String,
    pub mail_command: String,
}

impl Settings {
    /// Loads settings from `explicit` or, when `None`, from the first readable
    /// default location.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, contents) = match explicit {
            Some(path) => {
                let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                (path.to_path_buf(), contents)
            }
            None => read_first(&default_locations()?)?,
        };
        Self::parse(&contents, ConfigFormat::from_path(&path))
    }

    /// Parses and validates configuration text.
    pub fn parse(contents: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let raw: RawSettings = match format {
            ConfigFormat::Json => {
                serde_json::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            ConfigFormat::Toml => {
                toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
        };
        Self::validate(raw)
    }

    fn validate(raw: RawSettings) -> Result<Self, ConfigError> {
        let sentinel_path = PathBuf::from(required(raw.sentinel_path, "sentinelPath")?);
        if !sentinel_path.is_absolute() {
            return Err(ConfigError::Invalid {
                key: "sentinelPath",
                message: format!("expected an absolute path, got '{}'", sentinel_path.display()),
            });
        }
        let telegram_bot_token = required(raw.telegram_bot_token, "telegramBotToken")?;
        let telegram_chat_id = match raw.telegram_chat_id {
            Some(id) if id != 0 => id,
            _ => return Err(ConfigError::Missing("telegramChatId")),
        };
        let email_to = required(raw.email_to, "emailTo")?;
        let email_from = required(raw.email_from, "emailFrom")?;

        let msmtp_account = non_empty(raw.msmtp_account)
            .unwrap_or_else(|| DEFAULT_MSMTP_ACCOUNT.to_string());

        let min_interval = match raw.alert_min_interval_seconds {
            Some(secs) if secs > 0 => secs,
            _ => DEFAULT_MIN_INTERVAL_SECS,
        };
        let startup_suppress = raw
            .startup_suppress_seconds
            .unwrap_or(DEFAULT_STARTUP_SUPPRESS_SECS)
            .max(0);

        Ok(Settings {
            sentinel_path,
            telegram_bot_token,
            telegram_chat_id,
            email_to,
            email_from,
            msmtp_account,
            alert_min_interval: Duration::from_secs(min_interval as u64),
            startup_suppress: Duration::from_secs(startup_suppress as u64),
            signature_mode: raw.signature_mode.unwrap_or_default(),
            log_file: raw.log_file,
            telegram_api_base: non_empty(raw.telegram_api_base)
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API_BASE.to_string()),
            mail_command: non_empty(raw.mail_command)
                .unwrap_or_else(|| DEFAULT_MAIL_COMMAND.to_string()),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn required(value: Option<String>, key: &'static str) -> Result<String, ConfigError> {
    non_empty(value).ok_or(ConfigError::Missing(key))
}

/// Default configuration locations, in lookup order. The last entry is the
/// legacy location used before the rename.
pub fn default_locations() -> Result<Vec<PathBuf>, ConfigError> {
    let base_dirs = BaseDirs::new().ok_or(ConfigError::NoHomeDirectory)?;
    let config_root = base_dirs.home_dir().join(".config");
    Ok(vec![
        config_root.join("hawkdog").join("config.json"),
        config_root.join("hawkdog").join("config.toml"),
        config_root.join("sentinel-watch").join("config.json"),
    ])
}

fn read_first(candidates: &[PathBuf]) -> Result<(PathBuf, String), ConfigError> {
    for path in candidates {
        match fs::read_to_string(path) {
            Ok(contents) => return Ok((path.clone(), contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.clone(),
                    source,
                });
            }
        }
    }
    Err(ConfigError::NotFound {
        tried: candidates.to_vec(),
    })
}
