//! Layered configuration.
//!
//! Sources, lowest precedence first:
//! - Built-in defaults
//! - Legacy environment variables (`PORT`, `LOG_LEVEL`, `POLL_INTERVAL`,
//!   `FOLDERS`)
//! - YAML file from `--config` or `CONFIG_FILE`
//! - `OWNKEEPER_` environment variables
//!
//! # Environment Variables
//!
//! Prefixed variables use double underscores to separate nested levels and
//! snake case for camelCase keys:
//! - `OWNKEEPER_POLL_INTERVAL=5m` sets `pollInterval`
//! - `OWNKEEPER_LOGGING__MODULES__WATCHER=debug` sets `logging.modules.watcher`
//!
//! `FOLDERS` keeps the original deployment format, a comma separated list of
//! `/path:uid:gid:mode` entries (or an inline YAML list of folder maps).
//!
//! # Example
//!
//! ```yaml
//! pollInterval: 1m
//! folders:
//!   - path: /data/media
//!     uid: 1000
//!     gid: 1000
//!     folderMode: "0775"
//!     fileMode: "0664"
//!     exclude: [".*", "*.part"]
//! ```

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Yaml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::layout::TrashGuidesConfig;
use crate::watcher::{PollStrategy, WatchSpec};

/// Prefix of structured environment overrides.
pub const ENV_PREFIX: &str = "OWNKEEPER_";

/// Environment variable naming the YAML file when `--config` is absent.
pub const CONFIG_FILE_ENV: &str = "CONFIG_FILE";

const LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];
const MAX_ID: u32 = 65535;
const MAX_MODE: u32 = 0o777;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("no folders configured")]
    NoFolders,

    #[error("port must be between 1 and 65535, got {0}")]
    InvalidPort(u16),

    #[error("invalid log level {0:?}, must be one of: debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("pollInterval must be 0s (disabled) or at least 1s, got {0:?}")]
    InvalidPollInterval(Duration),

    #[error("folder {index} ({path}): {reason}")]
    InvalidFolder {
        index: usize,
        path: String,
        reason: String,
    },

    #[error("invalid FOLDERS entry {index} ({entry:?}): {reason}")]
    LegacyFolder {
        index: usize,
        entry: String,
        reason: String,
    },

    #[error("invalid mode {value:?}: {reason}")]
    InvalidMode { value: String, reason: String },

    #[error("{0}")]
    Layout(String),

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::Load(Box::new(e))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Port of the health endpoint
    #[serde(default = "default_port")]
    pub port: u16,

    /// Default log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Period of the full-tree pass, `0s` disables polling
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    #[serde(default)]
    pub poll_strategy: PollStrategy,

    /// How long shutdown waits for workers
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub folders: Vec<FolderConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trash_guides: Option<TrashGuidesConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Per-module level overrides, e.g. `watcher = "debug"`
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

/// Policy for one monitored directory as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderConfig {
    pub path: PathBuf,
    pub uid: u32,
    pub gid: u32,

    /// Shared mode for files and folders
    #[serde(default, with = "octal_mode", skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,

    #[serde(default, with = "octal_mode", skip_serializing_if = "Option::is_none")]
    pub folder_mode: Option<u32>,

    #[serde(default, with = "octal_mode", skip_serializing_if = "Option::is_none")]
    pub file_mode: Option<u32>,

    #[serde(default = "default_true")]
    pub recursive: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
}

fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_shutdown_grace() -> Duration {
    Duration::from_secs(5)
}
fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: default_port(),
            log_level: default_log_level(),
            poll_interval: default_poll_interval(),
            poll_strategy: PollStrategy::default(),
            shutdown_grace: default_shutdown_grace(),
            logging: LoggingConfig::default(),
            folders: Vec::new(),
            trash_guides: None,
        }
    }
}

impl FolderConfig {
    /// Recursive folder with no modes and no patterns.
    pub fn new(path: impl Into<PathBuf>, uid: u32, gid: u32) -> Self {
        Self {
            path: path.into(),
            uid,
            gid,
            mode: None,
            folder_mode: None,
            file_mode: None,
            recursive: true,
            exclude: Vec::new(),
            include: Vec::new(),
        }
    }

    /// Effective `(file, dir)` modes.
    ///
    /// An explicit `fileMode`/`folderMode` wins over `mode`. A kind left
    /// unset falls back to `mode`, then to the other kind's explicit value.
    pub fn resolved_modes(&self) -> Option<(u32, u32)> {
        let file = self.file_mode.or(self.mode).or(self.folder_mode)?;
        let dir = self.folder_mode.or(self.mode).or(self.file_mode)?;
        Some((file, dir))
    }

    fn validate(&self) -> Result<(), String> {
        if self.path.as_os_str().is_empty() {
            return Err("path cannot be empty".into());
        }
        if !self.path.is_absolute() {
            return Err(format!("path must be absolute, got {:?}", self.path));
        }
        if self.uid > MAX_ID {
            return Err(format!("uid must be between 0 and {MAX_ID}, got {}", self.uid));
        }
        if self.gid > MAX_ID {
            return Err(format!("gid must be between 0 and {MAX_ID}, got {}", self.gid));
        }
        for (name, mode) in [
            ("mode", self.mode),
            ("folderMode", self.folder_mode),
            ("fileMode", self.file_mode),
        ] {
            if let Some(mode) = mode.filter(|m| *m > MAX_MODE) {
                return Err(format!("{name} must be between 0 and 0777, got {mode:o}"));
            }
        }
        if self.resolved_modes().is_none() {
            return Err("at least one of mode, folderMode, or fileMode must be specified".into());
        }
        Ok(())
    }

    /// Convert into the policy consumed by the watcher.
    pub fn to_watch_spec(&self) -> Option<WatchSpec> {
        let (file_mode, dir_mode) = self.resolved_modes()?;
        Some(
            WatchSpec::new(self.path.clone(), self.uid, self.gid, file_mode, dir_mode)
                .with_recursive(self.recursive)
                .with_exclude(self.exclude.iter().cloned())
                .with_include(self.include.iter().cloned()),
        )
    }
}

impl Settings {
    /// Load, expand and validate configuration.
    ///
    /// `config_path` takes precedence over `CONFIG_FILE`. A missing file is
    /// an error only when one was named explicitly.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = config_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from));

        if let Some(missing) = file.as_ref().filter(|f| !f.is_file()) {
            return Err(ConfigError::Load(Box::new(figment::Error::from(format!(
                "config file {} not found",
                missing.display()
            )))));
        }

        let mut settings: Settings = Self::figment(file.as_deref())?.extract()?;
        settings.expand_layout()?;
        settings.validate()?;
        Ok(settings)
    }

    /// The layered figment, without layout expansion or validation.
    pub fn figment(file: Option<&Path>) -> Result<Figment, ConfigError> {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(legacy_env());

        let legacy_folders = std::env::var("FOLDERS")
            .ok()
            .filter(|value| !value.trim().is_empty());
        if let Some(value) = legacy_folders {
            figment = figment.merge(Serialized::default("folders", parse_legacy_folders(&value)?));
        }

        if let Some(file) = file {
            figment = figment.merge(Yaml::file(file));
        }

        Ok(figment.merge(
            Env::prefixed(ENV_PREFIX)
                .map(|key| camel_key(key.as_str()).into())
                .lowercase(false),
        ))
    }

    /// Create the layout profile directories, if the profile is active.
    ///
    /// Loading only generates the folder policies; commands that enforce
    /// call this before they start.
    pub fn create_layout(&self) -> Result<(), ConfigError> {
        if let Some(profile) = &self.trash_guides {
            profile.create_dirs()?;
        }
        Ok(())
    }

    /// Generate the layout profile folders, if active, and append them.
    pub fn expand_layout(&mut self) -> Result<(), ConfigError> {
        if let Some(profile) = &self.trash_guides {
            let generated = profile.expand()?;
            self.folders.extend(generated);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.log_level.clone()));
        }
        if !self.poll_interval.is_zero() && self.poll_interval < Duration::from_secs(1) {
            return Err(ConfigError::InvalidPollInterval(self.poll_interval));
        }
        if self.folders.is_empty() {
            return Err(ConfigError::NoFolders);
        }
        for (index, folder) in self.folders.iter().enumerate() {
            folder
                .validate()
                .map_err(|reason| ConfigError::InvalidFolder {
                    index,
                    path: folder.path.display().to_string(),
                    reason,
                })?;
        }
        Ok(())
    }

    /// Watch specs for every folder, in configuration order.
    pub fn watch_specs(&self) -> Vec<WatchSpec> {
        self.folders
            .iter()
            .filter_map(FolderConfig::to_watch_spec)
            .collect()
    }
}

/// `PORT`, `LOG_LEVEL` and `POLL_INTERVAL` from the original deployment.
fn legacy_env() -> Env {
    Env::raw()
        .only(&["PORT", "LOG_LEVEL", "POLL_INTERVAL"])
        .map(|key| camel_key(key.as_str()).into())
        .lowercase(false)
}

/// `POLL_INTERVAL` -> `pollInterval`, `LOGGING__MODULES__WATCHER` ->
/// `logging.modules.watcher`.
fn camel_key(key: &str) -> String {
    key.split("__")
        .map(|segment| {
            let mut out = String::with_capacity(segment.len());
            let mut upper = false;
            for c in segment.chars() {
                if c == '_' {
                    upper = !out.is_empty();
                } else if upper {
                    out.push(c.to_ascii_uppercase());
                    upper = false;
                } else {
                    out.push(c.to_ascii_lowercase());
                }
            }
            out
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Parse the `FOLDERS` variable.
pub fn parse_legacy_folders(value: &str) -> Result<Vec<FolderConfig>, ConfigError> {
    if value.contains('{') {
        let inline = format!("folders: {value}");
        return Ok(Figment::from(Yaml::string(&inline)).extract_inner("folders")?);
    }

    let mut folders = Vec::new();
    for (index, entry) in value.split(',').enumerate() {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let folder = parse_legacy_entry(entry).map_err(|reason| ConfigError::LegacyFolder {
            index,
            entry: entry.to_string(),
            reason,
        })?;
        folders.push(folder);
    }

    if folders.is_empty() {
        return Err(ConfigError::NoFolders);
    }
    Ok(folders)
}

fn parse_legacy_entry(entry: &str) -> Result<FolderConfig, String> {
    let parts: Vec<&str> = entry.split(':').collect();
    let &[path, uid, gid, mode] = parts.as_slice() else {
        return Err(format!(
            "expected format: /path:uid:gid:mode, got {} parts",
            parts.len()
        ));
    };

    if path.is_empty() {
        return Err("path cannot be empty".into());
    }
    let uid = uid
        .parse::<u32>()
        .map_err(|e| format!("invalid uid {uid:?}: {e}"))?;
    let gid = gid
        .parse::<u32>()
        .map_err(|e| format!("invalid gid {gid:?}: {e}"))?;
    let mode = parse_mode(mode).map_err(|e| e.to_string())?;

    let folder = FolderConfig {
        mode: Some(mode),
        ..FolderConfig::new(path, uid, gid)
    };
    folder.validate()?;
    Ok(folder)
}

/// Parse an octal mode: `"0755"`, `"755"` or `"0o755"`.
pub fn parse_mode(value: &str) -> Result<u32, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidMode {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let digits = value.trim();
    let digits = digits.strip_prefix("0o").unwrap_or(digits);
    if digits.is_empty() {
        return Err(invalid("empty"));
    }

    let mode = u32::from_str_radix(digits, 8).map_err(|_| invalid("not an octal number"))?;
    if mode > MAX_MODE {
        return Err(invalid("must be between 0 and 0777"));
    }
    Ok(mode)
}

/// Serde adapter for optional octal modes.
///
/// Accepts octal strings (`"0755"`, `"755"`, `"0o755"`) and integers. An
/// integer's decimal digits are read as octal so that YAML `mode: 0755` and
/// `mode: 755` both mean `0o755`. The `0o` prefix is only understood inside
/// a string: an unquoted `0o755` reaches us as the integer 493, which cannot
/// be told apart from a literal 493. Serializes as a four-digit octal string.
pub mod octal_mode {
    use std::fmt;

    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(mode: &Option<u32>, serializer: S) -> Result<S::Ok, S::Error> {
        match mode {
            Some(mode) => serializer.serialize_str(&format!("{mode:04o}")),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
        deserializer.deserialize_any(ModeVisitor)
    }

    struct ModeVisitor;

    impl<'de> Visitor<'de> for ModeVisitor {
        type Value = Option<u32>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an octal permission mode such as \"0755\" or 755")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            super::parse_mode(v).map(Some).map_err(E::custom)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            let digits = v.to_string();
            if digits.contains(['8', '9']) {
                return Err(E::custom(format!(
                    "invalid mode {v}: digits are read as octal, quote 0o-prefixed modes (\"0o{v:o}\")"
                )));
            }
            self.visit_str(&digits)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            if v < 0 {
                return Err(E::custom(format!("invalid mode {v}: must not be negative")));
            }
            self.visit_str(&v.to_string())
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
            deserializer.deserialize_any(self)
        }
    }
}
