//! Configuration for NicWatch
//!
//! A single TOML file holds both the operator settings (what to watch, which
//! address to apply) and the last-known device state the monitor writes back
//! after each successful configuration. A missing file is materialized with
//! defaults chosen for the running OS.

use crate::error::{Error, Result};
use crate::hardware::HostInfo;
use crate::identity::{IdentityMode, WatchSet};
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

const ASIX_AX88772_DESCRIPTION: &str = "ASIX AX88772 USB2.0 to Fast Ethernet Adapter";
const REALTEK_FE_DESCRIPTION: &str = "Realtek USB FE Family Controller";

/// Vendor/product fragments of the supported adapters.
const DEFAULT_HARDWARE_IDS: &[&str] = &[
    "USB\\VID_0B95&PID_772",
    "USB\\VID_0B95&PID_7E2",
    "USB\\VID_0DB0&PID_A877",
    "USB\\VID_0421&PID_772",
    "USB\\VID_125E&PID_180",
    "USB\\VID_0BDA&PID_8152",
    "USB\\VID_0BDA&PID_8050",
    "USB\\VID_0BDA&PID_8153",
];

const DEFAULT_STATIC_IP: &str = "172.16.2.1";
const DEFAULT_SUBNET_MASK: &str = "255.255.255.0";
const DEFAULT_INSTALLER_FILE_NAME: &str = "RTK_NIC_DRIVER_INSTALLER.sfx.exe";

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    pub monitor: MonitorConfig,
    pub network: NetworkConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub installer: InstallerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What to watch for
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// `hardware_id` or `description`; `description` is required on OS major 5
    pub identity_mode: IdentityMode,
    /// Hardware id fragments (hardware_id mode)
    #[serde(default, deserialize_with = "one_or_many")]
    pub hardware_ids: Vec<String>,
    /// Exact device descriptions (description mode)
    #[serde(default, deserialize_with = "one_or_many")]
    pub descriptions: Vec<String>,
    /// Install-completion poll interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Address applied to the adapter once it is ready
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NetworkConfig {
    pub static_ip: String,
    pub subnet_mask: String,
}

/// Last-known device state, written by the monitor
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct StateConfig {
    #[serde(default, alias = "lan_name")]
    pub last_lan_name: String,
    #[serde(default, alias = "device_id")]
    pub last_device_id: String,
    #[serde(default, alias = "interface_index")]
    pub last_interface_index: String,
}

/// Vendor installer and post-install patch locations
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InstallerConfig {
    /// File looked for in the root of each CD-ROM drive
    #[serde(default = "default_installer_file_name")]
    pub installer_file_name: String,
    /// Directory holding Patch32.exe / Patch64.exe; defaults to `RTL_Patch`
    /// beside the executable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_dir: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log output (stderr, stdout, or file path)
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_installer_file_name() -> String {
    DEFAULT_INSTALLER_FILE_NAME.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_output() -> String {
    "stderr".to_string()
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            installer_file_name: default_installer_file_name(),
            patch_dir: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: default_log_output(),
        }
    }
}

// Older files stored the id lists as a single string.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) if s.is_empty() => Vec::new(),
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

impl Config {
    /// First-run configuration for this host.
    ///
    /// Hardware ids are unreliable on OS major 5, so those hosts start in
    /// description mode.
    pub fn defaults_for(host: &HostInfo) -> Self {
        let identity_mode = if host.os_major == 5 {
            IdentityMode::Description
        } else {
            IdentityMode::HardwareId
        };

        Self {
            monitor: MonitorConfig {
                identity_mode,
                hardware_ids: DEFAULT_HARDWARE_IDS.iter().map(|s| s.to_string()).collect(),
                descriptions: vec![
                    ASIX_AX88772_DESCRIPTION.to_string(),
                    REALTEK_FE_DESCRIPTION.to_string(),
                ],
                poll_interval_ms: default_poll_interval_ms(),
            },
            network: NetworkConfig {
                static_ip: DEFAULT_STATIC_IP.to_string(),
                subnet_mask: DEFAULT_SUBNET_MASK.to_string(),
            },
            state: StateConfig::default(),
            installer: InstallerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Parses configuration text. Entries missing from the text are taken
    /// from the first-run defaults for `host`.
    pub fn parse(contents: &str, host: &HostInfo) -> Result<ParsedConfig> {
        let mut raw: toml::Value = toml::from_str(contents)?;
        let legacy = is_legacy_layout(&raw);
        rename_legacy_state_keys(&mut raw);

        let defaults = toml::Value::try_from(Config::defaults_for(host))?;
        let filled_defaults = fill_missing(&mut raw, &defaults);

        let config: Config = raw.try_into()?;
        config.validate()?;
        Ok(ParsedConfig {
            config,
            legacy,
            filled_defaults,
        })
    }

    /// Checks the static address settings and the poll interval.
    pub fn validate(&self) -> Result<()> {
        if self.monitor.poll_interval_ms == 0 {
            return Err(Error::InvalidSetting {
                field: "monitor.poll_interval_ms",
                value: self.monitor.poll_interval_ms.to_string(),
            });
        }

        for (field, value) in [
            ("network.static_ip", &self.network.static_ip),
            ("network.subnet_mask", &self.network.subnet_mask),
        ] {
            if value.parse::<Ipv4Addr>().is_err() {
                return Err(Error::InvalidAddress {
                    field,
                    value: value.clone(),
                });
            }
        }
        Ok(())
    }

    /// Builds the immutable watch set for the configured mode.
    pub fn watch_set(&self) -> WatchSet {
        match self.monitor.identity_mode {
            IdentityMode::HardwareId => {
                WatchSet::new(IdentityMode::HardwareId, self.monitor.hardware_ids.iter().cloned())
            }
            IdentityMode::Description => {
                WatchSet::new(IdentityMode::Description, self.monitor.descriptions.iter().cloned())
            }
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Result of [`Config::parse`].
#[derive(Debug)]
pub struct ParsedConfig {
    pub config: Config,
    /// The text used the legacy layout
    pub legacy: bool,
    /// Some entries were missing and came from the defaults
    pub filled_defaults: bool,
}

impl ParsedConfig {
    /// Whether the file should be rewritten in the current, complete layout.
    pub fn needs_rewrite(&self) -> bool {
        self.legacy || self.filled_defaults
    }
}

const LEGACY_STATE_KEYS: [(&str, &str); 3] = [
    ("lan_name", "last_lan_name"),
    ("device_id", "last_device_id"),
    ("interface_index", "last_interface_index"),
];

fn is_legacy_layout(raw: &toml::Value) -> bool {
    let state_has_old_keys = raw
        .get("state")
        .and_then(|s| s.as_table())
        .map(|t| {
            LEGACY_STATE_KEYS
                .iter()
                .any(|(old, _)| t.contains_key(*old))
        })
        .unwrap_or(false);

    let lists_are_strings = raw
        .get("monitor")
        .and_then(|m| m.as_table())
        .map(|t| {
            ["hardware_ids", "descriptions"]
                .iter()
                .any(|k| t.get(*k).map(|v| v.is_str()).unwrap_or(false))
        })
        .unwrap_or(false);

    state_has_old_keys || lists_are_strings
}

// Old state keys are renamed before defaults are merged in, so an old key and
// its defaulted new name never both reach the deserializer.
fn rename_legacy_state_keys(raw: &mut toml::Value) {
    let Some(state) = raw.get_mut("state").and_then(|s| s.as_table_mut()) else {
        return;
    };
    for (old, new) in LEGACY_STATE_KEYS {
        if let Some(value) = state.remove(old) {
            if !state.contains_key(new) {
                state.insert(new.to_string(), value);
            }
        }
    }
}

/// Copies every key of `defaults` that `target` lacks, recursing into tables.
/// Returns true if anything was copied.
fn fill_missing(target: &mut toml::Value, defaults: &toml::Value) -> bool {
    let (Some(target), Some(defaults)) = (target.as_table_mut(), defaults.as_table()) else {
        return false;
    };

    let mut filled = false;
    for (key, default) in defaults {
        match target.get_mut(key) {
            Some(existing) => filled |= fill_missing(existing, default),
            None => {
                target.insert(key.clone(), default.clone());
                filled = true;
            }
        }
    }
    filled
}

/// Default configuration file location.
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let base = std::env::var_os("ProgramData")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData"));
        base.join("NicWatch").join("nicwatch.toml")
    }
    #[cfg(not(target_os = "windows"))]
    {
        PathBuf::from("/etc/nicwatch.toml")
    }
}

/// Last-known adapter details, recorded together after each configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterRecord<'a> {
    pub lan_name: &'a str,
    pub device_id: &'a str,
    /// None keeps the previously recorded index (legacy hosts have none)
    pub interface_index: Option<&'a str>,
}

impl AdapterRecord<'_> {
    fn apply_to(&self, state: &mut StateConfig) {
        state.last_lan_name = self.lan_name.to_string();
        state.last_device_id = self.device_id.to_string();
        if let Some(index) = self.interface_index {
            state.last_interface_index = index.to_string();
        }
    }
}

/// Persistence of the last-known device state.
pub trait StateStore: Send + Sync {
    fn record_adapter(&self, record: &AdapterRecord<'_>) -> Result<()>;
}

/// Configuration backed by a TOML file. State updates replace the whole file
/// atomically.
pub struct FileConfigStore {
    path: PathBuf,
    config: Mutex<Config>,
}

impl FileConfigStore {
    /// Loads the file, materializing host defaults if it does not exist and
    /// rewriting it if it uses the legacy layout.
    pub fn load_or_create<P: AsRef<Path>>(path: P, host: &HostInfo) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let config = match fs::read_to_string(&path) {
            Ok(contents) => {
                let parsed = Config::parse(&contents, host)?;
                if parsed.legacy {
                    log::info!("Migrating legacy configuration layout in {}", path.display());
                }
                if parsed.filled_defaults {
                    let missing = Error::ConfigurationMissing(path.display().to_string());
                    log::info!("{}; completing it with defaults", missing);
                }
                if parsed.needs_rewrite() {
                    write_config(&path, &parsed.config)?;
                }
                parsed.config
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let missing = Error::ConfigurationMissing(path.display().to_string());
                log::info!("{}; writing defaults", missing);
                let config = Config::defaults_for(host);
                write_config(&path, &config)?;
                config
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            config: Mutex::new(config),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> Config {
        self.config.lock().clone()
    }

}

impl StateStore for FileConfigStore {
    fn record_adapter(&self, record: &AdapterRecord<'_>) -> Result<()> {
        let mut config = self.config.lock();
        let mut updated = config.clone();
        record.apply_to(&mut updated.state);
        write_config(&self.path, &updated)?;
        *config = updated;
        Ok(())
    }
}

/// Writes to a temporary file beside `path` and renames it into place, so an
/// interrupted write never leaves a truncated configuration behind.
fn write_config(path: &Path, config: &Config) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    staged.write_all(config.to_toml()?.as_bytes())?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// In-process state store, used when nothing should touch the disk.
#[derive(Default)]
pub struct MemoryStateStore {
    state: Mutex<StateConfig>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StateConfig {
        self.state.lock().clone()
    }
}

impl StateStore for MemoryStateStore {
    fn record_adapter(&self, record: &AdapterRecord<'_>) -> Result<()> {
        record.apply_to(&mut self.state.lock());
        Ok(())
    }
}
