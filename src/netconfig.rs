//! Network configurator: resolves the connection bound to the current device
//! and applies the configured static IPv4 address to it with netsh.

use crate::config::{AdapterRecord, StateStore};
use crate::error::{Error, Result};
use crate::hardware::{HardwareQuery, HostInfo};
use std::fmt;
use std::sync::Arc;

/// How netsh is told which interface to configure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressTarget {
    /// Interface index (post-XP hosts)
    Index(String),
    /// Connection name (legacy hosts)
    Name(String),
}

impl fmt::Display for AddressTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressTarget::Index(index) => write!(f, "{}", index),
            AddressTarget::Name(name) => write!(f, "\"{}\"", name),
        }
    }
}

/// Static address settings for one interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSettings {
    pub static_ip: String,
    pub subnet_mask: String,
    pub target: AddressTarget,
}

impl NetworkSettings {
    /// Arguments for `netsh.exe`, no gateway.
    pub fn netsh_command_line(&self) -> String {
        format!(
            "interface ip set address {} static {} {} none",
            self.target, self.static_ip, self.subnet_mask
        )
    }
}

/// Captured result of the configuration command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs the address-change command synchronously.
pub trait NetworkApplier: Send + Sync {
    fn apply(&self, settings: &NetworkSettings) -> Result<CommandOutput>;
}

/// `NetworkApplier` invoking `netsh.exe`.
pub struct NetshApplier;

#[cfg(target_os = "windows")]
impl NetworkApplier for NetshApplier {
    fn apply(&self, settings: &NetworkSettings) -> Result<CommandOutput> {
        use std::os::windows::process::CommandExt;
        use std::process::Command;

        const CREATE_NO_WINDOW: u32 = 0x0800_0000;

        // raw_arg keeps the quoted connection name exactly as netsh expects it
        let output = Command::new("netsh.exe")
            .raw_arg(settings.netsh_command_line())
            .creation_flags(CREATE_NO_WINDOW)
            .output()
            .map_err(|e| Error::ConfigurationApply(format!("failed to start netsh: {}", e)))?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[cfg(not(target_os = "windows"))]
impl NetworkApplier for NetshApplier {
    fn apply(&self, _settings: &NetworkSettings) -> Result<CommandOutput> {
        Err(Error::Unsupported("netsh is only available on Windows".to_string()))
    }
}

pub struct NetworkConfigurator {
    query: Arc<dyn HardwareQuery>,
    store: Arc<dyn StateStore>,
    applier: Arc<dyn NetworkApplier>,
    host: HostInfo,
    static_ip: String,
    subnet_mask: String,
}

impl NetworkConfigurator {
    pub fn new(
        query: Arc<dyn HardwareQuery>,
        store: Arc<dyn StateStore>,
        applier: Arc<dyn NetworkApplier>,
        host: HostInfo,
        static_ip: impl Into<String>,
        subnet_mask: impl Into<String>,
    ) -> Self {
        Self {
            query,
            store,
            applier,
            host,
            static_ip: static_ip.into(),
            subnet_mask: subnet_mask.into(),
        }
    }

    /// Applies the static address to the connection bound to `device_id`.
    ///
    /// Returns `Ok(None)` when the device has no network connection (yet).
    /// A failed command is an error; nothing is rolled back.
    pub fn configure(&self, device_id: &str) -> Result<Option<NetworkSettings>> {
        let Some(lan_name) = self.query.connection_name(device_id)? else {
            log::info!("No network connection is bound to {} yet", device_id);
            return Ok(None);
        };

        let interface_index = if self.host.is_legacy() {
            None
        } else {
            self.query.interface_index(device_id)?
        };

        let record = AdapterRecord {
            lan_name: &lan_name,
            device_id,
            interface_index: interface_index.as_deref(),
        };
        if let Err(e) = self.store.record_adapter(&record) {
            log::warn!("Could not persist adapter state: {}", e);
        }

        let target = match (self.host.is_legacy(), interface_index) {
            (true, _) => AddressTarget::Name(lan_name.clone()),
            (false, Some(index)) => AddressTarget::Index(index),
            (false, None) => {
                return Err(Error::ConfigurationApply(format!(
                    "no interface index for {:?}",
                    lan_name
                )))
            }
        };

        let settings = NetworkSettings {
            static_ip: self.static_ip.clone(),
            subnet_mask: self.subnet_mask.clone(),
            target,
        };

        log::info!(
            "Setting {} ({}) to {} / {}",
            lan_name,
            settings.target,
            settings.static_ip,
            settings.subnet_mask
        );
        let output = self.applier.apply(&settings)?;
        if !output.stdout.is_empty() {
            log::info!("netsh: {}", output.stdout);
        }
        if !output.stderr.is_empty() {
            log::warn!("netsh: {}", output.stderr);
        }
        if output.exit_code != 0 {
            return Err(Error::ConfigurationApply(format!(
                "netsh exited with code {}",
                output.exit_code
            )));
        }

        Ok(Some(settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryStateStore;
    use crate::hardware::DeviceStatus;
    use parking_lot::Mutex;

    struct Adapter;

    impl HardwareQuery for Adapter {
        fn find_by_hardware_id(&self, _: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn find_by_description(&self, _: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn is_connected(&self, _: &str) -> Result<bool> {
            Ok(true)
        }
        fn status(&self, _: &str) -> Result<DeviceStatus> {
            Ok(DeviceStatus::Ok)
        }
        fn connection_name(&self, device_id: &str) -> Result<Option<String>> {
            Ok((device_id == "NIC").then(|| "Local Area Connection 2".to_string()))
        }
        fn interface_index(&self, device_id: &str) -> Result<Option<String>> {
            Ok((device_id == "NIC").then(|| "11".to_string()))
        }
    }

    #[derive(Default)]
    struct Recorder {
        applied: Mutex<Vec<String>>,
        exit_code: i32,
    }

    impl NetworkApplier for Recorder {
        fn apply(&self, settings: &NetworkSettings) -> Result<CommandOutput> {
            self.applied.lock().push(settings.netsh_command_line());
            Ok(CommandOutput {
                exit_code: self.exit_code,
                stdout: "Ok.".to_string(),
                stderr: String::new(),
            })
        }
    }

    fn configurator(os_major: u32, applier: Arc<Recorder>, store: Arc<MemoryStateStore>) -> NetworkConfigurator {
        NetworkConfigurator::new(
            Arc::new(Adapter),
            store,
            applier,
            HostInfo { os_major, os_minor: 1, is_64bit: true },
            "172.16.2.1",
            "255.255.255.0",
        )
    }

    #[test]
    fn modern_hosts_address_by_index() {
        let applier = Arc::new(Recorder::default());
        let store = Arc::new(MemoryStateStore::new());
        let settings = configurator(6, applier.clone(), store.clone()).configure("NIC").unwrap().unwrap();

        assert_eq!(settings.target, AddressTarget::Index("11".to_string()));
        assert_eq!(
            applier.applied.lock().as_slice(),
            ["interface ip set address 11 static 172.16.2.1 255.255.255.0 none"]
        );
        let state = store.snapshot();
        assert_eq!(state.last_lan_name, "Local Area Connection 2");
        assert_eq!(state.last_device_id, "NIC");
        assert_eq!(state.last_interface_index, "11");
    }

    #[test]
    fn legacy_hosts_address_by_quoted_name() {
        let applier = Arc::new(Recorder::default());
        let store = Arc::new(MemoryStateStore::new());
        let settings = configurator(5, applier.clone(), store.clone()).configure("NIC").unwrap().unwrap();

        assert_eq!(settings.target, AddressTarget::Name("Local Area Connection 2".to_string()));
        assert_eq!(
            applier.applied.lock().as_slice(),
            ["interface ip set address \"Local Area Connection 2\" static 172.16.2.1 255.255.255.0 none"]
        );
        assert_eq!(store.snapshot().last_interface_index, "");
    }

    #[test]
    fn no_connection_means_nothing_applied() {
        let applier = Arc::new(Recorder::default());
        let store = Arc::new(MemoryStateStore::new());
        assert_eq!(configurator(10, applier.clone(), store.clone()).configure("CDROM").unwrap(), None);
        assert!(applier.applied.lock().is_empty());
        assert_eq!(store.snapshot().last_device_id, "");
    }

    #[test]
    fn nonzero_exit_is_an_apply_failure() {
        let applier = Arc::new(Recorder { exit_code: 1, ..Default::default() });
        let store = Arc::new(MemoryStateStore::new());
        let result = configurator(10, applier, store).configure("NIC");
        assert!(matches!(result, Err(Error::ConfigurationApply(_))));
    }
}
