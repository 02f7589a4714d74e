//! NicWatch - USB network adapter hot-plug monitor
//!
//! Watches for supported USB Ethernet adapters, installs vendor drivers when an
//! adapter shows up in its CD-ROM mode, waits for the driver stack to settle
//! and then assigns a static IPv4 address to the adapter's connection.

pub mod config;
pub mod daemon;
pub mod error;
pub mod hardware;
pub mod identity;
pub mod installer;
pub mod monitor;
pub mod netconfig;
pub mod pnp;
pub mod poller;

#[cfg(target_os = "windows")]
pub mod platform;

pub use config::{Config, FileConfigStore, MemoryStateStore, StateStore};
pub use daemon::{Daemon, Services};
pub use error::{Error, Result};
pub use hardware::{DeviceStatus, EventSubscription, HardwareEvent, HardwareEvents, HardwareQuery, HostInfo};
pub use identity::{IdentityMode, WatchSet};
pub use installer::{DriverInstaller, ProcessInstaller};
pub use monitor::{HotplugMonitor, MonitorState};
pub use netconfig::{AddressTarget, CommandOutput, NetshApplier, NetworkApplier, NetworkConfigurator, NetworkSettings};
pub use poller::{InstallState, PollSupervisor};
