//! Capabilities the monitor consumes from the host: device queries, hot-plug
//! notifications and a few facts about the running OS.

use crate::error::Result;
use crossbeam_channel::Sender;

/// Operational status of a device as reported by the plug-and-play database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Drivers installed and the device is started
    Ok,
    /// Present but not (yet) operational
    NotReady,
    /// Not present, or the status could not be determined
    Unknown,
}

/// Kind of hardware-instance change delivered by the event subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareEvent {
    Created,
    Deleted,
}

/// Query surface over the host's plug-and-play and network adapter tables.
///
/// Every method may fail; callers in the monitor treat a failure as
/// "nothing found" and keep watching.
pub trait HardwareQuery: Send + Sync {
    /// Ids of attached devices with a hardware id containing `fragment`.
    fn find_by_hardware_id(&self, fragment: &str) -> Result<Vec<String>>;

    /// Ids of attached devices whose description equals `description`.
    fn find_by_description(&self, description: &str) -> Result<Vec<String>>;

    /// Whether the device is still attached.
    fn is_connected(&self, device_id: &str) -> Result<bool>;

    fn status(&self, device_id: &str) -> Result<DeviceStatus>;

    /// Network connection name ("Local Area Connection 2") bound to the device.
    fn connection_name(&self, device_id: &str) -> Result<Option<String>>;

    /// Interface index of the network adapter bound to the device.
    fn interface_index(&self, device_id: &str) -> Result<Option<String>>;
}

/// A live hot-plug subscription. Dropping it without `stop` leaves the
/// underlying OS watcher running until process exit.
pub trait EventSubscription: Send {
    fn stop(&mut self);
}

/// Source of hot-plug notifications.
pub trait HardwareEvents {
    /// Starts delivering events into `sink`. Failure here is fatal to the daemon.
    fn subscribe(&self, sink: Sender<HardwareEvent>) -> Result<Box<dyn EventSubscription>>;
}

/// OS major versions at or below this address interfaces by connection name.
pub const LEGACY_OS_MAJOR: u32 = 5;

/// Facts about the host that change behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostInfo {
    pub os_major: u32,
    pub os_minor: u32,
    pub is_64bit: bool,
}

impl HostInfo {
    /// Legacy hosts (XP / Server 2003) lack reliable hardware ids and
    /// index-based netsh addressing.
    pub fn is_legacy(&self) -> bool {
        self.os_major <= LEGACY_OS_MAJOR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_threshold() {
        let xp = HostInfo { os_major: 5, os_minor: 1, is_64bit: false };
        let vista = HostInfo { os_major: 6, os_minor: 0, is_64bit: true };
        assert!(xp.is_legacy());
        assert!(!vista.is_legacy());
    }
}
