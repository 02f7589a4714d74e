//! `HardwareQuery` over a plug-and-play device tree snapshot.
//!
//! The tree itself (SetupAPI + IP Helper on Windows) only has to list present
//! device nodes and look up the network adapter bound to one of them; all
//! matching rules live here.

use crate::error::Result;
use crate::hardware::{DeviceStatus, HardwareQuery};
use windowspnp::PnpDeviceNodeInfo;

/// Network adapter bound to a device node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAdapterInfo {
    /// Connection name shown in the network control panel
    pub connection_name: String,
    pub interface_index: u32,
}

/// Raw device tree access.
pub trait DeviceTree: Send + Sync {
    /// Every device node currently present.
    fn present_devices(&self) -> Result<Vec<PnpDeviceNodeInfo>>;

    /// Network adapter bound to `device_id`, if the device is a NIC with
    /// drivers installed.
    fn network_adapter(&self, device_id: &str) -> Result<Option<NetworkAdapterInfo>>;
}

pub struct PnpHardwareQuery<T> {
    tree: T,
}

impl<T: DeviceTree> PnpHardwareQuery<T> {
    pub fn new(tree: T) -> Self {
        Self { tree }
    }

    fn find_node(&self, device_id: &str) -> Result<Option<PnpDeviceNodeInfo>> {
        Ok(self
            .tree
            .present_devices()?
            .into_iter()
            .find(|node| node.device_instance_id.eq_ignore_ascii_case(device_id)))
    }
}

impl<T: DeviceTree> HardwareQuery for PnpHardwareQuery<T> {
    fn find_by_hardware_id(&self, fragment: &str) -> Result<Vec<String>> {
        Ok(self
            .tree
            .present_devices()?
            .into_iter()
            .filter(|node| node.has_hardware_id_containing(fragment))
            .map(|node| node.device_instance_id)
            .collect())
    }

    fn find_by_description(&self, description: &str) -> Result<Vec<String>> {
        Ok(self
            .tree
            .present_devices()?
            .into_iter()
            .filter(|node| node.has_description(description))
            .map(|node| node.device_instance_id)
            .collect())
    }

    fn is_connected(&self, device_id: &str) -> Result<bool> {
        Ok(self.find_node(device_id)?.is_some())
    }

    fn status(&self, device_id: &str) -> Result<DeviceStatus> {
        let status = match self.find_node(device_id)? {
            None => DeviceStatus::Unknown,
            Some(node) => match node.status {
                Some(s) if s.is_operational() => DeviceStatus::Ok,
                Some(_) => DeviceStatus::NotReady,
                None => DeviceStatus::Unknown,
            },
        };
        Ok(status)
    }

    fn connection_name(&self, device_id: &str) -> Result<Option<String>> {
        Ok(self
            .tree
            .network_adapter(device_id)?
            .map(|adapter| adapter.connection_name))
    }

    fn interface_index(&self, device_id: &str) -> Result<Option<String>> {
        Ok(self
            .tree
            .network_adapter(device_id)?
            .map(|adapter| adapter.interface_index.to_string()))
    }
}
