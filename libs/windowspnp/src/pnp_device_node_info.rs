// Copyright (c) ScaleFS LLC; used with permission
// Licensed under the MIT License

use crate::EnumerateError;

/// Run state of a device node as reported by the configuration manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PnpDeviceStatus {
    // DN_STARTED is set and no problem code is reported
    Started,
    // the devnode carries a problem code (e.g. CM_PROB_FAILED_INSTALL while drivers are missing)
    Problem(/*problem_number: */u32),
    // present, but the driver stack has not started it yet
    NotStarted,
}
impl PnpDeviceStatus {
    pub fn from_devnode_flags(status_flags: u32, problem_number: u32, started_flag: u32, has_problem_flag: u32) -> Self {
        if status_flags & has_problem_flag != 0 && problem_number != 0 {
            PnpDeviceStatus::Problem(problem_number)
        } else if status_flags & started_flag != 0 {
            PnpDeviceStatus::Started
        } else {
            PnpDeviceStatus::NotStarted
        }
    }

    pub fn is_operational(&self) -> bool {
        matches!(self, PnpDeviceStatus::Started)
    }
}

#[derive(Clone, Debug)]
pub struct PnpDeviceNodeInfo {
    // device instance id (e.g. USB\VID_0BDA&PID_8153\000001); this is what callers use as the device identifier
    pub device_instance_id: String,
    // DEVPKEY_Device_HardwareIds; most specific id first, may be empty for root-enumerated software devices
    pub hardware_ids: Vec<String>,
    // DEVPKEY_Device_DeviceDesc; the bus/driver provided description (not the friendly name)
    pub device_description: Option<String>,
    // None when the configuration manager could not report a status for the devnode
    pub status: Option<PnpDeviceStatus>,
}
impl PnpDeviceNodeInfo {
    pub fn has_hardware_id_containing(&self, fragment: &str) -> bool {
        self.hardware_ids.iter().any(|hardware_id| hardware_id.contains(fragment))
    }

    pub fn has_description(&self, description: &str) -> bool {
        self.device_description.as_deref() == Some(description)
    }
}

/// Drops device nodes that could not be read and keeps the rest of the snapshot.
///
/// Nodes routinely disappear between enumeration and property reads while devices are being plugged or unplugged.
pub fn keep_readable_nodes<I>(node_results: I) -> Vec<PnpDeviceNodeInfo>
where
    I: IntoIterator<Item = Result<PnpDeviceNodeInfo, EnumerateError>>,
{
    node_results
        .into_iter()
        .filter_map(|node_result| match node_result {
            Ok(node) => Some(node),
            Err(error) => {
                log::debug!("Skipping unreadable device node: {}", error);
                None
            }
        })
        .collect()
}
