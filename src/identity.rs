//! Identity resolution: turns the configured watch set into the ordered,
//! de-duplicated list of attached device ids that belong to it.

use crate::hardware::HardwareQuery;
use serde::{Deserialize, Serialize};

/// Hardware id reported by the adapter while it still enumerates as a
/// virtual CD-ROM carrying the driver installer.
pub const CDROM_HARDWARE_ID: &str = "Realtek_USB_CD-ROM______2";

/// Device id fragment of the same CD-ROM; a current device containing this
/// is in installer mode.
pub const CDROM_DEVICE_SIGNATURE: &str = "USBSTOR\\CDROM&VEN_REALTEK&PROD_USB_CD-ROM";

/// Returns true when `device_id` is the adapter in its CD-ROM mode.
pub fn is_cdrom_device(device_id: &str) -> bool {
    device_id.contains(CDROM_DEVICE_SIGNATURE)
}

/// What descriptors are matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// Fragment match against each entry's hardware id list
    HardwareId,
    /// Exact match against the device description
    Description,
}

/// One watched identity pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityDescriptor {
    pub pattern: String,
    pub mode: IdentityMode,
}

/// The immutable set of descriptors for this process. All descriptors share
/// one mode.
#[derive(Debug, Clone)]
pub struct WatchSet {
    mode: IdentityMode,
    descriptors: Vec<IdentityDescriptor>,
}

impl WatchSet {
    /// Builds the watch set. In hardware-id mode the CD-ROM hardware id is
    /// appended so the adapter is seen before its drivers exist.
    pub fn new<I, S>(mode: IdentityMode, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut descriptors: Vec<IdentityDescriptor> = patterns
            .into_iter()
            .map(|p| IdentityDescriptor {
                pattern: p.into(),
                mode,
            })
            .collect();

        if mode == IdentityMode::HardwareId
            && !descriptors.iter().any(|d| d.pattern == CDROM_HARDWARE_ID)
        {
            descriptors.push(IdentityDescriptor {
                pattern: CDROM_HARDWARE_ID.to_string(),
                mode,
            });
        }

        Self { mode, descriptors }
    }

    pub fn mode(&self) -> IdentityMode {
        self.mode
    }

    pub fn descriptors(&self) -> &[IdentityDescriptor] {
        &self.descriptors
    }

    /// Matches every descriptor against the live device tree.
    ///
    /// A failed query for one descriptor contributes nothing; the rest of the
    /// set is still evaluated.
    pub fn resolve(&self, query: &dyn HardwareQuery) -> Vec<String> {
        let mut found = Vec::new();
        for descriptor in &self.descriptors {
            let result = match descriptor.mode {
                IdentityMode::HardwareId => query.find_by_hardware_id(&descriptor.pattern),
                IdentityMode::Description => query.find_by_description(&descriptor.pattern),
            };
            match result {
                Ok(ids) => found.extend(ids),
                Err(e) => {
                    log::warn!(
                        "Device lookup for {:?} failed, treating as no match: {}",
                        descriptor.pattern,
                        e
                    );
                }
            }
        }
        dedup_preserving_order(found)
    }
}

/// Removes duplicates, keeping the first occurrence of each id.
pub fn dedup_preserving_order(ids: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::hardware::DeviceStatus;

    struct Table {
        by_hwid: Vec<(&'static str, &'static str)>,
        by_desc: Vec<(&'static str, &'static str)>,
        failing: &'static str,
    }

    impl HardwareQuery for Table {
        fn find_by_hardware_id(&self, fragment: &str) -> Result<Vec<String>> {
            if fragment == self.failing {
                return Err(Error::Query("provider unavailable".into()));
            }
            Ok(self
                .by_hwid
                .iter()
                .filter(|(hwid, _)| hwid.contains(fragment))
                .map(|(_, id)| id.to_string())
                .collect())
        }
        fn find_by_description(&self, description: &str) -> Result<Vec<String>> {
            Ok(self
                .by_desc
                .iter()
                .filter(|(desc, _)| *desc == description)
                .map(|(_, id)| id.to_string())
                .collect())
        }
        fn is_connected(&self, _: &str) -> Result<bool> {
            Ok(true)
        }
        fn status(&self, _: &str) -> Result<DeviceStatus> {
            Ok(DeviceStatus::Unknown)
        }
        fn connection_name(&self, _: &str) -> Result<Option<String>> {
            Ok(None)
        }
        fn interface_index(&self, _: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[test]
    fn hardware_mode_appends_cdrom_descriptor_once() {
        let set = WatchSet::new(IdentityMode::HardwareId, ["VID_0BDA&PID_8153"]);
        let patterns: Vec<_> = set.descriptors().iter().map(|d| d.pattern.as_str()).collect();
        assert_eq!(patterns, vec!["VID_0BDA&PID_8153", CDROM_HARDWARE_ID]);

        let set = WatchSet::new(IdentityMode::HardwareId, [CDROM_HARDWARE_ID]);
        assert_eq!(set.descriptors().len(), 1);
    }

    #[test]
    fn description_mode_has_no_cdrom_descriptor() {
        let set = WatchSet::new(IdentityMode::Description, ["Realtek USB FE Family Controller"]);
        assert_eq!(set.descriptors().len(), 1);
    }

    #[test]
    fn resolve_dedups_in_first_seen_order() {
        let table = Table {
            by_hwid: vec![
                ("USB\\VID_0B95&PID_7720", "USB\\VID_0B95&PID_7720\\A"),
                ("USB\\VID_0BDA&PID_8153", "USB\\VID_0BDA&PID_8153\\B"),
                // matched by both descriptors below
                ("USB\\VID_0B95&PID_772E", "USB\\VID_0B95&PID_7720\\A"),
            ],
            by_desc: vec![],
            failing: "",
        };
        let set = WatchSet::new(IdentityMode::HardwareId, ["VID_0B95&PID_772", "VID_0BDA&PID_8153"]);
        assert_eq!(
            set.resolve(&table),
            vec!["USB\\VID_0B95&PID_7720\\A".to_string(), "USB\\VID_0BDA&PID_8153\\B".to_string()]
        );
    }

    #[test]
    fn description_mode_requires_exact_text() {
        let table = Table {
            by_hwid: vec![],
            by_desc: vec![("Realtek USB FE Family Controller", "USB\\VID_0BDA&PID_8150\\1")],
            failing: "",
        };
        let set = WatchSet::new(IdentityMode::Description, ["Realtek USB FE Family"]);
        assert!(set.resolve(&table).is_empty());

        let set = WatchSet::new(IdentityMode::Description, ["Realtek USB FE Family Controller"]);
        assert_eq!(set.resolve(&table), vec!["USB\\VID_0BDA&PID_8150\\1".to_string()]);
    }

    #[test]
    fn failed_lookup_contributes_nothing() {
        let table = Table {
            by_hwid: vec![("USB\\VID_0BDA&PID_8153", "USB\\VID_0BDA&PID_8153\\B")],
            by_desc: vec![],
            failing: "VID_0B95&PID_772",
        };
        let set = WatchSet::new(IdentityMode::HardwareId, ["VID_0B95&PID_772", "VID_0BDA&PID_8153"]);
        assert_eq!(set.resolve(&table), vec!["USB\\VID_0BDA&PID_8153\\B".to_string()]);
    }

    #[test]
    fn cdrom_signature_is_a_substring_check() {
        assert!(is_cdrom_device("USBSTOR\\CDROM&VEN_REALTEK&PROD_USB_CD-ROM&REV_2.00\\7&1A2B&0"));
        assert!(!is_cdrom_device("USB\\VID_0BDA&PID_8153\\000001"));
    }
}
