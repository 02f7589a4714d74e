use super::adapters::adapter_rows;
use crate::error::Result;
use crate::pnp::{DeviceTree, NetworkAdapterInfo};
use windowspnp::{PnpDeviceNodeInfo, PnpEnumerator};

/// Driver-key value linking a network device node to its IP Helper adapter.
const NET_CFG_INSTANCE_ID: &str = "NetCfgInstanceId";

/// Device tree backed by SetupAPI and IP Helper.
pub struct WindowsDeviceTree;

impl DeviceTree for WindowsDeviceTree {
    fn present_devices(&self) -> Result<Vec<PnpDeviceNodeInfo>> {
        Ok(PnpEnumerator::enumerate_present_devices()?)
    }

    fn network_adapter(&self, device_id: &str) -> Result<Option<NetworkAdapterInfo>> {
        let Some(instance_id) = PnpEnumerator::read_driver_key_string(device_id, NET_CFG_INSTANCE_ID)? else {
            return Ok(None);
        };

        let adapter = adapter_rows()?
            .into_iter()
            .find(|row| row.adapter_name.eq_ignore_ascii_case(&instance_id))
            .map(|row| NetworkAdapterInfo {
                connection_name: row.friendly_name,
                interface_index: row.if_index,
            });
        if adapter.is_none() {
            log::debug!("{} has {} {} but no adapter entry", device_id, NET_CFG_INSTANCE_ID, instance_id);
        }
        Ok(adapter)
    }
}
