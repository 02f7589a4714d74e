// Copyright (c) ScaleFS LLC; used with permission
// Licensed under the MIT License

mod errors;
pub use errors::*;

mod pnp_device_node_info;
pub use pnp_device_node_info::{keep_readable_nodes, PnpDeviceNodeInfo, PnpDeviceStatus};

mod property_buffer;
pub use property_buffer::{decode_string, decode_string_list};

#[cfg(target_os = "windows")]
mod pnp_enumerator;
#[cfg(target_os = "windows")]
pub use pnp_enumerator::PnpEnumerator;
