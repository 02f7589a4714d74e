//! Windows implementations of the host capabilities.

mod adapters;
mod devices;
mod host;
mod watcher;

pub use devices::WindowsDeviceTree;
pub use host::{cdrom_drive_roots, host_info};
pub use watcher::UsbDeviceWatcher;
