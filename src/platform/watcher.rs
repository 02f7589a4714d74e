use crate::error::{Error, Result};
use crate::hardware::{EventSubscription, HardwareEvent, HardwareEvents};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use windows::{
    core::{IInspectable, HSTRING},
    Devices::Enumeration::{DeviceInformation, DeviceInformationUpdate, DeviceWatcher},
    Foundation::TypedEventHandler,
};

/// Enabled interfaces of GUID_DEVINTERFACE_USB_DEVICE; one per attached USB device.
const USB_DEVICE_SELECTOR: &str = "System.Devices.InterfaceClassGuid:=\"{A5DCBF10-6530-11D2-901F-00C04FB951ED}\" \
     AND System.Devices.InterfaceEnabled:=System.StructuredQueryType.Boolean#True";

/// Hot-plug events from a WinRT DeviceWatcher over USB device interfaces.
pub struct UsbDeviceWatcher;

struct WatcherSubscription {
    watcher: DeviceWatcher,
}

impl EventSubscription for WatcherSubscription {
    fn stop(&mut self) {
        if let Err(e) = self.watcher.Stop() {
            log::debug!("DeviceWatcher stop: {}", e);
        }
    }
}

fn subscription_error(e: windows::core::Error) -> Error {
    Error::Subscription(e.to_string())
}

impl HardwareEvents for UsbDeviceWatcher {
    fn subscribe(&self, sink: Sender<HardwareEvent>) -> Result<Box<dyn EventSubscription>> {
        let watcher = DeviceInformation::CreateWatcherAqsFilter(&HSTRING::from(USB_DEVICE_SELECTOR))
            .map_err(subscription_error)?;

        // the initial enumeration replays every attached device as Added
        let enumerated = Arc::new(AtomicBool::new(false));

        let added_sink = sink.clone();
        let added_enumerated = Arc::clone(&enumerated);
        watcher
            .Added(&TypedEventHandler::<DeviceWatcher, DeviceInformation>::new(move |_, _| {
                if added_enumerated.load(Ordering::Acquire) {
                    let _ = added_sink.send(HardwareEvent::Created);
                }
                Ok(())
            }))
            .map_err(subscription_error)?;

        let removed_sink = sink;
        let removed_enumerated = Arc::clone(&enumerated);
        watcher
            .Removed(&TypedEventHandler::<DeviceWatcher, DeviceInformationUpdate>::new(move |_, _| {
                if removed_enumerated.load(Ordering::Acquire) {
                    let _ = removed_sink.send(HardwareEvent::Deleted);
                }
                Ok(())
            }))
            .map_err(subscription_error)?;

        // Added/Removed are only raised while an Updated handler is registered
        watcher
            .Updated(&TypedEventHandler::<DeviceWatcher, DeviceInformationUpdate>::new(|_, _| Ok(())))
            .map_err(subscription_error)?;

        watcher
            .EnumerationCompleted(&TypedEventHandler::<DeviceWatcher, IInspectable>::new(move |_, _| {
                log::debug!("USB device enumeration completed");
                enumerated.store(true, Ordering::Release);
                Ok(())
            }))
            .map_err(subscription_error)?;

        watcher.Start().map_err(subscription_error)?;
        log::info!("Hot-plug watcher started");

        Ok(Box::new(WatcherSubscription { watcher }))
    }
}
