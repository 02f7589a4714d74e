//! Hot-plug state machine.
//!
//! Owns the candidate list and the current-device slot. Every change of the
//! current device is published on a channel to the poll supervisor; reassigning
//! the same value publishes nothing.
//!
//! ```text
//!   Idle ──match──▶ Tracking ◀──re-enumerated as NIC── InstallingDriver
//!    ▲                 │                                     ▲
//!    └──last removed───┘──────────CD-ROM signature───────────┘
//! ```

use crate::hardware::{HardwareEvent, HardwareQuery};
use crate::identity::{dedup_preserving_order, is_cdrom_device, WatchSet};
use crate::installer::{install_from_cdrom, DriverInstaller};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::Arc;

/// State shared between the event handler and the poller.
#[derive(Debug, Default)]
pub struct DeviceState {
    /// Active device id, or None when nothing watched is attached
    pub current: Option<String>,
    /// Set when the CD-ROM installer ran; the patch runs after the NIC is ready
    pub patch_pending: bool,
    /// Bumped on every change of `current`
    pub generation: u64,
}

pub type SharedDeviceState = Arc<Mutex<DeviceState>>;

/// Published whenever the current device changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceChanged {
    pub previous: Option<String>,
    pub current: Option<String>,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Tracking,
    InstallingDriver,
}

pub struct HotplugMonitor {
    watch_set: WatchSet,
    query: Arc<dyn HardwareQuery>,
    installer: Arc<dyn DriverInstaller>,
    shared: SharedDeviceState,
    changes: Sender<DeviceChanged>,
    candidates: Vec<String>,
}

impl HotplugMonitor {
    pub fn new(
        watch_set: WatchSet,
        query: Arc<dyn HardwareQuery>,
        installer: Arc<dyn DriverInstaller>,
        shared: SharedDeviceState,
        changes: Sender<DeviceChanged>,
    ) -> Self {
        Self {
            watch_set,
            query,
            installer,
            shared,
            changes,
            candidates: Vec::new(),
        }
    }

    /// Scans the devices attached at startup.
    pub fn start(&mut self) {
        self.candidates = self.watch_set.resolve(self.query.as_ref());
        if self.candidates.is_empty() {
            log::info!("No watched device attached at startup");
            return;
        }
        log::info!("Found {} watched device(s) at startup", self.candidates.len());
        self.select_first();
    }

    pub fn handle(&mut self, event: HardwareEvent) {
        match event {
            HardwareEvent::Created => self.on_created(),
            HardwareEvent::Deleted => self.on_deleted(),
        }
    }

    fn on_created(&mut self) {
        let found = self.watch_set.resolve(self.query.as_ref());
        let mut merged = std::mem::take(&mut self.candidates);
        merged.extend(found);
        self.candidates = dedup_preserving_order(merged);

        if !self.candidates.is_empty() {
            self.select_first();
        }
    }

    fn on_deleted(&mut self) {
        let query = Arc::clone(&self.query);
        self.candidates.retain(|id| match query.is_connected(id) {
            Ok(connected) => connected,
            Err(e) => {
                log::warn!("Presence check for {} failed, dropping it: {}", id, e);
                false
            }
        });

        if self.candidates.is_empty() {
            self.set_current(None);
        } else {
            self.select_first();
        }
    }

    fn select_first(&mut self) {
        let first = self.candidates.first().cloned();
        self.set_current(first);
    }

    fn set_current(&mut self, next: Option<String>) {
        let previous = self.shared.lock().current.clone();
        if previous == next {
            return;
        }

        let was_cdrom = previous.as_deref().is_some_and(is_cdrom_device);
        let is_cdrom = next.as_deref().is_some_and(is_cdrom_device);
        if is_cdrom && !was_cdrom {
            log::info!("Adapter is in CD-ROM mode, installing drivers");
            // blocks event handling until the installer exits
            install_from_cdrom(self.installer.as_ref());
            self.shared.lock().patch_pending = true;
        }

        let generation = {
            let mut state = self.shared.lock();
            state.current = next.clone();
            state.generation += 1;
            state.generation
        };

        match &next {
            Some(id) => log::info!("Current device: {}", id),
            None => log::info!("Current device removed"),
        }

        let change = DeviceChanged {
            previous,
            current: next,
            generation,
        };
        if self.changes.send(change).is_err() {
            log::debug!("Poll supervisor has stopped; change not delivered");
        }
    }

    pub fn state(&self) -> MonitorState {
        match self.shared.lock().current.as_deref() {
            None => MonitorState::Idle,
            Some(id) if is_cdrom_device(id) => MonitorState::InstallingDriver,
            Some(_) => MonitorState::Tracking,
        }
    }

    pub fn current(&self) -> Option<String> {
        self.shared.lock().current.clone()
    }

    /// Tracked candidates, oldest first.
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::hardware::DeviceStatus;
    use crate::identity::IdentityMode;
    use crossbeam_channel::{unbounded, Receiver};
    use std::path::{Path, PathBuf};

    const NIC_A: &str = "USB\\VID_0BDA&PID_8153\\A";
    const NIC_B: &str = "USB\\VID_0BDA&PID_8153\\B";
    const CDROM: &str = "USBSTOR\\CDROM&VEN_REALTEK&PROD_USB_CD-ROM&REV_2.00\\1";
    const CDROM_2: &str = "USBSTOR\\CDROM&VEN_REALTEK&PROD_USB_CD-ROM&REV_2.00\\2";

    /// Attached devices as (hardware id, device id); tests edit it between events.
    #[derive(Default)]
    struct Bus {
        attached: Mutex<Vec<(&'static str, &'static str)>>,
        broken: Mutex<bool>,
    }

    impl Bus {
        fn plug(&self, hwid: &'static str, id: &'static str) {
            self.attached.lock().push((hwid, id));
        }
        fn unplug(&self, id: &str) {
            self.attached.lock().retain(|(_, d)| *d != id);
        }
    }

    impl HardwareQuery for Bus {
        fn find_by_hardware_id(&self, fragment: &str) -> Result<Vec<String>> {
            if *self.broken.lock() {
                return Err(Error::Query("wmi unavailable".into()));
            }
            Ok(self
                .attached
                .lock()
                .iter()
                .filter(|(hwid, _)| hwid.contains(fragment))
                .map(|(_, id)| id.to_string())
                .collect())
        }
        fn find_by_description(&self, _: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        fn is_connected(&self, device_id: &str) -> Result<bool> {
            if *self.broken.lock() {
                return Err(Error::Query("wmi unavailable".into()));
            }
            Ok(self.attached.lock().iter().any(|(_, id)| *id == device_id))
        }
        fn status(&self, _: &str) -> Result<DeviceStatus> {
            Ok(DeviceStatus::NotReady)
        }
        fn connection_name(&self, _: &str) -> Result<Option<String>> {
            Ok(None)
        }
        fn interface_index(&self, _: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct CountingInstaller {
        installs: Mutex<usize>,
    }

    impl DriverInstaller for CountingInstaller {
        fn locate_installer(&self) -> Option<PathBuf> {
            Some(PathBuf::from("E:\\RTK_NIC_DRIVER_INSTALLER.sfx.exe"))
        }
        fn run_installer(&self, _: &Path) -> Result<i32> {
            *self.installs.lock() += 1;
            Ok(0)
        }
        fn run_patch(&self, _: bool) -> Result<i32> {
            Ok(0)
        }
    }

    struct Fixture {
        bus: Arc<Bus>,
        installer: Arc<CountingInstaller>,
        shared: SharedDeviceState,
        changes: Receiver<DeviceChanged>,
        monitor: HotplugMonitor,
    }

    fn fixture() -> Fixture {
        let bus = Arc::new(Bus::default());
        let installer = Arc::new(CountingInstaller::default());
        let shared: SharedDeviceState = Arc::new(Mutex::new(DeviceState::default()));
        let (tx, rx) = unbounded();
        let monitor = HotplugMonitor::new(
            WatchSet::new(IdentityMode::HardwareId, ["VID_0BDA&PID_8153"]),
            bus.clone(),
            installer.clone(),
            shared.clone(),
            tx,
        );
        Fixture {
            bus,
            installer,
            shared,
            changes: rx,
            monitor,
        }
    }

    fn drain(rx: &Receiver<DeviceChanged>) -> Vec<Option<String>> {
        rx.try_iter().map(|c| c.current).collect()
    }

    #[test]
    fn startup_selects_first_match() {
        let mut f = fixture();
        f.bus.plug("USB\\VID_0BDA&PID_8153", NIC_A);
        f.bus.plug("USB\\VID_0BDA&PID_8153", NIC_B);
        f.monitor.start();

        assert_eq!(f.monitor.current().as_deref(), Some(NIC_A));
        assert_eq!(f.monitor.state(), MonitorState::Tracking);
        assert_eq!(drain(&f.changes), vec![Some(NIC_A.to_string())]);
        assert_eq!(*f.installer.installs.lock(), 0);
    }

    #[test]
    fn startup_with_nothing_attached_stays_idle() {
        let mut f = fixture();
        f.monitor.start();
        assert_eq!(f.monitor.state(), MonitorState::Idle);
        assert!(drain(&f.changes).is_empty());
    }

    #[test]
    fn oldest_surviving_candidate_stays_current() {
        let mut f = fixture();
        f.bus.plug("USB\\VID_0BDA&PID_8153", NIC_A);
        f.monitor.handle(HardwareEvent::Created);
        f.bus.plug("USB\\VID_0BDA&PID_8153", NIC_B);
        f.monitor.handle(HardwareEvent::Created);

        assert_eq!(f.monitor.candidates(), [NIC_A.to_string(), NIC_B.to_string()]);
        assert_eq!(f.monitor.current().as_deref(), Some(NIC_A));
        // second Created reassigned the same value: no second notification
        assert_eq!(drain(&f.changes), vec![Some(NIC_A.to_string())]);

        f.bus.unplug(NIC_A);
        f.monitor.handle(HardwareEvent::Deleted);
        assert_eq!(f.monitor.current().as_deref(), Some(NIC_B));

        f.bus.unplug(NIC_B);
        f.monitor.handle(HardwareEvent::Deleted);
        assert_eq!(f.monitor.current(), None);
        assert_eq!(f.monitor.state(), MonitorState::Idle);
        assert_eq!(drain(&f.changes), vec![Some(NIC_B.to_string()), None]);
    }

    #[test]
    fn unrelated_removal_does_not_notify() {
        let mut f = fixture();
        f.bus.plug("USB\\VID_0BDA&PID_8153", NIC_A);
        f.monitor.start();
        drain(&f.changes);

        f.monitor.handle(HardwareEvent::Deleted);
        f.monitor.handle(HardwareEvent::Created);
        assert!(drain(&f.changes).is_empty());
        assert_eq!(f.shared.lock().generation, 1);
    }

    #[test]
    fn cdrom_installs_once_per_occupancy() {
        let mut f = fixture();
        f.bus.plug("Realtek_USB_CD-ROM______2", CDROM);
        f.monitor.handle(HardwareEvent::Created);
        assert_eq!(f.monitor.state(), MonitorState::InstallingDriver);
        assert_eq!(*f.installer.installs.lock(), 1);
        assert!(f.shared.lock().patch_pending);

        // repeated notifications while still in CD-ROM mode
        f.monitor.handle(HardwareEvent::Created);
        f.monitor.handle(HardwareEvent::Deleted);
        // a second CD-ROM instance replacing the first is the same occupancy
        f.bus.plug("Realtek_USB_CD-ROM______2", CDROM_2);
        f.monitor.handle(HardwareEvent::Created);
        f.bus.unplug(CDROM);
        f.monitor.handle(HardwareEvent::Deleted);
        assert_eq!(f.monitor.current().as_deref(), Some(CDROM_2));
        assert_eq!(*f.installer.installs.lock(), 1);

        // re-enumerated as a NIC, then back to CD-ROM: a new occupancy
        f.bus.unplug(CDROM_2);
        f.bus.plug("USB\\VID_0BDA&PID_8153", NIC_A);
        f.monitor.handle(HardwareEvent::Deleted);
        f.monitor.handle(HardwareEvent::Created);
        assert_eq!(f.monitor.current().as_deref(), Some(NIC_A));

        f.bus.unplug(NIC_A);
        f.bus.plug("Realtek_USB_CD-ROM______2", CDROM);
        f.monitor.handle(HardwareEvent::Deleted);
        f.monitor.handle(HardwareEvent::Created);
        assert_eq!(*f.installer.installs.lock(), 2);
    }

    #[test]
    fn install_runs_before_change_is_published() {
        let mut f = fixture();
        f.bus.plug("Realtek_USB_CD-ROM______2", CDROM);
        f.monitor.start();
        let change = f.changes.try_recv().unwrap();
        assert_eq!(change.current.as_deref(), Some(CDROM));
        assert_eq!(change.previous, None);
        assert_eq!(*f.installer.installs.lock(), 1);
    }

    #[test]
    fn failed_presence_query_drops_candidates() {
        let mut f = fixture();
        f.bus.plug("USB\\VID_0BDA&PID_8153", NIC_A);
        f.monitor.start();
        *f.bus.broken.lock() = true;

        f.monitor.handle(HardwareEvent::Created);
        assert_eq!(f.monitor.current().as_deref(), Some(NIC_A));

        f.monitor.handle(HardwareEvent::Deleted);
        assert_eq!(f.monitor.current(), None);
    }

    #[test]
    fn current_is_always_first_candidate() {
        let mut f = fixture();
        let script: &[(bool, &'static str)] = &[
            (true, NIC_B),
            (true, NIC_A),
            (false, NIC_B),
            (true, NIC_B),
            (false, NIC_A),
            (false, NIC_B),
            (true, NIC_A),
        ];
        for &(plug, id) in script {
            if plug {
                f.bus.plug("USB\\VID_0BDA&PID_8153", id);
                f.monitor.handle(HardwareEvent::Created);
            } else {
                f.bus.unplug(id);
                f.monitor.handle(HardwareEvent::Deleted);
            }
            assert_eq!(f.monitor.current(), f.monitor.candidates().first().cloned());
        }
        assert_eq!(f.monitor.current().as_deref(), Some(NIC_A));
    }
}
