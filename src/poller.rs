//! Install-completion poller.
//!
//! A supervisor thread receives every change of the current device and keeps
//! at most one polling worker alive. A worker waits until the current device
//! reports a healthy status, then configures it and runs any pending patch.
//! Bursts of changes are coalesced; the previous worker is stopped and joined
//! before the next one starts, so two configurations never overlap.

use crate::error::Result;
use crate::hardware::{DeviceStatus, HardwareQuery, HostInfo};
use crate::identity::is_cdrom_device;
use crate::installer::{apply_patch, DriverInstaller};
use crate::monitor::{DeviceChanged, SharedDeviceState};
use crate::netconfig::NetworkConfigurator;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Where a polling pass ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallState {
    /// Still waiting; the pass was stopped or superseded
    Pending,
    /// Device reported healthy and was handed to the configurator
    Ready,
    /// The current device went away
    Abandoned,
}

/// Everything a polling pass needs.
pub struct PollContext {
    pub query: Arc<dyn HardwareQuery>,
    pub installer: Arc<dyn DriverInstaller>,
    pub configurator: NetworkConfigurator,
    pub shared: SharedDeviceState,
    pub host: HostInfo,
    pub interval: Duration,
}

pub struct PollSupervisor {
    handle: JoinHandle<()>,
}

impl PollSupervisor {
    /// Spawns the supervisor thread. It runs until every sender of `changes`
    /// is dropped, then stops its worker and exits.
    pub fn spawn(context: PollContext, changes: Receiver<DeviceChanged>) -> Result<Self> {
        let context = Arc::new(context);
        let handle = thread::Builder::new()
            .name("nic-poll-supervisor".into())
            .spawn(move || supervise(context, changes))?;
        Ok(Self { handle })
    }

    /// Waits for the supervisor to exit.
    pub fn join(self) {
        if self.handle.join().is_err() {
            log::error!("Poll supervisor panicked");
        }
    }
}

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<InstallState>,
}

impl Worker {
    fn spawn(context: Arc<PollContext>, generation: u64) -> Result<Self> {
        let (stop_tx, stop_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name(format!("nic-poll-{}", generation))
            .spawn(move || run_pass(&context, generation, &stop_rx))?;
        Ok(Self {
            stop: stop_tx,
            handle,
        })
    }

    fn stop_and_join(self) {
        // disconnecting the stop channel wakes the worker
        drop(self.stop);
        match self.handle.join() {
            Ok(state) => log::debug!("Poll worker finished: {:?}", state),
            Err(_) => log::error!("Poll worker panicked"),
        }
    }
}

fn supervise(context: Arc<PollContext>, changes: Receiver<DeviceChanged>) {
    log::debug!("Poll supervisor started");
    let mut worker: Option<Worker> = None;

    while let Ok(first) = changes.recv() {
        let latest = changes.try_iter().last().unwrap_or(first);

        if let Some(previous) = worker.take() {
            previous.stop_and_join();
        }

        log::debug!(
            "Polling {:?} (generation {})",
            latest.current,
            latest.generation
        );
        match Worker::spawn(Arc::clone(&context), latest.generation) {
            Ok(w) => worker = Some(w),
            Err(e) => log::error!("Failed to start poll worker: {}", e),
        }
    }

    if let Some(w) = worker.take() {
        w.stop_and_join();
    }
    log::debug!("Poll supervisor stopped");
}

/// One polling pass for `generation`. Returns early without side effects when
/// stopped or when the current device changes underneath it.
fn run_pass(context: &PollContext, generation: u64, stop: &Receiver<()>) -> InstallState {
    let device_id = match wait_until_ready(context, generation, stop) {
        Ok(id) => id,
        Err(state) => return state,
    };

    if is_cdrom_device(&device_id) {
        log::debug!("{} is the installer drive; waiting for re-enumeration", device_id);
        return InstallState::Ready;
    }

    log::info!("{} is ready", device_id);
    match context.configurator.configure(&device_id) {
        Ok(Some(settings)) => log::info!("Applied {} to {}", settings.static_ip, settings.target),
        Ok(None) => {}
        Err(e) => log::error!("Network configuration failed: {}", e),
    }

    // a newer CD-ROM occupancy may have set the flag while configuring;
    // that patch belongs to the next pass
    let patch_pending = {
        let mut state = context.shared.lock();
        state.generation == generation && std::mem::take(&mut state.patch_pending)
    };
    if patch_pending {
        apply_patch(context.installer.as_ref(), context.host.is_64bit);
    }

    InstallState::Ready
}

fn wait_until_ready(
    context: &PollContext,
    generation: u64,
    stop: &Receiver<()>,
) -> std::result::Result<String, InstallState> {
    loop {
        let device_id = current_for(context, generation)?;

        let ready = match context.query.status(&device_id) {
            Ok(DeviceStatus::Ok) => true,
            Ok(status) => {
                log::trace!("{} status {:?}", device_id, status);
                false
            }
            Err(e) => {
                log::debug!("Status query for {} failed: {}", device_id, e);
                false
            }
        };

        // a ready device still gets one interval to settle
        match stop.recv_timeout(context.interval) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => return Err(InstallState::Pending),
        }

        if ready {
            return current_for(context, generation);
        }
    }
}

/// Latest current device, as long as `generation` is still the newest.
fn current_for(context: &PollContext, generation: u64) -> std::result::Result<String, InstallState> {
    let state = context.shared.lock();
    if state.generation != generation {
        return Err(InstallState::Pending);
    }
    match &state.current {
        Some(id) => Ok(id.clone()),
        None => {
            log::debug!("Device removed while waiting for driver install");
            Err(InstallState::Abandoned)
        }
    }
}
