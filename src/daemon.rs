//! Wires the monitor, the poll supervisor and the hot-plug subscription
//! together and runs the event loop until shutdown.

use crate::config::{Config, StateStore};
use crate::error::{Error, Result};
use crate::hardware::{HardwareEvents, HardwareQuery, HostInfo};
use crate::installer::DriverInstaller;
use crate::monitor::{DeviceState, HotplugMonitor, SharedDeviceState};
use crate::netconfig::{NetworkApplier, NetworkConfigurator};
use crate::poller::{PollContext, PollSupervisor};
use crossbeam_channel::{select, tick, unbounded};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How often the event loop checks the shutdown flag.
const SHUTDOWN_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Host capabilities the daemon runs against.
pub struct Services {
    pub query: Arc<dyn HardwareQuery>,
    pub installer: Arc<dyn DriverInstaller>,
    pub applier: Arc<dyn NetworkApplier>,
    pub store: Arc<dyn StateStore>,
    pub host: HostInfo,
}

pub struct Daemon {
    config: Config,
    services: Services,
    shared: SharedDeviceState,
}

impl Daemon {
    pub fn new(config: Config, services: Services) -> Self {
        Self {
            config,
            services,
            shared: Arc::new(Mutex::new(DeviceState::default())),
        }
    }

    /// Current device as last set by the monitor.
    pub fn current_device(&self) -> Option<String> {
        self.shared.lock().current.clone()
    }

    /// Runs until `running` is cleared. Returns an error if the hot-plug
    /// subscription cannot be established or is lost.
    pub fn run(&self, events: &dyn HardwareEvents, running: Arc<AtomicBool>) -> Result<()> {
        let (event_tx, event_rx) = unbounded();
        // subscribe first so nothing plugged during the startup scan is missed
        let mut subscription = events.subscribe(event_tx)?;

        let (change_tx, change_rx) = unbounded();
        let configurator = NetworkConfigurator::new(
            Arc::clone(&self.services.query),
            Arc::clone(&self.services.store),
            Arc::clone(&self.services.applier),
            self.services.host,
            self.config.network.static_ip.clone(),
            self.config.network.subnet_mask.clone(),
        );
        let supervisor = match PollSupervisor::spawn(
            PollContext {
                query: Arc::clone(&self.services.query),
                installer: Arc::clone(&self.services.installer),
                configurator,
                shared: Arc::clone(&self.shared),
                host: self.services.host,
                interval: Duration::from_millis(self.config.monitor.poll_interval_ms),
            },
            change_rx,
        ) {
            Ok(supervisor) => supervisor,
            Err(e) => {
                subscription.stop();
                return Err(e);
            }
        };

        let mut monitor = HotplugMonitor::new(
            self.config.watch_set(),
            Arc::clone(&self.services.query),
            Arc::clone(&self.services.installer),
            Arc::clone(&self.shared),
            change_tx,
        );

        log::info!(
            "Watching {} {:?} pattern(s)",
            self.config.watch_set().descriptors().len(),
            self.config.monitor.identity_mode
        );
        monitor.start();

        let shutdown_check = tick(SHUTDOWN_CHECK_INTERVAL);
        let mut result = Ok(());
        while running.load(Ordering::Relaxed) {
            select! {
                recv(event_rx) -> msg => match msg {
                    Ok(event) => {
                        log::debug!("Hardware event: {:?}", event);
                        monitor.handle(event);
                    }
                    Err(_) => {
                        result = Err(Error::Subscription("event source closed".to_string()));
                        break;
                    }
                },
                recv(shutdown_check) -> _ => {}
            }
        }

        log::info!("Shutting down");
        subscription.stop();
        // dropping the monitor closes the change channel
        drop(monitor);
        supervisor.join();
        result
    }
}
