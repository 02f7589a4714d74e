//! Service control manager entry point and registration.

use crate::{start, Args};
use nicwatch::error::{Error, Result};
use std::ffi::OsString;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use windows_service::service::{
    ServiceAccess, ServiceControl, ServiceControlAccept, ServiceErrorControl, ServiceExitCode, ServiceInfo,
    ServiceStartType, ServiceState, ServiceStatus, ServiceType,
};
use windows_service::service_control_handler::{self, ServiceControlHandlerResult, ServiceStatusHandle};
use windows_service::service_manager::{ServiceManager, ServiceManagerAccess};
use windows_service::{define_windows_service, service_dispatcher};

pub const SERVICE_NAME: &str = "NicWatch";
const DISPLAY_NAME: &str = "NicWatch USB network adapter monitor";
const DESCRIPTION: &str = "Installs drivers for USB Ethernet adapters and assigns their static address";

/// Command line of the process the dispatcher calls back into.
static ARGS: OnceLock<Args> = OnceLock::new();

define_windows_service!(ffi_service_main, service_main);

fn service_error(e: windows_service::Error) -> Error {
    Error::Service(e.to_string())
}

/// Hands the process to the service control manager; returns once the service stopped.
pub fn run(args: Args) -> Result<()> {
    if ARGS.set(args).is_err() {
        return Err(Error::Service("service dispatcher already started".to_string()));
    }
    service_dispatcher::start(SERVICE_NAME, ffi_service_main).map_err(service_error)
}

fn service_main(_arguments: Vec<OsString>) {
    if let Err(e) = run_service() {
        log::error!("{}", e);
    }
}

fn run_service() -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    let status = service_control_handler::register(SERVICE_NAME, move |control| match control {
        ServiceControl::Stop | ServiceControl::Shutdown => {
            log::info!("Received service stop request");
            r.store(false, Ordering::Relaxed);
            ServiceControlHandlerResult::NoError
        }
        ServiceControl::Interrogate => ServiceControlHandlerResult::NoError,
        _ => ServiceControlHandlerResult::NotImplemented,
    })
    .map_err(service_error)?;

    report(&status, ServiceState::Running, ServiceExitCode::Win32(0))?;

    let result = match ARGS.get() {
        Some(args) => start(args).and_then(|startup| match startup {
            Some(startup) => startup.run(running),
            None => Ok(()),
        }),
        None => Err(Error::Service("service started without a command line".to_string())),
    };

    let exit_code = match &result {
        Ok(()) => ServiceExitCode::Win32(0),
        Err(e) => ServiceExitCode::ServiceSpecific(e.exit_code()),
    };
    report(&status, ServiceState::Stopped, exit_code)?;
    result
}

fn report(status: &ServiceStatusHandle, state: ServiceState, exit_code: ServiceExitCode) -> Result<()> {
    let controls_accepted = if state == ServiceState::Running {
        ServiceControlAccept::STOP | ServiceControlAccept::SHUTDOWN
    } else {
        ServiceControlAccept::empty()
    };

    status
        .set_service_status(ServiceStatus {
            service_type: ServiceType::OWN_PROCESS,
            current_state: state,
            controls_accepted,
            exit_code,
            checkpoint: 0,
            wait_hint: Duration::default(),
            process_id: None,
        })
        .map_err(service_error)
}

/// Registers this executable as an auto-start LocalSystem service using `config`.
pub fn install(config: &Path) -> Result<()> {
    let manager = ServiceManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT | ServiceManagerAccess::CREATE_SERVICE)
        .map_err(service_error)?;

    let info = ServiceInfo {
        name: OsString::from(SERVICE_NAME),
        display_name: OsString::from(DISPLAY_NAME),
        service_type: ServiceType::OWN_PROCESS,
        start_type: ServiceStartType::AutoStart,
        error_control: ServiceErrorControl::Normal,
        executable_path: std::env::current_exe()?,
        launch_arguments: vec![
            OsString::from("--service"),
            OsString::from("--config"),
            config.as_os_str().to_owned(),
        ],
        dependencies: vec![],
        account_name: None,
        account_password: None,
    };

    let service = manager
        .create_service(&info, ServiceAccess::CHANGE_CONFIG)
        .map_err(service_error)?;
    service.set_description(DESCRIPTION).map_err(service_error)?;

    println!("Installed service {} using {}", SERVICE_NAME, config.display());
    Ok(())
}
