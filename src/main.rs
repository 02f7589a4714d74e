#![allow(non_snake_case)]

//! NicWatch daemon entry point.
//!
//! Runs in the foreground until Ctrl+C, or under the service control manager
//! with `--service`. Needs administrator rights to change interface addresses
//! and run the vendor installer.

#[cfg(target_os = "windows")]
mod service;

use clap::Parser;
use nicwatch::config::{default_config_path, Config, FileConfigStore};
use nicwatch::error::{Error, Result};
use nicwatch::HostInfo;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// USB network adapter hot-plug monitor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (created with defaults if missing)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the configured log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Prints the effective configuration and exits
    #[arg(long)]
    print_config: bool,

    /// Runs under the service control manager
    #[arg(long, conflicts_with_all = ["print_config", "install_service"])]
    service: bool,

    /// Registers NicWatch as an auto-start system service and exits
    #[arg(long)]
    install_service: bool,
}

impl Args {
    fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(default_config_path)
    }
}

/// Loaded configuration and host facts, ready to run the daemon.
struct Startup {
    config: Config,
    store: Arc<FileConfigStore>,
    host: HostInfo,
}

impl Startup {
    fn run(self, running: Arc<AtomicBool>) -> Result<()> {
        run_daemon(self.config, self.store, self.host, running)
    }
}

fn init_logging(level: &str, output: &str) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    let target = match output {
        "stderr" => env_logger::Target::Stderr,
        "stdout" => env_logger::Target::Stdout,
        path => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            env_logger::Target::Pipe(Box::new(file))
        }
    };
    builder.target(target).try_init().map_err(|e| Error::Unsupported(e.to_string()))
}

fn main() -> ExitCode {
    let args = Args::parse();

    let result = if args.service {
        run_service(args)
    } else if args.install_service {
        install_service(&args)
    } else {
        run(args)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("NicWatch: {}", e);
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}

/// Loads the configuration and sets up logging.
///
/// Returns `None` once `--print-config` has been handled.
fn start(args: &Args) -> Result<Option<Startup>> {
    let host = host_info()?;
    let store = match FileConfigStore::load_or_create(&args.config_path(), &host) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            let _ = init_logging(args.log_level.as_deref().unwrap_or("info"), "stderr");
            return Err(e);
        }
    };
    let config = store.config();

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(None);
    }

    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level, &config.logging.output)?;

    log::info!("NicWatch v{} starting", env!("CARGO_PKG_VERSION"));
    log::info!("Using config: {}", store.path().display());
    log::info!(
        "OS {}.{} ({}-bit)",
        host.os_major,
        host.os_minor,
        if host.is_64bit { 64 } else { 32 }
    );

    Ok(Some(Startup { config, store, host }))
}

fn run(args: Args) -> Result<()> {
    let Some(startup) = start(&args)? else {
        return Ok(());
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Unsupported(format!("cannot install Ctrl+C handler: {}", e)))?;

    startup.run(running)
}

#[cfg(target_os = "windows")]
fn run_service(args: Args) -> Result<()> {
    service::run(args)
}

#[cfg(not(target_os = "windows"))]
fn run_service(_args: Args) -> Result<()> {
    Err(Error::Unsupported("service mode needs Windows".to_string()))
}

#[cfg(target_os = "windows")]
fn install_service(args: &Args) -> Result<()> {
    service::install(&args.config_path())
}

#[cfg(not(target_os = "windows"))]
fn install_service(_args: &Args) -> Result<()> {
    Err(Error::Unsupported("service mode needs Windows".to_string()))
}

#[cfg(target_os = "windows")]
fn host_info() -> Result<HostInfo> {
    Ok(nicwatch::platform::host_info())
}

#[cfg(not(target_os = "windows"))]
fn host_info() -> Result<HostInfo> {
    Err(Error::Unsupported("NicWatch only runs on Windows".to_string()))
}

#[cfg(target_os = "windows")]
fn run_daemon(config: Config, store: Arc<FileConfigStore>, host: HostInfo, running: Arc<AtomicBool>) -> Result<()> {
    use nicwatch::platform::{cdrom_drive_roots, UsbDeviceWatcher, WindowsDeviceTree};
    use nicwatch::pnp::PnpHardwareQuery;
    use nicwatch::{Daemon, NetshApplier, ProcessInstaller, Services};

    let services = Services {
        query: Arc::new(PnpHardwareQuery::new(WindowsDeviceTree)),
        installer: Arc::new(ProcessInstaller::new(&config.installer, cdrom_drive_roots)),
        applier: Arc::new(NetshApplier),
        store,
        host,
    };

    Daemon::new(config, services).run(&UsbDeviceWatcher, running)
}

#[cfg(not(target_os = "windows"))]
fn run_daemon(_config: Config, _store: Arc<FileConfigStore>, _host: HostInfo, _running: Arc<AtomicBool>) -> Result<()> {
    Err(Error::Unsupported("NicWatch only runs on Windows".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_mode_keeps_the_config_path() {
        let args = Args::try_parse_from(["NicWatch", "--service", "--config", "C:\\NicWatch\\nicwatch.toml"]).unwrap();
        assert!(args.service);
        assert_eq!(args.config_path(), PathBuf::from("C:\\NicWatch\\nicwatch.toml"));
    }

    #[test]
    fn service_mode_cannot_print_config() {
        assert!(Args::try_parse_from(["NicWatch", "--service", "--print-config"]).is_err());
    }
}
