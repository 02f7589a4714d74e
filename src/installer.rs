//! Vendor driver installer and post-install patch launcher.
//!
//! While in CD-ROM mode the adapter exposes the vendor installer in the root
//! of a virtual optical drive. The patch, shipped beside this executable,
//! removes the virtual drive so the adapter comes up as a NIC on later plugs.

use crate::config::InstallerConfig;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

const PATCH_64: &str = "Patch64.exe";
const PATCH_32: &str = "Patch32.exe";
const DEFAULT_PATCH_DIR: &str = "RTL_Patch";

/// Launches installer executables. Both runs are synchronous.
pub trait DriverInstaller: Send + Sync {
    /// Path of the installer on an attached CD-ROM drive, if any.
    fn locate_installer(&self) -> Option<PathBuf>;

    /// Runs the installer and waits for it; returns the exit code.
    fn run_installer(&self, path: &Path) -> Result<i32>;

    /// Runs the bitness-matching patch and waits for it; returns the exit code.
    fn run_patch(&self, os_is_64bit: bool) -> Result<i32>;
}

/// Result of one install attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    Failed,
    NotFound,
}

/// Looks for the installer and runs it. Never fails; the outcome is logged.
pub fn install_from_cdrom(installer: &dyn DriverInstaller) -> InstallOutcome {
    let Some(path) = installer.locate_installer() else {
        log::warn!("Adapter is in CD-ROM mode but no driver installer was found");
        return InstallOutcome::NotFound;
    };

    log::info!("Running driver installer {}", path.display());
    match installer.run_installer(&path) {
        Ok(0) => {
            log::info!("Driver installer finished");
            InstallOutcome::Installed
        }
        Ok(code) => {
            log::warn!("{}", Error::Install(format!("installer exited with code {}", code)));
            InstallOutcome::Failed
        }
        Err(e) => {
            log::warn!("{}", e);
            InstallOutcome::Failed
        }
    }
}

/// Runs the post-install patch. Best-effort; the outcome is only logged.
pub fn apply_patch(installer: &dyn DriverInstaller, os_is_64bit: bool) {
    match installer.run_patch(os_is_64bit) {
        Ok(0) => log::info!("Post-install patch applied"),
        Ok(code) => log::warn!("Post-install patch exited with code {}", code),
        Err(e) => log::warn!("Post-install patch not applied: {}", e),
    }
}

/// `DriverInstaller` that spawns real processes.
pub struct ProcessInstaller {
    installer_file_name: String,
    patch_dir: PathBuf,
    drive_roots: fn() -> Vec<PathBuf>,
}

impl ProcessInstaller {
    /// `drive_roots` lists the root directories of the attached CD-ROM drives.
    pub fn new(config: &InstallerConfig, drive_roots: fn() -> Vec<PathBuf>) -> Self {
        let patch_dir = config.patch_dir.clone().unwrap_or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf))
                .unwrap_or_default()
                .join(DEFAULT_PATCH_DIR)
        });

        Self {
            installer_file_name: config.installer_file_name.clone(),
            patch_dir,
            drive_roots,
        }
    }

    pub fn patch_path(&self, os_is_64bit: bool) -> PathBuf {
        self.patch_dir
            .join(if os_is_64bit { PATCH_64 } else { PATCH_32 })
    }
}

fn run_and_wait(path: &Path) -> Result<i32> {
    let status = Command::new(path)
        .status()
        .map_err(|e| Error::Install(format!("failed to start {}: {}", path.display(), e)))?;
    // no code means the process was killed
    Ok(status.code().unwrap_or(-1))
}

impl DriverInstaller for ProcessInstaller {
    fn locate_installer(&self) -> Option<PathBuf> {
        (self.drive_roots)()
            .into_iter()
            .map(|root| root.join(&self.installer_file_name))
            .find(|candidate| candidate.is_file())
    }

    fn run_installer(&self, path: &Path) -> Result<i32> {
        run_and_wait(path)
    }

    fn run_patch(&self, os_is_64bit: bool) -> Result<i32> {
        run_and_wait(&self.patch_path(os_is_64bit))
    }
}
