use crate::hardware::HostInfo;
use std::path::PathBuf;
use windows_sys::Win32::{
    Storage::FileSystem::{GetDriveTypeW, GetLogicalDrives},
    System::SystemInformation::{GetNativeSystemInfo, GetVersionExW, OSVERSIONINFOW, SYSTEM_INFO},
};

const DRIVE_CDROM: u32 = 5;

const PROCESSOR_ARCHITECTURE_IA64: u16 = 6;
const PROCESSOR_ARCHITECTURE_AMD64: u16 = 9;
const PROCESSOR_ARCHITECTURE_ARM64: u16 = 12;

/// OS version and native bitness.
///
/// GetVersionExW reports the real version only because the embedded manifest
/// declares the supported OS list.
pub fn host_info() -> HostInfo {
    let mut version: OSVERSIONINFOW = unsafe { std::mem::zeroed() };
    version.dwOSVersionInfoSize = std::mem::size_of::<OSVERSIONINFOW>() as u32;
    if unsafe { GetVersionExW(&mut version) } == 0 {
        log::warn!("GetVersionExW failed; assuming a current OS");
        version.dwMajorVersion = 10;
        version.dwMinorVersion = 0;
    }

    let mut system: SYSTEM_INFO = unsafe { std::mem::zeroed() };
    unsafe { GetNativeSystemInfo(&mut system) };
    let architecture = unsafe { system.Anonymous.Anonymous.wProcessorArchitecture };

    HostInfo {
        os_major: version.dwMajorVersion,
        os_minor: version.dwMinorVersion,
        is_64bit: matches!(
            architecture,
            PROCESSOR_ARCHITECTURE_AMD64 | PROCESSOR_ARCHITECTURE_ARM64 | PROCESSOR_ARCHITECTURE_IA64
        ),
    }
}

/// Root directories (`E:\`) of every optical drive.
pub fn cdrom_drive_roots() -> Vec<PathBuf> {
    let mask = unsafe { GetLogicalDrives() };

    (0..26u8)
        .filter(|bit| mask & (1 << bit) != 0)
        .map(|bit| format!("{}:\\", (b'A' + bit) as char))
        .filter(|root| {
            let wide: Vec<u16> = root.encode_utf16().chain(std::iter::once(0)).collect();
            unsafe { GetDriveTypeW(wide.as_ptr()) == DRIVE_CDROM }
        })
        .map(PathBuf::from)
        .collect()
}
