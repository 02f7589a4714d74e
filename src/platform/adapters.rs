use crate::error::{Error, Result};
use std::ffi::CStr;
use windows_sys::Win32::{
    Foundation::{ERROR_BUFFER_OVERFLOW, ERROR_NO_DATA, NO_ERROR},
    NetworkManagement::IpHelper::{
        GetAdaptersAddresses, GAA_FLAG_INCLUDE_ALL_INTERFACES, GAA_FLAG_SKIP_ANYCAST,
        GAA_FLAG_SKIP_DNS_SERVER, GAA_FLAG_SKIP_MULTICAST, IP_ADAPTER_ADDRESSES_LH,
    },
    Networking::WinSock::AF_UNSPEC,
};

// recommended starting size; grown on ERROR_BUFFER_OVERFLOW
const INITIAL_BUFFER_SIZE: u32 = 15 * 1024;
const MAX_ATTEMPTS: usize = 3;

/// One row of the IP Helper adapter table.
#[derive(Debug, Clone)]
pub struct AdapterRow {
    /// `{GUID}` matching the device's NetCfgInstanceId
    pub adapter_name: String,
    pub friendly_name: String,
    pub if_index: u32,
}

pub fn adapter_rows() -> Result<Vec<AdapterRow>> {
    let flags = GAA_FLAG_INCLUDE_ALL_INTERFACES
        | GAA_FLAG_SKIP_ANYCAST
        | GAA_FLAG_SKIP_MULTICAST
        | GAA_FLAG_SKIP_DNS_SERVER;
    let mut size = INITIAL_BUFFER_SIZE;

    for _ in 0..MAX_ATTEMPTS {
        // u64 backing keeps the adapter records aligned
        let mut buffer = vec![0u64; (size as usize).div_ceil(8)];
        let first = buffer.as_mut_ptr() as *mut IP_ADAPTER_ADDRESSES_LH;

        // see: https://learn.microsoft.com/en-us/windows/win32/api/iphlpapi/nf-iphlpapi-getadaptersaddresses
        let result = unsafe {
            GetAdaptersAddresses(AF_UNSPEC as u32, flags, std::ptr::null(), first, &mut size)
        };
        match result {
            NO_ERROR => return Ok(unsafe { collect_rows(first) }),
            ERROR_NO_DATA => return Ok(Vec::new()),
            ERROR_BUFFER_OVERFLOW => continue,
            code => {
                return Err(Error::Query(format!(
                    "GetAdaptersAddresses failed; win32 error: {}",
                    code
                )))
            }
        }
    }

    Err(Error::Query("adapter table kept growing".to_string()))
}

// SAFETY: `first` points at a list filled in by GetAdaptersAddresses whose
// backing buffer outlives this call.
unsafe fn collect_rows(first: *const IP_ADAPTER_ADDRESSES_LH) -> Vec<AdapterRow> {
    let mut rows = Vec::new();
    let mut cursor = first;
    while !cursor.is_null() {
        let adapter = &*cursor;
        if !adapter.AdapterName.is_null() {
            rows.push(AdapterRow {
                adapter_name: CStr::from_ptr(adapter.AdapterName as *const _)
                    .to_string_lossy()
                    .into_owned(),
                friendly_name: wide_to_string(adapter.FriendlyName),
                if_index: adapter.Anonymous1.Anonymous.IfIndex,
            });
        }
        cursor = adapter.Next;
    }
    rows
}

unsafe fn wide_to_string(ptr: *const u16) -> String {
    if ptr.is_null() {
        return String::new();
    }
    let mut len = 0;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    String::from_utf16_lossy(std::slice::from_raw_parts(ptr, len))
}
