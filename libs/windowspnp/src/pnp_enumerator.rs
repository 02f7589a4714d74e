// Copyright (c) ScaleFS LLC; used with permission
// Licensed under the MIT License

use crate::{
    decode_string,
    decode_string_list,
    keep_readable_nodes,
    EnumerateError,
    PnpDeviceNodeInfo,
    PnpDeviceStatus,
};
use windows_sys::{
    core::GUID,
    Win32::Devices::DeviceAndDriverInstallation::{
        CM_Get_DevNode_Status,
        CR_SUCCESS,
        DICS_FLAG_GLOBAL,
        DIGCF_ALLCLASSES,
        DIGCF_PRESENT,
        DIREG_DRV,
        DN_HAS_PROBLEM,
        DN_STARTED,
        HDEVINFO,
        SP_DEVINFO_DATA,
        SetupDiDestroyDeviceInfoList,
        SetupDiEnumDeviceInfo,
        SetupDiGetClassDevsW,
        SetupDiGetDeviceInstanceIdW,
        SetupDiGetDevicePropertyW,
        SetupDiOpenDevRegKey,
    },
    Win32::Devices::Properties::{
        DEVPKEY_Device_DeviceDesc,
        DEVPKEY_Device_HardwareIds,
        DEVPROPKEY,
        DEVPROP_TYPE_STRING,
        DEVPROP_TYPE_STRING_LIST,
    },
    Win32::Foundation::{
        GetLastError,
        ERROR_FILE_NOT_FOUND,
        ERROR_INSUFFICIENT_BUFFER,
        ERROR_INVALID_DATA,
        ERROR_NOT_FOUND,
        ERROR_NO_MORE_ITEMS,
        INVALID_HANDLE_VALUE,
    },
    Win32::System::Registry::{
        RegCloseKey,
        RegQueryValueExW,
        HKEY,
        KEY_READ,
        REG_SZ,
    },
};

// owns a device info set for the duration of one enumeration pass
struct DeviceInfoSet(HDEVINFO);
impl Drop for DeviceInfoSet {
    fn drop(&mut self) {
        let destroy_result = unsafe { SetupDiDestroyDeviceInfoList(self.0) };
        debug_assert!(destroy_result != 0, "Could not clean up device info set; win32 error: {}", unsafe { GetLastError() });
    }
}

struct RegistryKey(HKEY);
impl Drop for RegistryKey {
    fn drop(&mut self) {
        unsafe { RegCloseKey(self.0) };
    }
}

pub struct PnpEnumerator {
}
//
impl PnpEnumerator {
    /// Enumerates every present device node (all setup classes).
    ///
    /// Nodes that cannot be read (typically because they were removed during the pass) are skipped.
    pub fn enumerate_present_devices() -> Result<Vec<PnpDeviceNodeInfo>, EnumerateError> {
        let mut node_results = Vec::<Result<PnpDeviceNodeInfo, EnumerateError>>::new();

        PnpEnumerator::for_each_present_device(|device_info_set, devinfo_data| {
            node_results.push(read_device_node(device_info_set, devinfo_data));
            Ok(true)
        })?;

        Ok(keep_readable_nodes(node_results))
    }

    /// Reads a string value from the driver ("software") registry key of a present device,
    /// e.g. NetCfgInstanceId for network adapters. Returns None if the device or the value is absent.
    pub fn read_driver_key_string(device_instance_id: &str, value_name: &str) -> Result<Option<String>, EnumerateError> {
        let mut value: Option<String> = None;

        PnpEnumerator::for_each_present_device(|device_info_set, devinfo_data| {
            let this_instance_id = get_device_instance_id_from_devinfo_data(device_info_set, devinfo_data)?;
            if !this_instance_id.eq_ignore_ascii_case(device_instance_id) {
                return Ok(true);
            }

            // see: https://learn.microsoft.com/en-us/windows/win32/api/setupapi/nf-setupapi-setupdiopendevregkey
            let hkey = unsafe { SetupDiOpenDevRegKey(device_info_set, devinfo_data, DICS_FLAG_GLOBAL, 0, DIREG_DRV, KEY_READ) };
            if hkey as isize == INVALID_HANDLE_VALUE as isize {
                // no driver key yet (drivers not installed); not an error for our callers
                return Ok(false);
            }
            let driver_key = RegistryKey(hkey);
            value = query_registry_string(&driver_key, value_name)?;
            Ok(false)
        })?;

        Ok(value)
    }

    // calls visit for each present device; visit returns Ok(false) to stop early
    fn for_each_present_device<F>(mut visit: F) -> Result<(), EnumerateError>
    where
        F: FnMut(HDEVINFO, &mut SP_DEVINFO_DATA) -> Result<bool, EnumerateError>,
    {
        // see: https://docs.microsoft.com/en-us/windows/win32/api/setupapi/nf-setupapi-setupdigetclassdevsw
        let handle_to_device_info_set = unsafe { SetupDiGetClassDevsW(std::ptr::null(), std::ptr::null(), std::ptr::null_mut(), DIGCF_PRESENT | DIGCF_ALLCLASSES) };
        if handle_to_device_info_set as isize == INVALID_HANDLE_VALUE as isize {
            return Err(EnumerateError::Win32Error(unsafe { GetLastError() }));
        }
        let device_info_set = DeviceInfoSet(handle_to_device_info_set);

        // NOTE: the upper bound is a placeholder; the loop exits on ERROR_NO_MORE_ITEMS
        for device_index in 0..u32::MAX {
            let mut devinfo_data: SP_DEVINFO_DATA = SP_DEVINFO_DATA { cbSize: 0, ClassGuid: GUID::from_u128(0), DevInst: 0, Reserved: 0 };
            devinfo_data.cbSize = std::mem::size_of::<SP_DEVINFO_DATA>() as u32;

            // see: https://learn.microsoft.com/en-us/windows/win32/api/setupapi/nf-setupapi-setupdienumdeviceinfo
            let enum_device_info_result = unsafe { SetupDiEnumDeviceInfo(device_info_set.0, device_index, &mut devinfo_data) };
            if enum_device_info_result == 0 {
                let win32_error = unsafe { GetLastError() };
                if win32_error == ERROR_NO_MORE_ITEMS {
                    break;
                }
                return Err(EnumerateError::Win32Error(win32_error));
            }

            if !visit(device_info_set.0, &mut devinfo_data)? {
                break;
            }
        }

        Ok(())
    }
}

fn read_device_node(device_info_set: HDEVINFO, devinfo_data: &SP_DEVINFO_DATA) -> Result<PnpDeviceNodeInfo, EnumerateError> {
    let device_instance_id = get_device_instance_id_from_devinfo_data(device_info_set, devinfo_data)?;

    // devices without hardware ids (or without a description) are legal
    let hardware_ids = match get_device_instance_property_buffer(device_info_set, devinfo_data, &DEVPKEY_Device_HardwareIds, DEVPROP_TYPE_STRING_LIST)? {
        Some(buffer) => decode_string_list(&buffer)?,
        None => Vec::new(),
    };
    let device_description = match get_device_instance_property_buffer(device_info_set, devinfo_data, &DEVPKEY_Device_DeviceDesc, DEVPROP_TYPE_STRING)? {
        Some(buffer) => Some(decode_string(&buffer)?),
        None => None,
    };
    let status = get_devnode_status(devinfo_data.DevInst);

    Ok(PnpDeviceNodeInfo {
        device_instance_id,
        hardware_ids,
        device_description,
        status,
    })
}

fn get_device_instance_id_from_devinfo_data(handle_to_device_info_set: HDEVINFO, devinfo_data: &SP_DEVINFO_DATA) -> Result<String, EnumerateError> {
    // ask for the required size first; ERROR_INSUFFICIENT_BUFFER is the expected (induced) error
    // see: https://learn.microsoft.com/en-us/windows/win32/api/setupapi/nf-setupapi-setupdigetdeviceinstanceidw
    let mut required_size: u32 = 0;
    let get_device_instance_id_result = unsafe { SetupDiGetDeviceInstanceIdW(handle_to_device_info_set, devinfo_data, std::ptr::null_mut(), 0, &mut required_size) };
    if get_device_instance_id_result == 0 {
        let win32_error = unsafe { GetLastError() };
        if win32_error != ERROR_INSUFFICIENT_BUFFER {
            return Err(EnumerateError::Win32Error(win32_error));
        }
    } else {
        // device ids are null terminated and can never be zero characters long
        return Err(EnumerateError::Win32Error(ERROR_INVALID_DATA));
    }
    if required_size == 0 {
        return Err(EnumerateError::Win32Error(ERROR_INVALID_DATA));
    }

    let mut device_instance_id_as_utf16_chars = vec![0u16; required_size as usize];
    let get_device_instance_id_result = unsafe { SetupDiGetDeviceInstanceIdW(handle_to_device_info_set, devinfo_data, device_instance_id_as_utf16_chars.as_mut_ptr(), required_size, std::ptr::null_mut()) };
    if get_device_instance_id_result == 0 {
        return Err(EnumerateError::Win32Error(unsafe { GetLastError() }));
    }

    // NOTE: the device instance id is null-terminated, so we omit the final character
    Ok(String::from_utf16(&device_instance_id_as_utf16_chars[0..((required_size as usize) - 1)])?)
}

// returns Ok(None) when the device does not carry the property
fn get_device_instance_property_buffer(device_info_set: HDEVINFO, devinfo_data: &SP_DEVINFO_DATA, property_key: &DEVPROPKEY, expected_property_type: u32) -> Result<Option<Vec<u8>>, EnumerateError> {
    // see: https://learn.microsoft.com/en-us/windows/win32/api/setupapi/nf-setupapi-setupdigetdevicepropertyw
    let mut property_type: u32 = 0;
    let mut required_size: u32 = 0;
    let get_device_property_result = unsafe { SetupDiGetDevicePropertyW(device_info_set, devinfo_data, property_key, &mut property_type, std::ptr::null_mut(), 0, &mut required_size, 0) };
    if get_device_property_result == 0 {
        let win32_error = unsafe { GetLastError() };
        match win32_error {
            ERROR_INSUFFICIENT_BUFFER => {
                // expected; we now know required_size
            },
            ERROR_NOT_FOUND => {
                return Ok(None);
            },
            _ => {
                return Err(EnumerateError::Win32Error(win32_error));
            }
        }
    } else if required_size > 0 {
        return Err(EnumerateError::Win32Error(ERROR_INVALID_DATA));
    }

    if property_type != expected_property_type {
        return Err(EnumerateError::UnexpectedPropertyType(property_type));
    }

    let mut property_buffer = vec![0u8; required_size as usize];
    let get_device_property_result = unsafe { SetupDiGetDevicePropertyW(device_info_set, devinfo_data, property_key, &mut property_type, property_buffer.as_mut_ptr(), required_size, std::ptr::null_mut(), 0) };
    if get_device_property_result == 0 {
        return Err(EnumerateError::Win32Error(unsafe { GetLastError() }));
    }

    Ok(Some(property_buffer))
}

fn get_devnode_status(devinst: u32) -> Option<PnpDeviceStatus> {
    // see: https://learn.microsoft.com/en-us/windows/win32/api/cfgmgr32/nf-cfgmgr32-cm_get_devnode_status
    let mut status_flags: u32 = 0;
    let mut problem_number: u32 = 0;
    let cm_result = unsafe { CM_Get_DevNode_Status(&mut status_flags, &mut problem_number, devinst, 0) };
    if cm_result != CR_SUCCESS {
        return None;
    }

    Some(PnpDeviceStatus::from_devnode_flags(status_flags, problem_number, DN_STARTED, DN_HAS_PROBLEM))
}

fn query_registry_string(key: &RegistryKey, value_name: &str) -> Result<Option<String>, EnumerateError> {
    let value_name_as_utf16_chars: Vec<u16> = value_name.encode_utf16().chain(std::iter::once(0)).collect();

    // see: https://learn.microsoft.com/en-us/windows/win32/api/winreg/nf-winreg-regqueryvalueexw
    let mut value_type: u32 = 0;
    let mut required_size: u32 = 0;
    let query_result = unsafe { RegQueryValueExW(key.0, value_name_as_utf16_chars.as_ptr(), std::ptr::null(), &mut value_type, std::ptr::null_mut(), &mut required_size) };
    if query_result == ERROR_FILE_NOT_FOUND {
        return Ok(None);
    }
    if query_result != 0 {
        return Err(EnumerateError::Win32Error(query_result));
    }
    if value_type != REG_SZ {
        return Err(EnumerateError::UnexpectedPropertyType(value_type));
    }

    let mut value_buffer = vec![0u8; required_size as usize];
    let query_result = unsafe { RegQueryValueExW(key.0, value_name_as_utf16_chars.as_ptr(), std::ptr::null(), &mut value_type, value_buffer.as_mut_ptr(), &mut required_size) };
    if query_result != 0 {
        return Err(EnumerateError::Win32Error(query_result));
    }
    value_buffer.truncate(required_size as usize);

    // REG_SZ values written by some drivers lack the terminator
    if value_buffer.len() < 2 || value_buffer[value_buffer.len() - 2..] != [0, 0] {
        value_buffer.extend_from_slice(&[0, 0]);
    }

    Ok(Some(decode_string(&value_buffer)?))
}
