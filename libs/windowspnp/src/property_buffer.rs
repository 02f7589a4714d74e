// Copyright (c) ScaleFS LLC; used with permission
// Licensed under the MIT License

use crate::EnumerateError;

// setupapi hands back property data as raw bytes; strings are little-endian utf-16
fn buffer_to_utf16_chars(property_buffer: &[u8]) -> Vec<u16> {
    property_buffer
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Decodes a DEVPROP_TYPE_STRING buffer (a single null-terminated utf-16 string).
pub fn decode_string(property_buffer: &[u8]) -> Result<String, EnumerateError> {
    let chars = buffer_to_utf16_chars(property_buffer);
    let terminator_index = chars
        .iter()
        .position(|&c| c == 0)
        .ok_or(EnumerateError::StringTerminationDecodingError)?;

    Ok(String::from_utf16(&chars[..terminator_index])?)
}

/// Decodes a DEVPROP_TYPE_STRING_LIST buffer (REG_MULTI_SZ layout: strings
/// separated by nulls, the list closed by an extra null).
pub fn decode_string_list(property_buffer: &[u8]) -> Result<Vec<String>, EnumerateError> {
    let chars = buffer_to_utf16_chars(property_buffer);
    if chars.last() != Some(&0) {
        return Err(EnumerateError::StringTerminationDecodingError);
    }

    let mut strings = Vec::new();
    // NOTE: split yields an empty segment after the final terminator (and for the list terminator itself); those are not values
    for segment in chars[..chars.len() - 1].split(|&c| c == 0) {
        if segment.is_empty() {
            continue;
        }
        strings.push(String::from_utf16(segment)?);
    }

    Ok(strings)
}
