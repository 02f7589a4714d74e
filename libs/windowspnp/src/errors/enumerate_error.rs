// Copyright (c) ScaleFS LLC; used with permission
// Licensed under the MIT License

#[derive(Debug, thiserror::Error)]
pub enum EnumerateError {
    #[error("invalid UTF-16 in device property: {0}")]
    StringDecodingError(#[from] std::string::FromUtf16Error),
    #[error("device property string is not null-terminated")]
    StringTerminationDecodingError,
    #[error("unexpected device property type {0:#x}")]
    UnexpectedPropertyType(u32),
    #[error("win32 error {0}")]
    Win32Error(u32),
}
