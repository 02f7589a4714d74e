// Copyright (c) ScaleFS LLC; used with permission
// Licensed under the MIT License

mod enumerate_error;
pub use enumerate_error::EnumerateError;
