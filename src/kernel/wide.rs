//! Conversions between Rust paths and OS-native wide (UTF-16) strings.

use crate::config::types::{BindError, Result};
use std::path::{Path, PathBuf};

/// Encode a path as UTF-16 without a terminator
#[cfg(windows)]
pub fn encode(path: &Path) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt;
    path.as_os_str().encode_wide().collect()
}

#[cfg(not(windows))]
pub fn encode(path: &Path) -> Vec<u16> {
    path.to_string_lossy().encode_utf16().collect()
}

/// Encode a path as a NUL-terminated UTF-16 string for an OS call.
///
/// Interior NULs would silently truncate the path on the other side, so they are rejected.
pub fn to_wide_nul(path: &Path) -> Result<Vec<u16>> {
    let mut wide = encode(path);
    if wide.contains(&0) {
        return Err(BindError::InvalidParameter(format!(
            "path contains NUL: {}",
            path.display()
        )));
    }
    wide.push(0);
    Ok(wide)
}

/// Decode UTF-16 units into a path
#[cfg(windows)]
pub fn decode(units: &[u16]) -> PathBuf {
    use std::os::windows::ffi::OsStringExt;
    PathBuf::from(std::ffi::OsString::from_wide(units))
}

#[cfg(not(windows))]
pub fn decode(units: &[u16]) -> PathBuf {
    PathBuf::from(String::from_utf16_lossy(units))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nul_terminated() {
        let wide = to_wide_nul(Path::new("D:\\a")).unwrap();
        assert_eq!(wide.last(), Some(&0));
        assert_eq!(decode(&wide[..wide.len() - 1]), PathBuf::from("D:\\a"));
    }

    #[test]
    fn test_interior_nul_rejected() {
        assert!(to_wide_nul(Path::new("D:\\a\0b")).is_err());
    }
}
