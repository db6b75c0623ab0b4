//! Translation of service status codes into [`BindError`].
//!
//! The redirection service reports HRESULTs from its entry points and raw NTSTATUS values
//! inside query buffers. NTSTATUS values are folded into the HRESULT space
//! (`HRESULT_FROM_NT`) so a single table covers both.

use crate::config::types::{BindError, Result};
use std::path::Path;

const FACILITY_NT_BIT: u32 = 0x1000_0000;

const fn from_nt(status: u32) -> u32 {
    status | FACILITY_NT_BIT
}

const fn from_win32(code: u32) -> u32 {
    if code == 0 {
        0
    } else {
        (code & 0xFFFF) | 0x8007_0000
    }
}

pub const E_NOTIMPL: u32 = 0x8000_4001;
pub const E_OUTOFMEMORY: u32 = 0x8007_000E;
pub const E_INVALIDARG: u32 = 0x8007_0057;
pub const E_ACCESSDENIED: u32 = 0x8007_0005;

const INVALID_PARAMETER: &[u32] = &[E_INVALIDARG, from_nt(0xC000_000D), from_win32(87)];
const PATH_NOT_FOUND: &[u32] = &[from_win32(3), from_nt(0xC000_003A)];
const NOT_FOUND: &[u32] = &[
    from_win32(2),
    from_win32(1168),
    from_nt(0xC000_0034),
    from_nt(0xC000_0225),
];
const ALREADY_MAPPED: &[u32] = &[from_win32(183), from_win32(80), from_nt(0xC000_0035)];
const BUFFER_TOO_SMALL: &[u32] = &[
    from_win32(122),
    from_win32(234),
    from_nt(0xC000_0023),
    from_nt(0x8000_0005),
];
const UNSUPPORTED: &[u32] = &[E_NOTIMPL, from_win32(50), from_nt(0xC000_00BB)];
const ACCESS_DENIED: &[u32] = &[
    E_ACCESSDENIED,
    from_win32(1314),
    from_nt(0xC000_0022),
    from_nt(0xC000_0061),
];
const EXHAUSTED: &[u32] = &[
    E_OUTOFMEMORY,
    from_win32(8),
    from_win32(1450),
    from_nt(0xC000_009A),
];

/// Whether an HRESULT denotes success
pub fn succeeded(hr: i32) -> bool {
    hr >= 0
}

/// Map a failing HRESULT from `operation` on `subject` to a typed error.
///
/// `required` is only meaningful for buffer-size failures.
pub fn from_hresult(operation: &'static str, hr: u32, subject: &Path, required: u32) -> BindError {
    let subject_text = subject.display().to_string();
    if INVALID_PARAMETER.contains(&hr) {
        BindError::InvalidParameter(format!("{} rejected {}", operation, subject_text))
    } else if PATH_NOT_FOUND.contains(&hr) {
        BindError::PathNotFound(subject.to_path_buf())
    } else if NOT_FOUND.contains(&hr) {
        BindError::NotFound(subject_text)
    } else if ALREADY_MAPPED.contains(&hr) {
        BindError::AlreadyMapped(subject.to_path_buf())
    } else if BUFFER_TOO_SMALL.contains(&hr) {
        BindError::BufferTooSmall { required }
    } else if UNSUPPORTED.contains(&hr) {
        BindError::Unsupported(format!("{} on {}", operation, subject_text))
    } else if ACCESS_DENIED.contains(&hr) {
        BindError::AccessDenied(format!("{} on {}", operation, subject_text))
    } else if EXHAUSTED.contains(&hr) {
        BindError::ResourceExhausted(format!("{} on {}", operation, subject_text))
    } else {
        BindError::Service { operation, code: hr }
    }
}

/// Map an NTSTATUS stored in a query buffer
pub fn from_ntstatus(
    operation: &'static str,
    status: i32,
    subject: &Path,
    required: u32,
) -> BindError {
    from_hresult(operation, from_nt(status as u32), subject, required)
}

/// Map a Win32 error code (`GetLastError`)
pub fn from_win32_error(operation: &'static str, code: u32, subject: &Path) -> BindError {
    from_hresult(operation, from_win32(code), subject, 0)
}

/// Map the calling thread's last OS error
pub fn last_error(operation: &'static str, subject: &Path) -> BindError {
    let code = std::io::Error::last_os_error().raw_os_error().unwrap_or(0) as u32;
    from_win32_error(operation, code, subject)
}

/// `Ok(())` for a successful HRESULT, otherwise the mapped error
pub fn check(operation: &'static str, hr: i32, subject: &Path) -> Result<()> {
    if succeeded(hr) {
        Ok(())
    } else {
        Err(from_hresult(operation, hr as u32, subject, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ErrorClass;

    #[test]
    fn test_win32_and_nt_families_agree() {
        let p = Path::new("D:\\v");
        assert!(matches!(
            from_hresult("op", 0x8007_0003, p, 0),
            BindError::PathNotFound(_)
        ));
        assert!(matches!(
            from_ntstatus("op", 0xC000_003Au32 as i32, p, 0),
            BindError::PathNotFound(_)
        ));
        assert!(matches!(
            from_hresult("op", 0xD000_000D, p, 0),
            BindError::InvalidParameter(_)
        ));
    }

    #[test]
    fn test_buffer_too_small_carries_required() {
        let err = from_ntstatus("BfGetMappings", 0xC000_0023u32 as i32, Path::new("D:\\"), 512);
        assert_eq!(err.required_capacity(), Some(512));
        assert_eq!(err.class(), ErrorClass::RetryWithCapacity);
    }

    #[test]
    fn test_exhaustion_is_transient() {
        let err = from_hresult("CreateJobObjectW", E_OUTOFMEMORY, Path::new("job"), 0);
        assert_eq!(err.class(), ErrorClass::Transient);
    }

    #[test]
    fn test_unknown_code_preserved() {
        match from_hresult("BfSetupFilter", 0x8000_FFFF, Path::new("D:\\v"), 0) {
            BindError::Service { operation, code } => {
                assert_eq!(operation, "BfSetupFilter");
                assert_eq!(code, 0x8000_FFFF);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_win32_error_codes() {
        let subject = Path::new("job");
        assert!(matches!(
            from_win32_error("CreateJobObjectW", 5, subject),
            BindError::AccessDenied(_)
        ));
        assert!(matches!(
            from_win32_error("CreateProcessW", 2, subject),
            BindError::NotFound(_)
        ));
    }

    #[test]
    fn test_check_success_codes() {
        assert!(check("op", 0, Path::new("x")).is_ok());
        assert!(check("op", 1, Path::new("x")).is_ok());
        assert!(check("op", E_ACCESSDENIED as i32, Path::new("x")).is_err());
    }
}
