//! Loader image-cache correction.
//!
//! System libraries under the image-cache roots are normally mapped from pre-built sections,
//! which never touch the filesystem and so never see a redirection. Marking the new process
//! as packaged in its PEB makes the loader resolve those libraries through the filesystem.

use crate::config::types::{BindError, Result};
use std::ffi::c_void;
use windows_sys::Wdk::System::Threading::{NtQueryInformationProcess, ProcessBasicInformation};
use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};

/// Offset of the PEB bit-field byte (after three BOOLEANs)
const PEB_BITFIELD_OFFSET: usize = 3;
/// `IsPackagedProcess` in the PEB bit-field
const PEB_IS_PACKAGED_PROCESS: u8 = 0x10;

#[repr(C)]
#[allow(dead_code)]
struct BasicInformation {
    exit_status: i32,
    peb_base_address: *mut c_void,
    affinity_mask: usize,
    base_priority: i32,
    unique_process_id: usize,
    inherited_from_unique_process_id: usize,
}

/// Disable the image-cache fast path in a suspended process.
///
/// # Safety
///
/// `process` must be a valid handle with `PROCESS_QUERY_INFORMATION`, `PROCESS_VM_READ`,
/// `PROCESS_VM_WRITE` and `PROCESS_VM_OPERATION` access, to a process of the same bitness
/// whose primary thread has not yet run.
pub(crate) unsafe fn disable_image_cache_fast_path(process: HANDLE, pid: u32) -> Result<()> {
    let mut info: BasicInformation = std::mem::zeroed();
    let mut returned = 0u32;
    let status = NtQueryInformationProcess(
        process,
        ProcessBasicInformation,
        &mut info as *mut _ as *mut c_void,
        std::mem::size_of::<BasicInformation>() as u32,
        &mut returned,
    );
    if status < 0 || info.peb_base_address.is_null() {
        return Err(BindError::LoaderPatch(format!(
            "NtQueryInformationProcess failed for pid {} (status 0x{:08X})",
            pid, status as u32
        )));
    }

    let field = (info.peb_base_address as *const u8).add(PEB_BITFIELD_OFFSET) as *const c_void;
    let mut bits = 0u8;
    let mut transferred = 0usize;
    let read = ReadProcessMemory(
        process,
        field,
        &mut bits as *mut u8 as *mut c_void,
        1,
        &mut transferred,
    );
    if read == 0 || transferred != 1 {
        return Err(BindError::LoaderPatch(format!(
            "failed to read loader flags of pid {}: {}",
            pid,
            std::io::Error::last_os_error()
        )));
    }
    if bits & PEB_IS_PACKAGED_PROCESS != 0 {
        return Ok(());
    }

    bits |= PEB_IS_PACKAGED_PROCESS;
    let written = WriteProcessMemory(
        process,
        field,
        &bits as *const u8 as *const c_void,
        1,
        &mut transferred,
    );
    if written == 0 || transferred != 1 {
        return Err(BindError::LoaderPatch(format!(
            "failed to write loader flags of pid {}: {}",
            pid,
            std::io::Error::last_os_error()
        )));
    }
    log::debug!("Set loader bit-field 0x{:02X} in pid {}", bits, pid);
    Ok(())
}
