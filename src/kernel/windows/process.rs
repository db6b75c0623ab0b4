//! Process creation bound to a job at creation time.

use crate::config::types::Result;
use crate::kernel::wide;
use crate::scope::{CommandSpec, ProcessToken};
use crate::service::status;
use std::ffi::c_void;
use std::path::Path;
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, WAIT_FAILED};
use windows_sys::Win32::System::Threading::{
    CreateProcessW, DeleteProcThreadAttributeList, GetExitCodeProcess,
    InitializeProcThreadAttributeList, ResumeThread, UpdateProcThreadAttribute,
    WaitForSingleObject, CREATE_SUSPENDED,
    EXTENDED_STARTUPINFO_PRESENT, INFINITE, LPPROC_THREAD_ATTRIBUTE_LIST, PROCESS_INFORMATION,
    STARTUPINFOEXW, STARTUPINFOW,
};

/// Attribute carrying the job list a new process is created into
const PROC_THREAD_ATTRIBUTE_JOB_LIST: usize = 0x0002_000D;

/// Owned, initialized attribute list holding one job handle
struct JobAttributeList {
    // usize storage keeps the list pointer-aligned
    storage: Vec<usize>,
    job: Box<HANDLE>,
}

impl JobAttributeList {
    fn new(job: HANDLE) -> Result<Self> {
        let mut size = 0usize;
        // SAFETY: a null list with a size pointer only queries the required size; the call
        // is expected to fail with ERROR_INSUFFICIENT_BUFFER.
        unsafe { InitializeProcThreadAttributeList(std::ptr::null_mut(), 1, 0, &mut size) };
        let words = size.div_ceil(std::mem::size_of::<usize>());
        let mut list = Self {
            storage: vec![0usize; words.max(1)],
            job: Box::new(job),
        };

        // SAFETY: storage is at least `size` bytes and aligned for the list.
        let ok = unsafe { InitializeProcThreadAttributeList(list.as_ptr(), 1, 0, &mut size) };
        if ok == 0 {
            list.storage.clear();
            return Err(status::last_error(
                "InitializeProcThreadAttributeList",
                Path::new("attribute list"),
            ));
        }

        // SAFETY: the job handle is boxed so its address stays valid for the list's lifetime.
        let ok = unsafe {
            UpdateProcThreadAttribute(
                list.as_ptr(),
                0,
                PROC_THREAD_ATTRIBUTE_JOB_LIST,
                &*list.job as *const HANDLE as *const c_void,
                std::mem::size_of::<HANDLE>(),
                std::ptr::null_mut(),
                std::ptr::null(),
            )
        };
        if ok == 0 {
            let err = status::last_error("UpdateProcThreadAttribute", Path::new("attribute list"));
            // SAFETY: the list was initialized above.
            unsafe { DeleteProcThreadAttributeList(list.as_ptr()) };
            list.storage.clear();
            return Err(err);
        }
        Ok(list)
    }

    fn as_ptr(&mut self) -> LPPROC_THREAD_ATTRIBUTE_LIST {
        self.storage.as_mut_ptr() as LPPROC_THREAD_ATTRIBUTE_LIST
    }
}

impl Drop for JobAttributeList {
    fn drop(&mut self) {
        if !self.storage.is_empty() {
            // SAFETY: the list was initialized in `new` and is deleted exactly once.
            unsafe { DeleteProcThreadAttributeList(self.as_ptr()) };
        }
    }
}

/// Create `command` inside `job` with its primary thread suspended
pub(crate) fn spawn_in_job(job: HANDLE, command: &CommandSpec) -> Result<ProcessToken> {
    let mut attributes = JobAttributeList::new(job)?;

    let application = wide::to_wide_nul(&command.program)?;
    let mut command_line: Vec<u16> = command.command_line().encode_utf16().collect();
    command_line.push(0);
    let current_dir = match &command.current_dir {
        Some(dir) => Some(wide::to_wide_nul(dir)?),
        None => None,
    };

    // SAFETY: STARTUPINFOEXW and PROCESS_INFORMATION are plain data; all-zero is valid.
    let mut startup: STARTUPINFOEXW = unsafe { std::mem::zeroed() };
    startup.StartupInfo.cb = std::mem::size_of::<STARTUPINFOEXW>() as u32;
    startup.lpAttributeList = attributes.as_ptr();
    let mut info: PROCESS_INFORMATION = unsafe { std::mem::zeroed() };

    // SAFETY: every string is NUL-terminated and outlives the call; the command line buffer
    // is writable as CreateProcessW requires; the attribute list is initialized.
    let ok = unsafe {
        CreateProcessW(
            application.as_ptr(),
            command_line.as_mut_ptr(),
            std::ptr::null(),
            std::ptr::null(),
            0,
            CREATE_SUSPENDED | EXTENDED_STARTUPINFO_PRESENT,
            std::ptr::null(),
            current_dir.as_ref().map_or(std::ptr::null(), |d| d.as_ptr()),
            &startup.StartupInfo as *const STARTUPINFOW,
            &mut info,
        )
    };
    if ok == 0 {
        return Err(status::last_error("CreateProcessW", &command.program));
    }

    Ok(ProcessToken {
        pid: info.dwProcessId,
        process: info.hProcess as usize,
        thread: info.hThread as usize,
    })
}

pub(crate) fn resume(process: ProcessToken) -> Result<()> {
    // SAFETY: the thread handle is owned by the LaunchedProcess that holds this token.
    let previous = unsafe { ResumeThread(process.thread as HANDLE) };
    if previous == u32::MAX {
        return Err(status::last_error("ResumeThread", Path::new("process")));
    }
    Ok(())
}

pub(crate) fn wait(process: ProcessToken) -> Result<u32> {
    let handle = process.process as HANDLE;
    // SAFETY: valid process handle, owned by the caller.
    if unsafe { WaitForSingleObject(handle, INFINITE) } == WAIT_FAILED {
        return Err(status::last_error("WaitForSingleObject", Path::new("process")));
    }
    let mut code = 0u32;
    // SAFETY: `code` is a valid out pointer.
    if unsafe { GetExitCodeProcess(handle, &mut code) } == 0 {
        return Err(status::last_error("GetExitCodeProcess", Path::new("process")));
    }
    Ok(code)
}

pub(crate) fn close(process: ProcessToken) {
    for handle in [process.thread, process.process] {
        // SAFETY: both handles were returned by CreateProcessW and are closed only here.
        if unsafe { CloseHandle(handle as HANDLE) } == 0 {
            log::warn!(
                "Failed to close handle for pid {}: {}",
                process.pid,
                std::io::Error::last_os_error()
            );
        }
    }
}
