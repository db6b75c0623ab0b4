//! Job objects promoted to application silos.
//!
//! A silo is the only container the redirection service can hang a private mapping table
//! on. Promotion must happen before any process is assigned to the job.

use crate::config::types::{BindError, Result};
use crate::scope::ScopeOptions;
use crate::service::status;
use std::path::Path;
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
use windows_sys::Win32::System::JobObjects::{
    CreateJobObjectW, JobObjectExtendedLimitInformation, SetInformationJobObject,
    JOBOBJECTINFOCLASS, JOBOBJECT_EXTENDED_LIMIT_INFORMATION, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
};

/// Information class that converts a job into an application silo
const JOB_OBJECT_CREATE_SILO: JOBOBJECTINFOCLASS = 35;

fn subject() -> &'static Path {
    Path::new("job object")
}

pub(crate) fn create_job() -> Result<HANDLE> {
    // SAFETY: null attributes and name request an anonymous job with default security.
    let job = unsafe { CreateJobObjectW(std::ptr::null(), std::ptr::null()) };
    if job.is_null() {
        return Err(status::last_error("CreateJobObjectW", subject()));
    }
    Ok(job)
}

pub(crate) fn configure_job(job: HANDLE, options: &ScopeOptions) -> Result<()> {
    if options.terminate_children_on_close {
        // SAFETY: JOBOBJECT_EXTENDED_LIMIT_INFORMATION is plain data; all-zero is a valid value.
        let mut info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = unsafe { std::mem::zeroed() };
        info.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
        // SAFETY: `info` outlives the call and the length matches its type.
        let ok = unsafe {
            SetInformationJobObject(
                job,
                JobObjectExtendedLimitInformation,
                &info as *const _ as *const _,
                std::mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
            )
        };
        if ok == 0 {
            return Err(status::last_error("SetInformationJobObject", subject()));
        }
    }

    if options.private_mapping_table {
        // SAFETY: silo creation takes no input buffer.
        let ok =
            unsafe { SetInformationJobObject(job, JOB_OBJECT_CREATE_SILO, std::ptr::null(), 0) };
        if ok == 0 {
            let err = status::last_error("SetInformationJobObject(CreateSilo)", subject());
            return Err(match err {
                BindError::InvalidParameter(_) | BindError::Unsupported(_) => {
                    BindError::Unsupported(
                        "application silos are not available on this system".to_string(),
                    )
                }
                other => other,
            });
        }
    }
    Ok(())
}

/// Close the job handle. With kill-on-close set this terminates every process inside.
pub(crate) fn close_job(job: HANDLE) -> Result<()> {
    // SAFETY: the handle came from `create_job` and is closed exactly once by its Scope.
    let ok = unsafe { CloseHandle(job) };
    if ok == 0 {
        return Err(status::last_error("CloseHandle(job)", subject()));
    }
    Ok(())
}
