//! Redirection service entry points resolved from `bindfltapi.dll` at runtime.
//!
//! The library ships with Windows 10 1903 and later. Only attach, setup, remove and query are
//! required; the `Ex` and batch exports are optional and report `Unsupported` when absent.

use crate::config::types::{BindError, Result};
use crate::kernel::wide;
use crate::mapping::{BatchConfig, MappingFlags, Principal};
use crate::service::backend::{BindBackend, InstallRequest, MappingSelector, QuerySelector};
use crate::service::status;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use windows_sys::Win32::Foundation::{BOOL, HANDLE};
use windows_sys::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};

type BfAttachFilterFn = unsafe extern "system" fn(*const u16, *mut BOOL) -> i32;
type BfSetupFilterFn =
    unsafe extern "system" fn(HANDLE, u32, *const u16, *const u16, *const *const u16, u32) -> i32;
type BfSetupFilterExFn = unsafe extern "system" fn(
    u32,
    HANDLE,
    *mut c_void,
    *const u16,
    *const u16,
    *const *const u16,
    u32,
) -> i32;
type BfRemoveMappingFn = unsafe extern "system" fn(HANDLE, *const u16) -> i32;
type BfRemoveMappingExFn = unsafe extern "system" fn(HANDLE, *mut c_void, *const u16) -> i32;
type BfGetMappingsFn =
    unsafe extern "system" fn(u32, HANDLE, *const u16, *mut c_void, *mut u32, *mut c_void) -> i32;
type BfGenerateBatchedConfigFn =
    unsafe extern "system" fn(*const u16, u32, *mut c_void, *mut u32) -> i32;
type BfSetupFilterBatchedFn = unsafe extern "system" fn(
    HANDLE,
    *mut c_void,
    *mut c_void,
    u32,
    u32,
    *const *const u16,
    u32,
) -> i32;

const LIBRARY: &str = "bindfltapi.dll";

/// Resolved bindfltapi exports
pub struct BindFltService {
    attach_filter: BfAttachFilterFn,
    setup_filter: BfSetupFilterFn,
    setup_filter_ex: Option<BfSetupFilterExFn>,
    remove_mapping: BfRemoveMappingFn,
    remove_mapping_ex: Option<BfRemoveMappingExFn>,
    get_mappings: BfGetMappingsFn,
    generate_batched_config: Option<BfGenerateBatchedConfigFn>,
    setup_filter_batched: Option<BfSetupFilterBatchedFn>,
}

/// Resolve one export, `None` when the library does not provide it
///
/// # Safety
///
/// `T` must be the export's exact function pointer type.
unsafe fn resolve<T: Copy>(module: *mut c_void, name: &'static [u8]) -> Option<T> {
    debug_assert_eq!(name.last(), Some(&0));
    let proc = GetProcAddress(module, name.as_ptr())?;
    Some(std::mem::transmute_copy::<unsafe extern "system" fn() -> isize, T>(&proc))
}

fn required<T>(export: Option<T>, name: &str) -> Result<T> {
    export.ok_or_else(|| BindError::Unsupported(format!("{} does not export {}", LIBRARY, name)))
}

fn optional<T: Copy>(export: Option<T>, name: &str) -> Result<T> {
    export.ok_or_else(|| {
        BindError::Unsupported(format!("{} is not available on this system", name))
    })
}

/// Job handle of a scope selector, null for the global table
fn job_of(selector: &MappingSelector<'_>) -> HANDLE {
    match selector {
        MappingSelector::Scope(scope) => scope.token().raw() as HANDLE,
        MappingSelector::Global | MappingSelector::Principal(_) => std::ptr::null_mut(),
    }
}

/// Writable copy of a SID; the API takes `PSID` without const
fn sid_buffer(principal: &Principal) -> Vec<u8> {
    principal.as_bytes().to_vec()
}

fn wide_list(paths: &[PathBuf]) -> Result<Vec<Vec<u16>>> {
    paths.iter().map(|p| wide::to_wide_nul(p)).collect()
}

impl BindFltService {
    pub fn load() -> Result<Self> {
        let name = wide::to_wide_nul(Path::new(LIBRARY))?;
        // SAFETY: NUL-terminated name; the module stays loaded for the life of the process.
        let module = unsafe { LoadLibraryW(name.as_ptr()) };
        if module.is_null() {
            return Err(BindError::Unsupported(format!(
                "{} could not be loaded: {}",
                LIBRARY,
                std::io::Error::last_os_error()
            )));
        }

        // SAFETY: every type alias matches the export's documented prototype.
        let service = unsafe {
            BindFltService {
                attach_filter: required(resolve(module, b"BfAttachFilter\0"), "BfAttachFilter")?,
                setup_filter: required(resolve(module, b"BfSetupFilter\0"), "BfSetupFilter")?,
                setup_filter_ex: resolve(module, b"BfSetupFilterEx\0"),
                remove_mapping: required(resolve(module, b"BfRemoveMapping\0"), "BfRemoveMapping")?,
                remove_mapping_ex: resolve(module, b"BfRemoveMappingEx\0"),
                get_mappings: required(resolve(module, b"BfGetMappings\0"), "BfGetMappings")?,
                generate_batched_config: resolve(module, b"BfGenerateBatchedConfig\0"),
                setup_filter_batched: resolve(module, b"BfSetupFilterBatched\0"),
            }
        };
        log::debug!(
            "Loaded {} (ex: {}, batch: {})",
            LIBRARY,
            service.setup_filter_ex.is_some(),
            service.setup_filter_batched.is_some()
        );
        Ok(service)
    }
}

impl BindBackend for BindFltService {
    fn backend_name(&self) -> &str {
        "bindflt"
    }

    fn attach(&self, path: &Path) -> Result<bool> {
        let path_w = wide::to_wide_nul(path)?;
        let mut attached: BOOL = 0;
        // SAFETY: NUL-terminated path and a valid out pointer.
        let hr = unsafe { (self.attach_filter)(path_w.as_ptr(), &mut attached) };
        status::check("BfAttachFilter", hr, path)?;
        Ok(attached != 0)
    }

    fn setup(&self, selector: &MappingSelector<'_>, request: &InstallRequest<'_>) -> Result<()> {
        let root = wide::to_wide_nul(request.virtual_root)?;
        let target = wide::to_wide_nul(request.target)?;
        let exceptions = wide_list(request.exceptions)?;
        let exception_ptrs: Vec<*const u16> = exceptions.iter().map(|e| e.as_ptr()).collect();
        let list = if exception_ptrs.is_empty() {
            std::ptr::null()
        } else {
            exception_ptrs.as_ptr()
        };

        // SAFETY: all strings are NUL-terminated and outlive the call; the exception array
        // holds exactly `len` valid pointers.
        let hr = match selector {
            MappingSelector::Principal(principal) => {
                let setup = optional(self.setup_filter_ex, "BfSetupFilterEx")?;
                let mut sid = sid_buffer(principal);
                unsafe {
                    setup(
                        request.flags.bits(),
                        std::ptr::null_mut(),
                        sid.as_mut_ptr() as *mut c_void,
                        root.as_ptr(),
                        target.as_ptr(),
                        list,
                        exception_ptrs.len() as u32,
                    )
                }
            }
            _ => unsafe {
                (self.setup_filter)(
                    job_of(selector),
                    request.flags.bits(),
                    root.as_ptr(),
                    target.as_ptr(),
                    list,
                    exception_ptrs.len() as u32,
                )
            },
        };
        status::check("BfSetupFilter", hr, request.virtual_root)
    }

    fn remove(&self, selector: &MappingSelector<'_>, virtual_root: &Path) -> Result<()> {
        let root = wide::to_wide_nul(virtual_root)?;
        // SAFETY: NUL-terminated root; job handle owned by the selected scope.
        let hr = match selector {
            MappingSelector::Principal(principal) => {
                let remove = optional(self.remove_mapping_ex, "BfRemoveMappingEx")?;
                let mut sid = sid_buffer(principal);
                let sid = sid.as_mut_ptr() as *mut c_void;
                unsafe { remove(std::ptr::null_mut(), sid, root.as_ptr()) }
            }
            _ => unsafe { (self.remove_mapping)(job_of(selector), root.as_ptr()) },
        };
        status::check("BfRemoveMapping", hr, virtual_root)
    }

    fn get_mappings(&self, selector: &QuerySelector<'_>, buffer: &mut [u8]) -> Result<usize> {
        let (job, path_w, mut sid): (HANDLE, Option<Vec<u16>>, Option<Vec<u8>>) = match selector {
            QuerySelector::Volume(p) => (std::ptr::null_mut(), Some(wide::to_wide_nul(p)?), None),
            QuerySelector::Scope(scope) => (scope.token().raw() as HANDLE, None, None),
            QuerySelector::Principal(p) => (std::ptr::null_mut(), None, Some(sid_buffer(p))),
        };
        let mut size = buffer.len() as u32;
        let out = if buffer.is_empty() {
            std::ptr::null_mut()
        } else {
            buffer.as_mut_ptr() as *mut c_void
        };

        // SAFETY: `size` describes `out` exactly; optional inputs are null or NUL-terminated.
        let hr = unsafe {
            (self.get_mappings)(
                selector.flags().bits(),
                job,
                path_w.as_ref().map_or(std::ptr::null(), |w| w.as_ptr()),
                sid.as_mut().map_or(std::ptr::null_mut(), |s| s.as_mut_ptr() as *mut c_void),
                &mut size,
                out,
            )
        };
        if !status::succeeded(hr) {
            let subject = PathBuf::from(selector.describe());
            return Err(status::from_hresult("BfGetMappings", hr as u32, &subject, size));
        }
        Ok((size as usize).min(buffer.len()))
    }

    fn generate_batch(&self, config: &BatchConfig) -> Result<Vec<u8>> {
        let generate = optional(self.generate_batched_config, "BfGenerateBatchedConfig")?;
        let text = config.to_wide();
        let text_bytes = (text.len() * 2) as u32;
        let subject = Path::new("batch configuration");

        let mut size = 0u32;
        // SAFETY: a null output with zero size only reports the size required.
        let hr = unsafe { generate(text.as_ptr(), text_bytes, std::ptr::null_mut(), &mut size) };
        if !status::succeeded(hr) {
            match status::from_hresult("BfGenerateBatchedConfig", hr as u32, subject, size) {
                BindError::BufferTooSmall { .. } => {}
                other => return Err(other),
            }
        }
        if size == 0 {
            return Ok(Vec::new());
        }

        let mut blob = vec![0u8; size as usize];
        // SAFETY: `blob` holds `size` writable bytes.
        let out = blob.as_mut_ptr() as *mut c_void;
        let hr = unsafe { generate(text.as_ptr(), text_bytes, out, &mut size) };
        status::check("BfGenerateBatchedConfig", hr, subject)?;
        blob.truncate(size as usize);
        Ok(blob)
    }

    fn setup_batched(
        &self,
        selector: &MappingSelector<'_>,
        batch: &[u8],
        flags: MappingFlags,
        attach_paths: &[PathBuf],
    ) -> Result<()> {
        let install = optional(self.setup_filter_batched, "BfSetupFilterBatched")?;
        let mut blob = batch.to_vec();
        let mut sid = match selector {
            MappingSelector::Principal(p) => Some(sid_buffer(p)),
            _ => None,
        };
        let attach = wide_list(attach_paths)?;
        let attach_ptrs: Vec<*const u16> = attach.iter().map(|a| a.as_ptr()).collect();

        // SAFETY: blob and attach paths outlive the call; counts match the buffers.
        let hr = unsafe {
            install(
                job_of(selector),
                sid.as_mut().map_or(std::ptr::null_mut(), |s| s.as_mut_ptr() as *mut c_void),
                blob.as_mut_ptr() as *mut c_void,
                blob.len() as u32,
                flags.bits(),
                if attach_ptrs.is_empty() {
                    std::ptr::null()
                } else {
                    attach_ptrs.as_ptr()
                },
                attach_ptrs.len() as u32,
            )
        };
        status::check("BfSetupFilterBatched", hr, Path::new("batch"))
    }
}
