//! Hook context. Two layers: `HookContext` is the safe, owned record the
//! orchestrator and plugin engine pass around in-process; `HookContextFfi`
//! is the `#[repr(C)]` view handed across the dynamic-library boundary to
//! each plugin callback, converted to and from `HookContext` immediately
//! before/after the call.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::path::PathBuf;

use crate::ctypes::HookPoint;

/// Mutable record carried through the pipeline and repopulated before each
/// hook dispatch. Constructed empty by the orchestrator, discarded when it
/// returns.
#[derive(Debug, Default)]
pub struct HookContext {
    pub hook_point: Option<HookPoint>,

    // Read-only pipeline state.
    pub source_path: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    pub hash: Option<String>,
    pub compiler_version: Option<String>,
    pub phase_micros: u64,

    // Mutable: replace the effective source before compilation.
    pub effective_source: Option<String>,
    pub source_replaced: bool,

    // Mutable: inject additional compiler flags (PRE_COMPILE).
    pub extra_flags: String,

    // Mutable: replace the argument vector passed to the entry symbol.
    pub argv: Option<Vec<String>>,

    // Mutable: request recompilation after a cache hit.
    pub force_recompile: bool,

    // Populated by a plugin that aborts dispatch; read by the orchestrator
    // to build the surfaced `CrispyError::Plugin`.
    pub error_message: Option<String>,

    // POST_EXECUTE only.
    pub exit_code: Option<i32>,

    /// Opaque per-plugin token, swapped in before each plugin's callback and
    /// copied back after.
    pub plugin_data: *mut c_void,
}

impl HookContext {
    pub fn new() -> Self {
        HookContext {
            plugin_data: std::ptr::null_mut(),
            ..Default::default()
        }
    }

    /// Adopt a hook-replaced effective source if it actually differs from
    /// the current one.
    pub fn take_replaced_source(&mut self) -> Option<String> {
        if self.source_replaced {
            self.source_replaced = false;
            self.effective_source.take()
        } else {
            None
        }
    }
}

/// The `#[repr(C)]` view of `HookContext` passed by raw pointer to a
/// plugin's `crispy_plugin_on_<hook>` callback. Strings are NUL-terminated
/// and owned by whichever side most recently wrote them; a callback that
/// wants to replace `effective_source`, `extra_flags`, or `argv` writes a
/// freshly allocated C string/array into the corresponding field and leaves
/// the rest untouched.
#[repr(C)]
pub struct HookContextFfi {
    pub hook_point: HookPoint,
    pub engine: *mut c_void,
    pub plugin_data: *mut c_void,

    pub source_path: *const c_char,
    pub cache_dir: *const c_char,
    pub hash: *const c_char,
    pub compiler_version: *const c_char,
    pub phase_micros: u64,

    pub effective_source: *mut c_char,
    pub effective_source_replaced: i32,

    pub extra_flags: *mut c_char,

    pub argv: *mut *mut c_char,
    pub argc: i32,
    pub argv_replaced: i32,

    pub force_recompile: i32,
    pub error_message: *mut c_char,
    pub exit_code: i32,
}

/// Owns the `CString`s backing a `HookContextFfi` for the duration of one
/// callback invocation, so the raw pointers in the struct stay valid.
pub struct FfiStrings {
    pub source_path: Option<CString>,
    pub cache_dir: Option<CString>,
    pub hash: Option<CString>,
    pub compiler_version: Option<CString>,
    pub effective_source: Option<CString>,
    pub extra_flags: CString,
    pub argv_entries: Vec<CString>,
    pub argv_ptrs: Vec<*mut c_char>,
}

impl HookContext {
    /// Build the raw view and the `CString`s that back it. The returned
    /// `FfiStrings` must outlive the call into the plugin.
    pub fn to_ffi(&self, engine: *mut c_void) -> (HookContextFfi, FfiStrings) {
        let mut strings = FfiStrings {
            source_path: self
                .source_path
                .as_ref()
                .map(|p| CString::new(p.to_string_lossy().as_bytes()).unwrap_or_default()),
            cache_dir: self
                .cache_dir
                .as_ref()
                .map(|p| CString::new(p.to_string_lossy().as_bytes()).unwrap_or_default()),
            hash: self.hash.as_ref().map(|h| CString::new(h.as_str()).unwrap_or_default()),
            compiler_version: self
                .compiler_version
                .as_ref()
                .map(|v| CString::new(v.as_str()).unwrap_or_default()),
            effective_source: self
                .effective_source
                .as_ref()
                .map(|s| CString::new(s.as_str()).unwrap_or_default()),
            extra_flags: CString::new(self.extra_flags.as_str()).unwrap_or_default(),
            argv_entries: self
                .argv
                .as_ref()
                .map(|argv| {
                    argv.iter()
                        .map(|a| CString::new(a.as_str()).unwrap_or_default())
                        .collect()
                })
                .unwrap_or_default(),
            argv_ptrs: Vec::new(),
        };
        strings.argv_ptrs = strings.argv_entries.iter().map(|c| c.as_ptr() as *mut c_char).collect();
        let argv_len = strings.argv_ptrs.len();

        let ffi = HookContextFfi {
            hook_point: self.hook_point.unwrap_or(HookPoint::SourceLoaded),
            engine,
            plugin_data: self.plugin_data,
            source_path: strings
                .source_path
                .as_ref()
                .map(|c| c.as_ptr())
                .unwrap_or(std::ptr::null()),
            cache_dir: strings
                .cache_dir
                .as_ref()
                .map(|c| c.as_ptr())
                .unwrap_or(std::ptr::null()),
            hash: strings.hash.as_ref().map(|c| c.as_ptr()).unwrap_or(std::ptr::null()),
            compiler_version: strings
                .compiler_version
                .as_ref()
                .map(|c| c.as_ptr())
                .unwrap_or(std::ptr::null()),
            phase_micros: self.phase_micros,
            effective_source: strings
                .effective_source
                .as_ref()
                .map(|c| c.as_ptr() as *mut c_char)
                .unwrap_or(std::ptr::null_mut()),
            effective_source_replaced: 0,
            extra_flags: strings.extra_flags.as_ptr() as *mut c_char,
            argv: if argv_len == 0 {
                std::ptr::null_mut()
            } else {
                strings.argv_ptrs.as_mut_ptr()
            },
            argc: argv_len as i32,
            argv_replaced: 0,
            force_recompile: self.force_recompile as i32,
            error_message: std::ptr::null_mut(),
            exit_code: self.exit_code.unwrap_or(0),
        };

        (ffi, strings)
    }

    /// Copy mutable fields a callback may have changed back into `self`.
    /// Only `plugin_data`, `effective_source` (if `effective_source_replaced`
    /// is set), `extra_flags`, `force_recompile`, and `error_message` are
    /// read back; read-only fields are ignored even if a misbehaving plugin
    /// wrote to them.
    ///
    /// # Safety
    /// `ffi` must be the same value last passed into a plugin callback, and
    /// any non-null string/array pointers it carries must point at
    /// NUL-terminated data the plugin allocated and intends to hand off.
    pub unsafe fn apply_ffi(&mut self, ffi: &HookContextFfi) {
        self.plugin_data = ffi.plugin_data;
        self.force_recompile = self.force_recompile || ffi.force_recompile != 0;

        if ffi.effective_source_replaced != 0 && !ffi.effective_source.is_null() {
            let replaced = CStr::from_ptr(ffi.effective_source).to_string_lossy().into_owned();
            if Some(&replaced) != self.effective_source.as_ref() {
                self.effective_source = Some(replaced);
                self.source_replaced = true;
            }
        }

        if !ffi.extra_flags.is_null() {
            let flags = CStr::from_ptr(ffi.extra_flags).to_string_lossy().into_owned();
            if flags != self.extra_flags {
                self.extra_flags = flags;
            }
        }

        if !ffi.error_message.is_null() {
            self.error_message = Some(CStr::from_ptr(ffi.error_message).to_string_lossy().into_owned());
        }

        if ffi.argv_replaced != 0 && !ffi.argv.is_null() && ffi.argc >= 0 {
            let mut argv = Vec::with_capacity(ffi.argc as usize);
            for i in 0..ffi.argc as isize {
                let ptr = *ffi.argv.offset(i);
                if ptr.is_null() {
                    break;
                }
                argv.push(CStr::from_ptr(ptr).to_string_lossy().into_owned());
            }
            self.argv = Some(argv);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_extra_flags() {
        let mut ctx = HookContext::new();
        ctx.extra_flags = "-DX=1".to_string();
        let (ffi, _strings) = ctx.to_ffi(std::ptr::null_mut());
        let mut ctx2 = HookContext::new();
        unsafe { ctx2.apply_ffi(&ffi) };
        assert_eq!(ctx2.extra_flags, "-DX=1");
    }

    #[test]
    fn exposes_current_argv_to_callback() {
        let mut ctx = HookContext::new();
        ctx.argv = Some(vec!["prog".to_string(), "arg1".to_string()]);
        let (ffi, _strings) = ctx.to_ffi(std::ptr::null_mut());
        assert_eq!(ffi.argc, 2);
        assert!(!ffi.argv.is_null());
    }

    #[test]
    fn ignores_unreplaced_source() {
        let ctx = HookContext::new();
        let (ffi, _strings) = ctx.to_ffi(std::ptr::null_mut());
        let mut ctx2 = HookContext::new();
        unsafe { ctx2.apply_ffi(&ffi) };
        assert!(!ctx2.source_replaced);
    }
}
