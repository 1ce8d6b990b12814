//! C ABI types shared by the plugin contract: `#[repr(C)]` enums and
//! `libc::c_char` string fields for FFI structs.

use libc::c_char;

/// Result a hook callback returns: continue, abort, or force a recompile.
/// The discriminants are part of the ABI plugins are compiled against, so
/// this must stay `#[repr(C)]`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookResult {
    Continue = 0,
    Abort = 1,
    ForceRecompile = 2,
}

impl Default for HookResult {
    fn default() -> Self {
        HookResult::Continue
    }
}

/// The nine ordered hook points a plugin may implement.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    SourceLoaded = 0,
    ParamsExpanded = 1,
    HashComputed = 2,
    CacheChecked = 3,
    PreCompile = 4,
    PostCompile = 5,
    ModuleLoaded = 6,
    PreExecute = 7,
    PostExecute = 8,
}

impl HookPoint {
    /// All nine hook points, in dispatch order. Used to iterate the
    /// per-plugin callback table.
    pub const ALL: [HookPoint; 9] = [
        HookPoint::SourceLoaded,
        HookPoint::ParamsExpanded,
        HookPoint::HashComputed,
        HookPoint::CacheChecked,
        HookPoint::PreCompile,
        HookPoint::PostCompile,
        HookPoint::ModuleLoaded,
        HookPoint::PreExecute,
        HookPoint::PostExecute,
    ];

    /// The exported symbol name a plugin library must use for this hook,
    /// e.g. `crispy_plugin_on_pre_compile`.
    pub fn symbol_name(self) -> &'static str {
        match self {
            HookPoint::SourceLoaded => "crispy_plugin_on_source_loaded",
            HookPoint::ParamsExpanded => "crispy_plugin_on_params_expanded",
            HookPoint::HashComputed => "crispy_plugin_on_hash_computed",
            HookPoint::CacheChecked => "crispy_plugin_on_cache_checked",
            HookPoint::PreCompile => "crispy_plugin_on_pre_compile",
            HookPoint::PostCompile => "crispy_plugin_on_post_compile",
            HookPoint::ModuleLoaded => "crispy_plugin_on_module_loaded",
            HookPoint::PreExecute => "crispy_plugin_on_pre_execute",
            HookPoint::PostExecute => "crispy_plugin_on_post_execute",
        }
    }
}

/// Mandatory exported descriptor, `crispy_plugin_info`. All fields are
/// NUL-terminated C strings owned by the plugin library itself (its
/// `.rodata`), valid for the library's lifetime — we never free them.
#[repr(C)]
pub struct PluginDescriptor {
    pub name: *const c_char,
    pub description: *const c_char,
    pub version: *const c_char,
    pub author: *const c_char,
    pub license: *const c_char,
}

/// Signature of a hook callback: `extern "C" fn(*mut HookContextFfi) ->
/// HookResult`. The concrete `HookContextFfi` type lives in
/// `plugin::context` to avoid a cycle between this module and the context
/// it describes.
pub type HookInitFn = unsafe extern "C" fn() -> *mut std::ffi::c_void;
pub type HookShutdownFn = unsafe extern "C" fn(*mut std::ffi::c_void);
