//! Plugin engine: loads dynamic plugins, resolves hook symbols, dispatches
//! callbacks in load order, and owns the shared key-value data store
//! plugins use to communicate. The plugin contract is a flat C ABI: rather
//! than a boxed trait object, each plugin exports up to nine individual hook
//! symbols plus an optional init/shutdown pair.

pub mod context;

use std::collections::HashMap;
use std::ffi::{c_void, CStr};
use std::path::{Path, PathBuf};

use libloading::Library;
use libloading::os::unix::Symbol as RawSymbol;

use crate::consts::{PLUGIN_INFO_SYMBOL, PLUGIN_INIT_SYMBOL, PLUGIN_SHUTDOWN_SYMBOL};
use crate::ctypes::{HookInitFn, HookPoint, HookResult, HookShutdownFn, PluginDescriptor};
use crate::error::{CrispyError, Result};

pub use context::HookContext;

type HookFn = unsafe extern "C" fn(*mut context::HookContextFfi) -> HookResult;

/// One loaded plugin: library handle, descriptor, opaque state, hook table.
///
/// SAFETY: `_lib` must outlive every other field, since `hooks`, `init`, and
/// `shutdown` are raw symbols borrowed from it. Rust drops fields in
/// declaration order, so `_lib` is declared last.
pub struct PluginEntry {
    pub path: PathBuf,
    pub name: String,
    pub description: String,
    pub version: String,
    pub author: String,
    pub license: String,

    state: *mut c_void,
    shutdown: Option<RawSymbol<HookShutdownFn>>,
    hooks: HashMap<HookPoint, RawSymbol<HookFn>>,

    _lib: Library,
}

impl PluginEntry {
    fn hook(&self, point: HookPoint) -> Option<&RawSymbol<HookFn>> {
        self.hooks.get(&point)
    }
}

impl Drop for PluginEntry {
    fn drop(&mut self) {
        if let Some(shutdown) = &self.shutdown {
            unsafe { shutdown(self.state) };
        }
    }
}

// The plugin's own state pointer is only ever touched while holding the
// engine by `&mut`, same as every other field here.
unsafe impl Send for PluginEntry {}

/// A set/get pair keyed by string, with replace semantics: setting a key
/// frees the old value via its destructor.
pub struct SharedData {
    entries: HashMap<String, Box<dyn std::any::Any>>,
}

impl SharedData {
    fn new() -> Self {
        SharedData {
            entries: HashMap::new(),
        }
    }

    /// Replaces any existing value under `key`; the prior value's `Drop`
    /// impl runs as its destructor.
    pub fn set(&mut self, key: &str, value: Box<dyn std::any::Any>) {
        self.entries.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&dyn std::any::Any> {
        self.entries.get(key).map(|v| v.as_ref())
    }
}

impl Default for SharedData {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns an ordered collection of plugin entries and the shared data store.
#[derive(Default)]
pub struct PluginEngine {
    entries: Vec<PluginEntry>,
    pub shared: SharedData,
}

impl PluginEngine {
    pub fn new() -> Self {
        PluginEngine::default()
    }

    /// Load a single plugin by path. Fails with `CrispyError::Plugin` if the
    /// library cannot be opened or the mandatory descriptor is absent.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let entry = unsafe { load_one(path) }?;
        self.entries.push(entry);
        Ok(())
    }

    /// Load a delimiter-separated list of plugin paths (both `:` and `,` are
    /// accepted separators), stopping at the first failure.
    pub fn load_list(&mut self, list: &str) -> Result<()> {
        for part in list.split([':', ',']).filter(|p| !p.is_empty()) {
            self.load(Path::new(part))?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dispatch a hook point. Walks entries in load order; for each with a
    /// non-null callback at this point, swaps in that entry's opaque token,
    /// invokes the callback, copies the (possibly updated) token back. Stops
    /// and returns the first non-`Continue` result.
    pub fn dispatch(&mut self, point: HookPoint, ctx: &mut HookContext) -> HookResult {
        ctx.hook_point = Some(point);
        let engine_ptr: *mut c_void = self as *mut PluginEngine as *mut c_void;

        for entry in &mut self.entries {
            let Some(hook) = entry.hook(point) else {
                continue;
            };

            ctx.plugin_data = entry.state;
            let (mut ffi, _strings) = ctx.to_ffi(engine_ptr);
            let result = unsafe { hook(&mut ffi as *mut context::HookContextFfi) };
            unsafe { ctx.apply_ffi(&ffi) };
            entry.state = ctx.plugin_data;

            if result != HookResult::Continue {
                return result;
            }
        }

        HookResult::Continue
    }
}

unsafe fn load_one(path: &Path) -> Result<PluginEntry> {
    let lib = Library::new(path).map_err(|e| {
        CrispyError::Plugin(format!("failed to open plugin {}: {}", path.display(), e))
    })?;

    let info: libloading::Symbol<*const PluginDescriptor> =
        lib.get(PLUGIN_INFO_SYMBOL).map_err(|_| {
            CrispyError::Plugin(format!(
                "plugin {} is missing the crispy_plugin_info descriptor",
                path.display()
            ))
        })?;
    let descriptor = &**info;
    let name = cstr_to_string(descriptor.name);
    let description = cstr_to_string(descriptor.description);
    let version = cstr_to_string(descriptor.version);
    let author = cstr_to_string(descriptor.author);
    let license = cstr_to_string(descriptor.license);
    drop(info);

    let state = match lib.get::<HookInitFn>(PLUGIN_INIT_SYMBOL) {
        Ok(init) => init(),
        Err(_) => std::ptr::null_mut(),
    };

    let shutdown = lib
        .get::<HookShutdownFn>(PLUGIN_SHUTDOWN_SYMBOL)
        .ok()
        .map(|s| s.into_raw());

    let mut hooks = HashMap::new();
    for point in HookPoint::ALL {
        if let Ok(sym) = lib.get::<HookFn>(point.symbol_name().as_bytes()) {
            hooks.insert(point, sym.into_raw());
        }
    }

    Ok(PluginEntry {
        path: path.to_path_buf(),
        name,
        description,
        version,
        author,
        license,
        state,
        shutdown,
        hooks,
        _lib: lib,
    })
}

fn cstr_to_string(ptr: *const std::os::raw::c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr).to_string_lossy().into_owned() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_engine_dispatch_is_continue() {
        let mut engine = PluginEngine::new();
        let mut ctx = HookContext::new();
        assert_eq!(
            engine.dispatch(HookPoint::PreCompile, &mut ctx),
            HookResult::Continue
        );
    }

    #[test]
    fn load_list_splits_on_both_delimiters() {
        // No real plugins on disk in this test environment; loading a
        // nonexistent path must fail with a Plugin error, not panic, and
        // the split itself must still produce two attempts.
        let mut engine = PluginEngine::new();
        let err = engine.load_list("/nonexistent/a.so:/nonexistent/b.so").unwrap_err();
        assert!(matches!(err, CrispyError::Plugin(_)));
    }
}
