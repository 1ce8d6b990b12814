//! Configuration loader: runs a one-shot mini-pipeline to turn a
//! user-authored configuration source file into harvested settings, using
//! the same source/hash/cache/compiler components the main pipeline uses.

use std::ffi::CStr;
use std::fs;
use std::path::{Path, PathBuf};

use libloading::Library;

use crate::cache::CacheProvider;
use crate::compiler::CompilerBackend;
use crate::consts::{CONFIG_INIT_SYMBOL, ENV_CONFIG_FILE};
use crate::error::{CrispyError, Result};
use crate::source;

pub const MODE_FORCE_COMPILE: u32 = 1 << 0;
pub const MODE_PRESERVE_SOURCE: u32 = 1 << 1;
pub const MODE_DRY_RUN: u32 = 1 << 2;
pub const MODE_DEBUG_LAUNCH: u32 = 1 << 3;

/// Settings harvested from the configuration initializer. Stack-allocated
/// per run by the caller, cleared once the orchestrator has consumed it.
#[derive(Debug, Default, Clone)]
pub struct ConfigState {
    pub default_flags: String,
    pub override_flags: String,
    pub cache_dir: Option<PathBuf>,
    pub mode_flags: u32,
    pub mode_flags_set: u32,
    pub plugin_paths: Vec<PathBuf>,
    pub plugin_data: Vec<(String, String)>,
    pub argv: Option<Vec<String>>,
}

impl ConfigState {
    pub fn mode_is_set(&self, bit: u32) -> bool {
        self.mode_flags_set & bit != 0
    }

    pub fn mode_value(&self, bit: u32) -> bool {
        self.mode_flags & bit != 0
    }
}

/// The `#[repr(C)]` record a configuration artifact's initializer fills in
/// directly. All pointer fields are populated by the config library and
/// read out once; we never write through them.
#[repr(C)]
pub struct ConfigStateFfi {
    pub default_flags: *mut std::os::raw::c_char,
    pub override_flags: *mut std::os::raw::c_char,
    pub cache_dir: *mut std::os::raw::c_char,
    pub mode_flags: u32,
    pub mode_flags_set: u32,
    pub plugin_paths: *mut *mut std::os::raw::c_char,
    pub plugin_paths_len: i32,
    pub plugin_data_keys: *mut *mut std::os::raw::c_char,
    pub plugin_data_values: *mut *mut std::os::raw::c_char,
    pub plugin_data_len: i32,
    pub argv: *mut *mut std::os::raw::c_char,
    pub argc: i32,
    pub argv_replaced: i32,
}

impl Default for ConfigStateFfi {
    fn default() -> Self {
        ConfigStateFfi {
            default_flags: std::ptr::null_mut(),
            override_flags: std::ptr::null_mut(),
            cache_dir: std::ptr::null_mut(),
            mode_flags: 0,
            mode_flags_set: 0,
            plugin_paths: std::ptr::null_mut(),
            plugin_paths_len: 0,
            plugin_data_keys: std::ptr::null_mut(),
            plugin_data_values: std::ptr::null_mut(),
            plugin_data_len: 0,
            argv: std::ptr::null_mut(),
            argc: 0,
            argv_replaced: 0,
        }
    }
}

type ConfigInitFn = unsafe extern "C" fn(*mut ConfigStateFfi) -> bool;

/// Locates a configuration source file by probing, in order: `$CRISPY_CONFIG_FILE`,
/// an explicit caller-supplied path, the per-user config dir, the system
/// config dir, the system data dir. Returns the first that resolves to a
/// regular file.
pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var(ENV_CONFIG_FILE) {
        let p = PathBuf::from(env_path);
        if p.is_file() {
            return Some(p);
        }
    }

    if let Some(p) = explicit {
        if p.is_file() {
            return Some(p.to_path_buf());
        }
    }

    if let Some(dirs) = directories::ProjectDirs::from("", "", "crispy") {
        let user = dirs.config_dir().join("config.c");
        if user.is_file() {
            return Some(user);
        }
    }

    for sys in ["/etc/crispy/config.c", "/usr/share/crispy/config.c"] {
        let p = PathBuf::from(sys);
        if p.is_file() {
            return Some(p);
        }
    }

    None
}

/// Compiles (if needed), loads, and invokes a configuration artifact,
/// returning both the harvested state and the still-open `Library`. The
/// caller keeps the library open for the lifetime of the process so that
/// any symbols it exposes remain valid.
pub fn compile_and_load(
    path: &Path,
    compiler: &dyn CompilerBackend,
    cache: &dyn CacheProvider,
) -> Result<(ConfigState, Library)> {
    let text = fs::read_to_string(path).map_err(CrispyError::Io)?;
    let directive = source::extract_directive(&text);
    let expanded = source::shell_expand(directive.as_deref())?;
    let (effective, _len) = source::strip_header(&text);

    let include_flag = umbrella_include_flag();
    let flags = join_nonempty(&[&include_flag, &expanded]);

    let hash = cache.compute_hash(text.as_bytes(), Some(&flags), compiler.version());
    let artifact_path = cache.path_for_hash(&hash);

    if !cache.has_valid(&hash, Some(path)) {
        let tmp = tempfile::Builder::new()
            .prefix("crispy-config-")
            .suffix(".c")
            .tempfile()
            .map_err(CrispyError::Io)?;
        fs::write(tmp.path(), &effective).map_err(CrispyError::Io)?;
        compiler
            .compile_shared(tmp.path(), &artifact_path, &flags)
            .map_err(|e| match e {
                CrispyError::Compile { message, command } => {
                    CrispyError::Config(format!("failed to compile config: {} ({})", message, command))
                }
                other => other,
            })?;
    }

    let lib = unsafe { Library::new(&artifact_path) }
        .map_err(|e| CrispyError::Config(format!("failed to load config artifact: {}", e)))?;

    let init: libloading::Symbol<ConfigInitFn> = unsafe { lib.get(CONFIG_INIT_SYMBOL) }
        .map_err(|_| CrispyError::Config("config artifact has no crispy_config_init".into()))?;

    let mut raw = ConfigStateFfi::default();
    let applied = unsafe { init(&mut raw as *mut ConfigStateFfi) };
    drop(init);

    if !applied {
        return Err(CrispyError::Config(format!(
            "{} did not apply its settings",
            path.display()
        )));
    }

    let state = unsafe { harvest(&raw) };
    Ok((state, lib))
}

/// Reads out the populated `ConfigStateFfi` into an owned `ConfigState`.
///
/// # Safety
/// `raw` must have been populated by a `crispy_config_init` call that
/// returned `true`; every non-null pointer it carries must point at
/// NUL-terminated (or NUL-terminated-array) data valid for this call.
unsafe fn harvest(raw: &ConfigStateFfi) -> ConfigState {
    ConfigState {
        default_flags: cstr_or_empty(raw.default_flags),
        override_flags: cstr_or_empty(raw.override_flags),
        cache_dir: nonnull_cstr(raw.cache_dir).map(PathBuf::from),
        mode_flags: raw.mode_flags,
        mode_flags_set: raw.mode_flags_set,
        plugin_paths: read_cstr_array(raw.plugin_paths, raw.plugin_paths_len)
            .into_iter()
            .map(PathBuf::from)
            .collect(),
        plugin_data: {
            let keys = read_cstr_array(raw.plugin_data_keys, raw.plugin_data_len);
            let values = read_cstr_array(raw.plugin_data_values, raw.plugin_data_len);
            keys.into_iter().zip(values).collect()
        },
        argv: if raw.argv_replaced != 0 {
            Some(read_cstr_array(raw.argv, raw.argc))
        } else {
            None
        },
    }
}

unsafe fn cstr_or_empty(ptr: *mut std::os::raw::c_char) -> String {
    nonnull_cstr(ptr).unwrap_or_default()
}

unsafe fn nonnull_cstr(ptr: *mut std::os::raw::c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

unsafe fn read_cstr_array(ptr: *mut *mut std::os::raw::c_char, len: i32) -> Vec<String> {
    if ptr.is_null() || len <= 0 {
        return Vec::new();
    }
    (0..len as isize)
        .map(|i| cstr_or_empty(*ptr.offset(i)))
        .collect()
}

/// Development mode probes a build-time path to the umbrella header;
/// installed mode queries `pkg-config`. We only ever ship installed, so this
/// always takes the `pkg-config` branch; kept as a function (rather than a
/// constant) so a future dev-mode probe has somewhere to go.
fn umbrella_include_flag() -> String {
    std::process::Command::new("pkg-config")
        .arg("--cflags")
        .arg("crispy")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_default()
}

fn join_nonempty(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub use join_nonempty as join_flags;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_nonempty_elides_blank_components() {
        assert_eq!(join_flags(&["-lm", "", "-lpthread"]), "-lm -lpthread");
        assert_eq!(join_flags(&["", ""]), "");
    }

    #[test]
    fn locate_prefers_env_var() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join("config.c");
        std::fs::write(&cfg, "").unwrap();
        std::env::set_var(ENV_CONFIG_FILE, &cfg);
        let found = locate(None);
        std::env::remove_var(ENV_CONFIG_FILE);
        assert_eq!(found, Some(cfg));
    }
}
