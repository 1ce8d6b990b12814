//! Script orchestrator: the pipeline itself. Reads source, drives source
//! utilities, the cache provider, the compiler backend, and the dynamic
//! loader, invoking the plugin engine between every phase. Runs the
//! resulting artifact by dynamically loading a shared object and calling
//! into it in-process, rather than spawning a freshly built executable as a
//! child process — the one exception is `--debug`, which still compiles an
//! executable and execs it under a debugger.

use std::ffi::CString;
use std::fs;
use std::io::Write;
use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};

use libloading::Library;
use log::{debug, info};

use crate::cache::CacheProvider;
use crate::compiler::CompilerBackend;
use crate::config::{self, ConfigState, MODE_DEBUG_LAUNCH, MODE_DRY_RUN, MODE_FORCE_COMPILE, MODE_PRESERVE_SOURCE};
use crate::consts::ENTRY_SYMBOL;
use crate::ctypes::{HookPoint, HookResult};
use crate::error::{CrispyError, Result};
use crate::plugin::{HookContext, PluginEngine};
use crate::platform::Stopwatch;
use crate::source::SourceArtifact;

type EntryFn = unsafe extern "C" fn(c_int, *const *const c_char) -> c_int;

/// What to do with the input provided by the caller.
pub enum Input {
    File(PathBuf),
    Expr,
    Stdin,
}

/// Mode flags. Surface syntax is front-end specific; the orchestrator only
/// sees the resolved booleans.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModeFlags {
    pub force_compile: bool,
    pub preserve_source: bool,
    pub dry_run: bool,
    pub debug_launch: bool,
}

impl ModeFlags {
    /// Overlays config-provided mode flags under any flag the front end
    /// didn't explicitly set.
    fn merged_with_config(mut self, config: &ConfigState) -> Self {
        if !self.force_compile && config.mode_is_set(MODE_FORCE_COMPILE) {
            self.force_compile = config.mode_value(MODE_FORCE_COMPILE);
        }
        if !self.preserve_source && config.mode_is_set(MODE_PRESERVE_SOURCE) {
            self.preserve_source = config.mode_value(MODE_PRESERVE_SOURCE);
        }
        if !self.dry_run && config.mode_is_set(MODE_DRY_RUN) {
            self.dry_run = config.mode_value(MODE_DRY_RUN);
        }
        if !self.debug_launch && config.mode_is_set(MODE_DEBUG_LAUNCH) {
            self.debug_launch = config.mode_value(MODE_DEBUG_LAUNCH);
        }
        self
    }
}

pub struct ScriptOrchestrator<'a> {
    compiler: &'a dyn CompilerBackend,
    cache: &'a dyn CacheProvider,
    plugins: Option<&'a mut PluginEngine>,
    config: ConfigState,
    modes: ModeFlags,

    input: Input,
    source: SourceArtifact,
    argv: Vec<String>,

    temp_source: Option<PathBuf>,
    module: Option<Library>,
}

impl<'a> ScriptOrchestrator<'a> {
    pub fn from_file(
        path: PathBuf,
        argv: Vec<String>,
        compiler: &'a dyn CompilerBackend,
        cache: &'a dyn CacheProvider,
        plugins: Option<&'a mut PluginEngine>,
        config: ConfigState,
        modes: ModeFlags,
    ) -> Result<Self> {
        let text = fs::read_to_string(&path).map_err(CrispyError::Io)?;
        let source = SourceArtifact::from_text(text);
        Ok(ScriptOrchestrator {
            compiler,
            cache,
            plugins,
            modes: modes.merged_with_config(&config),
            config,
            input: Input::File(path),
            source,
            argv,
            temp_source: None,
            module: None,
        })
    }

    pub fn from_inline_expr(
        fragment: &str,
        extra_includes: Vec<String>,
        argv: Vec<String>,
        compiler: &'a dyn CompilerBackend,
        cache: &'a dyn CacheProvider,
        plugins: Option<&'a mut PluginEngine>,
        config: ConfigState,
        modes: ModeFlags,
    ) -> Self {
        let source = SourceArtifact::from_inline_expr(fragment, &extra_includes);
        ScriptOrchestrator {
            compiler,
            cache,
            plugins,
            modes: modes.merged_with_config(&config),
            config,
            input: Input::Expr,
            source,
            argv,
            temp_source: None,
            module: None,
        }
    }

    pub fn from_stdin(
        argv: Vec<String>,
        compiler: &'a dyn CompilerBackend,
        cache: &'a dyn CacheProvider,
        plugins: Option<&'a mut PluginEngine>,
        config: ConfigState,
        modes: ModeFlags,
    ) -> Result<Self> {
        use std::io::Read;
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text).map_err(CrispyError::Io)?;
        let source = SourceArtifact::from_text(text);
        Ok(ScriptOrchestrator {
            compiler,
            cache,
            plugins,
            modes: modes.merged_with_config(&config),
            config,
            input: Input::Stdin,
            source,
            argv,
            temp_source: None,
            module: None,
        })
    }

    fn source_path(&self) -> Option<&Path> {
        match &self.input {
            Input::File(p) => Some(p),
            Input::Expr | Input::Stdin => None,
        }
    }

    fn dispatch(&mut self, point: HookPoint, ctx: &mut HookContext) -> HookResult {
        match &mut self.plugins {
            Some(engine) => engine.dispatch(point, ctx),
            None => HookResult::Continue,
        }
    }

    /// Runs the pipeline to completion, returning the entry symbol's exit
    /// code on success. Any phase failure returns `Err` immediately rather
    /// than an out-of-band sentinel value.
    pub fn run(&mut self) -> Result<i32> {
        let mut ctx = HookContext::new();
        ctx.source_path = self.source_path().map(|p| p.to_path_buf());
        ctx.cache_dir = Some(self.cache.cache_dir().to_path_buf());

        // Phase 1: source loaded.
        let sw = Stopwatch::start();
        ctx.phase_micros = sw.elapsed_micros();
        if self.dispatch(HookPoint::SourceLoaded, &mut ctx) != HookResult::Continue {
            return self.abort(&ctx);
        }
        if let Some(replacement) = ctx.take_replaced_source() {
            info!("plugin replaced effective source ({} bytes)", replacement.len());
            self.source.replace_effective(replacement);
        }

        // Phase 2: params expanded.
        let sw = Stopwatch::start();
        let expanded = crate::source::shell_expand(self.source.directive.as_deref())?;
        ctx.phase_micros = sw.elapsed_micros();
        if self.dispatch(HookPoint::ParamsExpanded, &mut ctx) != HookResult::Continue {
            return self.abort(&ctx);
        }

        // Phase 3: hash computed.
        let combined_flags = config::join_flags(&[
            &self.config.default_flags,
            &expanded,
            &self.config.override_flags,
        ]);
        let hash = self.cache.compute_hash(
            self.source.original.as_bytes(),
            Some(&combined_flags),
            self.compiler.version(),
        );
        ctx.hash = Some(hash.clone());
        if self.dispatch(HookPoint::HashComputed, &mut ctx) != HookResult::Continue {
            return self.abort(&ctx);
        }
        debug!("combined flags: {:?}, hash: {}", combined_flags, hash);

        // Phase 4: cache checked.
        let mut is_hit = !self.modes.force_compile && self.cache.has_valid(&hash, self.source_path());
        let cache_checked_result = self.dispatch(HookPoint::CacheChecked, &mut ctx);
        if cache_checked_result == HookResult::Abort {
            return self.abort(&ctx);
        }
        if ctx.force_recompile || cache_checked_result == HookResult::ForceRecompile {
            is_hit = false;
        }

        let artifact_path = self.cache.path_for_hash(&hash);

        if !is_hit {
            // Phase 5: temp source write.
            let mut tmp = tempfile::Builder::new()
                .prefix("crispy-src-")
                .suffix(".c")
                .tempfile()
                .map_err(CrispyError::Io)?;
            tmp.write_all(self.source.effective.as_bytes()).map_err(CrispyError::Io)?;
            let (_, tmp_path) = tmp.keep().map_err(|e| CrispyError::Io(e.error))?;
            self.temp_source = Some(tmp_path.clone());
            crate::signal::set_in_flight_temp(Some(tmp_path.clone()));

            // Phase 6: dry-run short-circuit.
            if self.modes.dry_run {
                println!(
                    "would compile {} -> {} with flags: {}",
                    tmp_path.display(),
                    artifact_path.display(),
                    combined_flags
                );
                return Ok(0);
            }

            // Phase 7: debug short-circuit. Replaces the process; never
            // returns on success.
            if self.modes.debug_launch {
                let exe_path = artifact_path.with_extension("dbg");
                self.compiler
                    .compile_executable(&tmp_path, &exe_path, &combined_flags)?;
                return self.exec_debugger(&exe_path);
            }

            // Phase 8: pre-compile.
            let sw = Stopwatch::start();
            if self.dispatch(HookPoint::PreCompile, &mut ctx) != HookResult::Continue {
                return self.abort(&ctx);
            }
            let final_flags = config::join_flags(&[
                &self.config.default_flags,
                &expanded,
                &ctx.extra_flags,
                &self.config.override_flags,
            ]);
            self.compiler.compile_shared(&tmp_path, &artifact_path, &final_flags)?;
            ctx.phase_micros = sw.elapsed_micros();

            // Phase 9: post-compile.
            if self.dispatch(HookPoint::PostCompile, &mut ctx) != HookResult::Continue {
                return self.abort(&ctx);
            }
        }

        // Phase 10: module load.
        let lib = load_lazy(&artifact_path)
            .map_err(|e| CrispyError::Load { path: artifact_path.clone(), message: e })?;
        self.module = Some(lib);

        // Phase 11: module loaded.
        if self.dispatch(HookPoint::ModuleLoaded, &mut ctx) != HookResult::Continue {
            return self.abort(&ctx);
        }

        // Phase 12: resolve entry.
        let entry: libloading::Symbol<EntryFn> = unsafe {
            self.module
                .as_ref()
                .unwrap()
                .get(ENTRY_SYMBOL)
                .map_err(|_| CrispyError::NoEntry { path: artifact_path.clone() })?
        };

        // Phase 13: pre-execute.
        ctx.argv = Some(self.full_argv());
        if self.dispatch(HookPoint::PreExecute, &mut ctx) != HookResult::Continue {
            return self.abort(&ctx);
        }
        let run_argv = ctx.argv.take().unwrap_or_else(|| self.full_argv());

        // Phase 14: execute.
        let exit_code = invoke_entry(entry, &run_argv);

        // Phase 15: post-execute.
        ctx.exit_code = Some(exit_code);
        self.dispatch(HookPoint::PostExecute, &mut ctx);

        Ok(exit_code)
    }

    fn full_argv(&self) -> Vec<String> {
        let name = match &self.input {
            Input::File(p) => p.to_string_lossy().into_owned(),
            Input::Expr => "expr".to_string(),
            Input::Stdin => "stdin".to_string(),
        };
        std::iter::once(name).chain(self.argv.iter().cloned()).collect()
    }

    fn abort(&self, ctx: &HookContext) -> Result<i32> {
        Err(CrispyError::Plugin(
            ctx.error_message.clone().unwrap_or_else(|| "aborted by plugin".to_string()),
        ))
    }

    #[cfg(unix)]
    fn exec_debugger(&self, exe_path: &Path) -> Result<i32> {
        use std::os::unix::process::CommandExt;
        let err = std::process::Command::new("gdb")
            .arg("--args")
            .arg(exe_path)
            .args(&self.argv)
            .exec();
        Err(CrispyError::Load {
            path: exe_path.to_path_buf(),
            message: format!("failed to exec debugger: {}", err),
        })
    }

    #[cfg(not(unix))]
    fn exec_debugger(&self, exe_path: &Path) -> Result<i32> {
        let status = std::process::Command::new("gdb")
            .arg("--args")
            .arg(exe_path)
            .args(&self.argv)
            .status()
            .map_err(|e| CrispyError::Load { path: exe_path.to_path_buf(), message: e.to_string() })?;
        Ok(status.code().unwrap_or(1))
    }
}

impl<'a> Drop for ScriptOrchestrator<'a> {
    fn drop(&mut self) {
        self.module.take();
        if let Some(path) = self.temp_source.take() {
            if !self.modes.preserve_source {
                let _ = fs::remove_file(&path);
            }
        }
        crate::signal::set_in_flight_temp(None);
    }
}

/// Opens a shared object with lazy symbol binding. `libloading::Library::new`
/// defaults to `RTLD_NOW` on most platforms, so this goes through the
/// unix-specific constructor to get `RTLD_LAZY` explicitly.
#[cfg(unix)]
fn load_lazy(path: &Path) -> std::result::Result<Library, String> {
    use libloading::os::unix::Library as UnixLibrary;
    UnixLibrary::open(Some(path), libc::RTLD_LAZY | libc::RTLD_LOCAL)
        .map(Library::from)
        .map_err(|e| e.to_string())
}

#[cfg(not(unix))]
fn load_lazy(path: &Path) -> std::result::Result<Library, String> {
    unsafe { Library::new(path) }.map_err(|e| e.to_string())
}

fn invoke_entry(entry: libloading::Symbol<EntryFn>, argv: &[String]) -> i32 {
    let cstrings: Vec<CString> = argv.iter().map(|s| CString::new(s.as_str()).unwrap_or_default()).collect();
    let mut ptrs: Vec<*const c_char> = cstrings.iter().map(|c| c.as_ptr()).collect();
    let argc = ptrs.len() as c_int;
    unsafe { entry(argc, ptrs.as_mut_ptr()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_flags_merge_only_fills_unset() {
        let mut config = ConfigState::default();
        config.mode_flags = MODE_FORCE_COMPILE | MODE_DRY_RUN;
        config.mode_flags_set = MODE_FORCE_COMPILE | MODE_DRY_RUN;

        let explicit = ModeFlags { dry_run: false, ..Default::default() };
        let merged = explicit.merged_with_config(&config);
        assert!(merged.force_compile);
        assert!(merged.dry_run);
    }

    #[test]
    fn explicit_flag_wins_over_config() {
        let mut config = ConfigState::default();
        config.mode_flags_set = MODE_FORCE_COMPILE;
        config.mode_flags = 0; // config says "off, but explicitly set"

        let explicit = ModeFlags { force_compile: true, ..Default::default() };
        let merged = explicit.merged_with_config(&config);
        assert!(merged.force_compile);
    }
}
