//! `crispy`: compiles and runs `CRISPY_PARAMS`-annotated C sources, caching
//! the compiled shared object by content hash so that repeat runs with
//! unchanged inputs skip straight to loading and invoking the entry symbol.
//!
//! Wiring lives here; every phase of the actual pipeline lives in
//! `orchestrator`. `main` owns logging setup and the human/internal error
//! split at exit; `try_main` owns everything else.

mod cache;
mod compiler;
mod config;
mod consts;
mod ctypes;
mod error;
mod frontend;
mod orchestrator;
mod platform;
mod plugin;
mod signal;
mod source;

use std::io::Write as _;

use log::info;

use cache::FsCache;
use compiler::CcCompiler;
use consts::{DEFAULT_MAX_CACHE_AGE_MS, ENV_NO_CONFIG};
use error::{CrispyError, Result};
use orchestrator::ScriptOrchestrator;
use plugin::PluginEngine;

fn main() {
    env_logger::init();
    signal::install();
    info!("starting");
    info!("args: {:?}", std::env::args().collect::<Vec<_>>());

    match try_main() {
        Ok(code) => std::process::exit(code),
        Err(ref err) if err.is_human() => {
            writeln!(std::io::stderr(), "error: {}", err).ok();
            std::process::exit(1);
        }
        Err(ref err) => {
            writeln!(std::io::stderr(), "internal error: {}", err).ok();
            std::process::exit(1);
        }
    }
}

fn try_main() -> Result<i32> {
    let args = frontend::parse(std::env::args());
    info!("parsed args: {:?}", args);

    let cache_dir = platform::default_cache_dir()?;
    let cache = FsCache::new(cache_dir)?;

    if args.clear_cache {
        cache.purge()?;
        if args.script.is_none() && args.expr.is_none() && !args.stdin {
            println!("crispy cache cleared.");
            return Ok(0);
        }
    } else if let Err(e) = cache.sweep_stale(DEFAULT_MAX_CACHE_AGE_MS) {
        // Opportunistic housekeeping; a failed sweep should never block a run.
        log::warn!("cache sweep failed: {}", e);
    }

    let compiler = CcCompiler::new()?;

    let mut plugin_engine = PluginEngine::new();
    let config = load_config(&compiler, &cache, &mut plugin_engine, &args)?;

    for path in &args.extra_plugins {
        plugin_engine.load(path)?;
    }

    // A configuration artifact may redirect the main pipeline's cache
    // directory; the config artifact itself was necessarily compiled and
    // cached against the default one.
    let overridden_cache;
    let cache: &FsCache = match &config.cache_dir {
        Some(dir) => {
            overridden_cache = FsCache::new(dir.clone())?;
            &overridden_cache
        }
        None => &cache,
    };

    let final_argv = config.argv.clone().unwrap_or_else(|| args.script_args.clone());

    let mut orchestrator = build_orchestrator(&args, &compiler, cache, &mut plugin_engine, config, final_argv)?;

    // Error paths propagate via `?`/`Err` rather than an out-of-band
    // sentinel return code.
    orchestrator.run()
}

fn load_config(
    compiler: &CcCompiler,
    cache: &FsCache,
    plugin_engine: &mut PluginEngine,
    args: &frontend::Args,
) -> Result<config::ConfigState> {
    if std::env::var(ENV_NO_CONFIG).is_ok() {
        info!("config loading disabled via {}", ENV_NO_CONFIG);
        return Ok(config::ConfigState::default());
    }

    let located = config::locate(args.config_path.as_deref());
    let Some(path) = located else {
        info!("no configuration file found");
        return Ok(config::ConfigState::default());
    };

    info!("loading configuration from {}", path.display());
    let (state, lib) = config::compile_and_load(&path, compiler, cache)?;

    // Keep the artifact open for the process's lifetime by leaking the
    // `Library` handle; it is closed implicitly at process exit.
    std::mem::forget(lib);

    for plugin_path in &state.plugin_paths {
        plugin_engine.load(plugin_path)?;
    }

    for (key, value) in &state.plugin_data {
        plugin_engine.shared.set(key, Box::new(value.clone()));
    }

    Ok(state)
}

fn build_orchestrator<'a>(
    args: &frontend::Args,
    compiler: &'a CcCompiler,
    cache: &'a FsCache,
    plugin_engine: &'a mut PluginEngine,
    config: config::ConfigState,
    script_args: Vec<String>,
) -> Result<ScriptOrchestrator<'a>> {
    let modes = args.modes;

    if let Some(expr) = &args.expr {
        return Ok(ScriptOrchestrator::from_inline_expr(
            expr,
            args.extra_includes.clone(),
            script_args,
            compiler,
            cache,
            Some(plugin_engine),
            config,
            modes,
        ));
    }

    if args.stdin {
        return ScriptOrchestrator::from_stdin(script_args, compiler, cache, Some(plugin_engine), config, modes);
    }

    match &args.script {
        Some(path) => ScriptOrchestrator::from_file(
            path.into(),
            script_args,
            compiler,
            cache,
            Some(plugin_engine),
            config,
            modes,
        ),
        None => Err(CrispyError::Config(
            "no script, --expr, or '-' for stdin was given".to_string(),
        )),
    }
}
