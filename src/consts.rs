//! Shared string and numeric constants used across the pipeline.

/// Name of the embedded directive: `#define CRISPY_PARAMS "..."`.
pub const DIRECTIVE_TOKEN: &str = "CRISPY_PARAMS";

/// Entry symbol resolved out of a loaded artifact or config file.
pub const ENTRY_SYMBOL: &[u8] = b"crispy_main";

/// Initializer symbol resolved out of a loaded configuration artifact.
pub const CONFIG_INIT_SYMBOL: &[u8] = b"crispy_config_init";

/// Mandatory plugin descriptor symbol.
pub const PLUGIN_INFO_SYMBOL: &[u8] = b"crispy_plugin_info";

/// Optional plugin lifecycle symbols.
pub const PLUGIN_INIT_SYMBOL: &[u8] = b"crispy_plugin_init";
pub const PLUGIN_SHUTDOWN_SYMBOL: &[u8] = b"crispy_plugin_shutdown";

/// Maximum accepted length, in bytes, of a directive's string-literal value.
pub const MAX_DIRECTIVE_LEN: usize = 8192;

/// Suffix used for cache artifact files. Platform-specific shared object
/// suffix; `.so` is used uniformly since the default compiler backend only
/// targets ELF/GCC-compatible toolchains.
pub const ARTIFACT_SUFFIX: &str = ".so";

/// Subdirectory appended to the user cache directory to get our cache root.
pub const CACHE_SUBDIR: &str = "crispy";

/// Environment variable naming an explicit configuration source file.
pub const ENV_CONFIG_FILE: &str = "CRISPY_CONFIG_FILE";

/// Environment variable that, when set (to anything), disables config loading.
pub const ENV_NO_CONFIG: &str = "NO_CRISPY_CONFIG";

/// Default maximum age, in milliseconds, before an opportunistic sweep
/// considers a cache artifact stale. ~7 days.
pub const DEFAULT_MAX_CACHE_AGE_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Default `#include`s synthesized for inline-fragment (`--expr`) mode.
pub const EXPR_DEFAULT_INCLUDES: &[&str] = &["stdio.h", "stdlib.h", "string.h"];
