//! Front end: argv split, mode selection. Thin by design — it is the
//! orchestrator's caller, nothing more. Built with `clap`'s builder API,
//! not the derive macro.

use std::path::PathBuf;

use clap::{Arg, ArgAction, Command};

use crate::orchestrator::ModeFlags;

/// Parsed front-end arguments, already split into "self" options and
/// "script" argv.
#[derive(Debug)]
pub struct Args {
    pub script: Option<String>,
    pub expr: Option<String>,
    pub stdin: bool,
    pub script_args: Vec<String>,

    pub modes: ModeFlags,
    pub clear_cache: bool,
    pub extra_plugins: Vec<PathBuf>,
    pub extra_includes: Vec<String>,
    pub config_path: Option<PathBuf>,
}

pub fn parse<I, T>(argv: I) -> Args
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let m = build_command().get_matches_from(argv);

    let stdin = m.get_one::<String>("script").map(|s| s == "-").unwrap_or(false);
    let script = m
        .get_one::<String>("script")
        .filter(|s| *s != "-")
        .cloned();

    Args {
        script,
        expr: m.get_one::<String>("expr").cloned(),
        stdin,
        script_args: m
            .get_many::<String>("args")
            .map(|v| v.cloned().collect())
            .unwrap_or_default(),
        modes: ModeFlags {
            force_compile: m.get_flag("force"),
            preserve_source: m.get_flag("preserve"),
            dry_run: m.get_flag("dry_run"),
            debug_launch: m.get_flag("debug"),
        },
        clear_cache: m.get_flag("clear_cache"),
        extra_plugins: m
            .get_many::<String>("plugin")
            .map(|v| v.map(PathBuf::from).collect())
            .unwrap_or_default(),
        extra_includes: m
            .get_many::<String>("include")
            .map(|v| v.cloned().collect())
            .unwrap_or_default(),
        config_path: m.get_one::<String>("config").map(PathBuf::from),
    }
}

fn build_command() -> Command {
    Command::new("crispy")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Compiles and runs CRISPY_PARAMS-annotated C sources, caching the result by content hash.")
        .trailing_var_arg(true)
        .arg(
            Arg::new("script")
                .help("Script file to run, or '-' to read from standard input.")
                .index(1),
        )
        .arg(
            Arg::new("args")
                .help("Arguments passed through to the script's entry symbol.")
                .index(2)
                .num_args(0..)
                .allow_hyphen_values(true),
        )
        .arg(
            Arg::new("expr")
                .long("expr")
                .short('e')
                .help("Run CODE as an inline fragment instead of a script file.")
                .value_name("CODE"),
        )
        .arg(
            Arg::new("force")
                .long("force")
                .help("Force recompilation even if a cached artifact is valid.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("preserve")
                .long("preserve")
                .help("Do not remove the generated temporary source file.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dry_run")
                .long("dry-run")
                .short('n')
                .help("Print the compile command that would run, then exit.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .short('d')
                .help("Compile a debuggable executable and launch it under a debugger.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("clear_cache")
                .long("clear-cache")
                .help("Remove every cached artifact, then exit.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("plugin")
                .long("plugin")
                .help("Load an additional plugin from PATH.")
                .value_name("PATH")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("include")
                .long("include")
                .short('I')
                .help("Extra header to #include when running in --expr mode.")
                .value_name("HEADER")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("Explicit path to a configuration source file.")
                .value_name("PATH"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dash_selects_stdin() {
        let args = parse(["crispy", "-"]);
        assert!(args.stdin);
        assert!(args.script.is_none());
    }

    #[test]
    fn script_args_preserved_after_positional() {
        let args = parse(["crispy", "foo.c", "--force", "7"]);
        assert_eq!(args.script.as_deref(), Some("foo.c"));
        assert_eq!(args.script_args, vec!["--force".to_string(), "7".to_string()]);
    }

    #[test]
    fn force_before_script_is_a_self_option() {
        let args = parse(["crispy", "--force", "foo.c", "7"]);
        assert!(args.modes.force_compile);
        assert_eq!(args.script.as_deref(), Some("foo.c"));
        assert_eq!(args.script_args, vec!["7".to_string()]);
    }
}
