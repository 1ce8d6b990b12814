//! Compiler backend: a capability trait plus the default `cc` driver
//! implementation. Shells out, captures stdout/stderr, and maps a non-zero
//! exit status to a typed error.

use std::path::Path;
use std::process::Command;

use crate::error::{CrispyError, Result};

/// Capability set: probe version, report base flags, produce a loadable
/// artifact, produce a debuggable executable.
pub trait CompilerBackend: Send + Sync {
    /// An opaque token that changes whenever the compiler's output would
    /// change. Feeds the cache key.
    fn version(&self) -> &str;

    /// Compiler and linker flags needed to satisfy the embedded runtime's
    /// default dependency set. Computed once at construction.
    fn base_flags(&self) -> &str;

    /// Compile `source` into a position-independent shared object at
    /// `output`.
    fn compile_shared(&self, source: &Path, output: &Path, extra_flags: &str) -> Result<()>;

    /// Compile `source` into a debuggable executable (symbols retained,
    /// optimization disabled) at `output`.
    fn compile_executable(&self, source: &Path, output: &Path, extra_flags: &str) -> Result<()>;
}

/// Default backend: drives the system `cc`, dialect fixed to `-std=c11`,
/// base flags discovered once via `pkg-config`.
pub struct CcCompiler {
    cc_path: String,
    version: String,
    base_flags: String,
}

const DIALECT_FLAG: &str = "-std=c11";

/// The embedded runtime's default dependency set, queried through
/// `pkg-config`. A conservative default: link `libm`.
const RUNTIME_PKG: &str = "libm";

impl CcCompiler {
    /// Probes the toolchain. Fails with `CrispyError::ToolchainNotFound` if
    /// `cc` is not locatable.
    pub fn new() -> Result<Self> {
        let cc_path = which_cc()?;
        let version = probe_version(&cc_path)?;
        let base_flags = probe_base_flags();
        Ok(CcCompiler {
            cc_path,
            version,
            base_flags,
        })
    }

    fn run(&self, mut cmd: Command) -> Result<()> {
        let command_line = format!("{:?}", cmd);
        let output = cmd.output().map_err(|e| CrispyError::Compile {
            message: format!("failed to launch compiler: {}", e),
            command: command_line.clone(),
        })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(CrispyError::Compile {
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
                command: command_line,
            })
        }
    }
}

impl CompilerBackend for CcCompiler {
    fn version(&self) -> &str {
        &self.version
    }

    fn base_flags(&self) -> &str {
        &self.base_flags
    }

    fn compile_shared(&self, source: &Path, output: &Path, extra_flags: &str) -> Result<()> {
        let mut cmd = Command::new(&self.cc_path);
        cmd.arg(DIALECT_FLAG).arg("-shared").arg("-fPIC");
        push_flags(&mut cmd, &self.base_flags);
        push_flags(&mut cmd, extra_flags);
        cmd.arg("-o").arg(output).arg(source);
        self.run(cmd)?;
        ensure_output(output)
    }

    fn compile_executable(&self, source: &Path, output: &Path, extra_flags: &str) -> Result<()> {
        let mut cmd = Command::new(&self.cc_path);
        cmd.arg(DIALECT_FLAG).arg("-g").arg("-O0");
        push_flags(&mut cmd, &self.base_flags);
        push_flags(&mut cmd, extra_flags);
        cmd.arg("-o").arg(output).arg(source);
        self.run(cmd)?;
        ensure_output(output)
    }
}

fn ensure_output(output: &Path) -> Result<()> {
    if output.is_file() {
        Ok(())
    } else {
        Err(CrispyError::Compile {
            message: format!("compiler reported success but {} was not produced", output.display()),
            command: String::new(),
        })
    }
}

fn push_flags(cmd: &mut Command, flags: &str) {
    for flag in flags.split_whitespace() {
        cmd.arg(flag);
    }
}

fn which_cc() -> Result<String> {
    let candidate = std::env::var("CC").unwrap_or_else(|_| "cc".to_string());
    let found = Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {}", candidate))
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .filter(|s| !s.is_empty());

    found.ok_or_else(|| CrispyError::ToolchainNotFound(candidate))
}

fn probe_version(cc_path: &str) -> Result<String> {
    let output = Command::new(cc_path)
        .arg("--version")
        .output()
        .map_err(|e| CrispyError::ToolchainNotFound(format!("{}: {}", cc_path, e)))?;
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .unwrap_or("unknown")
        .trim()
        .to_string())
}

fn probe_base_flags() -> String {
    Command::new("pkg-config")
        .arg("--cflags")
        .arg("--libs")
        .arg(RUNTIME_PKG)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_else(|| "-lm".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_flags_splits_on_whitespace() {
        let mut cmd = Command::new("true");
        push_flags(&mut cmd, "  -lm   -lpthread ");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["-lm", "-lpthread"]);
    }
}
