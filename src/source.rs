//! Source utilities: three pure operations on source text, plus the
//! `SourceArtifact` that bundles their results.
//!
//! None of this touches the filesystem or spawns anything except
//! `shell_expand`, which is the one place that's expected to.

use std::process::Command;

use crate::consts::{DIRECTIVE_TOKEN, MAX_DIRECTIVE_LEN};
use crate::error::{CrispyError, Result};

/// An in-memory triple: original text, extracted directive value (if any),
/// and the derived effective text with the shebang and first directive line
/// removed.
#[derive(Debug, Clone)]
pub struct SourceArtifact {
    pub original: String,
    pub directive: Option<String>,
    pub effective: String,
    pub effective_len: usize,
}

impl SourceArtifact {
    /// Parses `original` into a `SourceArtifact`: a real file's contents,
    /// or stdin's contents treated like a pathless file.
    pub fn from_text(original: String) -> Self {
        let directive = extract_directive(&original);
        let (effective, effective_len) = strip_header(&original);
        SourceArtifact {
            original,
            directive,
            effective,
            effective_len,
        }
    }

    /// Synthesizes source text for an inline fragment. No directive, no
    /// shebang — the synthesized text never has either.
    pub fn from_inline_expr(fragment: &str, extra_includes: &[String]) -> Self {
        let mut text = String::new();
        for inc in crate::consts::EXPR_DEFAULT_INCLUDES {
            text.push_str(&format!("#include <{}>\n", inc));
        }
        for inc in extra_includes {
            text.push_str(&format!("#include <{}>\n", inc));
        }
        text.push('\n');
        text.push_str("extern int crispy_main(int argc, char **argv) {\n");
        text.push_str(fragment.trim());
        if !fragment.trim_end().ends_with(';') && !fragment.contains("return") {
            text.push(';');
        }
        text.push_str("\n}\n");

        let len = text.len();
        SourceArtifact {
            original: text.clone(),
            directive: None,
            effective: text,
            effective_len: len,
        }
    }

    /// Replace the effective source (hook mutation point at `SOURCE_LOADED`).
    /// Only adopted by the caller if content differs.
    pub fn replace_effective(&mut self, new_text: String) {
        self.effective_len = new_text.len();
        self.effective = new_text;
    }
}

/// Scan line by line for a `#define CRISPY_PARAMS "..."`-shaped line.
/// First match only; later duplicates are left alone. Deliberately a plain
/// substring scan, not a real C tokenizer.
pub fn extract_directive(text: &str) -> Option<String> {
    for line in text.lines() {
        let stripped = line.trim_start_matches([' ', '\t']);
        if !stripped.starts_with("#define") {
            continue;
        }
        if !stripped.contains(DIRECTIVE_TOKEN) {
            continue;
        }
        let after_prefix = &line[line.find("#define").unwrap() + "#define".len()..];
        let first_quote = match after_prefix.find('"') {
            Some(i) => i,
            None => continue,
        };
        let rest = &after_prefix[first_quote + 1..];
        let last_quote = match rest.rfind('"') {
            Some(i) => i,
            None => continue,
        };
        let mut value = rest[..last_quote].to_string();
        value.truncate(MAX_DIRECTIVE_LEN);
        return Some(value);
    }
    None
}

/// Produce a line-wise copy of `text` with the shebang (if line 1 begins
/// `#!`) and the first directive-shaped line dropped. All other lines,
/// including later directive-shaped lines, are preserved verbatim, each with
/// a trailing newline. Returns the text and its byte length.
pub fn strip_header(text: &str) -> (String, usize) {
    let mut out = String::with_capacity(text.len());
    let mut directive_dropped = false;

    for (i, line) in text.lines().enumerate() {
        if i == 0 && line.starts_with("#!") {
            continue;
        }
        if !directive_dropped && is_directive_line(line) {
            directive_dropped = true;
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }

    let len = out.len();
    (out, len)
}

fn is_directive_line(line: &str) -> bool {
    let stripped = line.trim_start_matches([' ', '\t']);
    stripped.starts_with("#define") && stripped.contains(DIRECTIVE_TOKEN)
}

/// Run the directive value through a subshell that prints it, so command
/// substitutions and parameter expansion work. Empty/absent input yields the
/// empty string without spawning anything.
///
/// The command is built by string concatenation: a directive value
/// containing a double quote produces a malformed subshell command. This is
/// an input constraint, not a bug to route around — do not add escaping
/// here.
pub fn shell_expand(value: Option<&str>) -> Result<String> {
    let value = match value {
        None => return Ok(String::new()),
        Some(v) if v.is_empty() => return Ok(String::new()),
        Some(v) => v,
    };

    let script = format!("printf '%s ' \"{}\"", value);
    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(&script)
        .output()
        .map_err(|e| CrispyError::Params {
            message: format!("failed to launch shell: {}", e),
        })?;

    if !output.status.success() {
        return Err(CrispyError::Params {
            message: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_match_only() {
        let text = "#define CRISPY_PARAMS \"-lm\"\nint main(){}\n#define CRISPY_PARAMS \"-lpthread\"\n";
        assert_eq!(extract_directive(text), Some("-lm".to_string()));
    }

    #[test]
    fn no_directive_is_none() {
        assert_eq!(extract_directive("int main(){return 0;}\n"), None);
    }

    #[test]
    fn tolerates_leading_whitespace() {
        let text = "   #define CRISPY_PARAMS \"-lm\"\n";
        assert_eq!(extract_directive(text), Some("-lm".to_string()));
    }

    #[test]
    fn strip_header_drops_shebang_and_first_directive() {
        let text = "#!/usr/bin/crispy\n#define CRISPY_PARAMS \"-lm\"\n#include <stdio.h>\n#define CRISPY_PARAMS \"-lpthread\"\n";
        let (stripped, _) = strip_header(text);
        assert_eq!(stripped, "#include <stdio.h>\n#define CRISPY_PARAMS \"-lpthread\"\n");
    }

    #[test]
    fn strip_header_idempotent_on_already_stripped_text() {
        let text = "#include <stdio.h>\nint main(){return 0;}\n";
        let (once, _) = strip_header(text);
        let (twice, _) = strip_header(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn strip_header_without_shebang_keeps_all_but_directive() {
        let text = "#include <stdio.h>\n#define CRISPY_PARAMS \"-lm\"\nint main(){return 0;}\n";
        let (stripped, _) = strip_header(text);
        assert_eq!(stripped, "#include <stdio.h>\nint main(){return 0;}\n");
    }

    #[test]
    fn shell_expand_empty_is_empty() {
        assert_eq!(shell_expand(None).unwrap(), "");
        assert_eq!(shell_expand(Some("")).unwrap(), "");
    }

    #[test]
    fn shell_expand_runs_command_substitution() {
        let out = shell_expand(Some("`echo -n hi`")).unwrap();
        assert_eq!(out, "hi");
    }
}
