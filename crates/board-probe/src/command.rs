use crate::{ProbeError, Result, NOT_DETECTED};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Runs `program` and returns its stdout. A missing binary or a non-zero exit
/// is an error.
pub fn run_command(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| ProbeError::Command {
            program: program.to_string(),
            reason: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(ProbeError::Command {
            program: program.to_string(),
            reason: output.status.to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Runs `program` and parses its output with [`parse_key_values`]. Failures
/// are logged and leave `key` at "ND".
pub fn command_output(program: &str, args: &[&str], key: &str) -> BTreeMap<String, String> {
    let text = run_command(program, args).unwrap_or_else(|e| {
        debug!(program, error = %e, "Command unavailable");
        String::new()
    });
    parse_key_values(&text, key)
}

/// Splits each line at its first `=` (or, failing that, its first `:`).
/// A key containing `(` is cut there, so `temp(C)=41` yields `temp`.
/// `key` is always present in the result, "ND" unless the text set it.
pub fn parse_key_values(text: &str, key: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    out.insert(key.to_string(), NOT_DETECTED.to_string());
    for line in text.lines() {
        let Some(sep) = line.find('=').or_else(|| line.find(':')) else {
            continue;
        };
        let key_end = match line[..sep].find('(') {
            Some(paren) => paren,
            None => sep,
        };
        let k = line[..key_end].trim();
        if k.is_empty() {
            continue;
        }
        out.insert(k.to_string(), line[sep + 1..].trim().to_string());
    }
    out
}

/// Reads a text file, trimming whitespace and NUL padding.
pub fn read_trimmed(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    std::fs::read_to_string(path)
        .map(|s| s.trim_matches(|c: char| c.is_whitespace() || c == '\0').to_string())
        .map_err(|source| ProbeError::Read {
            path: path.display().to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vcgencmd_style_output() {
        let kv = parse_key_values("volt=1.2000V\n", "volt");
        assert_eq!(kv["volt"], "1.2000V");
    }

    #[test]
    fn test_missing_key_defaults_to_nd() {
        let kv = parse_key_values("something else entirely\n", "throttled");
        assert_eq!(kv["throttled"], "ND");
        assert_eq!(kv.len(), 1);
    }

    #[test]
    fn test_colon_separator_and_paren_cut() {
        let text = "processor\t: 0\nRevision\t: a02082\nSerial\t\t: 00000000\ntemp(C)=41.3\n";
        let kv = parse_key_values(text, "Revision");
        assert_eq!(kv["Revision"], "a02082");
        assert_eq!(kv["processor"], "0");
        assert_eq!(kv["temp"], "41.3");
    }

    #[test]
    fn test_equals_wins_over_colon() {
        let kv = parse_key_values("a:b=c\n", "x");
        assert_eq!(kv["a:b"], "c");
    }

    #[test]
    fn test_missing_program_is_command_error() {
        let err = run_command("definitely-not-a-real-binary-3f9a", &[]).unwrap_err();
        assert!(matches!(err, ProbeError::Command { .. }));
        let kv = command_output("definitely-not-a-real-binary-3f9a", &[], "volt");
        assert_eq!(kv["volt"], "ND");
    }

    #[test]
    fn test_read_trimmed_missing_file() {
        let err = read_trimmed("/nonexistent/board-probe/file").unwrap_err();
        assert!(matches!(err, ProbeError::Read { .. }));
    }
}
