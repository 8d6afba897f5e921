use std::path::Path;
use std::process::Command;

use crate::error::StageError;

/// Bytes of stderr kept in error messages. ffmpeg prints its banner and
/// stream info first; the actual failure is at the end.
const STDERR_TAIL: usize = 2048;

/// Runs a command to completion, mapping spawn failures and non-zero exits
/// to [`StageError`].
pub(crate) fn run(program: &Path, mut cmd: Command) -> Result<(), StageError> {
    let name = program.to_string_lossy().to_string();
    tracing::debug!(program = %name, "spawning");

    let output = cmd.output().map_err(|source| StageError::Spawn {
        program: name.clone(),
        source,
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(StageError::CommandFailed {
            program: name,
            status: output.status.to_string(),
            stderr: tail(stderr.trim(), STDERR_TAIL).to_string(),
        });
    }
    Ok(())
}

fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_keeps_end_of_output() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        let s = "ééé";
        let t = tail(s, 3);
        assert!(s.ends_with(t));
        assert_eq!(t, "é");
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let program = Path::new("/nonexistent/definitely-not-ffmpeg");
        let err = run(program, Command::new(program)).unwrap_err();
        assert!(matches!(err, StageError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_carries_stderr() {
        let program = Path::new("sh");
        let mut cmd = Command::new(program);
        cmd.args(["-c", "echo boom >&2; exit 3"]);
        match run(program, cmd) {
            Err(StageError::CommandFailed { stderr, .. }) => assert_eq!(stderr, "boom"),
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }
}
