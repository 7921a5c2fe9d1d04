//! Helpers for running child processes with merged, line-streamed output.

use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};

use anyhow::{Context, Result};
use tracing::{debug, error, instrument, warn};

/// Exit code reported when the child was terminated without one (by a signal).
pub const SIGNALLED_EXIT_CODE: i32 = 1;

/// Run `cmd` to completion, handing every line of stdout and stderr to
/// `on_line` in the order the child wrote them.
///
/// Both streams share one pipe, read on the calling thread. Lines are passed
/// without their line terminator. There is no timeout: the call returns when
/// the child exits and every holder of the pipe has closed it.
#[instrument(skip_all, fields(program = %cmd.get_program().to_string_lossy()))]
pub fn run_streaming(mut cmd: Command, on_line: &mut dyn FnMut(&str)) -> Result<i32> {
    let (reader, writer) = io::pipe().context("create output pipe")?;
    let stderr = writer.try_clone().context("clone output pipe")?;
    cmd.stdin(Stdio::null()).stdout(writer).stderr(stderr);

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };
    // The command still holds our copies of the write end; EOF needs them closed.
    drop(cmd);

    let streamed = forward_lines(reader, on_line);
    let code = reap(&mut child, streamed)?;
    debug!(exit_code = code, "command finished");
    Ok(code)
}

/// Wait for `child`, then surface any error from reading its output.
fn reap(child: &mut Child, streamed: Result<()>) -> Result<i32> {
    let status = child.wait().context("wait for command")?;
    let code = exit_code(status);
    streamed.with_context(|| format!("read output of command that exited with {code}"))?;
    Ok(code)
}

/// Map an exit status to a plain code.
pub fn exit_code(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => {
            warn!(?status, "command terminated by signal");
            SIGNALLED_EXIT_CODE
        }
    }
}

/// Hand each line to `on_line`. The reader is dropped on return, so a child
/// still writing after a read error gets a broken pipe instead of blocking.
fn forward_lines<R: Read>(reader: R, on_line: &mut dyn FnMut(&str)) -> Result<()> {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf).context("read line")?;
        if n == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.strip_suffix('\n').unwrap_or(&line);
        let line = line.strip_suffix('\r').unwrap_or(line);
        on_line(line);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn streams_stdout_and_stderr_lines_in_order() {
        let script = "echo one; echo two >&2; echo three; echo four >&2; printf five";
        let mut lines = Vec::new();
        let code = run_streaming(sh(script), &mut |line| lines.push(line.to_string()))
            .expect("run");
        assert_eq!(code, 0);
        assert_eq!(lines, vec!["one", "two", "three", "four", "five"]);
    }

    #[test]
    fn reports_exit_code() {
        let code = run_streaming(sh("exit 7"), &mut |_| {}).expect("run");
        assert_eq!(code, 7);
    }

    #[test]
    fn signal_maps_to_failure() {
        let code = run_streaming(sh("kill -9 $$"), &mut |_| {}).expect("run");
        assert_eq!(code, SIGNALLED_EXIT_CODE);
    }

    #[test]
    fn missing_program_is_an_error() {
        let cmd = Command::new("/nonexistent/terrarun-test-binary");
        assert!(run_streaming(cmd, &mut |_| {}).is_err());
    }

    #[test]
    fn read_failure_still_reaps_child() {
        let mut child = sh("exit 4").spawn().expect("spawn");
        let err = reap(&mut child, Err(anyhow::anyhow!("read line"))).unwrap_err();
        assert!(format!("{err:#}").contains("exited with 4"), "{err:#}");
        let status = child.try_wait().expect("try_wait").expect("already reaped");
        assert_eq!(status.code(), Some(4));
    }

    #[test]
    fn strips_crlf() {
        let mut lines = Vec::new();
        run_streaming(sh("printf 'a\\r\\nb\\n'"), &mut |line| lines.push(line.to_string()))
            .expect("run");
        assert_eq!(lines, vec!["a", "b"]);
    }
}
