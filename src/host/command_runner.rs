//! Command Runner
//!
//! Executes external commands with their output forwarded live.
//! `run` attaches the child to this process's own stdout/stderr,
//! `run_with` pipes both streams into writers supplied by the caller.
//! Commands are spawned directly, never through a shell.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;

use thiserror::Error;

/// Size of the buffer used when forwarding piped output
const CHUNK_SIZE: usize = 8 * 1024;

/// Command runner errors
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The process could not be started (not found, permission denied, ...)
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    /// The process ran but did not exit successfully
    #[error("`{command}` failed: {status}")]
    Failed { command: String, status: ExitStatus },
    /// Waiting on the process or forwarding its output failed
    #[error("I/O error while running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl ExecutionError {
    /// The command that failed
    pub fn command(&self) -> &str {
        match self {
            ExecutionError::Spawn { command, .. }
            | ExecutionError::Failed { command, .. }
            | ExecutionError::Io { command, .. } => command,
        }
    }

    /// Exit status, if the process ran to completion
    pub fn status(&self) -> Option<ExitStatus> {
        match self {
            ExecutionError::Failed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Render the line announced before a command is spawned.
///
/// Arguments are shown as a bracketed, space-separated list, so
/// `echo a b` renders as `Executing command: echo [a b]`.
pub fn trace_line<S: AsRef<str>>(command: &str, args: &[S]) -> String {
    let rendered: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
    format!("Executing command: {} [{}]", command, rendered.join(" "))
}

/// Command runner for executing CI build steps
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    /// Environment variables to add
    env_additions: HashMap<String, String>,
    /// Working directory, inherited when unset
    working_directory: Option<PathBuf>,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_additions.insert(key.into(), value.into());
        self
    }

    /// Run the child in `dir` instead of the current directory
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Run a command with its output attached to this process's console.
    ///
    /// Blocks until the child exits. Any failure to start, any non-zero exit
    /// and any signal termination is returned as an [`ExecutionError`].
    pub fn run<S: AsRef<str>>(&self, command: &str, args: &[S]) -> Result<(), ExecutionError> {
        {
            let mut stdout = io::stdout().lock();
            announce(&mut stdout, command, args)?;
        }

        let mut child = self
            .command(command, args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                command: command.to_string(),
                source,
            })?;
        tracing::debug!(command, pid = child.id(), "Spawned child process");

        let status = child.wait().map_err(|source| ExecutionError::Io {
            command: command.to_string(),
            source,
        })?;

        check_status(command, status)
    }

    /// Run a command, forwarding its stdout and stderr into the given writers.
    ///
    /// The trace line goes to `stdout` before the child is spawned. Each chunk
    /// the child writes is passed on and flushed as soon as it is read. Both
    /// pipes are drained and the child is reaped before this returns, even
    /// when a writer fails.
    pub fn run_with<S, O, E>(
        &self,
        command: &str,
        args: &[S],
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<(), ExecutionError>
    where
        S: AsRef<str>,
        O: Write + Send,
        E: Write + Send,
    {
        announce(stdout, command, args)?;

        let mut child = self
            .command(command, args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                command: command.to_string(),
                source,
            })?;
        tracing::debug!(command, pid = child.id(), "Spawned child process");

        let child_stdout = child.stdout.take();
        let child_stderr = child.stderr.take();

        // Drain both pipes concurrently so neither fills up and stalls the child
        let forwarded = thread::scope(|scope| {
            let err_handle = scope.spawn(move || match child_stderr {
                Some(pipe) => forward(pipe, stderr),
                None => Ok(()),
            });

            let out_result = match child_stdout {
                Some(pipe) => forward(pipe, stdout),
                None => Ok(()),
            };
            let err_result = err_handle
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("stderr forwarding thread panicked")));

            out_result.and(err_result)
        });

        let status = child.wait().map_err(|source| ExecutionError::Io {
            command: command.to_string(),
            source,
        })?;

        forwarded.map_err(|source| ExecutionError::Io {
            command: command.to_string(),
            source,
        })?;

        check_status(command, status)
    }

    /// Run a command on the blocking thread pool
    pub async fn run_async<S: AsRef<str>>(
        &self,
        command: &str,
        args: &[S],
    ) -> Result<(), ExecutionError> {
        let runner = self.clone();
        let name = command.to_string();
        let owned_command = name.clone();
        let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();

        tokio::task::spawn_blocking(move || runner.run(&owned_command, args.as_slice()))
            .await
            .map_err(|e| ExecutionError::Io {
                command: name,
                source: io::Error::other(e),
            })?
    }

    fn command<S: AsRef<str>>(&self, command: &str, args: &[S]) -> Command {
        let mut cmd = Command::new(command);
        for arg in args {
            let arg: &str = arg.as_ref();
            cmd.arg(arg);
        }

        if let Some(dir) = &self.working_directory {
            cmd.current_dir(dir);
        }
        cmd.envs(&self.env_additions);

        cmd
    }
}

/// Write the trace line and flush it ahead of any child output
fn announce<W: Write, S: AsRef<str>>(
    out: &mut W,
    command: &str,
    args: &[S],
) -> Result<(), ExecutionError> {
    writeln!(out, "{}", trace_line(command, args))
        .and_then(|()| out.flush())
        .map_err(|source| ExecutionError::Io {
            command: command.to_string(),
            source,
        })
}

/// Copy `reader` into `writer` until EOF, flushing after every chunk.
///
/// A failing writer does not stop the copy: the rest of the pipe is
/// drained and discarded and the first write error is returned at the end.
fn forward<R: Read, W: Write>(mut reader: R, writer: &mut W) -> io::Result<()> {
    let mut buf = [0u8; CHUNK_SIZE];
    let mut sink_error = None;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        if sink_error.is_none() {
            if let Err(e) = writer.write_all(&buf[..n]).and_then(|()| writer.flush()) {
                sink_error = Some(e);
            }
        }
    }

    sink_error.map_or(Ok(()), Err)
}

fn check_status(command: &str, status: ExitStatus) -> Result<(), ExecutionError> {
    tracing::debug!(command, %status, "Child process exited");

    if status.success() {
        Ok(())
    } else {
        Err(ExecutionError::Failed {
            command: command.to_string(),
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_ARGS: &[&str] = &[];

    /// Writer that rejects every write
    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn run_captured(
        runner: &CommandRunner,
        command: &str,
        args: &[&str],
    ) -> (Result<(), ExecutionError>, String, String) {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let result = runner.run_with(command, args, &mut out, &mut err);
        (
            result,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    #[test]
    fn test_trace_line_format() {
        assert_eq!(
            trace_line("echo", &["a", "b"]),
            "Executing command: echo [a b]"
        );
        assert_eq!(trace_line("true", NO_ARGS), "Executing command: true []");
    }

    #[test]
    fn test_command_runner_with_env() {
        let runner = CommandRunner::new()
            .with_env("FOO", "bar")
            .with_env("BAZ", "qux");

        assert_eq!(runner.env_additions.get("FOO"), Some(&"bar".to_string()));
        assert_eq!(runner.env_additions.get("BAZ"), Some(&"qux".to_string()));
        assert!(runner.working_directory.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_true_succeeds() {
        assert!(CommandRunner::new().run("true", NO_ARGS).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_false_fails() {
        let err = CommandRunner::new().run("false", NO_ARGS).unwrap_err();
        assert_eq!(err.command(), "false");
        assert_eq!(err.status().and_then(|s| s.code()), Some(1));
        assert!(err.to_string().contains("exit status"));
    }

    #[test]
    fn test_missing_binary_is_spawn_error() {
        let err = CommandRunner::new()
            .run("nonexistent-binary-xyz", NO_ARGS)
            .unwrap_err();
        match &err {
            ExecutionError::Spawn { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("expected spawn error, got {other:?}"),
        }
        assert!(err.to_string().contains("nonexistent-binary-xyz"));
    }

    #[test]
    fn test_missing_binary_with_sinks_still_traces() {
        let (result, out, err) =
            run_captured(&CommandRunner::new(), "nonexistent-binary-xyz", &["--flag"]);
        assert!(matches!(result, Err(ExecutionError::Spawn { .. })));
        assert_eq!(out, "Executing command: nonexistent-binary-xyz [--flag]\n");
        assert!(err.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_trace_line_precedes_child_output() {
        let (result, out, _) = run_captured(&CommandRunner::new(), "sh", &["-c", "echo child"]);
        assert!(result.is_ok());
        assert_eq!(out, "Executing command: sh [-c echo child]\nchild\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_args_passed_positionally_and_unmodified() {
        let (result, out, _) = run_captured(
            &CommandRunner::new(),
            "printf",
            &["%s|", "a", "b c", "$HOME", "*"],
        );
        assert!(result.is_ok());
        let (trace, body) = out.split_once('\n').unwrap();
        assert_eq!(trace, "Executing command: printf [%s| a b c $HOME *]");
        assert_eq!(body, "a|b c|$HOME|*|");
    }

    #[cfg(unix)]
    #[test]
    fn test_streams_forwarded_to_matching_sinks() {
        let (result, out, err) = run_captured(
            &CommandRunner::new(),
            "sh",
            &["-c", "echo to-out; echo to-err >&2"],
        );
        assert!(result.is_ok());
        assert!(out.ends_with("to-out\n"));
        assert!(!out.contains("to-err"));
        assert_eq!(err, "to-err\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_keeps_stderr() {
        let (result, _, err) = run_captured(
            &CommandRunner::new(),
            "sh",
            &["-c", "echo boom >&2; exit 3"],
        );
        let error = result.unwrap_err();
        assert_eq!(error.status().and_then(|s| s.code()), Some(3));
        assert_eq!(err, "boom\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_signal_termination_is_failure() {
        use std::os::unix::process::ExitStatusExt;

        let (result, _, _) = run_captured(&CommandRunner::new(), "sh", &["-c", "kill -9 $$"]);
        let status = result.unwrap_err().status().unwrap();
        assert_eq!(status.signal(), Some(9));
        assert_eq!(status.code(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_large_output_on_both_streams() {
        let (result, out, err) = run_captured(
            &CommandRunner::new(),
            "sh",
            &[
                "-c",
                "head -c 300000 /dev/zero | tr '\\0' o; head -c 300000 /dev/zero | tr '\\0' e >&2",
            ],
        );
        assert!(result.is_ok());
        let (_, body) = out.split_once('\n').unwrap();
        assert_eq!(body.len(), 300_000);
        assert_eq!(err.len(), 300_000);
    }

    #[cfg(unix)]
    #[test]
    fn test_broken_sink_reported_after_child_exits() {
        let mut out = Vec::new();
        let result = CommandRunner::new().run_with(
            "sh",
            &["-c", "echo err >&2; echo done"],
            &mut out,
            &mut BrokenSink,
        );
        match result {
            Err(ExecutionError::Io { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::BrokenPipe);
            }
            other => panic!("expected I/O error, got {other:?}"),
        }
        assert!(String::from_utf8(out).unwrap().ends_with("done\n"));
    }

    #[cfg(unix)]
    #[test]
    fn test_env_additions_reach_child() {
        let runner = CommandRunner::new().with_env("CI_POLL_TEST_VALUE", "hello");
        let (result, out, _) =
            run_captured(&runner, "sh", &["-c", "printf %s \"$CI_POLL_TEST_VALUE\""]);
        assert!(result.is_ok());
        assert!(out.ends_with("hello"));
    }

    #[cfg(unix)]
    #[test]
    fn test_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CommandRunner::new().with_working_directory(dir.path());
        let (result, out, _) = run_captured(&runner, "pwd", NO_ARGS);
        assert!(result.is_ok());

        let reported = out.lines().nth(1).unwrap();
        assert_eq!(
            std::path::Path::new(reported).canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_async() {
        let runner = CommandRunner::new();
        assert!(runner.run_async("true", NO_ARGS).await.is_ok());

        let err = runner.run_async("false", NO_ARGS).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Failed { .. }));
    }
}
