//! Subprocess execution utilities.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often a running child is polled for exit while a cancellation token is armed.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared flag used to interrupt the currently running subprocess.
///
/// Cloning the token shares the flag; cancelling any clone cancels all of them.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Create a fresh, un-cancelled token.
    pub fn new() -> Self {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Exit code plus captured streams of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `None` if the process was terminated by a signal.
    pub status: Option<i32>,
    /// Captured standard output (empty when not captured).
    pub stdout: String,
    /// Captured standard error (empty when not captured).
    pub stderr: String,
}

impl ProcessOutput {
    /// Create an output record.
    pub fn new(status: Option<i32>, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        ProcessOutput {
            status,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Whether the process exited with code 0.
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// The last `lines` lines of stdout followed by stderr.
    pub fn tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.stdout.lines().chain(self.stderr.lines()).collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }

    /// Human-readable exit status.
    pub fn status_display(&self) -> String {
        match self.status {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Options for [`ProcessBuilder::run`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Pipe and capture stdout/stderr. When false, the child inherits them.
    pub capture: bool,
    /// Echo captured lines to our stderr as they arrive.
    pub stream: bool,
    /// Kill the child when this token is cancelled.
    pub cancel: Option<CancellationToken>,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The process exited on its own.
    Finished(ProcessOutput),
    /// The process was killed because cancellation was requested.
    Cancelled(ProcessOutput),
}

/// Builder for subprocess execution.
#[derive(Debug, Clone)]
pub struct ProcessBuilder {
    program: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
}

impl ProcessBuilder {
    /// Create a new process builder for the given program.
    pub fn new(program: impl AsRef<Path>) -> Self {
        ProcessBuilder {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_string_lossy().into_owned());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(
            args.into_iter()
                .map(|s| s.as_ref().to_string_lossy().into_owned()),
        );
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env
            .insert(key.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    /// Set several environment variables.
    pub fn envs<'a, I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = &'a (String, String)>,
    {
        for (key, value) in vars {
            self.env.insert(key.clone(), value.clone());
        }
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl AsRef<Path>) -> Self {
        self.cwd = Some(cwd.as_ref().to_path_buf());
        self
    }

    /// Get the program path.
    pub fn get_program(&self) -> &Path {
        &self.program
    }

    /// Get the arguments.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Get the explicitly set environment variables.
    pub fn get_env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Build the Command.
    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }

        cmd
    }

    /// Execute the command with captured output and wait for completion.
    ///
    /// Spawn failures are returned as `Err`; a nonzero exit is returned as data.
    pub fn exec(&self) -> io::Result<ProcessOutput> {
        let output = self.build_command().stdin(Stdio::null()).output()?;
        Ok(ProcessOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run the command, optionally streaming output and honouring cancellation.
    pub fn run(&self, opts: &RunOptions) -> io::Result<RunOutcome> {
        let mut cmd = self.build_command();
        cmd.stdin(Stdio::null());
        if opts.capture {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
        }

        tracing::debug!("running `{}`", self.display_command());
        let mut child = cmd.spawn()?;

        let stdout = child.stdout.take().map(|r| pump(r, opts.stream));
        let stderr = child.stderr.take().map(|r| pump(r, opts.stream));

        let mut cancelled = false;
        let status = match &opts.cancel {
            None => child.wait()?,
            Some(token) => loop {
                if let Some(status) = child.try_wait()? {
                    break status;
                }
                if token.is_cancelled() {
                    tracing::debug!("cancelling `{}`", self.program.display());
                    // The child may have exited between the poll and the kill.
                    let _ = child.kill();
                    cancelled = true;
                    break child.wait()?;
                }
                thread::sleep(POLL_INTERVAL);
            },
        };

        if cancelled {
            // Grandchildren may still hold the pipes open; take what has been
            // read so far and leave the reader threads detached.
            let output = ProcessOutput {
                status: status.code(),
                stdout: stdout.map(|p| p.snapshot()).unwrap_or_default(),
                stderr: stderr.map(|p| p.snapshot()).unwrap_or_default(),
            };
            return Ok(RunOutcome::Cancelled(output));
        }

        Ok(RunOutcome::Finished(ProcessOutput {
            status: status.code(),
            stdout: stdout.map(|p| p.finish()).unwrap_or_default(),
            stderr: stderr.map(|p| p.finish()).unwrap_or_default(),
        }))
    }

    /// Display the command for error messages.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// A child stream being drained on a helper thread.
struct Pump {
    buffer: Arc<Mutex<String>>,
    handle: JoinHandle<()>,
}

impl Pump {
    /// Wait for the stream to close and return everything read.
    fn finish(self) -> String {
        let Pump { buffer, handle } = self;
        let _ = handle.join();
        buffer.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// Whatever has been read so far.
    fn snapshot(&self) -> String {
        self.buffer
            .lock()
            .map(|b| b.clone())
            .unwrap_or_default()
    }
}

fn pump<R: Read + Send + 'static>(reader: R, echo: bool) -> Pump {
    let buffer = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&buffer);
    let handle = thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    if echo {
                        eprint!("{}", text);
                    }
                    if let Ok(mut buf) = sink.lock() {
                        buf.push_str(&text);
                    }
                }
            }
        }
    });
    Pump { buffer, handle }
}

/// Find an executable in PATH.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_command() {
        let pb = ProcessBuilder::new("cmake").args(["--build", "out", "--target", "app"]);

        assert_eq!(pb.display_command(), "cmake --build out --target app");
    }

    #[test]
    fn test_output_tail() {
        let output = ProcessOutput::new(Some(2), "a\nb\nc\n", "d\ne\n");
        assert_eq!(output.tail(2), "d\ne");
        assert_eq!(output.tail(10), "a\nb\nc\nd\ne");
        assert!(!output.success());
        assert_eq!(output.status_display(), "exit code 2");
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_captures_streams() {
        let output = ProcessBuilder::new("sh")
            .args(["-c", "echo out; echo err 1>&2; exit 3"])
            .exec()
            .unwrap();

        assert_eq!(output.status, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_collects_both_streams() {
        let outcome = ProcessBuilder::new("sh")
            .args(["-c", "echo one; echo two 1>&2; echo three"])
            .run(&RunOptions {
                capture: true,
                stream: false,
                cancel: Some(CancellationToken::new()),
            })
            .unwrap();

        match outcome {
            RunOutcome::Finished(output) => {
                assert!(output.success());
                assert_eq!(output.stdout, "one\nthree\n");
                assert_eq!(output.stderr, "two\n");
            }
            RunOutcome::Cancelled(_) => panic!("not cancelled"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_run_is_interrupted_by_cancellation() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });

        let outcome = ProcessBuilder::new("sh")
            .args(["-c", "exec sleep 30"])
            .run(&RunOptions {
                capture: true,
                stream: false,
                cancel: Some(token),
            })
            .unwrap();
        handle.join().unwrap();

        assert!(matches!(outcome, RunOutcome::Cancelled(_)));
    }

    #[test]
    fn test_spawn_failure_is_an_error() {
        let result = ProcessBuilder::new("definitely-not-a-real-program-xyz").exec();
        assert!(result.is_err());
    }
}
