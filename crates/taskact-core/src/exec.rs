use crate::cancel::CancelToken;
use crate::env::EnvMap;
use crate::error::{Result, TaskactError};
use serde::Serialize;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Pseudo exit code reported when a command is killed at its deadline, the
/// same value the coreutils `timeout` wrapper uses.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Cap on captured output per stream (keeping the tail), unless the caller
/// raises it. Avoids unbounded memory from chatty commands.
pub const MAX_CAPTURED_OUTPUT: usize = 10 * 1024;

/// How often the waiter loop wakes to check the deadline and cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Exponential backoff settings. `max_attempts` counts the first try, so 1
/// means no retries. An empty `retry_on_exit_codes` list retries any
/// non-zero exit; timeouts are retried only when [`TIMEOUT_EXIT_CODE`] is
/// explicitly listed, and spawn failures only when
/// `retry_on_spawn_failure` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub retry_on_exit_codes: Vec<i32>,
    pub retry_on_spawn_failure: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            retry_on_exit_codes: Vec::new(),
            retry_on_spawn_failure: false,
        }
    }
}

impl RetryPolicy {
    pub fn attempts(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            ..RetryPolicy::default()
        }
    }

    /// Zero-delay variant for tests.
    pub fn instant(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..RetryPolicy::default()
        }
    }

    fn initial_delay(&self) -> Duration {
        self.base_delay.min(self.max_delay)
    }

    fn next_delay(&self, current: Duration) -> Duration {
        let next = (current.as_millis() as f64 * self.multiplier) as u64;
        Duration::from_millis(next).min(self.max_delay)
    }
}

// ---------------------------------------------------------------------------
// Sandbox policy
// ---------------------------------------------------------------------------

/// Best-effort resource restrictions for spawned commands. Only the memory
/// ceiling is enforceable (via rlimit, unix only); the rest is carried so
/// callers can see what was requested, and every knob the platform cannot
/// honor is surfaced as a warning instead of being dropped silently.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxPolicy {
    pub max_memory_mb: Option<u64>,
    pub disable_network: bool,
    pub allowed_paths: Vec<String>,
    pub drop_privileges: bool,
}

impl SandboxPolicy {
    pub fn is_restricted(&self) -> bool {
        self.max_memory_mb.is_some()
            || self.disable_network
            || !self.allowed_paths.is_empty()
            || self.drop_privileges
    }

    /// Requested knobs this platform cannot enforce.
    pub fn unsupported_knobs(&self) -> Vec<&'static str> {
        let mut knobs = Vec::new();
        if self.disable_network {
            knobs.push("disable_network");
        }
        if !self.allowed_paths.is_empty() {
            knobs.push("allowed_paths");
        }
        if self.drop_privileges {
            knobs.push("drop_privileges");
        }
        if cfg!(not(unix)) && self.max_memory_mb.is_some() {
            knobs.push("max_memory_mb");
        }
        knobs
    }
}

// ---------------------------------------------------------------------------
// Options and result
// ---------------------------------------------------------------------------

/// Per-call execution settings, usually seeded from [`Executor::options`]
/// and adjusted for the call site.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Deadline for non-interactive commands. None means wait indefinitely.
    pub timeout: Option<Duration>,
    /// Full child environment. None inherits the parent environment.
    pub env: Option<EnvMap>,
    pub working_dir: Option<PathBuf>,
    /// Pipe and collect stdout/stderr, never attaching the command to the
    /// terminal. Without it, the command inherits the caller's stdio.
    pub capture_output: bool,
    /// Run without a deadline, for commands that wait on user input.
    pub interactive: bool,
    /// Cap on captured output per stream. None disables the cap.
    pub output_limit: Option<usize>,
    pub sandbox: SandboxPolicy,
    pub retry: RetryPolicy,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        ExecutionOptions {
            timeout: None,
            env: None,
            working_dir: None,
            capture_output: false,
            interactive: false,
            output_limit: Some(MAX_CAPTURED_OUTPUT),
            sandbox: SandboxPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
    /// Retries used beyond the first attempt.
    pub retry_attempts: u32,
}

// ---------------------------------------------------------------------------
// Shell heuristic and argument splitting
// ---------------------------------------------------------------------------

/// Whether a command needs `sh -c`: any use of
/// `| & ; > < * ? [ $( `` ` ``, or a leading `VAR=value` assignment.
/// Plain `$NAME` references don't count; known names were already
/// substituted and unknown ones stay literal either way.
pub fn needs_shell(command: &str) -> bool {
    const METACHARS: &[char] = &['|', '&', ';', '>', '<', '*', '?', '[', '`'];
    if command.contains(METACHARS) || command.contains("$(") {
        return true;
    }
    leading_assignment(command)
}

fn leading_assignment(command: &str) -> bool {
    let first = match command.split_whitespace().next() {
        Some(t) => t,
        None => return false,
    };
    let Some(eq) = first.find('=') else {
        return false;
    };
    let name = &first[..eq];
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split a command into argv words, honoring single/double quotes and
/// backslash escapes, so quoted arguments don't force a shell.
pub fn split_args(command: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut has_token = false;
    let mut in_single = false;
    let mut in_double = false;
    let mut chars = command.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                has_token = true;
            }
            '"' if !in_single => {
                in_double = !in_double;
                has_token = true;
            }
            '\\' if !in_single => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    has_token = true;
                }
            }
            c if c.is_whitespace() && !in_single && !in_double => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }
    args
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Invocation {
    Shell(String),
    Direct(Vec<String>),
}

impl Invocation {
    fn display(&self) -> String {
        match self {
            Invocation::Shell(cmd) => cmd.clone(),
            Invocation::Direct(argv) => argv.join(" "),
        }
    }
}

/// Synchronous process runner with deadline, retry, cancellation, and
/// best-effort sandbox handling. One instance (with its defaults and cancel
/// token) is shared across a whole run.
#[derive(Debug, Clone)]
pub struct Executor {
    defaults: ExecutionOptions,
    cancel: CancelToken,
}

impl Executor {
    pub fn new(defaults: ExecutionOptions, cancel: CancelToken) -> Executor {
        Executor { defaults, cancel }
    }

    /// A copy of the run-level defaults, for call sites to adjust.
    pub fn options(&self) -> ExecutionOptions {
        self.defaults.clone()
    }

    /// Run a command string. Routes through `sh -c` when the string needs a
    /// shell, otherwise splits it and spawns the program directly.
    pub fn execute(&self, command: &str, opts: &ExecutionOptions) -> Result<ExecutionResult> {
        if command.trim().is_empty() {
            return Err(empty_command(command));
        }
        let invocation = if needs_shell(command) {
            Invocation::Shell(command.to_string())
        } else {
            Invocation::Direct(split_args(command))
        };
        self.execute_with_retry(invocation, opts)
    }

    /// Run an explicit argv, bypassing the shell heuristic. Used where
    /// arguments must never be re-tokenized (task export, editor launch).
    pub fn execute_argv(&self, argv: &[String], opts: &ExecutionOptions) -> Result<ExecutionResult> {
        if argv.is_empty() || argv[0].trim().is_empty() {
            return Err(empty_command(&argv.join(" ")));
        }
        self.execute_with_retry(Invocation::Direct(argv.to_vec()), opts)
    }

    fn execute_with_retry(
        &self,
        invocation: Invocation,
        opts: &ExecutionOptions,
    ) -> Result<ExecutionResult> {
        for knob in opts.sandbox.unsupported_knobs() {
            warn!("sandbox setting '{knob}' cannot be enforced on this platform");
        }
        let policy = &opts.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut delay = policy.initial_delay();
        let mut retries: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(TaskactError::Cancelled);
            }
            match self.attempt(&invocation, opts) {
                Ok(mut result) => {
                    result.retry_attempts = retries;
                    return Ok(result);
                }
                Err(err) => {
                    let attempt = retries + 1;
                    if attempt >= max_attempts {
                        return Err(finish_failure(err, attempt, retries));
                    }
                    if !retry_eligible(&err, policy) {
                        return Err(stamp_retries(err, retries));
                    }
                    debug!(
                        command = %invocation.display(),
                        attempt,
                        "attempt failed, retrying in {delay:?}"
                    );
                    if self.cancel.wait_timeout(delay) {
                        return Err(TaskactError::Cancelled);
                    }
                    delay = policy.next_delay(delay);
                    retries += 1;
                }
            }
        }
    }

    /// One spawn-and-wait cycle. Output is drained on dedicated threads to
    /// avoid pipe-buffer deadlocks; a waiter thread plus channel polling
    /// implements the deadline and cancellation without busy-waiting.
    fn attempt(&self, invocation: &Invocation, opts: &ExecutionOptions) -> Result<ExecutionResult> {
        let display = invocation.display();
        let start = Instant::now();

        let mut cmd = match invocation {
            Invocation::Shell(line) => {
                let mut c = Command::new("sh");
                c.arg("-c").arg(line);
                c
            }
            Invocation::Direct(argv) => {
                let mut c = Command::new(&argv[0]);
                c.args(&argv[1..]);
                c
            }
        };
        if let Some(dir) = &opts.working_dir {
            cmd.current_dir(dir);
        }
        if let Some(env) = &opts.env {
            cmd.env_clear();
            cmd.envs(env);
        }
        if opts.capture_output {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());
        } else {
            cmd.stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        }
        apply_sandbox(&mut cmd, &opts.sandbox);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return Err(TaskactError::Spawn {
                    command: display,
                    source: e,
                    result: Box::new(ExecutionResult {
                        exit_code: -1,
                        duration_ms: start.elapsed().as_millis() as u64,
                        ..ExecutionResult::default()
                    }),
                });
            }
        };
        let child_pid = child.id();

        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();
        let stdout_thread = std::thread::spawn(move || -> String {
            let mut buf = String::new();
            if let Some(mut r) = stdout_handle {
                use std::io::Read;
                let _ = r.read_to_string(&mut buf);
            }
            buf
        });
        let stderr_thread = std::thread::spawn(move || -> String {
            let mut buf = String::new();
            if let Some(mut r) = stderr_handle {
                use std::io::Read;
                let _ = r.read_to_string(&mut buf);
            }
            buf
        });

        // Interactive commands run without a deadline; a user typing in an
        // editor must never be killed mid-session.
        let deadline = if opts.interactive { None } else { opts.timeout };

        // The child moves into the waiter thread; killing goes by PID.
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(child.wait());
        });

        let wait_result = loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(result) => break result,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if self.cancel.is_cancelled() {
                        kill_process(child_pid);
                        return Err(TaskactError::Cancelled);
                    }
                    if let Some(limit) = deadline {
                        if start.elapsed() >= limit {
                            kill_process(child_pid);
                            // The kill closes the pipes, so the readers
                            // finish quickly with whatever was produced.
                            let stdout = stdout_thread.join().unwrap_or_default();
                            let stderr = stderr_thread.join().unwrap_or_default();
                            return Err(TaskactError::Timeout {
                                command: display,
                                timeout: limit,
                                result: Box::new(ExecutionResult {
                                    exit_code: TIMEOUT_EXIT_CODE,
                                    stdout: cap_output(stdout, opts.output_limit),
                                    stderr: cap_output(stderr, opts.output_limit),
                                    duration_ms: start.elapsed().as_millis() as u64,
                                    timed_out: true,
                                    retry_attempts: 0,
                                }),
                            });
                        }
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    break Err(std::io::Error::other("wait channel closed"));
                }
            }
        };

        let stdout = stdout_thread.join().unwrap_or_default();
        let stderr = stderr_thread.join().unwrap_or_default();
        let duration_ms = start.elapsed().as_millis() as u64;

        let status = match wait_result {
            Ok(s) => s,
            Err(e) => {
                return Err(TaskactError::Spawn {
                    command: display,
                    source: e,
                    result: Box::new(ExecutionResult {
                        exit_code: -1,
                        duration_ms,
                        ..ExecutionResult::default()
                    }),
                });
            }
        };

        let exit_code = status.code().unwrap_or(-1);
        let result = ExecutionResult {
            exit_code,
            stdout: cap_output(stdout, opts.output_limit),
            stderr: cap_output(stderr, opts.output_limit),
            duration_ms,
            timed_out: false,
            retry_attempts: 0,
        };
        if exit_code == 0 {
            Ok(result)
        } else {
            Err(TaskactError::CommandFailed {
                command: display,
                code: exit_code,
                result: Box::new(result),
            })
        }
    }
}

fn empty_command(command: &str) -> TaskactError {
    TaskactError::Spawn {
        command: command.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        result: Box::new(ExecutionResult {
            exit_code: -1,
            ..ExecutionResult::default()
        }),
    }
}

fn retry_eligible(err: &TaskactError, policy: &RetryPolicy) -> bool {
    match err {
        TaskactError::Spawn { .. } => policy.retry_on_spawn_failure,
        // A timed-out attempt is only worth repeating when the caller asked
        // for it by listing the timeout pseudo-code.
        TaskactError::Timeout { .. } => policy.retry_on_exit_codes.contains(&TIMEOUT_EXIT_CODE),
        TaskactError::CommandFailed { code, .. } => {
            policy.retry_on_exit_codes.is_empty() || policy.retry_on_exit_codes.contains(code)
        }
        _ => false,
    }
}

/// Stamp the retry counter into the error's result so diagnostics line up.
fn stamp_retries(err: TaskactError, retries: u32) -> TaskactError {
    match err {
        TaskactError::Spawn {
            command,
            source,
            mut result,
        } => {
            result.retry_attempts = retries;
            TaskactError::Spawn {
                command,
                source,
                result,
            }
        }
        TaskactError::CommandFailed {
            command,
            code,
            mut result,
        } => {
            result.retry_attempts = retries;
            TaskactError::CommandFailed {
                command,
                code,
                result,
            }
        }
        TaskactError::Timeout {
            command,
            timeout,
            mut result,
        } => {
            result.retry_attempts = retries;
            TaskactError::Timeout {
                command,
                timeout,
                result,
            }
        }
        other => other,
    }
}

/// Final-attempt failure: plain error when there was a single attempt,
/// retry-exhaustion wrapper once at least one retry happened.
fn finish_failure(err: TaskactError, attempts: u32, retries: u32) -> TaskactError {
    let err = stamp_retries(err, retries);
    if attempts <= 1 {
        return err;
    }
    match err {
        TaskactError::Spawn {
            command, result, ..
        }
        | TaskactError::CommandFailed {
            command, result, ..
        }
        | TaskactError::Timeout {
            command, result, ..
        } => TaskactError::RetryExhausted {
            command,
            attempts,
            result,
        },
        other => other,
    }
}

fn cap_output(output: String, limit: Option<usize>) -> String {
    let Some(max) = limit else {
        return output;
    };
    if output.len() <= max {
        return output;
    }
    // Keep the tail; failures usually explain themselves at the end.
    let mut start = output.len() - max;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    output[start..].to_string()
}

/// Terminate a process by PID using SIGKILL. Best-effort; errors are
/// silently ignored.
fn kill_process(pid: u32) {
    let _ = Command::new("kill")
        .arg("-9")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

#[cfg(unix)]
fn apply_sandbox(cmd: &mut Command, sandbox: &SandboxPolicy) {
    if let Some(mb) = sandbox.max_memory_mb {
        use std::os::unix::process::CommandExt;
        let bytes = mb.saturating_mul(1024 * 1024);
        unsafe {
            cmd.pre_exec(move || {
                let limit = libc::rlimit {
                    rlim_cur: bytes as libc::rlim_t,
                    rlim_max: bytes as libc::rlim_t,
                };
                if libc::setrlimit(libc::RLIMIT_AS, &limit) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }
}

#[cfg(not(unix))]
fn apply_sandbox(_cmd: &mut Command, _sandbox: &SandboxPolicy) {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> Executor {
        Executor::new(ExecutionOptions::default(), CancelToken::new())
    }

    fn capture() -> ExecutionOptions {
        ExecutionOptions {
            capture_output: true,
            ..ExecutionOptions::default()
        }
    }

    #[test]
    fn shell_heuristic() {
        for cmd in [
            "grep -r foo . | less",
            "make && make install",
            "true; false",
            "echo hi > /tmp/out",
            "wc -l < input",
            "ls *.txt",
            "cat file?",
            "test [ -f x ]",
            "echo $(date)",
            "echo `date`",
            "VISUAL=code code --wait file",
            "_V2=x run",
            r#"echo "a|b""#,
        ] {
            assert!(needs_shell(cmd), "expected shell: {cmd}");
        }
        for cmd in [
            "vim file.txt",
            "xdg-open https://example.com/page",
            "echo $FILE",
            "editnote ~/notes/a.txt \"some description\" abc",
            "cmd a=b",
            "cmd 2=3",
        ] {
            assert!(!needs_shell(cmd), "expected direct: {cmd}");
        }
    }

    #[test]
    fn split_args_honors_quotes() {
        assert_eq!(
            split_args(r#"editnote ~/n/x.txt "pay rent" abc-123"#),
            vec!["editnote", "~/n/x.txt", "pay rent", "abc-123"]
        );
        assert_eq!(split_args("a 'b c'  d"), vec!["a", "b c", "d"]);
        assert_eq!(split_args(r"a b\ c"), vec!["a", "b c"]);
        assert_eq!(split_args(r#"a """#), vec!["a", ""]);
        assert!(split_args("   ").is_empty());
    }

    #[test]
    fn captures_stdout_on_success() {
        let result = executor().execute("echo hello", &capture()).unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim_end(), "hello");
        assert!(!result.timed_out);
        assert_eq!(result.retry_attempts, 0);
    }

    #[test]
    fn nonzero_exit_is_a_structured_failure() {
        let err = executor().execute("false", &capture()).unwrap_err();
        match &err {
            TaskactError::CommandFailed { code, result, .. } => {
                assert_eq!(*code, 1);
                assert_eq!(result.exit_code, 1);
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
        assert!(err.execution_result().is_some());
    }

    #[test]
    fn captures_stderr() {
        let err = executor()
            .execute("echo oops >&2 && false", &capture())
            .unwrap_err();
        let result = err.execution_result().unwrap();
        assert_eq!(result.stderr.trim_end(), "oops");
    }

    #[test]
    fn spawn_failure_is_reported_with_result() {
        let err = executor()
            .execute("/nonexistent/bin/xyz --flag", &capture())
            .unwrap_err();
        match &err {
            TaskactError::Spawn { result, .. } => assert_eq!(result.exit_code, -1),
            other => panic!("expected Spawn, got {other:?}"),
        }
    }

    #[test]
    fn empty_command_fails_without_spawning() {
        assert!(executor().execute("   ", &capture()).is_err());
        assert!(executor().execute_argv(&[], &capture()).is_err());
    }

    #[test]
    fn deadline_kills_and_reports_timeout() {
        let opts = ExecutionOptions {
            timeout: Some(Duration::from_millis(150)),
            ..capture()
        };
        let start = Instant::now();
        let err = executor().execute("sleep 60", &opts).unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(10));
        match &err {
            TaskactError::Timeout { result, .. } => {
                assert!(result.timed_out);
                assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[test]
    fn interactive_commands_ignore_the_deadline() {
        let opts = ExecutionOptions {
            timeout: Some(Duration::from_millis(50)),
            interactive: true,
            capture_output: false,
            ..ExecutionOptions::default()
        };
        let result = executor().execute("sleep 0.2", &opts).unwrap();
        assert_eq!(result.exit_code, 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn noncapture_commands_inherit_the_callers_stdio() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("fd2");
        let command = format!("readlink /proc/self/fd/2 > {}", marker.display());
        let result = executor()
            .execute(&command, &ExecutionOptions::default())
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.is_empty());
        let child_fd2 = std::fs::read_to_string(&marker).unwrap();
        let own_fd2 = std::fs::read_link("/proc/self/fd/2").unwrap();
        assert_eq!(child_fd2.trim_end(), own_fd2.to_string_lossy());
    }

    #[test]
    fn empty_allow_list_retries_any_nonzero_exit() {
        let opts = ExecutionOptions {
            retry: RetryPolicy::instant(3),
            ..capture()
        };
        let err = executor().execute("false", &opts).unwrap_err();
        match &err {
            TaskactError::RetryExhausted {
                attempts, result, ..
            } => {
                assert_eq!(*attempts, 3);
                assert_eq!(result.exit_code, 1);
                assert_eq!(result.retry_attempts, 2);
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[test]
    fn allow_list_mismatch_fails_fast() {
        let mut retry = RetryPolicy::instant(3);
        retry.retry_on_exit_codes = vec![7];
        let opts = ExecutionOptions { retry, ..capture() };
        let err = executor().execute("sh -c \"exit 3\"", &opts).unwrap_err();
        match &err {
            TaskactError::CommandFailed { code, result, .. } => {
                assert_eq!(*code, 3);
                assert_eq!(result.retry_attempts, 0);
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[test]
    fn allow_list_match_retries_until_exhausted() {
        let mut retry = RetryPolicy::instant(2);
        retry.retry_on_exit_codes = vec![3];
        let opts = ExecutionOptions { retry, ..capture() };
        let err = executor().execute("sh -c \"exit 3\"", &opts).unwrap_err();
        assert!(matches!(
            err,
            TaskactError::RetryExhausted { attempts: 2, .. }
        ));
    }

    #[test]
    fn retry_then_pass_reports_attempts_used() {
        let dir = tempfile::TempDir::new().unwrap();
        let counter = dir.path().join("counter");
        std::fs::write(&counter, "0").unwrap();
        let cmd = format!(
            "c=$(cat {p}); c=$((c+1)); echo $c > {p}; [ $c -ge 2 ]",
            p = counter.display()
        );
        let opts = ExecutionOptions {
            retry: RetryPolicy::instant(3),
            ..capture()
        };
        let result = executor().execute(&cmd, &opts).unwrap();
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.retry_attempts, 1);
    }

    #[test]
    fn timeout_is_not_retried_under_default_codes() {
        let opts = ExecutionOptions {
            timeout: Some(Duration::from_millis(100)),
            retry: RetryPolicy::instant(3),
            ..capture()
        };
        let start = Instant::now();
        let err = executor().execute("sleep 60", &opts).unwrap_err();
        // One attempt only; a retried timeout would need several minutes.
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(matches!(err, TaskactError::Timeout { .. }));
    }

    #[test]
    fn timeout_retries_when_124_is_listed() {
        let mut retry = RetryPolicy::instant(2);
        retry.retry_on_exit_codes = vec![TIMEOUT_EXIT_CODE];
        let opts = ExecutionOptions {
            timeout: Some(Duration::from_millis(100)),
            retry,
            ..capture()
        };
        let err = executor().execute("sleep 60", &opts).unwrap_err();
        match &err {
            TaskactError::RetryExhausted {
                attempts, result, ..
            } => {
                assert_eq!(*attempts, 2);
                assert!(result.timed_out);
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[test]
    fn spawn_failure_retries_only_when_opted_in() {
        let opts = ExecutionOptions {
            retry: RetryPolicy::instant(3),
            ..capture()
        };
        let err = executor().execute("/nonexistent/bin/xyz", &opts).unwrap_err();
        assert!(matches!(err, TaskactError::Spawn { .. }));

        let mut retry = RetryPolicy::instant(2);
        retry.retry_on_spawn_failure = true;
        let opts = ExecutionOptions { retry, ..capture() };
        let err = executor().execute("/nonexistent/bin/xyz", &opts).unwrap_err();
        assert!(matches!(
            err,
            TaskactError::RetryExhausted { attempts: 2, .. }
        ));
    }

    #[test]
    fn cancelled_token_stops_before_spawning() {
        let token = CancelToken::new();
        token.cancel();
        let exec = Executor::new(ExecutionOptions::default(), token);
        let err = exec.execute("echo hi", &capture()).unwrap_err();
        assert!(matches!(err, TaskactError::Cancelled));
    }

    #[test]
    fn cancellation_kills_a_running_command() {
        let token = CancelToken::new();
        let exec = Executor::new(ExecutionOptions::default(), token.clone());
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(120));
            token.cancel();
        });
        let start = Instant::now();
        let err = exec.execute("sleep 60", &capture()).unwrap_err();
        canceller.join().unwrap();
        assert!(matches!(err, TaskactError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn explicit_env_replaces_the_environment() {
        let mut env: EnvMap = std::env::vars().collect();
        env.insert("TASKACT_PROBE".into(), "present".into());
        let opts = ExecutionOptions {
            env: Some(env),
            ..capture()
        };
        let result = executor().execute("printenv TASKACT_PROBE", &opts).unwrap();
        assert_eq!(result.stdout.trim_end(), "present");
    }

    #[test]
    fn working_dir_is_applied() {
        let dir = tempfile::TempDir::new().unwrap();
        let opts = ExecutionOptions {
            working_dir: Some(dir.path().to_path_buf()),
            ..capture()
        };
        let result = executor().execute("pwd", &opts).unwrap();
        let reported = std::path::PathBuf::from(result.stdout.trim_end());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn output_is_capped_keeping_the_tail() {
        let opts = ExecutionOptions {
            output_limit: Some(100),
            ..capture()
        };
        let result = executor()
            .execute("printf 'x%.0s' $(seq 1 500); printf END", &opts)
            .unwrap();
        assert_eq!(result.stdout.len(), 100);
        assert!(result.stdout.ends_with("END"));
    }

    #[test]
    fn uncapped_output_when_limit_disabled() {
        let opts = ExecutionOptions {
            output_limit: None,
            ..capture()
        };
        let result = executor()
            .execute("head -c 20000 /dev/zero | tr '\\0' 'x'", &opts)
            .unwrap();
        assert_eq!(result.stdout.len(), 20000);
    }

    #[cfg(unix)]
    #[test]
    fn memory_limited_command_still_runs() {
        let opts = ExecutionOptions {
            sandbox: SandboxPolicy {
                max_memory_mb: Some(512),
                ..SandboxPolicy::default()
            },
            ..capture()
        };
        let result = executor().execute("echo limited", &opts).unwrap();
        assert_eq!(result.stdout.trim_end(), "limited");
    }

    #[test]
    fn unsupported_knobs_are_reported() {
        let policy = SandboxPolicy {
            disable_network: true,
            allowed_paths: vec!["/tmp".into()],
            ..SandboxPolicy::default()
        };
        let knobs = policy.unsupported_knobs();
        assert!(knobs.contains(&"disable_network"));
        assert!(knobs.contains(&"allowed_paths"));
        assert!(policy.is_restricted());
        assert!(SandboxPolicy::default().unsupported_knobs().is_empty());
    }

    #[test]
    fn backoff_delays_grow_and_cap() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            multiplier: 2.0,
            ..RetryPolicy::default()
        };
        let d1 = policy.initial_delay();
        let d2 = policy.next_delay(d1);
        let d3 = policy.next_delay(d2);
        assert_eq!(d1, Duration::from_millis(100));
        assert_eq!(d2, Duration::from_millis(200));
        assert_eq!(d3, Duration::from_millis(350));
        assert_eq!(policy.next_delay(d3), Duration::from_millis(350));
    }
}
