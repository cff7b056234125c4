// Subprocess spawner implementation
// reason: async-trait, tokio for async process management
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use jobhost_core::domain::CommandLine;
use jobhost_core::port::{
    ChildProcess, ExecutionError, OutputReader, ProcessExit, ProcessSpawner, SpawnedProcess,
};

/// Environment every child may inherit unless configured otherwise
pub const DEFAULT_ENV_ALLOWLIST: &[&str] = &["PATH", "HOME", "USER", "LANG"];

/// Subprocess spawner
/// Spawns isolated child processes with environment allowlisting
pub struct SubprocessSpawner {
    env_allowlist: Vec<String>,
}

impl SubprocessSpawner {
    /// Create a new subprocess spawner
    ///
    /// # Arguments
    /// * `env_allowlist` - Variables a child may inherit from the daemon or
    ///   receive through its request (everything else is dropped)
    ///
    /// # Example
    /// ```ignore
    /// let spawner = SubprocessSpawner::new(
    ///     vec!["PATH".to_string(), "HOME".to_string(), "USER".to_string()],
    /// );
    /// ```
    pub fn new(env_allowlist: Vec<String>) -> Self {
        Self { env_allowlist }
    }

    fn is_allowed(&self, key: &str) -> bool {
        self.env_allowlist.iter().any(|k| k == key)
    }

    /// Inherited allowlisted variables, overridden by allowlisted request variables
    fn child_env(&self, requested: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = std::env::vars()
            .filter(|(k, _)| self.is_allowed(k))
            .collect();

        for (key, value) in requested {
            if self.is_allowed(key) {
                env.insert(key.clone(), value.clone());
            } else {
                debug!(var = %key, "Dropping environment variable not in allowlist");
            }
        }
        env
    }
}

impl Default for SubprocessSpawner {
    fn default() -> Self {
        Self::new(DEFAULT_ENV_ALLOWLIST.iter().map(|s| s.to_string()).collect())
    }
}

impl ProcessSpawner for SubprocessSpawner {
    fn spawn(&self, command: &CommandLine) -> Result<SpawnedProcess, ExecutionError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .env_clear()
            .envs(self.child_env(&command.env))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A dropped supervisor must not leak its child
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ExecutionError::SpawnFailed(format!("{}: {}", command.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutionError::SpawnFailed("stdout was not piped".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecutionError::SpawnFailed("stderr was not piped".to_string()))?;

        let pid = child.id();
        info!(program = %command.program, pid = ?pid, "Subprocess started");

        Ok(SpawnedProcess {
            pid,
            stdout: Box::pin(stdout) as OutputReader,
            stderr: Box::pin(stderr) as OutputReader,
            child: Box::new(TokioChild { child }),
        })
    }
}

/// `tokio::process::Child` behind the ChildProcess port
struct TokioChild {
    child: Child,
}

#[async_trait]
impl ChildProcess for TokioChild {
    async fn wait(&mut self) -> io::Result<ProcessExit> {
        // Child::wait is cancel safe
        let status = self.child.wait().await?;
        Ok(exit_from_status(status))
    }

    /// SIGTERM for graceful shutdown
    fn terminate(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            // No pid: already reaped
            let Some(pid) = self.child.id() else {
                return Ok(());
            };
            info!(pid = %pid, "Sending SIGTERM for graceful shutdown");
            kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(io::Error::from)
        }

        #[cfg(not(unix))]
        {
            self.child.start_kill()
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        if let Some(pid) = self.child.id() {
            info!(pid = %pid, "Sending SIGKILL");
        }
        self.child.start_kill()
    }
}

fn exit_from_status(status: ExitStatus) -> ProcessExit {
    if let Some(code) = status.code() {
        return ProcessExit::exited(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ProcessExit::signaled(signal);
        }
    }

    ProcessExit {
        code: None,
        signal: None,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn sh(script: &str) -> CommandLine {
        CommandLine::new("/bin/sh").arg("-c").arg(script)
    }

    async fn read_all(mut reader: OutputReader) -> String {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn test_spawn_captures_both_streams() {
        let spawner = SubprocessSpawner::default();

        let process = spawner.spawn(&sh("echo hello; echo oops >&2; exit 3")).unwrap();
        let SpawnedProcess {
            pid,
            stdout,
            stderr,
            mut child,
        } = process;

        assert!(pid.is_some());
        assert_eq!(read_all(stdout).await, "hello\n");
        assert_eq!(read_all(stderr).await, "oops\n");
        assert_eq!(child.wait().await.unwrap(), ProcessExit::exited(3));
    }

    #[tokio::test]
    async fn test_missing_executable_fails_to_spawn() {
        let spawner = SubprocessSpawner::default();

        let result = spawner.spawn(&CommandLine::new("/nonexistent/jobhost-test-binary"));

        assert!(matches!(result, Err(ExecutionError::SpawnFailed(_))));
    }

    #[tokio::test]
    async fn test_terminate_reports_signal() {
        let spawner = SubprocessSpawner::default();
        let mut process = spawner.spawn(&sh("exec sleep 30")).unwrap();

        process.child.terminate().unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(5), process.child.wait())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(exit, ProcessExit::signaled(15));
    }

    #[tokio::test]
    async fn test_kill_reports_sigkill() {
        let spawner = SubprocessSpawner::default();
        let mut process = spawner.spawn(&sh("trap '' TERM; exec sleep 30")).unwrap();

        process.child.kill().unwrap();
        let exit = process.child.wait().await.unwrap();

        assert_eq!(exit.signal, Some(9));
    }

    #[tokio::test]
    async fn test_env_allowlist() {
        let spawner = SubprocessSpawner::new(vec!["ALLOWED_VAR".to_string()]);
        let command = sh("echo \"${ALLOWED_VAR}|${BLOCKED_VAR}|${HOME}\"")
            .env("ALLOWED_VAR", "value1")
            .env("BLOCKED_VAR", "value2");

        let process = spawner.spawn(&command).unwrap();

        assert_eq!(read_all(process.stdout).await, "value1||\n");
    }

    #[tokio::test]
    async fn test_working_dir() {
        let spawner = SubprocessSpawner::default();
        let command = sh("pwd").working_dir("/");

        let process = spawner.spawn(&command).unwrap();

        assert_eq!(read_all(process.stdout).await, "/\n");
    }

    #[test]
    fn test_child_env_filtering() {
        let spawner = SubprocessSpawner::new(vec!["ALLOWED_VAR".to_string()]);
        let mut requested = BTreeMap::new();
        requested.insert("ALLOWED_VAR".to_string(), "value1".to_string());
        requested.insert("BLOCKED_VAR".to_string(), "value2".to_string());

        let env = spawner.child_env(&requested);

        assert_eq!(env.get("ALLOWED_VAR").map(String::as_str), Some("value1"));
        assert!(!env.contains_key("BLOCKED_VAR"));
    }
}
