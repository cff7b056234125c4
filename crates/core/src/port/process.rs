// Process Spawning Port
// Abstraction over "start a command and hand me its pipes, exit-wait and kill"

use async_trait::async_trait;
use std::fmt;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::domain::CommandLine;

/// Readable end of a child's stdout/stderr pipe
pub type OutputReader = Pin<Box<dyn AsyncRead + Send>>;

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code if the process exited normally
    pub code: Option<i32>,
    /// Terminating signal (unix) if it was killed
    pub signal: Option<i32>,
}

impl ProcessExit {
    pub fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signal: Some(signal),
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Output capture failed: {0}")]
    CaptureFailed(String),

    #[error("Process killed: {0}")]
    Killed(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// Handle to a running child
///
/// `wait` must be cancel safe: the supervisor races it against kill requests
/// and calls it again afterwards.
#[async_trait]
pub trait ChildProcess: Send {
    /// Wait for the process to exit
    async fn wait(&mut self) -> std::io::Result<ProcessExit>;

    /// Ask the process to stop (SIGTERM on unix)
    fn terminate(&mut self) -> std::io::Result<()>;

    /// Force the process to stop (SIGKILL on unix)
    fn kill(&mut self) -> std::io::Result<()>;
}

/// A freshly spawned child with its three capture handles
pub struct SpawnedProcess {
    pub pid: Option<u32>,
    pub stdout: OutputReader,
    pub stderr: OutputReader,
    pub child: Box<dyn ChildProcess>,
}

/// Process spawning primitive
pub trait ProcessSpawner: Send + Sync {
    /// Start `command` with piped stdout/stderr
    ///
    /// # Errors
    /// - ExecutionError::SpawnFailed if the executable cannot be started
    fn spawn(&self, command: &CommandLine) -> Result<SpawnedProcess, ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    const SIGTERM: i32 = 15;
    const SIGKILL: i32 = 9;

    /// Reader that fails on first read
    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe read failed")))
        }
    }

    /// Mock spawner behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Emit the given output then exit with `exit_code`
        Exit {
            stdout: Vec<u8>,
            stderr: Vec<u8>,
            exit_code: i32,
        },
        /// Never exits until terminated or killed
        Hang,
        /// stdout read fails; process hangs until killed
        BrokenStdout,
        /// spawn itself fails
        SpawnFail(String),
    }

    /// Child whose exit is scripted
    struct ScriptedChild {
        exit: Option<ProcessExit>,
        stopped_by: Option<i32>,
        terminated: Arc<AtomicBool>,
        killed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ChildProcess for ScriptedChild {
        async fn wait(&mut self) -> io::Result<ProcessExit> {
            if let Some(signal) = self.stopped_by {
                return Ok(ProcessExit::signaled(signal));
            }
            match self.exit {
                Some(exit) => Ok(exit),
                None => std::future::pending().await,
            }
        }

        fn terminate(&mut self) -> io::Result<()> {
            self.terminated.store(true, Ordering::SeqCst);
            self.stopped_by.get_or_insert(SIGTERM);
            Ok(())
        }

        fn kill(&mut self) -> io::Result<()> {
            self.killed.store(true, Ordering::SeqCst);
            self.stopped_by = Some(SIGKILL);
            Ok(())
        }
    }

    /// Mock ProcessSpawner for testing
    pub struct MockProcessSpawner {
        behavior: MockBehavior,
        spawn_count: AtomicUsize,
        terminated: Arc<AtomicBool>,
        killed: Arc<AtomicBool>,
    }

    impl MockProcessSpawner {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior,
                spawn_count: AtomicUsize::new(0),
                terminated: Arc::new(AtomicBool::new(false)),
                killed: Arc::new(AtomicBool::new(false)),
            }
        }

        pub fn new_exit(stdout: &[u8], stderr: &[u8], exit_code: i32) -> Self {
            Self::new(MockBehavior::Exit {
                stdout: stdout.to_vec(),
                stderr: stderr.to_vec(),
                exit_code,
            })
        }

        pub fn spawn_count(&self) -> usize {
            self.spawn_count.load(Ordering::SeqCst)
        }

        pub fn was_terminated(&self) -> bool {
            self.terminated.load(Ordering::SeqCst)
        }

        pub fn was_killed(&self) -> bool {
            self.killed.load(Ordering::SeqCst)
        }
    }

    impl ProcessSpawner for MockProcessSpawner {
        fn spawn(&self, _command: &CommandLine) -> Result<SpawnedProcess, ExecutionError> {
            self.spawn_count.fetch_add(1, Ordering::SeqCst);

            let (stdout, stderr, exit): (OutputReader, OutputReader, Option<ProcessExit>) =
                match &self.behavior {
                    MockBehavior::Exit {
                        stdout,
                        stderr,
                        exit_code,
                    } => (
                        Box::pin(io::Cursor::new(stdout.clone())),
                        Box::pin(io::Cursor::new(stderr.clone())),
                        Some(ProcessExit::exited(*exit_code)),
                    ),
                    MockBehavior::Hang => (
                        Box::pin(io::Cursor::new(Vec::new())),
                        Box::pin(io::Cursor::new(Vec::new())),
                        None,
                    ),
                    MockBehavior::BrokenStdout => (
                        Box::pin(FailingReader),
                        Box::pin(io::Cursor::new(Vec::new())),
                        None,
                    ),
                    MockBehavior::SpawnFail(msg) => {
                        return Err(ExecutionError::SpawnFailed(msg.clone()))
                    }
                };

            Ok(SpawnedProcess {
                pid: None,
                stdout,
                stderr,
                child: Box::new(ScriptedChild {
                    exit,
                    stopped_by: None,
                    terminated: Arc::clone(&self.terminated),
                    killed: Arc::clone(&self.killed),
                }),
            })
        }
    }
}
