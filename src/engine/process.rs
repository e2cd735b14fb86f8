//! A single external process with optional line capture

use std::process::{Child, ChildStdout, ExitStatus};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver};
use tracing::{debug, info, warn};

use super::platform;
use super::reader::spawn_reader;
use super::redirect::{ProcessSpec, ResolvedStdin};
use crate::domain::model::{Line, StreamKind};
use crate::error::{MosherError, MosherResult};

/// Default bound on joining reader threads during kill
pub const READER_JOIN_TIMEOUT: Duration = Duration::from_millis(100);

/// Time a process gets to exit after SIGTERM before kill escalates
pub const TERMINATE_GRACE: Duration = Duration::from_millis(200);

/// Observed state of a managed process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    /// Exited; `None` when terminated by a signal
    Exited(Option<i32>),
    /// Killed or never started
    Stopped,
}

struct StreamReader {
    stream: StreamKind,
    queue: Receiver<Line>,
    handle: Option<JoinHandle<()>>,
}

/// Wrapper around one child process.
///
/// Captured streams get one reader thread each. Readers only push into their
/// queue; lines reach the caller through [`ManagedProcess::drain`].
pub struct ManagedProcess {
    spec: ProcessSpec,
    generation: u64,
    child: Option<Child>,
    stdout_pipe: Option<ChildStdout>,
    readers: Vec<StreamReader>,
    exit_code: Option<Option<i32>>,
    join_timeout: Duration,
}

impl ManagedProcess {
    /// Launch `spec` with an already resolved stdin
    pub fn start(spec: ProcessSpec, stdin: ResolvedStdin, generation: u64) -> MosherResult<Self> {
        let mut process = Self {
            spec,
            generation,
            child: None,
            stdout_pipe: None,
            readers: Vec::new(),
            exit_code: None,
            join_timeout: READER_JOIN_TIMEOUT,
        };
        process.launch(stdin)?;
        Ok(process)
    }

    /// Kill and relaunch with a fresh argument vector.
    ///
    /// Reader state and unread lines of the previous run are discarded.
    pub fn restart(&mut self, argv: Vec<String>, stdin: ResolvedStdin, generation: u64) -> MosherResult<()> {
        self.kill();
        self.readers.clear();
        self.spec.argv = argv;
        self.generation = generation;
        self.exit_code = None;
        self.launch(stdin)
    }

    fn launch(&mut self, stdin: ResolvedStdin) -> MosherResult<()> {
        let name = self.spec.name.clone();
        let mut command = platform::command_for(&self.spec.argv, self.spec.priority)
            .ok_or_else(|| MosherError::EmptyCommand { name: name.clone() })?;

        let redirection = &self.spec.redirection;
        command
            .stdin(stdin.into_stdio())
            .stdout(redirection.stdout.to_stdio())
            .stderr(redirection.stderr.to_stdio())
            .envs(&self.spec.env);
        for key in &self.spec.env_remove {
            command.env_remove(key);
        }

        debug!(process = %name, argv = ?self.spec.argv, "Spawning process");
        let mut child = command.spawn().map_err(|source| MosherError::SpawnFailed {
            name: name.clone(),
            source,
        })?;

        let capture_stdout = redirection.stdout.is_captured();
        let capture_stderr = redirection.stderr.is_captured();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        info!(process = %name, pid = child.id(), "Process started");
        self.child = Some(child);

        match stdout {
            Some(stdout) if capture_stdout => self.attach_reader(StreamKind::Stdout, stdout)?,
            other => self.stdout_pipe = other,
        }
        if let Some(stderr) = stderr.filter(|_| capture_stderr) {
            self.attach_reader(StreamKind::Stderr, stderr)?;
        }
        Ok(())
    }

    fn attach_reader<R>(&mut self, stream: StreamKind, source: R) -> MosherResult<()>
    where
        R: std::io::Read + Send + 'static,
    {
        let (tx, rx) = unbounded();
        let handle = spawn_reader(&self.spec.name, stream, source, tx)?;
        self.readers.push(StreamReader {
            stream,
            queue: rx,
            handle: Some(handle),
        });
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub fn argv(&self) -> &[String] {
        &self.spec.argv
    }

    /// Launch identity, bumped on every (re)start
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(|c| c.id())
    }

    /// Override the reader join bound used by [`ManagedProcess::kill`]
    pub fn set_join_timeout(&mut self, timeout: Duration) {
        self.join_timeout = timeout;
    }

    /// Hand out the raw stdout pipe for chaining into another process
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout_pipe.take()
    }

    /// Deliver pending lines, one batch per stream in arrival order
    pub fn drain<F>(&self, mut on_lines: F)
    where
        F: FnMut(StreamKind, Vec<Line>),
    {
        for reader in &self.readers {
            let batch: Vec<Line> = reader.queue.try_iter().collect();
            if !batch.is_empty() {
                on_lines(reader.stream, batch);
            }
        }
    }

    /// Non-blocking exit check; the exit code is cached once observed
    pub fn poll_exit(&mut self) -> ProcessStatus {
        if let Some(code) = self.exit_code {
            return ProcessStatus::Exited(code);
        }
        let Some(child) = self.child.as_mut() else {
            return ProcessStatus::Stopped;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                let code = status.code();
                self.exit_code = Some(code);
                ProcessStatus::Exited(code)
            }
            Ok(None) => ProcessStatus::Running,
            Err(e) => {
                warn!(process = %self.spec.name, error = %e, "Failed to query process state");
                ProcessStatus::Running
            }
        }
    }

    pub fn is_running(&mut self) -> bool {
        self.poll_exit() == ProcessStatus::Running
    }

    /// Last observed exit code
    pub fn exit_code(&self) -> Option<Option<i32>> {
        self.exit_code
    }

    /// Request a graceful stop (SIGTERM where available)
    pub fn terminate(&mut self) {
        if !self.is_running() {
            return;
        }
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = platform::request_terminate(child) {
                warn!(process = %self.spec.name, error = %e, "Failed to request termination");
            }
        }
    }

    /// Stop the process and release its handles. Safe to call repeatedly.
    ///
    /// A live process is asked to terminate first and killed only when it is
    /// still running after [`TERMINATE_GRACE`].
    pub fn kill(&mut self) {
        self.stdout_pipe = None;
        if let Some(mut child) = self.child.take() {
            let status = match child.try_wait() {
                Ok(Some(status)) => Ok(status),
                _ => {
                    if let Err(e) = platform::request_terminate(&mut child) {
                        debug!(process = %self.spec.name, error = %e, "Terminate request failed");
                    }
                    match wait_with_grace(&mut child, TERMINATE_GRACE) {
                        Some(status) => Ok(status),
                        None => {
                            debug!(process = %self.spec.name, "Still running after terminate, killing");
                            if let Err(e) = child.kill() {
                                debug!(process = %self.spec.name, error = %e, "Kill failed");
                            }
                            child.wait()
                        }
                    }
                }
            };
            match status {
                Ok(status) => {
                    self.exit_code.get_or_insert(status.code());
                }
                Err(e) => debug!(process = %self.spec.name, error = %e, "Wait after kill failed"),
            }
            debug!(process = %self.spec.name, exit_code = ?self.exit_code, "Process stopped");
        }
        self.join_readers();
    }

    fn join_readers(&mut self) {
        let deadline = Instant::now() + self.join_timeout;
        for reader in &mut self.readers {
            let Some(handle) = reader.handle.take() else {
                continue;
            };
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                if handle.join().is_err() {
                    warn!(process = %self.spec.name, stream = %reader.stream, "Reader thread panicked");
                }
            } else {
                warn!(
                    process = %self.spec.name,
                    stream = %reader.stream,
                    "Reader did not finish in time, detaching"
                );
            }
        }
    }
}

/// Poll `child` until it exits or `grace` elapsed
fn wait_with_grace(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) if Instant::now() < deadline => std::thread::sleep(Duration::from_millis(5)),
            _ => return None,
        }
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

impl std::fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("name", &self.spec.name)
            .field("generation", &self.generation)
            .field("pid", &self.pid())
            .field("exit_code", &self.exit_code)
            .finish()
    }
}
