//! Process I/O multiplexer
//!
//! Launches chained external processes, captures their textual output on
//! background readers and hands the lines back to the control loop on demand.

pub mod platform;
pub mod process;
pub mod progress;
pub mod reader;
pub mod redirect;

pub use process::{ManagedProcess, ProcessStatus, READER_JOIN_TIMEOUT, TERMINATE_GRACE};
pub use progress::ThroughputMeter;
pub use reader::LineAssembler;
pub use redirect::{OutputSink, Priority, ProcessSpec, Redirection, ResolvedStdin, StdinSource};

use tracing::debug;

use crate::domain::model::{Line, StreamKind};
use crate::error::{MosherError, MosherResult};

/// The set of processes owned by one session, in start order
#[derive(Debug, Default)]
pub struct ProcessTable {
    processes: Vec<ManagedProcess>,
    next_generation: u64,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Resolve the stdin source of `spec` against the running processes
    fn resolve_stdin(&mut self, source: &StdinSource) -> MosherResult<ResolvedStdin> {
        match source {
            StdinSource::Null => Ok(ResolvedStdin::Null),
            StdinSource::Inherit => Ok(ResolvedStdin::Inherit),
            StdinSource::FromProcess(upstream) => {
                let pipe = self
                    .get_mut(upstream)
                    .and_then(|p| p.take_stdout())
                    .ok_or_else(|| MosherError::MissingPipe {
                        name: upstream.clone(),
                    })?;
                Ok(ResolvedStdin::Chained(pipe))
            }
        }
    }

    /// Start a process, replacing any previous one of the same name.
    ///
    /// Returns the generation assigned to the new launch.
    pub fn start(&mut self, spec: ProcessSpec) -> MosherResult<u64> {
        self.stop(&spec.name);
        let stdin = self.resolve_stdin(&spec.redirection.stdin)?;
        let generation = self.bump_generation();
        let process = ManagedProcess::start(spec, stdin, generation)?;
        self.processes.push(process);
        Ok(generation)
    }

    /// Relaunch a running process with a new argument vector.
    ///
    /// Its stdin source is resolved again, so an upstream process must have
    /// been restarted first.
    pub fn restart(&mut self, name: &str, argv: Vec<String>) -> MosherResult<u64> {
        let source = match self.get(name) {
            Some(process) => process.spec().redirection.stdin.clone(),
            None => return Err(MosherError::MissingPipe { name: name.to_string() }),
        };
        if let Some(process) = self.get_mut(name) {
            process.kill();
        }
        let stdin = self.resolve_stdin(&source)?;
        let generation = self.bump_generation();
        match self.get_mut(name) {
            Some(process) => {
                process.restart(argv, stdin, generation)?;
                Ok(generation)
            }
            None => Err(MosherError::MissingPipe { name: name.to_string() }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ManagedProcess> {
        self.processes.iter().find(|p| p.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ManagedProcess> {
        self.processes.iter_mut().find(|p| p.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn generation_of(&self, name: &str) -> Option<u64> {
        self.get(name).map(|p| p.generation())
    }

    /// Kill and forget a process. No-op for unknown names.
    pub fn stop(&mut self, name: &str) -> Option<ManagedProcess> {
        let index = self.processes.iter().position(|p| p.name() == name)?;
        let mut process = self.processes.remove(index);
        process.kill();
        debug!(process = name, "Removed from process table");
        Some(process)
    }

    /// Kill everything, newest first
    pub fn stop_all(&mut self) {
        while let Some(mut process) = self.processes.pop() {
            process.kill();
        }
    }

    pub fn status(&mut self, name: &str) -> ProcessStatus {
        self.get_mut(name)
            .map(|p| p.poll_exit())
            .unwrap_or(ProcessStatus::Stopped)
    }

    /// Drain every process, invoking `on_lines` once per non-empty batch
    pub fn drain_all<F>(&self, mut on_lines: F)
    where
        F: FnMut(&str, StreamKind, Vec<Line>),
    {
        for process in &self.processes {
            process.drain(|stream, lines| on_lines(process.name(), stream, lines));
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.processes.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

impl Drop for ProcessTable {
    fn drop(&mut self) {
        self.stop_all();
    }
}
