//! Stdio redirection and launch options for managed processes

use std::collections::HashMap;
use std::process::{ChildStdout, Stdio};

/// Where a child's stdin comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdinSource {
    /// `/dev/null`
    Null,
    /// Inherit the host's stdin
    Inherit,
    /// Stdout of an already running process, looked up by name
    FromProcess(String),
}

/// Where a child's stdout or stderr goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSink {
    /// Dropped
    Discard,
    /// Passed straight through to the host
    Inherit,
    /// Read by a background reader and delivered as lines
    Capture,
    /// Kept as a raw pipe so a later stage can consume it
    Pipe,
}

impl OutputSink {
    pub(crate) fn to_stdio(self) -> Stdio {
        match self {
            OutputSink::Discard => Stdio::null(),
            OutputSink::Inherit => Stdio::inherit(),
            OutputSink::Capture | OutputSink::Pipe => Stdio::piped(),
        }
    }

    pub fn is_captured(self) -> bool {
        self == OutputSink::Capture
    }
}

/// Full redirection set of one process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirection {
    pub stdin: StdinSource,
    pub stdout: OutputSink,
    pub stderr: OutputSink,
}

impl Default for Redirection {
    fn default() -> Self {
        Self {
            stdin: StdinSource::Null,
            stdout: OutputSink::Inherit,
            stderr: OutputSink::Inherit,
        }
    }
}

/// Scheduling priority of a child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    Normal,
    /// Only runs when the machine is otherwise idle
    Idle,
}

/// Everything needed to (re)launch one process
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub name: String,
    pub argv: Vec<String>,
    pub redirection: Redirection,
    /// Variables set on top of the inherited environment
    pub env: HashMap<String, String>,
    /// Variables removed from the inherited environment
    pub env_remove: Vec<String>,
    pub priority: Priority,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, argv: Vec<String>) -> Self {
        Self {
            name: name.into(),
            argv,
            redirection: Redirection::default(),
            env: HashMap::new(),
            env_remove: Vec::new(),
            priority: Priority::Normal,
        }
    }

    pub fn stdin(mut self, source: StdinSource) -> Self {
        self.redirection.stdin = source;
        self
    }

    pub fn stdout(mut self, sink: OutputSink) -> Self {
        self.redirection.stdout = sink;
        self
    }

    pub fn stderr(mut self, sink: OutputSink) -> Self {
        self.redirection.stderr = sink;
        self
    }

    pub fn envs(mut self, env: HashMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Name of the upstream process this one reads from
    pub fn upstream(&self) -> Option<&str> {
        match &self.redirection.stdin {
            StdinSource::FromProcess(name) => Some(name.as_str()),
            _ => None,
        }
    }
}

/// Stdin handle resolved against the running process table
#[derive(Debug)]
pub enum ResolvedStdin {
    Null,
    Inherit,
    Chained(ChildStdout),
}

impl ResolvedStdin {
    pub(crate) fn into_stdio(self) -> Stdio {
        match self {
            ResolvedStdin::Null => Stdio::null(),
            ResolvedStdin::Inherit => Stdio::inherit(),
            ResolvedStdin::Chained(stdout) => Stdio::from(stdout),
        }
    }
}
