//! Background line readers for captured process output

use std::io::{ErrorKind, Read};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use tracing::debug;

use crate::domain::model::{Line, StreamKind};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Incremental splitter turning raw output bytes into [`Line`]s.
///
/// CRLF ends a line like LF does. A bare CR ends a progress piece: the text
/// after it is delivered with `overwrite` set. A CR at the very end of a chunk
/// is held back until the next byte shows whether it was part of a CRLF, so the
/// produced lines never depend on how the input was chunked.
#[derive(Debug)]
pub struct LineAssembler {
    stream: StreamKind,
    residue: Vec<u8>,
    overwrite: bool,
    pending_cr: bool,
}

impl LineAssembler {
    pub fn new(stream: StreamKind) -> Self {
        Self {
            stream,
            residue: Vec::new(),
            overwrite: false,
            pending_cr: false,
        }
    }

    /// Feed a chunk, returning every line it completes
    pub fn push(&mut self, bytes: &[u8], timestamp: DateTime<Utc>) -> Vec<Line> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if self.pending_cr {
                self.pending_cr = false;
                if byte == b'\n' {
                    self.emit(&mut lines, timestamp, true);
                    self.overwrite = false;
                    continue;
                }
                self.emit(&mut lines, timestamp, false);
                self.overwrite = true;
            }

            match byte {
                b'\r' => self.pending_cr = true,
                b'\n' => {
                    self.emit(&mut lines, timestamp, true);
                    self.overwrite = false;
                }
                _ => self.residue.push(byte),
            }
        }
        lines
    }

    /// Flush whatever is left at end of stream
    pub fn finish(&mut self, timestamp: DateTime<Utc>) -> Vec<Line> {
        let mut lines = Vec::new();
        self.pending_cr = false;
        self.emit(&mut lines, timestamp, false);
        self.overwrite = false;
        lines
    }

    /// Bytes received but not yet delimited
    pub fn residue(&self) -> &[u8] {
        &self.residue
    }

    /// Drop buffered state, used when the owning process restarts
    pub fn reset(&mut self) {
        self.residue.clear();
        self.overwrite = false;
        self.pending_cr = false;
    }

    fn emit(&mut self, lines: &mut Vec<Line>, timestamp: DateTime<Utc>, keep_empty: bool) {
        if self.residue.is_empty() && !keep_empty {
            return;
        }
        let text = String::from_utf8_lossy(&self.residue).into_owned();
        self.residue.clear();
        lines.push(Line::new(text, self.overwrite, self.stream, timestamp));
    }
}

/// Spawn a thread that reads `source` until EOF and forwards complete lines.
///
/// The thread only touches the channel; it exits when the pipe closes or the
/// receiving side is dropped.
pub fn spawn_reader<R>(
    process: &str,
    stream: StreamKind,
    mut source: R,
    sink: Sender<Line>,
) -> std::io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    let process = process.to_string();
    thread::Builder::new()
        .name(format!("{}-{}", process, stream))
        .spawn(move || {
            let mut assembler = LineAssembler::new(stream);
            let mut buffer = vec![0u8; READ_BUFFER_SIZE];
            loop {
                match source.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        for line in assembler.push(&buffer[..n], Utc::now()) {
                            if sink.send(line).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!(process = %process, %stream, error = %e, "Reader stopped");
                        break;
                    }
                }
            }
            for line in assembler.finish(Utc::now()) {
                let _ = sink.send(line);
            }
        })
}
