//! Per-OS process details: idle priority and graceful termination

use std::process::{Child, Command};

use tracing::debug;

use super::redirect::Priority;

/// Build the OS command for `argv`, applying the requested priority
#[cfg(unix)]
pub(crate) fn command_for(argv: &[String], priority: Priority) -> Option<Command> {
    let (program, args) = argv.split_first()?;
    let command = match priority {
        Priority::Normal => {
            let mut command = Command::new(program);
            command.args(args);
            command
        }
        Priority::Idle => {
            let mut command = Command::new("nice");
            command.arg("-n").arg("19").arg(program).args(args);
            command
        }
    };
    Some(command)
}

/// Build the OS command for `argv`, applying the requested priority
#[cfg(windows)]
pub(crate) fn command_for(argv: &[String], priority: Priority) -> Option<Command> {
    use std::os::windows::process::CommandExt;
    use winapi::um::winbase::{CREATE_NO_WINDOW, IDLE_PRIORITY_CLASS};

    let (program, args) = argv.split_first()?;
    let mut command = Command::new(program);
    command.args(args);
    let mut flags = CREATE_NO_WINDOW;
    if priority == Priority::Idle {
        flags |= IDLE_PRIORITY_CLASS;
    }
    command.creation_flags(flags);
    Some(command)
}

/// Ask the process to exit on its own (SIGTERM)
#[cfg(unix)]
pub(crate) fn request_terminate(child: &mut Child) -> std::io::Result<()> {
    use std::io;

    let pid = libc::pid_t::try_from(child.id())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: `pid` is our own child and has not been reaped, so it cannot
    // name an unrelated process
    if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        debug!(pid, "SIGTERM found no process, probably gone");
        return Ok(());
    }
    Err(err)
}

/// Ask the process to exit on its own
#[cfg(windows)]
pub(crate) fn request_terminate(child: &mut Child) -> std::io::Result<()> {
    // No console signal can target a detached child, fall back to a hard kill
    debug!(pid = child.id(), "graceful stop unavailable, killing");
    child.kill()
}
