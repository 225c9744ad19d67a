//! Process-group helpers so a timed-out shell command's children are reaped
//! along with it, not merely the `sh` wrapper. Unix only; a no-op shim is
//! compiled in for non-Unix targets (see `lib.rs`).

use std::io;

#[cfg(unix)]
use std::os::unix::process::CommandExt;

#[cfg(unix)]
/// Put the spawned `sh` into its own process group, so the whole tree it
/// forks (e.g. `sleep 2 && echo done`) can be killed as a unit.
pub fn set_process_group(cmd: &mut tokio::process::Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setpgid(0, 0) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(unix)]
/// Send `SIGKILL` to the process group led by `pid` (best-effort).
pub fn kill_process_group(pid: u32) {
    unsafe {
        libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
    }
}

#[cfg(not(unix))]
pub fn set_process_group(_cmd: &mut tokio::process::Command) {}

#[cfg(not(unix))]
pub fn kill_process_group(_pid: u32) {}
