//! Reset subsystem (§4.9): forks a subshell running the operator's reset
//! command for a console, bounded by a watchdog timer that kills the
//! whole process group if the command overruns.

use std::ffi::CString;
use std::io;

use log::{error, info, warn};

/// `%N` template expansion: substitutes the console name for `%N` in the
/// configured reset command, mirroring `format_obj_string`.
pub fn expand_template(cmd: &str, console_name: &str) -> String {
    cmd.replace("%N", console_name)
}

/// Forks a `/bin/sh -c <cmd>` subshell. The child calls `setpgid(0, 0)` to
/// become its own process group leader; the parent also calls it on the
/// child's pid to close the race where the watchdog fires before the
/// child's own `setpgid` has run (APUE §9.4, mirrored verbatim from the
/// original implementation). Returns the child pid on success.
pub fn spawn_reset_command(cmd: &str) -> io::Result<libc::pid_t> {
    let cmd_c = CString::new(cmd)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "reset command has interior NUL"))?;
    let sh = CString::new("/bin/sh").unwrap();
    let dash_c = CString::new("-c").unwrap();

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(io::Error::last_os_error());
    }
    if pid == 0 {
        // Child: only async-signal-safe calls until exec.
        unsafe {
            libc::setpgid(0, 0);
            libc::close(libc::STDIN_FILENO);
            libc::close(libc::STDOUT_FILENO);
            libc::close(libc::STDERR_FILENO);
            let argv = [sh.as_ptr(), dash_c.as_ptr(), cmd_c.as_ptr(), std::ptr::null()];
            libc::execv(sh.as_ptr(), argv.as_ptr());
            libc::_exit(127); // execv failed
        }
    }

    // Parent also calls setpgid on the child to close the race (both sides
    // may run before the other; one call is redundant, neither is wrong).
    unsafe {
        libc::setpgid(pid, 0);
    }
    Ok(pid)
}

/// Watchdog callback: if `pid` (and therefore its process group) is still
/// alive, kill the whole group. A log line names the time limit that was
/// exceeded, matching scenario 4 of the testable properties (§8).
pub fn kill_reset_if_alive(pid: libc::pid_t, timeout_secs: u64) {
    let still_alive = unsafe { libc::kill(pid, 0) } == 0;
    if !still_alive {
        return;
    }
    let rc = unsafe { libc::kill(-pid, libc::SIGKILL) };
    if rc == 0 {
        warn!("ResetCmd process pid={pid} exceeded {timeout_secs}s time limit");
    } else {
        error!("failed to kill ResetCmd process group for pid={pid}: {}", io::Error::last_os_error());
    }
}

/// Non-blocking reap loop, called from the SIGCHLD path (§4.9, §5).
/// Async-signal-safe in spirit: pure libc calls, no allocation.
pub fn reap_children() {
    loop {
        let pid = unsafe { libc::waitpid(-1, std::ptr::null_mut(), libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
        info!("process {pid} terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_expansion_substitutes_console_name() {
        assert_eq!(expand_template("reset %N now", "alpha"), "reset alpha now");
        assert_eq!(expand_template("no placeholder", "alpha"), "no placeholder");
    }

    #[test]
    fn spawn_and_reap_a_trivial_command() {
        let pid = spawn_reset_command("exit 0").expect("fork should succeed");
        assert!(pid > 0);
        // Give the child a moment, then reap it like SIGCHLD would.
        std::thread::sleep(std::time::Duration::from_millis(100));
        reap_children();
    }

    #[test]
    fn watchdog_kills_a_sleeping_command() {
        let pid = spawn_reset_command("sleep 5").expect("fork should succeed");
        kill_reset_if_alive(pid, 0);
        std::thread::sleep(std::time::Duration::from_millis(100));
        let still_alive = unsafe { libc::kill(pid, 0) } == 0;
        assert!(!still_alive, "process group should have been killed");
        reap_children();
    }
}
