//! Signal handling (§5, §6): handlers touch only sig-atomic flags; all
//! real work (reopening logfiles, reaping children) happens back on the
//! event loop thread once it observes the flag.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

static DONE: AtomicBool = AtomicBool::new(false);
static RECONFIG: AtomicBool = AtomicBool::new(false);
static CHILD_EXITED: AtomicBool = AtomicBool::new(false);
/// The signal number that set `DONE`, for logging (server.c:262). Zero
/// until a shutdown signal has actually been delivered.
static DONE_SIGNUM: AtomicI32 = AtomicI32::new(0);

pub fn is_done() -> bool {
    DONE.load(Ordering::SeqCst)
}

/// The signal that triggered shutdown (`SIGINT` or `SIGTERM`), or 0 if
/// `is_done()` is still false.
pub fn done_signum() -> libc::c_int {
    DONE_SIGNUM.load(Ordering::SeqCst)
}

pub fn is_reconfig_requested() -> bool {
    RECONFIG.load(Ordering::SeqCst)
}

/// Clears the reconfig flag once the event loop has acted on it.
pub fn clear_reconfig() {
    RECONFIG.store(false, Ordering::SeqCst);
}

pub fn take_child_exited() -> bool {
    CHILD_EXITED.swap(false, Ordering::SeqCst)
}

extern "C" fn on_exit_signal(signum: libc::c_int) {
    DONE_SIGNUM.store(signum, Ordering::SeqCst);
    DONE.store(true, Ordering::SeqCst);
}

extern "C" fn on_hup(_signum: libc::c_int) {
    RECONFIG.store(true, Ordering::SeqCst);
}

extern "C" fn on_chld(_signum: libc::c_int) {
    CHILD_EXITED.store(true, Ordering::SeqCst);
}

/// Installs SIGINT/SIGTERM (orderly shutdown), SIGHUP (reconfig), SIGCHLD
/// (flag for the reap loop), and ignores SIGPIPE (§6).
pub fn install() {
    unsafe {
        libc::signal(libc::SIGINT, on_exit_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_exit_signal as libc::sighandler_t);
        libc::signal(libc::SIGHUP, on_hup as libc::sighandler_t);
        libc::signal(libc::SIGCHLD, on_chld as libc::sighandler_t);
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

/// Test-only hook: restores default state so each test starts clean. Real
/// signal handlers are process-global by nature, so this is best-effort.
#[cfg(test)]
pub(crate) fn reset_for_test() {
    DONE.store(false, Ordering::SeqCst);
    RECONFIG.store(false, Ordering::SeqCst);
    CHILD_EXITED.store(false, Ordering::SeqCst);
    DONE_SIGNUM.store(0, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_start_clear_and_can_be_set_and_cleared() {
        reset_for_test();
        assert!(!is_done());
        assert!(!is_reconfig_requested());
        on_exit_signal(libc::SIGTERM);
        assert!(is_done());
        assert_eq!(done_signum(), libc::SIGTERM);
        on_hup(libc::SIGHUP);
        assert!(is_reconfig_requested());
        clear_reconfig();
        assert!(!is_reconfig_requested());
    }
}
