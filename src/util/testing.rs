//! Helpers for tests that have to watch a process die.

use std::panic::{self, AssertUnwindSafe};

/// Run `f` in a forked child and return its `waitpid()` status. A panic in
/// `f` exits the child with 101, the child never returns into the harness.
pub fn child_status(f: impl FnOnce()) -> libc::c_int {
    // SAFETY: the child calls nothing but `f`, `setrlimit()` and `_exit()`
    match unsafe { libc::fork() } {
        -1 => panic!("fork() failed: {}", std::io::Error::last_os_error()),
        0 => unsafe {
            // No core dumps for expected aborts
            let no_core = libc::rlimit {
                rlim_cur: 0,
                rlim_max: 0,
            };
            libc::setrlimit(libc::RLIMIT_CORE, &no_core);
            let code = match panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(()) => 0,
                Err(_) => 101,
            };
            libc::_exit(code)
        },
        pid => {
            let mut status = 0;
            let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
            assert_eq!(rc, pid);
            status
        }
    }
}

/// Did `f` take the child down with `SIGABRT`?
pub fn aborts_in_child(f: impl FnOnce()) -> bool {
    let status = child_status(f);
    libc::WIFSIGNALED(status) && libc::WTERMSIG(status) == libc::SIGABRT
}

/// Did `f` run to completion in the child, without aborting or panicking?
pub fn completes_in_child(f: impl FnOnce()) -> bool {
    let status = child_status(f);
    libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0
}
