//! Fork while other threads are hammering the allocator. Without the fork
//! hooks the child can inherit a heap lock held by a thread that doesn't exist
//! in the child, and hang on its first allocation.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
};

use hopeful::{install_fork_hooks, mark_ready, HopefulAlloc};

#[global_allocator]
static GLOBAL: HopefulAlloc = HopefulAlloc;

fn main() {
    env_logger::init();
    install_fork_hooks().expect("pthread_atfork");
    mark_ready();

    let stop = AtomicBool::new(false);
    thread::scope(|s| {
        for t in 0..4 {
            let stop = &stop;
            s.spawn(move || {
                let mut n = 0usize;
                while !stop.load(Ordering::Relaxed) {
                    let v = vec![t as u8; 1 + n % 4096];
                    n = n.wrapping_add(v.len());
                }
                log::debug!("thread {t} done");
            });
        }

        for round in 0..100 {
            match unsafe { libc::fork() } {
                -1 => panic!("fork() failed"),
                0 => {
                    let v: Vec<u64> = (0..1000).collect();
                    unsafe { libc::_exit((v.len() != 1000) as i32) }
                }
                pid => {
                    let mut status = 0;
                    unsafe { libc::waitpid(pid, &mut status, 0) };
                    assert!(libc::WIFEXITED(status) && libc::WEXITSTATUS(status) == 0);
                    log::info!("round {round}: child {pid} allocated and exited cleanly");
                }
            }
        }
        stop.store(true, Ordering::Relaxed);
    });
}
