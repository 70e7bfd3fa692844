//! Thread scheduler priority switching.
//!
//! Scheduler-priority manipulation is unusual and platform-specific, and
//! insists the priority policy live on the handler table, not inside each
//! handler body — that table is [`crate::commands::dispatch::priority_class_for`].
//! This module only knows how to *apply* a [`PriorityClass`] to the calling
//! OS thread; it has no opinion about which commands get which class.
//!
//! Grounded on the pack's `posix-scheduler` crate: thin `libc` wrappers
//! around `sched_setscheduler`/`setpriority`, guarded by `syscall!` turning
//! `-1` returns into `io::Error::last_os_error()`.

use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityClass {
    Normal,
    Exposure,
}

macro_rules! syscall {
    ($ex:expr) => {{
        let result = unsafe { $ex };
        if result == -1 {
            return Err(io::Error::last_os_error());
        }
        result
    }};
}

#[cfg(target_os = "linux")]
fn set_scheduler_fifo(priority: i32) -> io::Result<()> {
    let sched_params = libc::sched_param {
        sched_priority: priority,
    };
    syscall!(libc::sched_setscheduler(
        0,
        libc::SCHED_FIFO,
        &sched_params
    ));
    Ok(())
}

#[cfg(target_os = "linux")]
fn set_nice(priority: i32) -> io::Result<()> {
    syscall!(libc::setpriority(
        libc::PRIO_PROCESS as libc::c_uint,
        0,
        priority
    ));
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_scheduler_fifo(_priority: i32) -> io::Result<()> {
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_nice(_priority: i32) -> io::Result<()> {
    Ok(())
}

/// Raise or lower the *calling* thread's priority to `class`, using the
/// configured numeric levels. With the `posix_sched_fifo` feature (requires
/// `CAP_SYS_NICE`) this uses real-time `SCHED_FIFO`; otherwise it falls back
/// to best-effort `nice` adjustment, which is enough to make "exposure"
/// threads preferred over "status" threads without requiring elevated
/// privileges in development.
pub fn apply(class: PriorityClass, normal: i32, exposure: i32) {
    let priority = match class {
        PriorityClass::Normal => normal,
        PriorityClass::Exposure => exposure,
    };

    let result = if cfg!(feature = "posix_sched_fifo") {
        set_scheduler_fifo(priority)
    } else {
        set_nice(priority)
    };

    if let Err(e) = result {
        tracing::warn!(?class, priority, error = %e, "failed to set thread priority");
    }
}
