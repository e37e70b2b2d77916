//! Best-effort real-time scheduling (spec §5: "elevated real-time priority
//! (`SCHED_FIFO`, priority ~30-50 on POSIX)").
//!
//! A thin `libc`-backed host facility in the style of the pack's
//! direct-syscall dependencies; failure is logged and non-fatal, since the
//! spec does not make `SCHED_FIFO` a hard precondition for correctness, only
//! for minimizing symbol-timing jitter.

/// Requests `SCHED_FIFO` scheduling at `priority` (clamped to the kernel's
/// valid range for that policy) for the calling thread. Returns `true` if
/// the kernel granted it; logs and returns `false` otherwise (most commonly
/// `EPERM` when not running as root or without `CAP_SYS_NICE`).
pub fn raise_priority(priority: i32) -> bool {
    let min = unsafe { libc::sched_get_priority_min(libc::SCHED_FIFO) };
    let max = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
    let priority = priority.clamp(min, max);

    let param = libc::sched_param { sched_priority: priority };
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        log::warn!(
            "could not raise to SCHED_FIFO priority {priority}: {}",
            std::io::Error::last_os_error()
        );
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_into_the_valid_sched_fifo_range() {
        // Exercises the clamp path without asserting on the syscall result,
        // which depends on the test runner's privileges.
        let min = unsafe { libc::sched_get_priority_min(libc::SCHED_FIFO) };
        let max = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
        assert!(min <= max);
        let _ = raise_priority(max + 1000);
    }
}
