//! Thread scheduling priority

/// Ask the OS to run the calling thread at `nice`. Returns false if refused.
#[cfg(unix)]
pub(crate) fn set_current_thread_priority(nice: i32) -> bool {
    if nice == 0 {
        return true;
    }
    // On Linux PRIO_PROCESS with id 0 applies to the calling thread only
    let result = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, nice) };
    if result != 0 {
        log::warn!(
            "Failed to set thread priority {}: {}",
            nice,
            std::io::Error::last_os_error()
        );
        return false;
    }
    true
}

#[cfg(not(unix))]
pub(crate) fn set_current_thread_priority(nice: i32) -> bool {
    if nice != 0 {
        log::debug!("Thread priority not supported on this platform");
    }
    nice == 0
}
