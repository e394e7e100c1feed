//! Resident-memory debug notes for the `measure_memory` option.

use tracing::debug;

use crate::progress::Size;

/// Peak resident set of this process, where the platform exposes it.
#[cfg(unix)]
fn peak_resident_bytes() -> Option<u64> {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return None;
    }
    // ru_maxrss is kibibytes on Linux, bytes on macOS
    #[cfg(target_os = "macos")]
    let bytes = usage.ru_maxrss as u64;
    #[cfg(not(target_os = "macos"))]
    let bytes = usage.ru_maxrss as u64 * 1024;
    Some(bytes)
}

#[cfg(not(unix))]
fn peak_resident_bytes() -> Option<u64> {
    None
}

pub(crate) fn note(enabled: bool, checkpoint: &str) {
    if !enabled {
        return;
    }
    if let Some(bytes) = peak_resident_bytes() {
        debug!("peak resident set at {}: {}", checkpoint, Size(bytes));
    }
}
