//! Best-effort readings of the current process's memory and thread usage.

/// Fields of interest parsed from `/proc/self/status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcStatus {
    pub rss_bytes: Option<u64>,
    pub threads: Option<usize>,
}

/// Parse `/proc/self/status` contents.
///
/// This is a pure helper intended for unit testing; it does not touch the filesystem.
pub fn parse_proc_status(contents: &str) -> ProcStatus {
    let mut status = ProcStatus::default();
    for line in contents.lines() {
        let line = line.trim_start();
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            status.rss_bytes = rest
                .split_whitespace()
                .next()
                .and_then(|kb| kb.parse::<u64>().ok())
                .map(|kb| kb.saturating_mul(1024));
        } else if let Some(rest) = line.strip_prefix("Threads:") {
            status.threads = rest.trim().parse::<usize>().ok();
        }
    }
    status
}

/// Read `/proc/self/status`; `None` on platforms without procfs.
pub fn proc_status() -> Option<ProcStatus> {
    #[cfg(target_os = "linux")]
    {
        match std::fs::read_to_string("/proc/self/status") {
            Ok(contents) => Some(parse_proc_status(&contents)),
            Err(err) => {
                // `/proc` may not be available in some sandboxed environments; only log
                // unexpected filesystem errors, and only once.
                static REPORTED: std::sync::OnceLock<()> = std::sync::OnceLock::new();
                if err.kind() != std::io::ErrorKind::NotFound && REPORTED.set(()).is_ok() {
                    tracing::debug!(
                        target: "strata.memory",
                        error = %err,
                        "failed to read /proc/self/status"
                    );
                }
                None
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

pub fn current_rss_bytes() -> Option<u64> {
    proc_status().and_then(|status| status.rss_bytes)
}

pub fn current_thread_count() -> Option<usize> {
    proc_status().and_then(|status| status.threads)
}

/// Ask the allocator to hand free heap pages back to the OS.
///
/// Rust has no collector to run; this is the closest equivalent. Returns `true` when the
/// allocator reports that memory was released. Always `false` on platforms without
/// `malloc_trim`.
pub fn release_free_memory() -> bool {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    {
        // SAFETY: `malloc_trim` only inspects allocator-owned free lists and has no
        // preconditions on the caller.
        unsafe { libc::malloc_trim(0) != 0 }
    }

    #[cfg(not(all(target_os = "linux", target_env = "gnu")))]
    {
        false
    }
}
