//! CPU time consumed by the calling thread.
//!
//! Linux exposes per-thread `utime`/`stime` in `/proc/thread-self/stat`.
//! Other platforms report no CPU time and samples carry `None`.

use std::time::Duration;

use crate::config::PROC_CLOCK_TICKS_PER_SEC;

/// CPU time (user + system) used so far by the current thread.
pub fn current_thread_cpu_time() -> Option<Duration> {
    #[cfg(target_os = "linux")]
    {
        let stat = std::fs::read_to_string("/proc/thread-self/stat").ok()?;
        parse_thread_stat(&stat)
    }

    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

/// Extract `utime + stime` from a `/proc/.../stat` line.
///
/// The command name (field 2) is parenthesized and may contain spaces, so
/// fields are counted from the last closing parenthesis.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_thread_stat(stat: &str) -> Option<Duration> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();

    // rest starts at field 3 (state); utime is field 14, stime field 15
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;

    let millis = (utime + stime) * 1000 / PROC_CLOCK_TICKS_PER_SEC;
    Some(Duration::from_millis(millis))
}
