use std::time::Instant;

use crate::core::benchmark::Clock;

/// Wall time for kernel timing, immune to NTP slewing where the platform
/// allows it.
///
/// Readings are seconds since the clock was created. Every reading uses the
/// same origin, so a failed raw read never mixes time bases.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
    #[cfg(target_os = "linux")]
    raw_origin: Option<(i64, i64)>,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            #[cfg(target_os = "linux")]
            raw_origin: raw_now(),
        }
    }

    fn fallback(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// `CLOCK_MONOTONIC_RAW` as (seconds, nanoseconds)
#[cfg(target_os = "linux")]
fn raw_now() -> Option<(i64, i64)> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid out-pointer for the duration of the call.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut ts) };
    if rc != 0 {
        log::debug!("clock_gettime(CLOCK_MONOTONIC_RAW) failed");
        return None;
    }
    Some((ts.tv_sec as i64, ts.tv_nsec as i64))
}

#[cfg(target_os = "linux")]
impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        match (self.raw_origin, raw_now()) {
            (Some((sec0, nsec0)), Some((sec, nsec))) => {
                (sec - sec0) as f64 + (nsec - nsec0) as f64 * 1e-9
            }
            _ => self.fallback(),
        }
    }
}

#[cfg(not(target_os = "linux"))]
impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.fallback()
    }
}
