//! Monotonic clock and per-packet wait strategies (C1, §4.1).
//!
//! `now_us` anchors every timestamp to a single process-wide [`Instant`] so that arithmetic on the
//! returned values behaves like arithmetic on a monotonic clock, never wall-clock time (which can
//! jump on NTP correction). `wait_until` realizes the contract in §4.1: a no-op if the target has
//! already passed, and a wake no earlier than `target - accel` so scheduling tail latency doesn't
//! turn into lateness.

use crate::error::ReplayError;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

fn process_start() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

/// Current monotonic time in microseconds, anchored at first call in the process.
pub fn now_us() -> i64 {
    process_start().elapsed().as_micros() as i64
}

/// Timing-accuracy strategy (§3 "Timing-accuracy strategy").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingStrategy {
    AbsoluteTime,
    GettimeofdaySpin,
    Nanosleep,
    SelectSleep,
    RdtscSpin,
    IoportSleep,
}

impl TimingStrategy {
    pub fn name(self) -> &'static str {
        match self {
            TimingStrategy::AbsoluteTime => "absolute-time",
            TimingStrategy::GettimeofdaySpin => "gettimeofday-spin",
            TimingStrategy::Nanosleep => "nanosleep",
            TimingStrategy::SelectSleep => "select-sleep",
            TimingStrategy::RdtscSpin => "rdtsc-spin",
            TimingStrategy::IoportSleep => "ioport-sleep",
        }
    }
}

/// Reject a strategy this platform (or this process's privileges) cannot realize, at
/// configuration time rather than at first use during replay.
pub fn validate_strategy(strategy: TimingStrategy) -> Result<(), ReplayError> {
    match strategy {
        TimingStrategy::RdtscSpin => {
            if !cfg!(target_arch = "x86_64") {
                return Err(ReplayError::PlatformUnavailable(
                    "rdtsc-spin requires an x86_64 target".into(),
                ));
            }
            rdtsc::calibrate()?;
            Ok(())
        }
        TimingStrategy::IoportSleep => {
            if !(cfg!(target_os = "linux") && cfg!(target_arch = "x86_64")) {
                return Err(ReplayError::PlatformUnavailable(
                    "ioport-sleep requires Linux on x86_64".into(),
                ));
            }
            ioport::acquire()?;
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Block until the monotonic clock reaches `target_us`, using `strategy`. `accel_us` is subtracted
/// from the *planned sleep*, not the target (§4.1's "sleep accelerator").
pub fn wait_until(target_us: i64, strategy: TimingStrategy, accel_us: u32) -> Result<(), ReplayError> {
    loop {
        let remaining = target_us - now_us();
        if remaining <= 0 {
            return Ok(());
        }
        let planned = remaining.saturating_sub(accel_us as i64).max(0) as u64;
        if planned == 0 {
            // accel ate the whole remaining sleep: spin the last stretch so we still land on
            // the absolute target rather than overshooting by a full strategy quantum.
            while now_us() < target_us {
                std::hint::spin_loop();
            }
            return Ok(());
        }
        match strategy {
            TimingStrategy::GettimeofdaySpin => {
                let deadline = now_us() + planned as i64;
                while now_us() < deadline {
                    std::hint::spin_loop();
                }
                return Ok(());
            }
            TimingStrategy::Nanosleep => {
                nanosleep(Duration::from_micros(planned));
                return Ok(());
            }
            TimingStrategy::SelectSleep => {
                select_sleep(Duration::from_micros(planned));
                return Ok(());
            }
            TimingStrategy::RdtscSpin => {
                rdtsc::spin(planned)?;
                return Ok(());
            }
            TimingStrategy::IoportSleep => {
                ioport::sleep(planned)?;
                return Ok(());
            }
            TimingStrategy::AbsoluteTime => {
                // Recompute right before sleeping so that scheduler wake jitter from a previous
                // partial sleep doesn't accumulate into the next one (anti-drift rule, §4.1).
                std::thread::sleep(Duration::from_micros(planned));
                return Ok(());
            }
        }
    }
}

fn nanosleep(d: Duration) {
    let ts = libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    };
    let mut rem = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    unsafe {
        // Best effort: a signal can return early with EINTR; resuming with the remainder keeps
        // the wait strategy honest without retrying the whole absolute-target computation.
        let mut req = ts;
        loop {
            let ret = libc::nanosleep(&req, &mut rem);
            if ret == 0 {
                break;
            }
            if std::io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                req = rem;
                continue;
            }
            break;
        }
    }
}

fn select_sleep(d: Duration) {
    let mut tv = libc::timeval {
        tv_sec: d.as_secs() as libc::time_t,
        tv_usec: d.subsec_micros() as libc::suseconds_t,
    };
    unsafe {
        libc::select(
            0,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            &mut tv,
        );
    }
}

/// `rdtsc-spin`: busy-spin reading the cycle counter, calibrated once against the monotonic clock.
#[cfg(target_arch = "x86_64")]
mod rdtsc {
    use super::now_us;
    use crate::error::ReplayError;
    use std::sync::OnceLock;

    fn cycles_per_us() -> &'static f64 {
        static CAL: OnceLock<f64> = OnceLock::new();
        CAL.get_or_init(|| {
            let t0 = unsafe { core::arch::x86_64::_rdtsc() };
            let us0 = now_us();
            // A short, fixed calibration window. 5ms is long enough for stable results on any
            // modern TSC and short enough not to stall startup noticeably.
            while now_us() - us0 < 5_000 {
                std::hint::spin_loop();
            }
            let t1 = unsafe { core::arch::x86_64::_rdtsc() };
            let us1 = now_us();
            let elapsed_us = (us1 - us0).max(1) as f64;
            (t1 - t0) as f64 / elapsed_us
        })
    }

    pub fn calibrate() -> Result<(), ReplayError> {
        let _ = cycles_per_us();
        Ok(())
    }

    pub fn spin(planned_us: u64) -> Result<(), ReplayError> {
        let cycles = (planned_us as f64 * cycles_per_us()) as u64;
        let start = unsafe { core::arch::x86_64::_rdtsc() };
        while unsafe { core::arch::x86_64::_rdtsc() }.wrapping_sub(start) < cycles {
            std::hint::spin_loop();
        }
        Ok(())
    }
}

#[cfg(not(target_arch = "x86_64"))]
mod rdtsc {
    use crate::error::ReplayError;

    pub fn calibrate() -> Result<(), ReplayError> {
        Err(ReplayError::PlatformUnavailable(
            "rdtsc-spin requires an x86_64 target".into(),
        ))
    }

    pub fn spin(_planned_us: u64) -> Result<(), ReplayError> {
        Err(ReplayError::PlatformUnavailable(
            "rdtsc-spin requires an x86_64 target".into(),
        ))
    }
}

/// `ioport-sleep`: repeatedly read legacy diagnostic port 0x80 as a calibrated delay. x86/Linux
/// only; requires the process to hold `CAP_SYS_RAWIO` (in practice, root) to call `ioperm`.
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
mod ioport {
    use crate::error::ReplayError;
    use std::sync::OnceLock;

    /// Reading port 0x80 once takes on the order of 1µs on real hardware; this is the strategy's
    /// documented jitter floor per §4.1.
    const PORT_READ_US: f64 = 1.0;

    pub fn acquire() -> Result<(), ReplayError> {
        static GRANTED: OnceLock<Result<(), String>> = OnceLock::new();
        GRANTED
            .get_or_init(|| {
                let ret = unsafe { libc::ioperm(0x80, 1, 1) };
                if ret == 0 {
                    Ok(())
                } else {
                    Err(std::io::Error::last_os_error().to_string())
                }
            })
            .clone()
            .map_err(|e| {
                ReplayError::PlatformUnavailable(format!(
                    "ioport-sleep requires CAP_SYS_RAWIO (ioperm failed: {e})"
                ))
            })
    }

    pub fn sleep(planned_us: u64) -> Result<(), ReplayError> {
        acquire()?;
        let reads = ((planned_us as f64) / PORT_READ_US).max(1.0) as u64;
        for _ in 0..reads {
            unsafe {
                let _value: u8;
                core::arch::asm!(
                    "in al, dx",
                    out("al") _value,
                    in("dx") 0x80u16,
                    options(nomem, nostack, preserves_flags)
                );
            }
        }
        Ok(())
    }
}

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
mod ioport {
    use crate::error::ReplayError;

    pub fn acquire() -> Result<(), ReplayError> {
        Err(ReplayError::PlatformUnavailable(
            "ioport-sleep requires Linux on x86_64".into(),
        ))
    }

    pub fn sleep(_planned_us: u64) -> Result<(), ReplayError> {
        acquire()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_us_is_monotonic() {
        let a = now_us();
        let b = now_us();
        assert!(b >= a);
    }

    #[test]
    fn wait_until_past_target_is_noop() {
        let start = now_us();
        wait_until(start - 1_000, TimingStrategy::Nanosleep, 0).unwrap();
        let elapsed = now_us() - start;
        assert!(elapsed < 5_000, "no-op wait took {elapsed}us");
    }

    #[test]
    fn wait_until_nanosleep_reaches_target() {
        let target = now_us() + 5_000;
        wait_until(target, TimingStrategy::Nanosleep, 0).unwrap();
        assert!(now_us() >= target);
    }

    #[test]
    fn wait_until_select_sleep_reaches_target() {
        let target = now_us() + 5_000;
        wait_until(target, TimingStrategy::SelectSleep, 0).unwrap();
        assert!(now_us() >= target);
    }

    #[test]
    fn wait_until_gettimeofday_spin_reaches_target() {
        let target = now_us() + 2_000;
        wait_until(target, TimingStrategy::GettimeofdaySpin, 0).unwrap();
        assert!(now_us() >= target);
    }

    #[test]
    fn accel_wakes_early_but_not_before_already_elapsed_target() {
        // A target already in the past must still be a no-op even with accel applied.
        let start = now_us();
        wait_until(start - 1, TimingStrategy::Nanosleep, 10_000).unwrap();
        assert!(now_us() - start < 5_000);
    }

    #[test]
    fn validate_strategy_accepts_portable_strategies() {
        assert!(validate_strategy(TimingStrategy::AbsoluteTime).is_ok());
        assert!(validate_strategy(TimingStrategy::Nanosleep).is_ok());
        assert!(validate_strategy(TimingStrategy::SelectSleep).is_ok());
        assert!(validate_strategy(TimingStrategy::GettimeofdaySpin).is_ok());
    }
}
