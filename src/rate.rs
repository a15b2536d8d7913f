//! Rate controller: converts each packet's capture metadata into an absolute send target (C2, §4.2).
//!
//! Modeled on `capture/replay.rs`'s `ReplayMode` + `apply_*_timing` methods in the teacher, but
//! generalized to return an absolute microsecond deadline instead of awaiting a `Duration`
//! directly — the replay loop (C6) needs that deadline *before* it starts polling abort/suspend, so
//! computing and waiting can't be fused into one async sleep the way the teacher did it.

use crate::error::ReplayError;
use crate::timing::now_us;
use crate::types::PacketRecord;

/// Tagged union of supported pacing modes (§3 "Speed mode").
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeedMode {
    /// Real capture time stretched by `1/k`.
    Multiplier(f64),
    /// Target aggregate line rate in megabits/second. `0.0` means unbounded (same as `Topspeed`).
    Mbps(f64),
    /// Target packets/second, emitted in bursts of `burst` back-to-back before pacing.
    Pps { rate: f64, burst: u32 },
    /// No pacing at all.
    Topspeed,
    /// Block after each packet until the installed single-step callback says to continue.
    OneAtATime,
}

impl SpeedMode {
    pub fn validate(&self) -> Result<(), ReplayError> {
        match *self {
            SpeedMode::Multiplier(k) if k <= 0.0 => {
                Err(ReplayError::config("multiplier must be > 0"))
            }
            SpeedMode::Mbps(r) if r < 0.0 => Err(ReplayError::config("mbps must be >= 0")),
            SpeedMode::Pps { rate, .. } if rate <= 0.0 => {
                Err(ReplayError::config("pps rate must be > 0"))
            }
            SpeedMode::Pps { burst, .. } if burst == 0 => {
                Err(ReplayError::config("pps burst must be >= 1"))
            }
            _ => Ok(()),
        }
    }
}

/// Per-replay pacing state. One instance lives for the whole `replay()` call (not reset between
/// sources or loops) so that `Mbps`'s running byte counter and `Pps`'s burst window keep advancing
/// across source/loop boundaries, matching the anchor-reuse rule in §4.6.
///
/// Capture times are mapped onto a single virtual timeline anchored at `cap_start_us`: within one
/// loop, each source's raw timestamps chain onto the previous source's via the monotonic clamp in
/// `next_target` (back-to-back stitching, no explicit offset needed). Across a loop boundary the
/// raw timestamps restart near their file's own zero point, so `begin_loop` folds the just-finished
/// loop's span into `loop_offset_us` and the next loop's first call to `next_target` re-anchors
/// `loop_start_raw_us` to that loop's first raw timestamp — without this, the clamp alone would pin
/// every packet of loop 2+ to loop 1's final target, collapsing later loops to topspeed (§4.6).
pub struct RateController {
    mode: SpeedMode,
    use_pkthdr_len: bool,
    mono_start_us: i64,
    cap_start_us: i64,
    last_capture_time_us: i64,
    loop_offset_us: i64,
    loop_start_raw_us: i64,
    last_raw_in_loop_us: i64,
    awaiting_loop_start: bool,
    bytes_sent: u64,
    burst_sent_in_window: u32,
    window_start_us: i64,
}

impl RateController {
    pub fn new(mode: SpeedMode, use_pkthdr_len: bool) -> Self {
        RateController {
            mode,
            use_pkthdr_len,
            mono_start_us: 0,
            cap_start_us: 0,
            last_capture_time_us: 0,
            loop_offset_us: 0,
            loop_start_raw_us: 0,
            last_raw_in_loop_us: 0,
            awaiting_loop_start: false,
            bytes_sent: 0,
            burst_sent_in_window: 0,
            window_start_us: 0,
        }
    }

    /// Capture the `(mono_start, cap_start)` anchors. Called exactly once per `replay()`
    /// invocation, never per loop or per source (§4.6).
    pub fn begin(&mut self, mono_start_us: i64, cap_start_us: i64) {
        self.mono_start_us = mono_start_us;
        self.cap_start_us = cap_start_us;
        self.last_capture_time_us = cap_start_us;
        self.loop_offset_us = 0;
        self.loop_start_raw_us = cap_start_us;
        self.last_raw_in_loop_us = cap_start_us;
        self.awaiting_loop_start = false;
        self.window_start_us = mono_start_us;
    }

    /// Fold the loop just finished into the running offset and arrange for the next call to
    /// `next_target` to re-anchor the new loop's start. Called once per loop boundary (i.e. for
    /// loop indices 1, 2, ... — not for the very first pass, which `begin` already anchors).
    pub fn begin_loop(&mut self) {
        self.loop_offset_us += self.last_raw_in_loop_us - self.loop_start_raw_us;
        self.awaiting_loop_start = true;
    }

    /// Compute `s_n`, this packet's absolute send target, without mutating the running counters
    /// (those advance in [`RateController::record_sent`], called only after a successful send).
    pub fn next_target(&mut self, record: &PacketRecord) -> i64 {
        let raw = record.capture_time_us;
        if self.awaiting_loop_start {
            self.loop_start_raw_us = raw;
            self.awaiting_loop_start = false;
        }
        self.last_raw_in_loop_us = raw;

        let virtual_c_n = self.cap_start_us + self.loop_offset_us + (raw - self.loop_start_raw_us);
        let c_n = virtual_c_n.max(self.last_capture_time_us);
        self.last_capture_time_us = c_n;

        match self.mode {
            SpeedMode::Multiplier(k) => {
                self.mono_start_us + ((c_n - self.cap_start_us) as f64 / k) as i64
            }
            SpeedMode::Mbps(r) => {
                if r <= 0.0 {
                    now_us()
                } else {
                    let offset_us = (self.bytes_sent as f64 * 8.0) / r;
                    self.mono_start_us + offset_us as i64
                }
            }
            SpeedMode::Pps { rate, burst } => {
                if self.burst_sent_in_window < burst {
                    now_us()
                } else {
                    let advance_us = (burst as f64 * 1_000_000.0 / rate) as i64;
                    self.window_start_us += advance_us;
                    self.burst_sent_in_window = 0;
                    self.window_start_us
                }
            }
            SpeedMode::Topspeed | SpeedMode::OneAtATime => now_us(),
        }
    }

    /// Advance the running counters after a packet has actually been sent.
    pub fn record_sent(&mut self, record: &PacketRecord) {
        match self.mode {
            SpeedMode::Mbps(_) => {
                self.bytes_sent += record.effective_length(self.use_pkthdr_len) as u64;
            }
            SpeedMode::Pps { .. } => {
                self.burst_sent_in_window += 1;
            }
            _ => {}
        }
    }
}
