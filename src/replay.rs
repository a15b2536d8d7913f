//! Replay loop (C6, §4.6): drives one full replay across sources × loops, pulling records,
//! consulting the rate controller (C2), waiting via timing primitives (C1), dispatching (C3), and
//! honoring the control flags (C7) once per packet.
//!
//! Grounded on `capture/replay.rs`'s top-level replay driver in the teacher — same "pull, pace,
//! send, count" shape — generalized from a single fixed-rate pcap replay into the full
//! multi-source/multi-loop/bitmap/cache/control-surface model this spec describes.

use crate::context::ReplayContext;
use crate::dispatch::{dispatch, DispatchOutcome};
use crate::error::ReplayError;
use crate::rate::{RateController, SpeedMode};
use crate::source::SourceHandle;
use crate::timing::{now_us, wait_until};
use std::time::Duration;

/// How a replay (or a configuration step) concluded. Reused across both entry points per §7: a
/// clean full replay and a clean configuration both report `Completed`; a replay ended by
/// `abort()` reports `Aborted`; a configuration step that recorded a non-fatal warning reports
/// `ConfiguredWithWarnings` instead of `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    Completed,
    Aborted,
    ConfiguredWithWarnings,
}

/// Owns the per-source iteration state (readers, caches, bitmap) for one configured context.
/// Built once via [`ReplayEngine::new`]; `replay` may be called on it more than once.
pub struct ReplayEngine {
    sources: Vec<SourceHandle>,
}

impl ReplayEngine {
    /// The configuration entry point (§7): validates the option set, drains it into per-source
    /// iteration state, and records a warning (surfaced as `ConfiguredWithWarnings`) for
    /// non-fatal conditions discovered here — currently just "file cache requested but loop
    /// count is 1, so it will never be populated" (§4.4).
    pub fn new(ctx: &mut ReplayContext) -> Result<(Self, ReplayOutcome), ReplayError> {
        if let Err(e) = ctx.options.validate() {
            log::error!("configuration rejected: {e}");
            return Err(e);
        }

        let bitmap = ctx.options.take_bitmap();
        let specs = ctx.options.take_sources();
        let mut sources = Vec::with_capacity(specs.len());
        for (i, spec) in specs.into_iter().enumerate() {
            // validate() already guarantees a bitmap implies exactly one source.
            let bound_bitmap = if i == 0 { bitmap.clone() } else { None };
            sources.push(SourceHandle::new(spec, bound_bitmap));
        }

        let mut outcome = ReplayOutcome::Completed;
        if ctx.options.enable_file_cache && ctx.options.loop_count == 1 {
            ctx.set_warn("enable_file_cache has no effect when loop_count == 1");
            outcome = ReplayOutcome::ConfiguredWithWarnings;
        }

        Ok((ReplayEngine { sources }, outcome))
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Replay every configured source (`idx = None`) or only source `idx`, for `loop_count`
    /// iterations (`0` meaning forever). Blocks until completion, `abort`, `limit_send`, or a
    /// single-step callback requesting a stop.
    pub fn replay(
        &mut self,
        ctx: &mut ReplayContext,
        idx: Option<usize>,
    ) -> Result<ReplayOutcome, ReplayError> {
        let targets: Vec<usize> = match idx {
            Some(i) => vec![i],
            None => (0..self.sources.len()).collect(),
        };
        log::info!(
            "replay starting: {} source(s) selected, loop_count={}",
            targets.len(),
            ctx.options.loop_count
        );

        ctx.set_running(true);
        let mono_start = now_us();
        ctx.stats().mark_start(mono_start);

        let mut rate = RateController::new(ctx.options.speed, ctx.options.use_pkthdr_len);
        let mut rate_anchored = false;
        let mut callback = ctx.options.take_callback();

        let enable_cache = ctx.options.enable_file_cache && ctx.options.loop_count != 1;
        let mut aborted = false;
        let mut loop_num: u32 = 0;
        // Per-packet send failures and bitmap-skips are warned about at the first occurrence and
        // every 10,000th thereafter (§4.13), so a long lossy replay doesn't flood the log.
        let mut warnable_events: u64 = 0;

        'replay: loop {
            if ctx.options.loop_count != 0 && loop_num >= ctx.options.loop_count {
                break;
            }

            // Loop 0 is anchored by `rate.begin` on its first record; every later pass folds the
            // previous pass's capture-time span into the running offset so the two concatenate
            // into one continuous timeline instead of loop 2+ collapsing onto loop 1's final
            // target (§4.6).
            if loop_num > 0 {
                rate.begin_loop();
            }

            for &src_idx in &targets {
                self.sources[src_idx].begin_loop()?;
                log::info!("loop {loop_num}: source {src_idx} opened");

                loop {
                    if ctx.is_aborted() {
                        aborted = true;
                        break 'replay;
                    }

                    // Checked before pulling/dispatching the next packet so that `limit_send = 0`
                    // ends the replay with zero sends rather than sending one packet first (§8).
                    if ctx.options.limit_send != -1
                        && ctx.stats().pkts_sent() >= ctx.options.limit_send as u64
                    {
                        break 'replay;
                    }

                    let record = match self.sources[src_idx].next_record(enable_cache)? {
                        Some(r) => r,
                        None => {
                            log::info!("loop {loop_num}: source {src_idx} reached EOF");
                            break;
                        }
                    };

                    if !rate_anchored {
                        rate.begin(mono_start, record.capture_time_us);
                        rate_anchored = true;
                    }
                    let target_us = rate.next_target(&record);

                    loop {
                        if ctx.is_aborted() {
                            aborted = true;
                            break;
                        }
                        if ctx.is_suspended() {
                            std::thread::sleep(Duration::from_millis(100));
                            continue;
                        }
                        wait_until(target_us, ctx.options.timing_strategy, ctx.options.sleep_accel_us)?;
                        break;
                    }
                    if aborted {
                        break 'replay;
                    }

                    let bitmap = self.sources[src_idx].bitmap_mut();
                    let mtu = ctx.options.mtu;
                    let use_pkthdr_len = ctx.options.use_pkthdr_len;
                    let (sender_a, sender_b) = ctx.senders_mut();
                    let outcome = dispatch(&record, bitmap, mtu, use_pkthdr_len, sender_a, sender_b);

                    match outcome {
                        DispatchOutcome::Sent { bytes, .. } => {
                            ctx.stats().record_sent(bytes);
                            rate.record_sent(&record);
                        }
                        DispatchOutcome::Failed { interface } => {
                            ctx.stats().record_failed();
                            ctx.set_warn("a packet failed to send");
                            warnable_events += 1;
                            if warnable_events == 1 || warnable_events % 10_000 == 0 {
                                log::warn!(
                                    "packet send failed on {interface:?} ({warnable_events} total failed/skipped so far)"
                                );
                            }
                        }
                        DispatchOutcome::Skipped => {
                            ctx.stats().record_skipped();
                            warnable_events += 1;
                            if warnable_events == 1 || warnable_events % 10_000 == 0 {
                                log::warn!(
                                    "packet dropped by bitmap routing to unconfigured interface B ({warnable_events} total failed/skipped so far)"
                                );
                            }
                        }
                    }

                    if matches!(ctx.options.speed, SpeedMode::OneAtATime) {
                        if let Some(cb) = callback.as_mut() {
                            if !cb() {
                                break 'replay;
                            }
                        }
                    }
                }
            }

            loop_num += 1;
        }

        ctx.stats().mark_end(now_us());
        ctx.set_running(false);

        if aborted {
            log::info!("replay ended: aborted, {} packet(s) sent", ctx.stats().pkts_sent());
            Ok(ReplayOutcome::Aborted)
        } else {
            log::info!("replay ended: completed, {} packet(s) sent", ctx.stats().pkts_sent());
            Ok(ReplayOutcome::Completed)
        }
    }
}
