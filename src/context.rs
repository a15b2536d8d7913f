//! Control & statistics surface (C7, §4.7) plus the option set (§3 "Option set") and the replay
//! context that owns both.
//!
//! Flags and counters follow §5's concurrency model directly: `AtomicBool` at `SeqCst` for the
//! three control flags (simplicity over micro-optimized ordering, since they're polled at most
//! once per packet), `AtomicU64`/`AtomicI64` counters updated only by the replay thread, and a
//! `Mutex<Option<String>>` each for the error/warning strings — the same shared-mutable-state shape
//! the teacher uses for its own cross-thread counters.

use crate::bitmap::Bitmap;
use crate::rate::SpeedMode;
use crate::sender::PacketSender;
use crate::source::SourceSpec;
use crate::timing::TimingStrategy;
use crate::error::ReplayError;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Compile-time bound on configured sources (§3 "Option set"), matching the teacher's own
/// preference for small fixed ceilings over unbounded growth of per-replay state.
pub const MAX_FILES: usize = 64;

/// Signature of the single-step callback installed for [`SpeedMode::OneAtATime`] (§6
/// "Single-step callback"). Returns `true` to continue, `false` to stop the replay cleanly.
pub type StepCallback = Box<dyn FnMut() -> bool + Send>;

/// Immutable-after-`validate` container of everything that shapes a replay (§3 "Option set").
pub struct Options {
    pub loop_count: u32,
    pub speed: SpeedMode,
    pub timing_strategy: TimingStrategy,
    pub mtu: u32,
    pub limit_send: i64,
    pub enable_file_cache: bool,
    pub use_pkthdr_len: bool,
    pub sleep_accel_us: u32,
    pub interface_a: String,
    pub interface_b: Option<String>,
    sources: Vec<SourceSpec>,
    bitmap: Option<Bitmap>,
    callback: Option<StepCallback>,
}

impl Options {
    pub fn new(
        speed: SpeedMode,
        timing_strategy: TimingStrategy,
        interface_a: impl Into<String>,
    ) -> Result<Self, ReplayError> {
        speed.validate()?;
        crate::timing::validate_strategy(timing_strategy)?;
        Ok(Options {
            loop_count: 1,
            speed,
            timing_strategy,
            mtu: 1500,
            limit_send: -1,
            enable_file_cache: false,
            use_pkthdr_len: false,
            sleep_accel_us: 0,
            interface_a: interface_a.into(),
            interface_b: None,
            sources: Vec::new(),
            bitmap: None,
            callback: None,
        })
    }

    pub fn sources(&self) -> &[SourceSpec] {
        &self.sources
    }

    pub fn bitmap(&self) -> Option<&Bitmap> {
        self.bitmap.as_ref()
    }

    pub fn bitmap_mut(&mut self) -> Option<&mut Bitmap> {
        self.bitmap.as_mut()
    }

    pub fn take_callback(&mut self) -> Option<StepCallback> {
        self.callback.take()
    }

    pub fn take_bitmap(&mut self) -> Option<Bitmap> {
        self.bitmap.take()
    }

    pub fn take_sources(&mut self) -> Vec<SourceSpec> {
        std::mem::take(&mut self.sources)
    }

    pub fn add_source(&mut self, spec: SourceSpec) -> Result<(), ReplayError> {
        if self.sources.len() >= MAX_FILES {
            return Err(ReplayError::config(format!(
                "cannot add source: limit of {MAX_FILES} sources reached"
            )));
        }
        if self.bitmap.is_some() && !self.sources.is_empty() {
            return Err(ReplayError::config(
                "a classification bitmap may only be combined with exactly one source",
            ));
        }
        self.sources.push(spec);
        Ok(())
    }

    pub fn set_bitmap(&mut self, bitmap: Bitmap) -> Result<(), ReplayError> {
        if self.sources.len() > 1 {
            return Err(ReplayError::config(
                "a classification bitmap may only be combined with exactly one source",
            ));
        }
        self.bitmap = Some(bitmap);
        Ok(())
    }

    pub fn set_manual_callback(&mut self, callback: StepCallback) -> Result<(), ReplayError> {
        if !matches!(self.speed, SpeedMode::OneAtATime) {
            return Err(ReplayError::config(
                "set_manual_callback requires speed mode oneatatime",
            ));
        }
        self.callback = Some(callback);
        Ok(())
    }

    pub fn set_loop_count(&mut self, loop_count: u32) {
        self.loop_count = loop_count;
    }

    pub fn set_limit_send(&mut self, limit_send: i64) -> Result<(), ReplayError> {
        if limit_send < -1 {
            return Err(ReplayError::config("limit_send must be -1 or >= 0"));
        }
        self.limit_send = limit_send;
        Ok(())
    }

    /// Final precondition check before a replay starts (§3 "Invariants").
    pub fn validate(&self) -> Result<(), ReplayError> {
        log::debug!(
            "validating options: {} source(s), loop_count={}, mtu={}",
            self.sources.len(),
            self.loop_count,
            self.mtu
        );
        if self.sources.len() > MAX_FILES {
            return Err(ReplayError::config(format!(
                "source count {} exceeds MAX_FILES ({MAX_FILES})",
                self.sources.len()
            )));
        }
        if self.bitmap.is_some() && self.sources.len() != 1 {
            return Err(ReplayError::config(
                "a classification bitmap may only be combined with exactly one source",
            ));
        }
        if matches!(self.speed, SpeedMode::OneAtATime) && self.callback.is_none() {
            return Err(ReplayError::config(
                "speed mode oneatatime requires a callback installed before replay",
            ));
        }
        if self.limit_send < -1 {
            return Err(ReplayError::config("limit_send must be -1 or >= 0"));
        }
        if self.mtu == 0 {
            return Err(ReplayError::config("mtu must be > 0"));
        }
        for source in &self.sources {
            if !source.is_rewindable() && self.loop_count != 1 {
                return Err(ReplayError::config(
                    "a non-rewindable (fd) source requires loop count == 1",
                ));
            }
        }
        if self.enable_file_cache && self.loop_count == 1 {
            log::warn!("enable_file_cache has no effect when loop_count == 1");
        }
        Ok(())
    }
}

/// Live counters, updated only by the replay thread (§5). Monotonically non-decreasing for the
/// lifetime of one replay (§3 "Invariants").
#[derive(Default)]
pub struct Stats {
    pkts_sent: AtomicU64,
    bytes_sent: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    start_time_us: AtomicI64,
    end_time_us: AtomicI64,
}

/// A stable copy of [`Stats`] taken by independently loading each counter (§4.7): reads are
/// racy-but-safe by design, since counters are monotone and only approximate mid-run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub pkts_sent: u64,
    pub bytes_sent: u64,
    pub failed: u64,
    pub skipped: u64,
    pub start_time_us: i64,
    pub end_time_us: i64,
}

impl Stats {
    pub(crate) fn mark_start(&self, now_us: i64) {
        self.start_time_us.store(now_us, Ordering::SeqCst);
        self.end_time_us.store(now_us, Ordering::SeqCst);
    }

    pub(crate) fn mark_end(&self, now_us: i64) {
        self.end_time_us.store(now_us, Ordering::SeqCst);
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.pkts_sent.fetch_add(1, Ordering::SeqCst);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::SeqCst);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn pkts_sent(&self) -> u64 {
        self.pkts_sent.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            pkts_sent: self.pkts_sent.load(Ordering::SeqCst),
            bytes_sent: self.bytes_sent.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            start_time_us: self.start_time_us.load(Ordering::SeqCst),
            end_time_us: self.end_time_us.load(Ordering::SeqCst),
        }
    }
}

/// Owns everything a replay needs: options, the bound sender handles, live statistics, and the
/// three control flags. Created explicitly, mutated by setters before replay and by the replay
/// loop during replay, torn down by an explicit [`ReplayContext::close`].
pub struct ReplayContext {
    pub options: Options,
    sender_a: Option<Box<dyn PacketSender>>,
    sender_b: Option<Box<dyn PacketSender>>,
    stats: Stats,
    running: AtomicBool,
    suspend: AtomicBool,
    abort: Arc<AtomicBool>,
    error: Mutex<Option<String>>,
    warning: Mutex<Option<String>>,
}

impl ReplayContext {
    pub fn new(options: Options) -> Self {
        ReplayContext {
            options,
            sender_a: None,
            sender_b: None,
            stats: Stats::default(),
            running: AtomicBool::new(false),
            suspend: AtomicBool::new(false),
            abort: Arc::new(AtomicBool::new(false)),
            error: Mutex::new(None),
            warning: Mutex::new(None),
        }
    }

    /// A cheap, independently shareable handle to the abort flag, for a caller (e.g. a SIGINT
    /// handler running on another thread) that wants to request abort without needing `&mut self`
    /// — setting the flag here is observed by [`ReplayContext::is_aborted`] on the very next poll.
    /// Does not itself propagate into the sender handles the way [`ReplayContext::abort`] does;
    /// a caller that also wants to unblock an in-progress send must still reach `abort(&mut self)`.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    /// Bind the opened sender handles, enforcing "both interfaces, when both configured, must
    /// report the same link-layer type" (§3 "Invariants").
    pub fn bind_senders(
        &mut self,
        sender_a: Box<dyn PacketSender>,
        sender_b: Option<Box<dyn PacketSender>>,
    ) -> Result<(), ReplayError> {
        if let Some(b) = &sender_b {
            if b.link_type() != sender_a.link_type() {
                let msg = format!(
                    "interface link-layer type mismatch: A={} B={}",
                    sender_a.link_type(),
                    b.link_type()
                );
                log::error!("{msg}");
                return Err(ReplayError::config(msg));
            }
        }
        log::debug!(
            "bound sender(s): A link_type={}{}",
            sender_a.link_type(),
            sender_b
                .as_ref()
                .map(|b| format!(", B link_type={}", b.link_type()))
                .unwrap_or_default()
        );
        self.sender_a = Some(sender_a);
        self.sender_b = sender_b;
        Ok(())
    }

    pub fn sender_a_mut(&mut self) -> Option<&mut (dyn PacketSender + 'static)> {
        self.sender_a.as_deref_mut()
    }

    pub fn sender_b_mut(&mut self) -> Option<&mut (dyn PacketSender + 'static)> {
        self.sender_b.as_deref_mut()
    }

    /// Both sender handles at once, split from a single `&mut self` borrow (disjoint fields) so a
    /// caller like the dispatcher (C3) can hold both simultaneously without two separate `&mut
    /// self` method calls. Panics if `bind_senders` hasn't been called — the replay loop always
    /// calls it first.
    pub fn senders_mut(&mut self) -> (&mut dyn PacketSender, Option<&mut dyn PacketSender>) {
        (
            self.sender_a
                .as_deref_mut()
                .expect("bind_senders must be called before replay"),
            self.sender_b.as_deref_mut(),
        )
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn get_stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn get_err(&self) -> Option<String> {
        self.error.lock().unwrap().clone()
    }

    pub fn get_warn(&self) -> Option<String> {
        self.warning.lock().unwrap().clone()
    }

    pub(crate) fn set_err(&self, msg: impl Into<String>) {
        *self.error.lock().unwrap() = Some(msg.into());
    }

    pub(crate) fn set_warn(&self, msg: impl Into<String>) {
        *self.warning.lock().unwrap() = Some(msg.into());
    }

    /// Requests a clean stop at the next opportunity (§4.6): sets the abort flag and propagates
    /// it into both sender handles so a blocked `send` unblocks as soon as it next checks.
    pub fn abort(&mut self) {
        log::info!("abort requested");
        self.abort.store(true, Ordering::SeqCst);
        if let Some(a) = &mut self.sender_a {
            a.abort();
        }
        if let Some(b) = &mut self.sender_b {
            b.abort();
        }
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    pub fn suspend(&self) {
        log::info!("suspend requested");
        self.suspend.store(true, Ordering::SeqCst);
    }

    pub fn restart(&self) {
        log::info!("restart requested");
        self.suspend.store(false, Ordering::SeqCst);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Releases both sender handles. Idempotent; safe to call more than once, and called
    /// implicitly by `Drop` on the owned `Box<dyn PacketSender>` values if it never is.
    pub fn close(&mut self) {
        if let Some(mut a) = self.sender_a.take() {
            a.close();
        }
        if let Some(mut b) = self.sender_b.take() {
            b.close();
        }
        log::debug!("context closed");
    }
}

impl Drop for ReplayContext {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::RecordingSender;
    use std::path::PathBuf;

    fn options() -> Options {
        Options::new(SpeedMode::Topspeed, TimingStrategy::Nanosleep, "eth0").unwrap()
    }

    #[test]
    fn add_source_respects_max_files() {
        let mut opts = options();
        for i in 0..MAX_FILES {
            opts.add_source(SourceSpec::Filename(PathBuf::from(format!("f{i}.pcap"))))
                .unwrap();
        }
        assert!(opts
            .add_source(SourceSpec::Filename(PathBuf::from("one_too_many.pcap")))
            .is_err());
    }

    #[test]
    fn bitmap_rejects_multi_source_combination() {
        let mut opts = options();
        opts.add_source(SourceSpec::Filename(PathBuf::from("a.pcap")))
            .unwrap();
        opts.add_source(SourceSpec::Filename(PathBuf::from("b.pcap")))
            .unwrap();
        let bitmap = Bitmap::from_packed(vec![0], 1, "");
        assert!(opts.set_bitmap(bitmap).is_err());
    }

    #[test]
    fn oneatatime_requires_callback_before_validate_passes() {
        let mut opts = Options::new(SpeedMode::OneAtATime, TimingStrategy::Nanosleep, "eth0").unwrap();
        opts.add_source(SourceSpec::Filename(PathBuf::from("a.pcap")))
            .unwrap();
        assert!(opts.validate().is_err());
        opts.set_manual_callback(Box::new(|| false)).unwrap();
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn fd_source_requires_loop_count_one() {
        let mut opts = options();
        opts.add_source(SourceSpec::Fd(0)).unwrap();
        opts.set_loop_count(3);
        assert!(opts.validate().is_err());
        opts.set_loop_count(1);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn bind_senders_rejects_dlt_mismatch() {
        let mut ctx = ReplayContext::new(options());
        let result = ctx.bind_senders(
            Box::new(RecordingSender::new(1)),
            Some(Box::new(RecordingSender::new(2))),
        );
        assert!(result.is_err());
    }

    #[test]
    fn bind_senders_accepts_matching_dlt() {
        let mut ctx = ReplayContext::new(options());
        let result = ctx.bind_senders(
            Box::new(RecordingSender::new(1)),
            Some(Box::new(RecordingSender::new(1))),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn abort_propagates_to_bound_senders() {
        let mut ctx = ReplayContext::new(options());
        ctx.bind_senders(Box::new(RecordingSender::new(1)), None)
            .unwrap();
        ctx.abort();
        assert!(ctx.is_aborted());
        // send() on an aborted RecordingSender returns Err, proving abort() reached it.
        assert!(ctx.sender_a_mut().unwrap().send(&[1, 2, 3]).is_err());
    }

    #[test]
    fn suspend_restart_round_trips() {
        let ctx = ReplayContext::new(options());
        assert!(!ctx.is_suspended());
        ctx.suspend();
        assert!(ctx.is_suspended());
        ctx.restart();
        assert!(!ctx.is_suspended());
    }

    #[test]
    fn stats_snapshot_reflects_recorded_counters() {
        let ctx = ReplayContext::new(options());
        ctx.stats().record_sent(100);
        ctx.stats().record_sent(50);
        ctx.stats().record_failed();
        ctx.stats().record_skipped();
        let snap = ctx.get_stats();
        assert_eq!(snap.pkts_sent, 2);
        assert_eq!(snap.bytes_sent, 150);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.skipped, 1);
    }
}
