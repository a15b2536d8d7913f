//! End-to-end tests driving the full `ReplayEngine` through its public API, against a
//! `RecordingSender` and small in-memory pcap fixtures (written via `tempfile`), covering the
//! multi-component scenarios from the "testable properties" list that no single module's own
//! unit tests exercise on their own.

use pcap_replay::bitmap::Bitmap;
use pcap_replay::context::{Options, ReplayContext};
use pcap_replay::rate::SpeedMode;
use pcap_replay::replay::{ReplayEngine, ReplayOutcome};
use pcap_replay::sender::RecordingSender;
use pcap_replay::source::SourceSpec;
use pcap_replay::timing::TimingStrategy;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::Ordering;

fn write_classic_pcap(path: &std::path::Path, records: &[(u32, u32, &[u8])]) {
    let mut f = std::fs::File::create(path).unwrap();
    f.write_all(&0xa1b2_c3d4u32.to_le_bytes()).unwrap();
    f.write_all(&2u16.to_le_bytes()).unwrap();
    f.write_all(&4u16.to_le_bytes()).unwrap();
    f.write_all(&0i32.to_le_bytes()).unwrap();
    f.write_all(&0u32.to_le_bytes()).unwrap();
    f.write_all(&65535u32.to_le_bytes()).unwrap();
    f.write_all(&1u32.to_le_bytes()).unwrap();
    for (ts_sec, ts_usec, data) in records {
        f.write_all(&ts_sec.to_le_bytes()).unwrap();
        f.write_all(&ts_usec.to_le_bytes()).unwrap();
        f.write_all(&(data.len() as u32).to_le_bytes()).unwrap();
        f.write_all(&(data.len() as u32).to_le_bytes()).unwrap();
        f.write_all(data).unwrap();
    }
}

/// Builds an `Options` whose single source is a duplicated fd over a freshly written classic
/// pcap file. Returns the guard that must outlive the test (keeps the backing file on disk).
fn fd_backed_options(
    speed: SpeedMode,
    strategy: TimingStrategy,
    records: &[(u32, u32, &[u8])],
) -> (Options, tempfile::TempPath) {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    write_classic_pcap(tmp.path(), records);
    let path = tmp.into_temp_path();

    let mut opts = Options::new(speed, strategy, "eth0").unwrap();
    let file = std::fs::File::open(&path).unwrap();
    let dup_fd = unsafe { libc::dup(file.as_raw_fd()) };
    opts.add_source(SourceSpec::Fd(dup_fd)).unwrap();
    (opts, path)
}

#[test]
fn dual_interface_bitmap_routing_end_to_end() {
    let (mut opts, _guard) = fd_backed_options(
        SpeedMode::Topspeed,
        TimingStrategy::Nanosleep,
        &[(1, 0, b"a"), (1, 1, b"b"), (1, 2, b"c"), (1, 3, b"d")],
    );
    opts.set_bitmap(Bitmap::from_packed(vec![0b0000_1010], 4, "alternate"))
        .unwrap();

    let mut ctx = ReplayContext::new(opts);
    ctx.bind_senders(
        Box::new(RecordingSender::new(1)),
        Some(Box::new(RecordingSender::new(1))),
    )
    .unwrap();

    let (mut engine, _) = ReplayEngine::new(&mut ctx).unwrap();
    let outcome = engine.replay(&mut ctx, None).unwrap();
    assert_eq!(outcome, ReplayOutcome::Completed);

    let stats = ctx.get_stats();
    assert_eq!(stats.pkts_sent, 4);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.failed, 0);
}

#[test]
fn dlt_mismatch_between_interfaces_is_rejected_at_bind_time() {
    let (opts, _guard) = fd_backed_options(SpeedMode::Topspeed, TimingStrategy::Nanosleep, &[]);
    let mut ctx = ReplayContext::new(opts);
    let result = ctx.bind_senders(
        Box::new(RecordingSender::new(1)),
        Some(Box::new(RecordingSender::new(9))),
    );
    assert!(result.is_err());
}

#[test]
fn abort_from_another_thread_stops_replay_before_completion() {
    // Ten packets spaced 20ms apart under real-time multiplier pacing gives the aborting thread
    // a wide, reliable window to intervene partway through.
    let records: Vec<(u32, u32, Vec<u8>)> = (0..10)
        .map(|i| (0u32, i * 20_000, vec![0xAB; 4]))
        .collect();
    let record_refs: Vec<(u32, u32, &[u8])> = records.iter().map(|(s, u, d)| (*s, *u, d.as_slice())).collect();

    let (opts, _guard) = fd_backed_options(
        SpeedMode::Multiplier(1.0),
        TimingStrategy::Nanosleep,
        &record_refs,
    );
    let mut ctx = ReplayContext::new(opts);
    ctx.bind_senders(Box::new(RecordingSender::new(1)), None)
        .unwrap();

    let abort_handle = ctx.abort_handle();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(60));
        abort_handle.store(true, Ordering::SeqCst);
    });

    let (mut engine, _) = ReplayEngine::new(&mut ctx).unwrap();
    let outcome = engine.replay(&mut ctx, None).unwrap();
    stopper.join().unwrap();

    assert_eq!(outcome, ReplayOutcome::Aborted);
    let sent = ctx.get_stats().pkts_sent;
    assert!(sent < 10, "abort should have cut the replay short, got {sent} sent");
}

#[test]
fn file_cache_replays_identical_sequence_on_a_second_loop() {
    let (mut opts, _guard) = fd_backed_options(
        SpeedMode::Topspeed,
        TimingStrategy::Nanosleep,
        &[(1, 0, b"aa"), (1, 1, b"bb"), (1, 2, b"cc")],
    );
    opts.enable_file_cache = true;
    opts.set_loop_count(2);

    let mut ctx = ReplayContext::new(opts);
    ctx.bind_senders(Box::new(RecordingSender::new(1)), None)
        .unwrap();

    let (mut engine, _) = ReplayEngine::new(&mut ctx).unwrap();
    engine.replay(&mut ctx, None).unwrap();

    let stats = ctx.get_stats();
    assert_eq!(stats.pkts_sent, 6);
    assert_eq!(stats.bytes_sent, 12);
}

#[test]
fn oneatatime_mode_sends_exactly_one_packet_per_callback_invocation() {
    let (mut opts, _guard) = fd_backed_options(
        SpeedMode::OneAtATime,
        TimingStrategy::Nanosleep,
        &[(1, 0, b"a"), (1, 1, b"b"), (1, 2, b"c")],
    );
    let calls = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
    let calls_clone = calls.clone();
    opts.set_manual_callback(Box::new(move || {
        calls_clone.fetch_add(1, Ordering::SeqCst);
        true
    }))
    .unwrap();

    let mut ctx = ReplayContext::new(opts);
    ctx.bind_senders(Box::new(RecordingSender::new(1)), None)
        .unwrap();

    let (mut engine, _) = ReplayEngine::new(&mut ctx).unwrap();
    let outcome = engine.replay(&mut ctx, None).unwrap();

    assert_eq!(outcome, ReplayOutcome::Completed);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(ctx.get_stats().pkts_sent, 3);
}

#[test]
fn oneatatime_callback_stop_ends_replay_cleanly_not_as_aborted() {
    let (mut opts, _guard) = fd_backed_options(
        SpeedMode::OneAtATime,
        TimingStrategy::Nanosleep,
        &[(1, 0, b"a"), (1, 1, b"b"), (1, 2, b"c")],
    );
    opts.set_manual_callback(Box::new(|| false)).unwrap();

    let mut ctx = ReplayContext::new(opts);
    ctx.bind_senders(Box::new(RecordingSender::new(1)), None)
        .unwrap();

    let (mut engine, _) = ReplayEngine::new(&mut ctx).unwrap();
    let outcome = engine.replay(&mut ctx, None).unwrap();

    assert_eq!(outcome, ReplayOutcome::Completed);
    assert_eq!(ctx.get_stats().pkts_sent, 1);
}
