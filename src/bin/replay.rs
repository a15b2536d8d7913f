//! Manual-arg-parsing CLI front end (A5, §4.12): builds a `ReplayConfig`, opens senders for the
//! named interfaces, wires SIGINT to `abort`, runs the engine, and prints a final statistics
//! report. No argument-parsing crate, matching the teacher's own `main`/`print_usage` split in
//! `src/main.rs` and `src/bin/live_analyzer.rs`.

use pcap_replay::config::ReplayConfig;
use pcap_replay::context::ReplayContext;
use pcap_replay::replay::{ReplayEngine, ReplayOutcome};
use pcap_replay::sender::PcapSender;
use pcap_replay::types::Direction;
use std::sync::atomic::Ordering;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage(&args[0]);
        std::process::exit(1);
    }

    if let Err(e) = run(&args[1..]) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::path::PathBuf::from(&args[0]);
    let config = ReplayConfig::from_file(&config_path)?;
    let options = config.into_options()?;

    let mut ctx = ReplayContext::new(options);

    let sender_a = PcapSender::open(&ctx.options.interface_a, Direction::ClientToServer)?;
    let sender_b = match &ctx.options.interface_b {
        Some(name) => Some(Box::new(PcapSender::open(name, Direction::ServerToClient)?) as _),
        None => None,
    };
    ctx.bind_senders(Box::new(sender_a), sender_b)?;

    let abort_handle = ctx.abort_handle();
    ctrlc::set_handler(move || {
        log::info!("SIGINT received, requesting abort");
        abort_handle.store(true, Ordering::SeqCst);
    })?;

    let (mut engine, configured) = ReplayEngine::new(&mut ctx)?;
    if configured == ReplayOutcome::ConfiguredWithWarnings {
        if let Some(warning) = ctx.get_warn() {
            log::warn!("configured with warnings: {warning}");
        }
    }

    let wall_start = chrono::Local::now();
    let outcome = engine.replay(&mut ctx, None)?;
    let wall_end = chrono::Local::now();
    print_report(outcome, &ctx, wall_start, wall_end);

    Ok(())
}

fn print_report(
    outcome: ReplayOutcome,
    ctx: &ReplayContext,
    wall_start: chrono::DateTime<chrono::Local>,
    wall_end: chrono::DateTime<chrono::Local>,
) {
    let stats = ctx.get_stats();
    let elapsed_us = (stats.end_time_us - stats.start_time_us).max(0);

    println!();
    println!("=== replay report ===");
    println!("started:      {}", wall_start.format("%Y-%m-%d %H:%M:%S%.3f"));
    println!("ended:        {}", wall_end.format("%Y-%m-%d %H:%M:%S%.3f"));
    println!(
        "outcome:      {}",
        match outcome {
            ReplayOutcome::Completed => "completed",
            ReplayOutcome::Aborted => "aborted",
            ReplayOutcome::ConfiguredWithWarnings => "configured with warnings",
        }
    );
    println!("packets sent: {}", stats.pkts_sent);
    println!("bytes sent:   {}", stats.bytes_sent);
    println!("failed:       {}", stats.failed);
    println!("skipped:      {}", stats.skipped);
    println!("elapsed:      {:.3}s", elapsed_us as f64 / 1_000_000.0);
    if let Some(err) = ctx.get_err() {
        println!("last error:   {err}");
    }
}

fn print_usage(program: &str) {
    eprintln!("pcap-replay - deterministic packet-capture replay engine");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  {program} <config.toml>");
    eprintln!();
    eprintln!("The configuration file declares the source(s), interface(s), speed mode, timing");
    eprintln!("strategy, and the rest of the option set (see ReplayConfig in pcap_replay::config).");
    eprintln!();
    eprintln!("Example config.toml:");
    eprintln!("  interface_a = \"eth0\"");
    eprintln!("  sources = [\"capture.pcap\"]");
    eprintln!();
    eprintln!("  [speed]");
    eprintln!("  mode = \"multiplier\"");
    eprintln!("  k = 1.0");
}
