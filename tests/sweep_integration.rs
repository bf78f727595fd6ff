//! End-to-end sweeps against the simulated glitcher

use glitcher_core::core::protocol::glitch::ModeFlags;
use glitcher_core::core::results::read_records;
use glitcher_core::core::transport::WireEvent;
use glitcher_core::{
    run_sweep, Combo, ComboSource, DeviceSession, GridSweep, HitPredicate, JsonLinesSink,
    MemorySink, ParamRange, SessionConfig, SimulatedDevice, StopReason,
};
use glitcher_core::cli::{CliResult, ExitCodes};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio_test::assert_ok;

fn not_cancelled() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

fn delay_grid(delays: ParamRange, durations: ParamRange) -> GridSweep {
    GridSweep::new(ParamRange::single(2), delays, durations).unwrap()
}

/// Source that ignores the validity contract
struct Unchecked(Vec<Combo>);

impl ComboSource for Unchecked {
    fn produce(&self) -> Vec<Combo> {
        self.0.clone()
    }

    fn describe(&self) -> String {
        "unchecked".into()
    }
}

#[tokio::test]
async fn sweep_runs_three_attempts_per_combo_and_logs_hits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("params.log");

    let device = SimulatedDevice::new()
        .with_hit(HitPredicate::window(ParamRange::new(40, 41), ParamRange::new(2, 2)))
        .with_response(b"\x00dump\xff");
    let mut session = DeviceSession::new(device, SessionConfig::new());
    let mut sink = JsonLinesSink::open(&path).unwrap();

    let source = delay_grid(ParamRange::new(38, 43), ParamRange::new(1, 2));
    let summary = assert_ok!(run_sweep(&mut session, &mut sink, &source, not_cancelled()).await);

    assert_eq!(summary.combos_total, 12);
    assert_eq!(summary.attempts, 36);
    assert_eq!(summary.recorded, 6);
    assert_eq!(summary.empty, 30);
    assert_eq!(summary.stop_reason, StopReason::Completed);

    let records = read_records(&path).unwrap();
    assert_eq!(records.len(), 6);
    assert!(records.iter().all(|r| r.result == "\u{0}dump\u{ff}"));
    assert_eq!(
        records.iter().filter(|r| r.combo() == Combo::new(2, 40, 2)).count(),
        3
    );
    assert_eq!(
        records.iter().filter(|r| r.combo() == Combo::new(2, 41, 2)).count(),
        3
    );
}

#[tokio::test]
async fn silent_target_records_nothing() {
    let mut device = SimulatedDevice::new();
    device.inject_input(b"boot banner from previous run");
    let mut session = DeviceSession::new(device, SessionConfig::new().repeats_per_combo(2));
    let sink = MemorySink::new();
    let mut writer = sink.clone();

    let source = delay_grid(ParamRange::new(1, 4), ParamRange::single(1));
    let summary = assert_ok!(run_sweep(&mut session, &mut writer, &source, not_cancelled()).await);

    assert_eq!(summary.attempts, 8);
    assert_eq!(summary.recorded, 0);
    assert!(sink.is_empty());
    assert_eq!(session.channel().pending_input(), 0);
}

#[tokio::test]
async fn write_fault_moves_on_to_next_attempt() {
    // Writes per attempt: reset, config, trigger. Fail the trigger of attempt 2.
    let device = SimulatedDevice::new().with_hit(HitPredicate::any()).fail_write(6);
    let mut session = DeviceSession::new(device, SessionConfig::new());
    let sink = MemorySink::new();
    let mut writer = sink.clone();

    let source = delay_grid(ParamRange::new(10, 11), ParamRange::single(1));
    let summary = assert_ok!(run_sweep(&mut session, &mut writer, &source, not_cancelled()).await);

    assert_eq!(summary.attempts, 6);
    assert_eq!(summary.faults, 1);
    assert_eq!(summary.recorded, 5);
    assert_eq!(summary.stop_reason, StopReason::Completed);

    // The third attempt still configured its combo after the fault
    let configs = session.channel().configs();
    assert_eq!(configs.len(), 6);
    assert!(configs[..3].iter().all(|c| *c == Combo::new(2, 10, 1)));
}

#[tokio::test]
async fn invalid_combos_are_skipped() {
    let device = SimulatedDevice::new().with_hit(HitPredicate::any());
    let mut session = DeviceSession::new(device, SessionConfig::new().repeats_per_combo(1));
    let sink = MemorySink::new();
    let mut writer = sink.clone();

    let source = Unchecked(vec![
        Combo::new(0, 0, 1),
        Combo::new(0, 5, 1),
        Combo::new(0, 5, 129),
        Combo::new(1 << 14, 5, 1),
        Combo::new(0, 6, 1),
    ]);
    let summary = assert_ok!(run_sweep(&mut session, &mut writer, &source, not_cancelled()).await);

    assert_eq!(summary.attempts, 5);
    assert_eq!(summary.invalid, 3);
    assert_eq!(summary.recorded, 2);
    assert_eq!(
        session.channel().configs(),
        vec![Combo::new(0, 5, 1), Combo::new(0, 6, 1)]
    );
}

#[tokio::test]
async fn device_left_in_safe_idle_after_sweep() {
    let config = SessionConfig::new().power_reset(true);
    let mut session = DeviceSession::new(SimulatedDevice::new(), config);
    let mut sink = MemorySink::new();

    let source = delay_grid(ParamRange::single(9), ParamRange::single(1));
    assert_ok!(run_sweep(&mut session, &mut sink, &source, not_cancelled()).await);

    let events = session.channel().events();
    let tail = &events[events.len() - 2..];
    assert_eq!(tail[0], WireEvent::Mode(ModeFlags::power(false)));
    assert_eq!(tail[1], WireEvent::Mode(ModeFlags::power(true)));
}

#[tokio::test]
async fn fault_limit_reaches_exit_code_with_dead_link() {
    let mut device = SimulatedDevice::new();
    for n in 1..=64 {
        device = device.fail_write(n);
    }
    let config = SessionConfig::new().max_consecutive_faults(Some(4));
    let mut session = DeviceSession::new(device, config);
    let mut sink = MemorySink::new();

    let source = delay_grid(ParamRange::new(1, 10), ParamRange::single(1));
    let summary = assert_ok!(run_sweep(&mut session, &mut sink, &source, not_cancelled()).await);

    assert_eq!(summary.stop_reason, StopReason::FaultLimit);
    assert!(summary.safe_reset_failed);
    assert_eq!(CliResult::from_summary(&summary).code(), ExitCodes::FAULT_LIMIT);
}

#[tokio::test]
async fn fault_limit_exit_leaves_safe_idle() {
    let mut device = SimulatedDevice::new();
    for n in 1..=4 {
        device = device.fail_write(n);
    }
    let config = SessionConfig::new()
        .power_reset(true)
        .max_consecutive_faults(Some(4));
    let mut session = DeviceSession::new(device, config);
    let mut sink = MemorySink::new();

    let source = delay_grid(ParamRange::new(1, 10), ParamRange::single(1));
    let summary = assert_ok!(run_sweep(&mut session, &mut sink, &source, not_cancelled()).await);

    assert_eq!(summary.stop_reason, StopReason::FaultLimit);
    assert!(!summary.safe_reset_failed);
    let events = session.channel().events();
    let tail = &events[events.len() - 2..];
    assert_eq!(tail[0], WireEvent::Mode(ModeFlags::power(false)));
    assert_eq!(tail[1], WireEvent::Mode(ModeFlags::power(true)));
}
