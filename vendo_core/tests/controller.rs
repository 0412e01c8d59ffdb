use crossbeam_channel::Receiver;
use rstest::rstest;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use vendo_core::mocks::{
    BrokenPulseSource, ManualPulseSource, PulseProbe, RecordingBackend, SpyPump, SpyPumpState,
};
use vendo_core::{
    AbortReason, DispenseController, DispenseError, FillEvent, FillState, VolumeTable,
};

const WAIT: Duration = Duration::from_secs(2);

fn make_controller(
    max_fill: Duration,
) -> (
    DispenseController,
    Receiver<FillEvent>,
    Arc<SpyPumpState>,
    PulseProbe,
    RecordingBackend,
) {
    let (pump, pump_state) = SpyPump::new();
    let (source, probe) = ManualPulseSource::new();
    let backend = RecordingBackend::new();
    let (controller, events) = DispenseController::new(
        VolumeTable::builtin(),
        Box::new(pump),
        Box::new(source),
        Arc::new(backend.clone()),
        max_fill,
    );
    (controller, events, pump_state, probe, backend)
}

/// Drain events until a terminal event arrives (inclusive) or `WAIT` passes.
fn collect_until_terminal(rx: &Receiver<FillEvent>) -> Vec<FillEvent> {
    let deadline = Instant::now() + WAIT;
    let mut events = Vec::new();
    while Instant::now() < deadline {
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(ev) => {
                let terminal = matches!(ev, FillEvent::Completed(_) | FillEvent::Failed(_));
                events.push(ev);
                if terminal {
                    return events;
                }
            }
            Err(_) => continue,
        }
    }
    events
}

fn wait_for_sales(backend: &RecordingBackend, expected: usize) {
    let deadline = Instant::now() + WAIT;
    while backend.sales().len() < expected && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn full_fill_scenario_350ml() {
    let (controller, events, pump, probe, backend) = make_controller(WAIT);

    controller.start_filling("350 ml").unwrap();
    let session = controller.session().expect("session active");
    assert_eq!(session.option.target_pulses, 378);
    assert_eq!(controller.state(), FillState::Filling);
    assert_eq!(pump.starts.load(Ordering::SeqCst), 1);

    probe.fire(378);
    let collected = collect_until_terminal(&events);

    // Progress is non-decreasing, bounded, and ends at 100.
    let mut last = 0u8;
    let mut progress_seen = false;
    for ev in &collected {
        if let FillEvent::Progress(p) = ev {
            assert!(*p <= 100);
            assert!(*p >= last, "progress went backwards: {last} -> {p}");
            last = *p;
            progress_seen = true;
        }
    }
    assert!(progress_seen);
    assert_eq!(last, 100);

    match collected.last() {
        Some(FillEvent::Completed(record)) => {
            assert_eq!(record.volume_ml, 350);
            assert_eq!(record.price, 5_000);
        }
        other => panic!("expected Completed, got {other:?}"),
    }
    assert_eq!(controller.state(), FillState::Completed);
    assert!(!pump.running.load(Ordering::SeqCst), "pump left running");

    wait_for_sales(&backend, 1);
    assert_eq!(backend.sales().len(), 1, "exactly one sale attempt");
}

#[rstest]
#[case::ml100("100 ml", 108)]
#[case::ml350("350 ml", 378)]
#[case::ml600("600 ml", 670)]
#[case::l1("1 Liter", 1_080)]
#[case::l1_5("1.5 Liter", 1_620)]
fn start_arms_exactly_the_option_target(#[case] size: &str, #[case] target: u32) {
    let (controller, events, _pump, probe, _backend) = make_controller(WAIT);
    controller.start_filling(size).unwrap();
    assert_eq!(controller.session().unwrap().option.target_pulses, target);

    // One pulse short of the target must not complete.
    probe.fire(target - 1);
    assert_eq!(controller.pulses(), target - 1);
    assert_eq!(controller.state(), FillState::Filling);

    probe.fire(1);
    assert!(matches!(
        collect_until_terminal(&events).last(),
        Some(FillEvent::Completed(_))
    ));
}

#[test]
fn extra_pulses_complete_only_once() {
    let (controller, events, _pump, probe, backend) = make_controller(WAIT);
    controller.start_filling("100 ml").unwrap();

    probe.fire(500); // target is 108
    let collected = collect_until_terminal(&events);
    let completions = collected
        .iter()
        .filter(|e| matches!(e, FillEvent::Completed(_)))
        .count();
    assert_eq!(completions, 1);
    assert_eq!(controller.pulses(), 108, "pulses past target were counted");

    wait_for_sales(&backend, 1);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(backend.sales().len(), 1, "double sale recorded");
}

#[test]
fn second_start_is_rejected_while_filling() {
    let (controller, _events, _pump, _probe, _backend) = make_controller(WAIT);
    controller.start_filling("350 ml").unwrap();
    assert_eq!(
        controller.start_filling("100 ml"),
        Err(DispenseError::AlreadyRunning)
    );
}

#[test]
fn invalid_size_leaves_idle() {
    let (controller, _events, pump, _probe, _backend) = make_controller(WAIT);
    let err = controller.start_filling("2 Liter").unwrap_err();
    assert!(matches!(err, DispenseError::InvalidSize(_)));
    assert_eq!(controller.state(), FillState::Idle);
    assert_eq!(pump.starts.load(Ordering::SeqCst), 0);
}

#[test]
fn motor_start_failure_goes_straight_to_failed() {
    let (controller, events, pump, probe, backend) = make_controller(WAIT);
    pump.fail_start.store(true, Ordering::SeqCst);

    let err = controller.start_filling("350 ml").unwrap_err();
    assert!(matches!(err, DispenseError::MotorStartFailure(_)));
    assert_eq!(controller.state(), FillState::Failed);
    // Fail-safe: stop was still issued.
    assert!(pump.stops.load(Ordering::SeqCst) >= 1);
    assert!(!probe.is_attached(), "sensing started despite dead motor");

    let collected = collect_until_terminal(&events);
    assert!(
        collected
            .iter()
            .all(|e| !matches!(e, FillEvent::Progress(_))),
        "progress emitted on a failed start: {collected:?}"
    );
    assert!(matches!(collected.last(), Some(FillEvent::Failed(_))));
    assert!(backend.sales().is_empty());
}

// The failure path stops the pump under its own lock; a stuck or re-held
// pump mutex here would hang the customer-facing call instead of failing it.
#[test]
fn motor_failure_recovers_after_reset() {
    let (controller, events, pump, probe, backend) = make_controller(WAIT);
    pump.fail_start.store(true, Ordering::SeqCst);

    let err = controller.start_filling("350 ml").unwrap_err();
    assert!(matches!(err, DispenseError::MotorStartFailure(_)));
    assert!(matches!(
        collect_until_terminal(&events).last(),
        Some(FillEvent::Failed(_))
    ));

    // With the fault cleared, the same controller serves the next customer.
    pump.fail_start.store(false, Ordering::SeqCst);
    controller.reset().unwrap();
    controller.start_filling("100 ml").unwrap();
    probe.fire(108);
    assert!(matches!(
        collect_until_terminal(&events).last(),
        Some(FillEvent::Completed(_))
    ));
    wait_for_sales(&backend, 1);
    assert_eq!(backend.sales().len(), 1);
}

#[test]
fn session_is_retained_until_reset() {
    let (controller, events, _pump, probe, _backend) = make_controller(WAIT);
    controller.start_filling("100 ml").unwrap();
    probe.fire(108);
    assert!(matches!(
        collect_until_terminal(&events).last(),
        Some(FillEvent::Completed(_))
    ));

    // Terminal but unreset: the last session is still inspectable.
    let session = controller.session().expect("session retained after completion");
    assert_eq!(session.option.name, "100 ml");

    controller.reset().unwrap();
    assert!(controller.session().is_none());
}

#[test]
fn abort_mid_fill_stops_pump_and_records_no_sale() {
    let (controller, events, pump, probe, backend) = make_controller(WAIT);
    controller.start_filling("1 Liter").unwrap();
    probe.fire(10);
    controller.abort(AbortReason::UserRequest).unwrap();

    let collected = collect_until_terminal(&events);
    match collected.last() {
        Some(FillEvent::Failed(reason)) => assert!(reason.contains("user")),
        other => panic!("expected Failed, got {other:?}"),
    }
    assert_eq!(controller.state(), FillState::Failed);
    assert!(!pump.running.load(Ordering::SeqCst));
    assert!(!probe.is_attached());
    std::thread::sleep(Duration::from_millis(50));
    assert!(backend.sales().is_empty(), "aborted fill produced a sale");
}

#[test]
fn abort_after_completion_is_a_noop() {
    let (controller, events, pump, probe, backend) = make_controller(WAIT);
    controller.start_filling("100 ml").unwrap();
    probe.fire(108);
    let collected = collect_until_terminal(&events);
    assert!(matches!(collected.last(), Some(FillEvent::Completed(_))));
    let stops_before = pump.stops.load(Ordering::SeqCst);

    controller.abort(AbortReason::UserRequest).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(controller.state(), FillState::Completed);
    assert_eq!(pump.stops.load(Ordering::SeqCst), stops_before);
    assert!(events.try_recv().is_err(), "abort after completion emitted");

    wait_for_sales(&backend, 1);
    assert_eq!(backend.sales().len(), 1);
}

#[test]
fn abort_from_idle_is_an_error() {
    let (controller, _events, _pump, _probe, _backend) = make_controller(WAIT);
    assert!(matches!(
        controller.abort(AbortReason::UserRequest),
        Err(DispenseError::State(_))
    ));
}

#[test]
fn reset_returns_to_idle_for_next_customer() {
    let (controller, events, _pump, probe, backend) = make_controller(WAIT);
    controller.start_filling("100 ml").unwrap();
    probe.fire(108);
    assert!(matches!(
        collect_until_terminal(&events).last(),
        Some(FillEvent::Completed(_))
    ));

    controller.reset().unwrap();
    assert_eq!(controller.state(), FillState::Idle);
    assert!(controller.session().is_none());

    // A fresh fill works end to end after the reset.
    controller.start_filling("350 ml").unwrap();
    probe.fire(378);
    assert!(matches!(
        collect_until_terminal(&events).last(),
        Some(FillEvent::Completed(_))
    ));
    wait_for_sales(&backend, 2);
    assert_eq!(backend.sales().len(), 2);
}

#[test]
fn reset_while_filling_is_rejected() {
    let (controller, _events, _pump, _probe, _backend) = make_controller(WAIT);
    controller.start_filling("350 ml").unwrap();
    assert!(matches!(controller.reset(), Err(DispenseError::State(_))));
}

#[test]
fn stuck_sensor_hits_max_fill_deadline() {
    let (controller, events, pump, _probe, backend) =
        make_controller(Duration::from_millis(50));
    controller.start_filling("350 ml").unwrap();
    // No pulses arrive at all.
    let collected = collect_until_terminal(&events);
    match collected.last() {
        Some(FillEvent::Failed(reason)) => assert!(reason.contains("max fill time")),
        other => panic!("expected deadline failure, got {other:?}"),
    }
    assert_eq!(controller.state(), FillState::Failed);
    assert!(!pump.running.load(Ordering::SeqCst));
    assert!(backend.sales().is_empty());
}

#[test]
fn sale_report_failure_does_not_downgrade_the_fill() {
    let (controller, events, _pump, probe, backend) = make_controller(WAIT);
    backend.set_sale_ok(false);
    controller.start_filling("600 ml").unwrap();
    probe.fire(670);
    let collected = collect_until_terminal(&events);
    assert!(matches!(collected.last(), Some(FillEvent::Completed(_))));
    assert_eq!(controller.state(), FillState::Completed);
    wait_for_sales(&backend, 1);
    assert_eq!(backend.sales().len(), 1);
}

#[test]
fn broken_sensor_attach_fails_the_fill_safely() {
    let (pump, pump_state) = SpyPump::new();
    let backend = RecordingBackend::new();
    let (controller, events) = DispenseController::new(
        VolumeTable::builtin(),
        Box::new(pump),
        Box::new(BrokenPulseSource),
        Arc::new(backend.clone()),
        WAIT,
    );
    let err = controller.start_filling("100 ml").unwrap_err();
    assert!(matches!(err, DispenseError::Hardware(_)));
    assert_eq!(controller.state(), FillState::Failed);
    assert!(!pump_state.running.load(Ordering::SeqCst));
    assert!(matches!(
        collect_until_terminal(&events).last(),
        Some(FillEvent::Failed(_))
    ));
}
