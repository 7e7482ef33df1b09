//! End-to-end orchestration tests against the simulated stack.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use proptest::prelude::*;
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, sleep, sleep_until, timeout};

use gattbench_core::{
    ConnectionState, DeviceId, DisconnectReason, HarnessEvent, ServerPhase, ServerViewState,
    SessionId, TestItem, TestOutcome,
};
use gattbench_runtime::sim::{ClientProfile, SimConfig, SimulatedStack, StackCall};
use gattbench_runtime::{Orchestrator, OrchestratorConfig, OrchestratorHandle, RuntimeError};

const TIMEOUT: Duration = Duration::from_secs(5);

fn stack_with(config: SimConfig) -> Arc<SimulatedStack> {
    Arc::new(SimulatedStack::new(SimConfig {
        step_latency: Duration::from_millis(5),
        ..config
    }))
}

fn stack() -> Arc<SimulatedStack> {
    stack_with(SimConfig::default())
}

async fn start(stack: &Arc<SimulatedStack>) -> (OrchestratorHandle, watch::Receiver<ServerViewState>) {
    let handle = Orchestrator::with_stack(Arc::clone(stack), OrchestratorConfig::default())
        .start()
        .await
        .unwrap();
    let view = handle.subscribe();
    (handle, view)
}

async fn wait_view(
    view: &mut watch::Receiver<ServerViewState>,
    condition: impl FnMut(&ServerViewState) -> bool,
) -> ServerViewState {
    timeout(TIMEOUT, view.wait_for(condition))
        .await
        .expect("timed out waiting for view")
        .expect("event loop closed")
        .clone()
}

async fn wait_count(view: &mut watch::Receiver<ServerViewState>, count: usize) -> ServerViewState {
    wait_view(view, |v| v.waiting_count() == count).await
}

async fn next_matching(
    events: &mut broadcast::Receiver<HarnessEvent>,
    mut predicate: impl FnMut(&HarnessEvent) -> bool,
) -> HarnessEvent {
    timeout(TIMEOUT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Collect the outcomes and state transitions of `device`'s session until
/// its sequence has produced every step.
async fn session_history(
    events: &mut broadcast::Receiver<HarnessEvent>,
    device: &DeviceId,
) -> (Vec<TestOutcome>, Vec<ConnectionState>) {
    let steps = TestItem::SESSION_SEQUENCE.len();
    let mut by_session: HashMap<SessionId, Vec<TestOutcome>> = HashMap::new();
    let mut session: Option<SessionId> = None;
    let mut states = Vec::new();
    timeout(TIMEOUT, async {
        loop {
            match events.recv().await.expect("event channel closed") {
                HarnessEvent::OutcomeRecorded {
                    session_id: Some(id),
                    outcome,
                } => by_session.entry(id).or_default().push(outcome),
                HarnessEvent::SessionState {
                    session_id,
                    device: seen,
                    state,
                } if seen == *device => {
                    session = Some(session_id);
                    states.push(state);
                }
                _ => {}
            }
            if let Some(id) = &session {
                if by_session.get(id).is_some_and(|o| o.len() == steps) {
                    let outcomes = by_session.remove(id).unwrap_or_default();
                    return (outcomes, std::mem::take(&mut states));
                }
            }
        }
    })
    .await
    .expect("timed out waiting for session outcomes")
}

async fn wait_for_call(stack: &SimulatedStack, call: &StackCall) {
    timeout(TIMEOUT, async {
        while !stack.calls().contains(call) {
            sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{call:?} never made"));
}

fn position(calls: &[StackCall], call: &StackCall) -> usize {
    calls
        .iter()
        .position(|c| c == call)
        .unwrap_or_else(|| panic!("{call:?} not in {calls:?}"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Startup
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn startup_records_advertising_and_server_ready() {
    let stack = stack();
    let (handle, mut view) = start(&stack).await;

    let state = wait_view(&mut view, |v| v.test_items.len() == 2).await;
    assert_eq!(
        state.test_items,
        vec![
            TestOutcome::passed(TestItem::StartAdvertising),
            TestOutcome::passed(TestItem::ServerReady),
        ]
    );
    assert_eq!(state.state, ServerPhase::WaitingForClient { count: 0 });
    assert_eq!(
        stack.calls(),
        vec![StackCall::StartAdvertising, StackCall::SetObserver, StackCall::Open]
    );
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn advertising_failure_is_recorded_then_raised() {
    let stack = stack_with(SimConfig {
        fail_advertising: true,
        ..SimConfig::default()
    });
    let orchestrator = Orchestrator::with_stack(Arc::clone(&stack), OrchestratorConfig::default());
    let view = orchestrator.subscribe();

    let err = orchestrator.start().await.err().unwrap();
    assert_matches!(err, RuntimeError::Startup { .. });
    assert!(err.to_string().contains("advertising rejected"));
    assert_eq!(
        view.borrow().test_items,
        vec![TestOutcome::failed(TestItem::StartAdvertising)]
    );
    assert_eq!(stack.calls(), vec![StackCall::StartAdvertising]);
}

#[tokio::test(start_paused = true)]
async fn server_ready_absent_until_reported() {
    let stack = stack_with(SimConfig {
        auto_ready: false,
        ..SimConfig::default()
    });
    let (handle, mut view) = start(&stack).await;

    let _ = stack.connect_client("AA:01");
    let _ = wait_count(&mut view, 1).await;
    assert!(view.borrow().outcome(TestItem::ServerReady.name()).is_none());

    stack.server_ready();
    let state = wait_view(&mut view, |v| v.outcome(TestItem::ServerReady.name()).is_some()).await;
    assert!(state.outcome(TestItem::ServerReady.name()).unwrap().is_passed);
    handle.shutdown().await.unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn single_client_records_each_step_once_in_order() {
    let stack = stack();
    let (handle, mut view) = start(&stack).await;

    let _ = stack.connect_client("AA:01");
    stack.wait_for_sequences(1).await;
    let state = wait_view(&mut view, |v| {
        v.outcome(TestItem::ReliableWrite.name()).is_some()
    })
    .await;

    let names: Vec<&str> = state.test_items.iter().map(|o| o.test_name.as_str()).collect();
    let mut expected = vec![TestItem::StartAdvertising.name(), TestItem::ServerReady.name()];
    expected.extend(TestItem::SESSION_SEQUENCE.iter().map(|i| i.name()));
    assert_eq!(names, expected);
    assert!(state.all_passed());
    assert_eq!(state.waiting_count(), 1);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn concurrent_clients_are_all_counted() {
    let stack = stack();
    let (handle, mut view) = start(&stack).await;

    for i in 0..4 {
        let _ = stack.connect_client(format!("AA:{i:02}"));
    }
    let state = wait_count(&mut view, 4).await;
    assert_eq!(state.state, ServerPhase::WaitingForClient { count: 4 });

    stack.wait_for_sequences(4).await;
    let state = wait_view(&mut view, |v| v.test_items.len() == 8).await;
    let unique: HashSet<&str> = state.test_items.iter().map(|o| o.test_name.as_str()).collect();
    assert_eq!(unique.len(), 8);
    assert!(state.all_passed());
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failing_step_is_recorded_and_sequence_continues() {
    let stack = stack_with(SimConfig {
        failing: [TestItem::Notification].into_iter().collect(),
        ..SimConfig::default()
    });
    let (handle, mut view) = start(&stack).await;

    let _ = stack.connect_client("AA:01");
    stack.wait_for_sequences(1).await;
    let state = wait_view(&mut view, |v| {
        v.outcome(TestItem::ReliableWrite.name()).is_some()
    })
    .await;

    assert!(!state.outcome(TestItem::Notification.name()).unwrap().is_passed);
    assert!(state.outcome(TestItem::Indication.name()).unwrap().is_passed);
    assert!(state.outcome(TestItem::ReliableWrite.name()).unwrap().is_passed);
    assert!(!state.all_passed());
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn later_result_for_same_test_updates_in_place() {
    let stack = stack();
    let (handle, mut view) = start(&stack).await;

    let _ = stack.connect_client("AA:01");
    stack.wait_for_sequences(1).await;
    let _ = wait_view(&mut view, |v| v.outcome(TestItem::ReliableWrite.name()).is_some()).await;

    let _ = stack.connect_client_with(
        "AA:02",
        ClientProfile {
            failing: [TestItem::Write].into_iter().collect(),
            ..ClientProfile::default()
        },
    );
    stack.wait_for_sequences(2).await;
    let state = wait_view(&mut view, |v| {
        v.outcome(TestItem::Write.name()).is_some_and(|o| !o.is_passed)
    })
    .await;

    assert_eq!(state.test_items.len(), 8);
    assert_eq!(state.test_items[3], TestOutcome::failed(TestItem::Write));
    handle.shutdown().await.unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn disconnect_restores_count() {
    let stack = stack();
    let (handle, mut view) = start(&stack).await;

    let a = stack.connect_client("AA:01");
    let _ = stack.connect_client("AA:02");
    let _ = wait_count(&mut view, 2).await;

    stack.disconnect_client(&a, DisconnectReason::TerminatePeerUser);
    let state = wait_view(&mut view, |v| {
        v.waiting_count() == 1 && v.outcome(TestItem::DeviceDisconnection.name()).is_some()
    })
    .await;
    assert!(state.outcome(TestItem::DeviceDisconnection.name()).unwrap().is_passed);

    stack.wait_for_sequences(2).await;
    wait_for_call(&stack, &StackCall::Release(a)).await;
    assert_eq!(view.borrow().waiting_count(), 1);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn disconnect_mid_sequence_scores_remaining_steps() {
    let stack = stack();
    let (handle, mut view) = start(&stack).await;
    let mut events = handle.events();

    let a = stack.connect_client("AA:01");
    let _ = next_matching(&mut events, |e| {
        matches!(e, HarnessEvent::OutcomeRecorded { session_id: Some(_), outcome }
            if outcome.test_name == TestItem::Write.name())
    })
    .await;
    stack.disconnect_client(&a, DisconnectReason::LinkLoss);
    let _ = wait_count(&mut view, 0).await;

    // Steps after the disconnect still run and are scored as failed.
    let mut remaining = Vec::new();
    while remaining.len() < 4 {
        if let HarnessEvent::OutcomeRecorded {
            session_id: Some(_),
            outcome,
        } = next_matching(&mut events, |e| matches!(e, HarnessEvent::OutcomeRecorded { .. })).await
        {
            remaining.push(outcome);
        }
    }
    assert_eq!(
        remaining,
        vec![
            TestOutcome::failed(TestItem::WriteWithMerger),
            TestOutcome::failed(TestItem::Notification),
            TestOutcome::failed(TestItem::Indication),
            TestOutcome::failed(TestItem::ReliableWrite),
        ]
    );

    wait_for_call(&stack, &StackCall::Release(a.clone())).await;
    let calls = stack.calls();
    let last_step = position(&calls, &StackCall::Exercise(a.clone(), TestItem::ReliableWrite));
    assert!(last_step < position(&calls, &StackCall::Release(a)));
    assert_eq!(view.borrow().waiting_count(), 0);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn duplicate_disconnect_is_harmless() {
    let stack = stack();
    let (handle, mut view) = start(&stack).await;
    let mut events = handle.events();

    let a = stack.connect_client("AA:01");
    let _ = stack.connect_client("AA:02");
    let _ = wait_count(&mut view, 2).await;

    stack.disconnect_client(&a, DisconnectReason::LinkLoss);
    stack.disconnect_client(&a, DisconnectReason::LinkLoss);
    let _ = wait_count(&mut view, 1).await;

    // The second disconnect still reaches the loop as a server callback.
    let mut device_disconnects = 0;
    while device_disconnects < 2 {
        let event = next_matching(&mut events, |e| {
            matches!(e, HarnessEvent::OutcomeRecorded { outcome, .. }
                if outcome.test_name == TestItem::DeviceDisconnection.name())
        })
        .await;
        assert_matches!(event, HarnessEvent::OutcomeRecorded { session_id: None, .. });
        device_disconnects += 1;
    }
    assert_eq!(view.borrow().waiting_count(), 1);
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn disconnect_before_ready_leaves_count_unchanged() {
    let stack = stack();
    let (handle, mut view) = start(&stack).await;
    let mut events = handle.events();

    let _ = stack.connect_client("AA:01");
    let _ = wait_count(&mut view, 1).await;

    let dropped = stack.connect_client_with(
        "AA:02",
        ClientProfile {
            drop_before_ready: true,
            ..ClientProfile::default()
        },
    );

    // The handshake failure does not stop the rest of the sequence.
    let (outcomes, states) = session_history(&mut events, &dropped).await;
    assert_eq!(
        states,
        vec![ConnectionState::Disconnected { reason: DisconnectReason::LinkLoss }]
    );
    let names: Vec<&str> = outcomes.iter().map(|o| o.test_name.as_str()).collect();
    let expected: Vec<&str> = TestItem::SESSION_SEQUENCE.iter().map(|i| i.name()).collect();
    assert_eq!(names, expected);
    assert!(outcomes.iter().all(|o| !o.is_passed));

    stack.wait_for_sequences(2).await;
    wait_for_call(&stack, &StackCall::Release(dropped)).await;
    assert_eq!(view.borrow().waiting_count(), 1);
    handle.shutdown().await.unwrap();
}

/// Connect one client per `(latency, leave)` entry at once, disconnect each
/// at its leave time, and return the settled ready count.
async fn run_schedule(schedule: &[(Duration, Option<Duration>)]) -> usize {
    let stack = stack();
    let (handle, view) = start(&stack).await;
    let started = Instant::now();

    let devices: Vec<DeviceId> = schedule
        .iter()
        .enumerate()
        .map(|(i, (latency, _))| {
            stack.connect_client_with(
                format!("IL:{i:02}"),
                ClientProfile {
                    latency: Some(*latency),
                    ..ClientProfile::default()
                },
            )
        })
        .collect();

    let mut leaves: Vec<(Duration, &DeviceId)> = schedule
        .iter()
        .zip(&devices)
        .filter_map(|((_, leave), device)| leave.map(|at| (at, device)))
        .collect();
    leaves.sort();
    for (at, device) in &leaves {
        sleep_until(started + *at).await;
        stack.disconnect_client(device, DisconnectReason::TerminatePeerUser);
    }

    timeout(TIMEOUT, stack.wait_for_sequences(devices.len()))
        .await
        .expect("sequences did not finish");
    for (_, device) in &leaves {
        wait_for_call(&stack, &StackCall::Release((*device).clone())).await;
    }

    let count = view.borrow().waiting_count();
    handle.shutdown().await.unwrap();
    count
}

#[tokio::test(start_paused = true)]
async fn interleaved_joins_and_leaves_settle_to_remaining_clients() {
    let ms = Duration::from_millis;
    let count = run_schedule(&[
        (ms(3), Some(ms(10))),
        (ms(7), None),
        // Leaves during its handshake, before Ready.
        (ms(11), Some(ms(4))),
        (ms(5), Some(ms(20))),
        // Leaves after its sequence has finished.
        (ms(2), Some(ms(40))),
        (ms(9), None),
    ])
    .await;
    assert_eq!(count, 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn ready_count_matches_clients_that_never_left(
        schedule in prop::collection::vec((1u64..12, prop::option::of(1u64..90)), 1..6),
    ) {
        let schedule: Vec<(Duration, Option<Duration>)> = schedule
            .into_iter()
            .map(|(latency, leave)| {
                (Duration::from_millis(latency), leave.map(Duration::from_millis))
            })
            .collect();
        let staying = schedule.iter().filter(|(_, leave)| leave.is_none()).count();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();
        let count = runtime.block_on(run_schedule(&schedule));
        prop_assert_eq!(count, staying);
    }
}

#[tokio::test(start_paused = true)]
async fn unattachable_device_scores_failed_connection() {
    let stack = stack();
    let (handle, mut view) = start(&stack).await;

    stack.announce_client(&DeviceId::from("ghost"));
    let state = wait_view(&mut view, |v| v.outcome(TestItem::Connection.name()).is_some()).await;
    assert!(!state.outcome(TestItem::Connection.name()).unwrap().is_passed);
    assert_eq!(state.waiting_count(), 0);
    assert!(handle.is_running());
    handle.shutdown().await.unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Failure containment and teardown
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn panicking_session_is_contained() {
    let stack = stack();
    let (handle, mut view) = start(&stack).await;
    let mut events = handle.events();

    let faulty = stack.connect_client_with(
        "AA:01",
        ClientProfile {
            panic_on: Some(TestItem::Write),
            ..ClientProfile::default()
        },
    );
    let event = next_matching(&mut events, |e| matches!(e, HarnessEvent::SessionFailed { .. })).await;
    assert_matches!(event, HarnessEvent::SessionFailed { reason, .. } if reason.contains("simulated fault"));
    assert!(stack.calls().contains(&StackCall::Release(faulty)));

    let _ = stack.connect_client("AA:02");
    stack.wait_for_sequences(1).await;
    let state = wait_view(&mut view, |v| v.outcome(TestItem::ReliableWrite.name()).is_some()).await;
    assert_eq!(state.waiting_count(), 1);
    assert!(handle.is_running());
    handle.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn teardown_stops_advertising_then_releases_then_closes() {
    let stack = stack();
    let (handle, mut view) = start(&stack).await;

    let a = stack.connect_client("AA:01");
    let b = stack.connect_client("AA:02");
    let _ = wait_count(&mut view, 2).await;

    handle.shutdown().await.unwrap();

    let calls = stack.calls();
    let stop = position(&calls, &StackCall::StopAdvertising);
    let release_a = position(&calls, &StackCall::Release(a));
    let release_b = position(&calls, &StackCall::Release(b));
    let close = position(&calls, &StackCall::Close);
    assert!(stop < release_a && stop < release_b);
    assert!(release_a < close && release_b < close);
}

#[tokio::test(start_paused = true)]
async fn view_serializes_for_observers() {
    let stack = stack();
    let (handle, mut view) = start(&stack).await;
    let _ = stack.connect_client("AA:01");
    let state = wait_count(&mut view, 1).await;

    let json = serde_json::to_value(&state).unwrap();
    assert_eq!(json["testItems"][0]["testName"], "Start advertising");
    assert_eq!(json["testItems"][0]["isPassed"], true);
    assert_eq!(json["state"]["phase"], "waiting_for_client");
    assert_eq!(json["state"]["count"], 1);
    handle.shutdown().await.unwrap();
}
