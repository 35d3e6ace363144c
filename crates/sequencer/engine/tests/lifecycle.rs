//! Run lifecycle: step order, timing, cancellation, failure containment.

mod common;

use common::{Harness, Hooks, Log};
use sequencer_engine::{
    EngineConfig, ManualScheduler, RunStatus, ScheduledTask, Scheduler, SequenceEvent, Sequencer,
    TaskHandle,
};
use sequencer_types::{ErrorKind, RunOptions, Token};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

const GREET: &str = r#"
greet:
  1:
    action: info
    message: hi
    wait-after-action: 0
  2:
    action: info
    message: bye
"#;

const SLOW: &str = r#"
slow:
  1:
    action: info
    message: first
    wait-after-action: 1
  2:
    action: info
    message: second
"#;

// ---------------------------------------------------------------------------
// Ordering and timing
// ---------------------------------------------------------------------------

#[test]
fn two_steps_run_in_order_one_tick_apart() {
    let h = Harness::new();
    h.load(GREET);

    let run = h.start("greet", RunOptions::new()).unwrap();
    assert_eq!(h.events.names(), vec!["started"]);
    assert_eq!(run.step_nr(), 0);

    // Step 1 is one tick after start
    h.scheduler.tick();
    assert_eq!(h.events.names(), vec!["started", "step_reached"]);
    assert_eq!(h.log(), vec!["hi"]);

    // Step 2 one tick after step 1
    h.scheduler.tick();
    assert_eq!(h.events.steps(), vec![1, 2]);
    assert_eq!(h.log(), vec!["hi", "bye"]);
    assert!(run.is_running());

    h.scheduler.tick();
    assert_eq!(
        h.events.names(),
        vec!["started", "step_reached", "step_reached", "finished"]
    );
    assert_eq!(run.status(), RunStatus::Finished);
    assert_eq!(run.step_nr(), 2);
    assert_eq!(h.engine.runs().running_count(), 0);
    assert_eq!(h.scheduler.pending(), 0);
}

#[test]
fn wait_after_action_is_scaled_by_ticks_per_second() {
    let h = Harness::new();
    h.load(SLOW);
    h.start("slow", RunOptions::new()).unwrap();

    // tick 1: step 1; step 2 is due 20 ticks later
    h.scheduler.advance(20);
    assert_eq!(h.log(), vec!["first"]);

    h.scheduler.tick();
    assert_eq!(h.log(), vec!["first", "second"]);
    assert_eq!(h.scheduler.now(), 21);
}

#[test]
fn ticks_per_second_comes_from_config() {
    let h = Harness::with_config(EngineConfig::default().with_ticks_per_second(4));
    h.load(SLOW);
    h.start("slow", RunOptions::new()).unwrap();

    h.scheduler.advance(4);
    assert_eq!(h.log(), vec!["first"]);
    h.scheduler.tick();
    assert_eq!(h.log(), vec!["first", "second"]);
}

#[test]
fn finished_fires_exactly_once() {
    let h = Harness::new();
    h.load(GREET);
    h.start("greet", RunOptions::new()).unwrap();

    h.scheduler.run_until_idle(100);
    h.scheduler.advance(10);
    assert_eq!(h.events.count("finished"), 1);
    assert_eq!(h.events.count("cancelled"), 0);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[test]
fn cancel_between_steps_prevents_next_step() {
    let h = Harness::new();
    h.load(SLOW);
    let run = h.start("slow", RunOptions::new()).unwrap();

    h.scheduler.tick();
    assert_eq!(h.log(), vec!["first"]);

    assert!(run.cancel());
    assert!(!run.cancel());
    assert_eq!(run.status(), RunStatus::Cancelled);
    assert_eq!(h.scheduler.pending(), 0);

    h.scheduler.run_until_idle(100);
    assert_eq!(h.log(), vec!["first"]);
    assert_eq!(h.events.steps(), vec![1]);
    assert_eq!(h.events.count("cancelled"), 1);
    assert_eq!(h.events.count("finished"), 0);
    assert_eq!(h.engine.runs().running_count(), 0);
}

#[test]
fn cancel_before_first_step() {
    let h = Harness::new();
    h.load(GREET);
    let run = h.start("greet", RunOptions::new()).unwrap();

    run.cancel();
    h.scheduler.run_until_idle(100);

    assert!(h.log().is_empty());
    assert_eq!(h.events.names(), vec!["started", "cancelled"]);
}

#[test]
fn action_can_cancel_its_own_run() {
    let h = Harness::new();
    h.load(
        r#"
halt:
  1:
    action: stop
  2:
    action: info
    message: unreachable
"#,
    );
    let run = h.start("halt", RunOptions::new()).unwrap();
    h.scheduler.run_until_idle(100);

    assert_eq!(run.status(), RunStatus::Cancelled);
    assert!(h.log().is_empty());
    assert_eq!(h.events.steps(), vec![1]);
    assert_eq!(h.events.count("cancelled"), 1);
}

#[test]
fn check_cancelling_its_run_skips_the_action() {
    let h = Harness::new();
    h.load(
        r#"
gate:
  1:
    action: info
    check: check_cancel
    message: after-cancel
  2:
    action: info
    message: unreachable
"#,
    );
    let run = h.start("gate", RunOptions::new()).unwrap();
    h.scheduler.run_until_idle(100);

    assert_eq!(run.status(), RunStatus::Cancelled);
    assert!(h.log().is_empty());
    assert_eq!(h.events.names(), vec!["started", "step_reached", "cancelled"]);
}

#[test]
fn condition_cancelling_its_run_skips_the_action() {
    let h = Harness::new();
    h.load(
        r#"
crowd:
  1:
    action: tell
    include: include_all
    condition: condition_cancel
    message: after-cancel
"#,
    );
    h.start("crowd", RunOptions::new()).unwrap();
    h.scheduler.run_until_idle(100);

    assert!(h.log().is_empty());
    assert_eq!(h.events.count("cancelled"), 1);
    assert_eq!(h.events.count("finished"), 0);
}

#[test]
fn shutdown_cancels_everything_and_refuses_new_runs() {
    let h = Harness::new();
    h.load(SLOW);
    h.start("slow", RunOptions::new()).unwrap();
    h.start("slow", RunOptions::new()).unwrap();

    assert_eq!(h.engine.shutdown(), 2);
    assert!(h.engine.runs().is_disabled());
    assert_eq!(h.engine.runs().running_count(), 0);

    let err = h.start("slow", RunOptions::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Disabled);
}

// ---------------------------------------------------------------------------
// Failure containment
// ---------------------------------------------------------------------------

#[test]
fn failing_step_is_reported_and_sequence_continues() {
    let h = Harness::new();
    h.load(
        r#"
flaky:
  1:
    action: fail
  2:
    action: info
    message: still here
"#,
    );
    h.start("flaky", RunOptions::new()).unwrap();
    h.scheduler.run_until_idle(100);

    let errors = h.events.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, ErrorKind::Action);
    assert_eq!(errors[0].1, Some(1));
    assert!(errors[0].2.contains("target world is offline"));

    assert_eq!(h.log(), vec!["still here"]);
    assert_eq!(h.events.count("finished"), 1);
}

#[test]
fn panicking_step_cancels_the_run() {
    let h = Harness::new();
    h.load(
        r#"
explode:
  1:
    action: panic
  2:
    action: info
    message: never
"#,
    );
    let run = h.start("explode", RunOptions::new()).unwrap();
    h.scheduler.run_until_idle(100);

    let errors = h.events.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, ErrorKind::Unexpected);
    assert!(errors[0].2.contains("scripted panic"));

    assert_eq!(run.status(), RunStatus::Cancelled);
    assert!(h.log().is_empty());
    assert_eq!(h.events.count("cancelled"), 1);
    assert_eq!(h.events.count("finished"), 0);
}

// ---------------------------------------------------------------------------
// Hooks and engine lifetime
// ---------------------------------------------------------------------------

#[test]
fn lifecycle_hooks_fire_once_per_run() {
    let h = Harness::new();
    h.load(
        r#"
hooked:
  1:
    action: hook
"#,
    );

    h.start("hooked", RunOptions::new()).unwrap();
    h.scheduler.run_until_idle(100);
    assert_eq!(h.hooks.counts(), (1, 0, 1));

    let run = h.start("hooked", RunOptions::new()).unwrap();
    run.cancel();
    assert_eq!(h.hooks.counts(), (2, 1, 1));
}

#[test]
fn dropping_the_engine_abandons_scheduled_steps() {
    let scheduler = ManualScheduler::new();
    let engine = Sequencer::new(EngineConfig::default(), Arc::new(scheduler.clone()));
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    common::register_all(&engine, &log, &Arc::new(Hooks::default()));

    let owner = Token::new();
    let section = engine
        .configs()
        .set_section_yaml(&owner, "lobby", GREET)
        .unwrap();
    let security = section.security_token(&owner, "greet").unwrap();
    let run = engine
        .start(&Token::new(), &security, RunOptions::new())
        .unwrap();

    drop(engine);
    scheduler.run_until_idle(100);

    assert!(log.lock().unwrap().is_empty());
    assert_eq!(run.step_nr(), 0);
}

#[test]
fn started_event_names_the_initiator() {
    let h = Harness::new();
    h.load(GREET);
    h.start(
        "greet",
        RunOptions::new().with_initiator(common::Player::new("alice")),
    )
    .unwrap();

    match &h.events.events()[0] {
        SequenceEvent::Started {
            section,
            sequence,
            initiator,
            ..
        } => {
            assert_eq!(section, "lobby");
            assert_eq!(sequence, "greet");
            assert_eq!(initiator.as_deref(), Some("alice"));
        }
        other => panic!("unexpected first event {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Handles of callbacks that fired early
// ---------------------------------------------------------------------------

/// Runs the first task on another thread before handing back its handle,
/// like a multi-threaded runtime can; later tasks go to a manual clock
struct EarlyFiringScheduler {
    clock: ManualScheduler,
    fired: AtomicBool,
}

struct SpentHandle;

impl TaskHandle for SpentHandle {
    fn cancel(&self) {}
}

impl Scheduler for EarlyFiringScheduler {
    fn schedule(&self, delay_ticks: u64, task: ScheduledTask) -> Box<dyn TaskHandle> {
        if self.fired.swap(true, Ordering::SeqCst) {
            return self.clock.schedule(delay_ticks, task);
        }
        std::thread::spawn(task).join().unwrap();
        Box::new(SpentHandle)
    }
}

#[test]
fn stale_handle_never_replaces_the_next_steps_handle() {
    let clock = ManualScheduler::new();
    let scheduler = Arc::new(EarlyFiringScheduler {
        clock: clock.clone(),
        fired: AtomicBool::new(false),
    });
    let engine = Sequencer::new(EngineConfig::default(), scheduler);
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    common::register_all(&engine, &log, &Arc::new(Hooks::default()));

    let owner = Token::new();
    let section = engine
        .configs()
        .set_section_yaml(&owner, "lobby", SLOW)
        .unwrap();
    let security = section.security_token(&owner, "slow").unwrap();
    let run = engine
        .start(&Token::new(), &security, RunOptions::new())
        .unwrap();

    // Step 1 already ran and step 2 waits on the clock
    assert_eq!(*log.lock().unwrap(), vec!["first"]);
    assert_eq!(clock.pending(), 1);

    // Cancelling must reach step 2's callback, not the spent one
    assert!(run.cancel());
    assert_eq!(clock.pending(), 0);
    clock.run_until_idle(100);
    assert_eq!(*log.lock().unwrap(), vec!["first"]);
}
