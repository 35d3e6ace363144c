//! The per-step pipeline: placeholders, checks, targets and actions.

mod common;

use common::{Harness, Player};
use sequencer_engine::{BroadcastObserver, SequenceEvent};
use sequencer_types::{ErrorKind, RunOptions};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Placeholders
// ---------------------------------------------------------------------------

#[test]
fn placeholders_resolve_in_lookup_order() {
    let h = Harness::new();
    h.load(
        r#"
announce:
  1:
    action: info
    message: "%greeting% %initiator%, %online% online in %section%/%sequence% step %step%"
  2:
    action: info
    message: "%online%"
"#,
    );
    h.start(
        "announce",
        RunOptions::new()
            .with_initiator(Player::new("alice"))
            .with_placeholder("greeting", "Hello")
            // Ad-hoc values shadow registered handlers
            .with_placeholder("online", "many"),
    )
    .unwrap();
    h.scheduler.run_until_idle(100);

    assert_eq!(
        h.log(),
        vec!["Hello alice, many online in lobby/announce step 1", "many"]
    );
    assert!(h.events.warnings().is_empty());
    assert!(h.events.errors().is_empty());
}

#[test]
fn registered_placeholder_is_consulted_last() {
    let h = Harness::new();
    h.load(
        r#"
count:
  1:
    action: info
    message: "%online% players"
"#,
    );
    h.start("count", RunOptions::new()).unwrap();
    h.scheduler.run_until_idle(100);

    assert_eq!(h.log(), vec!["3 players"]);
}

#[test]
fn unresolved_placeholder_warns_once_and_stays_verbatim() {
    let h = Harness::new();
    h.load(
        r#"
typo:
  1:
    action: info
    message: "%nobody% and %nobody% again, 100%% sure"
"#,
    );
    h.start("typo", RunOptions::new()).unwrap();
    h.scheduler.run_until_idle(100);

    assert_eq!(h.log(), vec!["%nobody% and %nobody% again, 100% sure"]);
    assert_eq!(h.events.warnings(), vec!["nobody"]);
    assert!(h.events.errors().is_empty());
}

#[test]
fn initiator_placeholder_without_initiator_is_unresolved() {
    let h = Harness::new();
    h.load(
        r#"
anon:
  1:
    action: info
    message: "hi %initiator%"
"#,
    );
    h.start("anon", RunOptions::new()).unwrap();
    h.scheduler.run_until_idle(100);

    assert_eq!(h.log(), vec!["hi %initiator%"]);
    assert_eq!(h.events.warnings(), vec!["initiator"]);
}

#[test]
fn failing_placeholder_is_reported_but_action_runs() {
    let h = Harness::new();
    h.load(
        r#"
forecast:
  1:
    action: info
    message: "today: %weather%"
"#,
    );
    h.start("forecast", RunOptions::new()).unwrap();
    h.scheduler.run_until_idle(100);

    assert_eq!(h.log(), vec!["today: %weather%"]);
    let errors = h.events.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, ErrorKind::Placeholder);
    assert_eq!(errors[0].1, Some(1));
    assert!(errors[0].2.contains("no forecast"));
    assert_eq!(h.events.count("finished"), 1);
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

const GATED: &str = r#"
gated:
  1:
    action: info
    check: check_initiator
    message: gated
  2:
    action: info
    message: open
"#;

#[test]
fn failed_check_skips_only_that_step() {
    let h = Harness::new();
    h.load(GATED);
    h.start("gated", RunOptions::new()).unwrap();
    h.scheduler.run_until_idle(100);

    assert_eq!(h.log(), vec!["open"]);
    assert_eq!(h.events.count("check_failed"), 1);
    assert_eq!(h.events.steps(), vec![1, 2]);
    assert!(h.events.errors().is_empty());

    match h
        .events
        .events()
        .into_iter()
        .find(|e| e.name() == "check_failed")
    {
        Some(SequenceEvent::CheckFailed { step, check, .. }) => {
            assert_eq!(step, 1);
            assert_eq!(check, "check_initiator");
        }
        other => panic!("expected check_failed, got {:?}", other),
    }
}

#[test]
fn passing_check_lets_the_action_run() {
    let h = Harness::new();
    h.load(GATED);
    h.start(
        "gated",
        RunOptions::new().with_initiator(Player::new("bob")),
    )
    .unwrap();
    h.scheduler.run_until_idle(100);

    assert_eq!(h.log(), vec!["gated", "open"]);
    assert_eq!(h.events.count("check_failed"), 0);
}

#[test]
fn erroring_check_is_reported_as_check_error() {
    let h = Harness::new();
    h.load(
        r#"
shaky:
  1:
    action: info
    check: check_broken
    message: never
  2:
    action: info
    message: after
"#,
    );
    h.start("shaky", RunOptions::new()).unwrap();
    h.scheduler.run_until_idle(100);

    let errors = h.events.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, ErrorKind::Check);
    assert_eq!(errors[0].1, Some(1));
    assert!(errors[0].2.contains("backend unavailable"));
    assert_eq!(h.log(), vec!["after"]);
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

#[test]
fn include_with_condition_selects_targets() {
    let h = Harness::new();
    h.load(
        r#"
broadcast:
  1:
    action: tell
    include: include_all
    condition: condition_not_bob
    message: "server restarts soon"
"#,
    );
    h.start("broadcast", RunOptions::new()).unwrap();
    h.scheduler.run_until_idle(100);

    assert_eq!(
        h.log(),
        vec!["alice:server restarts soon", "carol:server restarts soon"]
    );
}

#[test]
fn conditions_stack() {
    let h = Harness::new();
    h.load(
        r#"
perks:
  1:
    action: tell
    include: include_all
    condition: condition_not_bob, condition_vip
    message: perk
"#,
    );
    h.start("perks", RunOptions::new()).unwrap();
    h.scheduler.run_until_idle(100);

    assert_eq!(h.log(), vec!["alice:perk"]);
}

#[test]
fn without_include_the_initiator_is_the_target() {
    let h = Harness::new();
    h.load(
        r#"
whisper:
  1:
    action: tell
    message: psst
  2:
    action: tell
    condition: condition_vip
    message: secret
"#,
    );
    h.start(
        "whisper",
        RunOptions::new().with_initiator(Player::new("bob")),
    )
    .unwrap();
    h.scheduler.run_until_idle(100);

    // bob is no vip, so step 2 has no targets
    assert_eq!(h.log(), vec!["bob:psst"]);
}

#[test]
fn without_initiator_or_include_there_are_no_targets() {
    let h = Harness::new();
    h.load(
        r#"
void:
  1:
    action: tell
    message: anyone?
"#,
    );
    h.start("void", RunOptions::new()).unwrap();
    h.scheduler.run_until_idle(100);

    assert!(h.log().is_empty());
    assert!(h.events.errors().is_empty());
}

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

#[test]
fn broadcast_observer_sees_the_whole_run() {
    let h = Harness::new();
    let bus = Arc::new(BroadcastObserver::new(64));
    let mut rx = bus.subscribe();
    h.engine.add_observer(bus.clone());

    h.load(
        r#"
short:
  1:
    action: info
"#,
    );
    let run = h.start("short", RunOptions::new()).unwrap();
    h.scheduler.run_until_idle(100);

    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.run_id(), run.id());
        names.push(event.name());
    }
    assert_eq!(names, vec!["started", "step_reached", "finished"]);
}
