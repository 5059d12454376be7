//! Pipeline tests: full runs against the in-memory browser.

mod harness;

use std::sync::Arc;
use std::time::Duration;

use harness::{default_handles, Harness};
use sweep_common::{InvalidReason, SweepError};
use sweep_worker::sweep::SweepOutcome;
use sweep_worker::testing::{epoch, MockActuator, MockProfile, RecordingSleeper};

#[tokio::test]
async fn default_username_is_remediated_without_a_profile_visit() {
    let h = Harness::new(
        MockActuator::new()
            .follow("user48213", MockProfile::posts(9))
            .follow("real_person", MockProfile::posts(4)),
    );

    let stats = h.run().await;

    assert_eq!(h.actuator.clicks(), vec!["user48213"]);
    assert_eq!(
        h.actuator.profile_visits(),
        vec!["https://www.tiktok.com/@real_person"]
    );
    assert_eq!(stats.by_reason[0], 1);

    let ledger = h.ledger();
    assert_eq!(ledger.flagged_reason("user48213"), Some(InvalidReason::DefaultUsername));
    assert!(ledger.is_remediated("user48213"));
    assert_eq!(ledger.remediations[0].timestamp, epoch());
    assert!(ledger.is_classified("real_person"));
    assert_eq!(ledger.last_run, Some(epoch()));
}

#[tokio::test]
async fn batch_is_bounded_and_the_rest_carry_over() {
    let h = Harness::new(default_handles(MockActuator::new(), 12));

    let first = h.run().await;
    assert_eq!(first.invalid_found, 12);
    assert_eq!(first.eligible, 12);
    assert_eq!(first.unfollowed, 5);
    assert_eq!(
        h.actuator.clicks(),
        vec!["user1", "user2", "user3", "user4", "user5"]
    );
    let ledger = h.ledger();
    assert_eq!(ledger.classified.len(), 12);
    assert_eq!(ledger.remediations.len(), 5);

    h.skip_cooldown();
    let second = h.run().await;
    assert_eq!(second.classified, 0, "nothing is classified twice");
    assert_eq!(second.already_classified, 7);
    assert_eq!(second.eligible, 7);
    assert_eq!(second.unfollowed, 5);

    h.skip_cooldown();
    let third = h.run().await;
    assert_eq!(third.unfollowed, 2);
    assert_eq!(third.lifetime_unfollowed, 12);
    assert!(h.actuator.remaining().is_empty());
}

#[tokio::test]
async fn rerun_after_completion_does_no_new_work() {
    let h = Harness::new(
        MockActuator::new()
            .follow("user77", MockProfile::posts(1))
            .follow("gone_quiet", MockProfile::posts(0))
            .follow("active", MockProfile::posts(12)),
    );

    h.run().await;
    let visits = h.actuator.profile_visits().len();
    let before = h.ledger();

    h.skip_cooldown();
    let again = h.run().await;

    assert_eq!(again.classified, 0);
    assert_eq!(again.attempted, 0);
    assert_eq!(h.actuator.profile_visits().len(), visits);
    assert_eq!(h.actuator.clicks(), vec!["user77", "gone_quiet"]);

    let after = h.ledger();
    assert_eq!(after.classified, before.classified);
    assert_eq!(after.remediations, before.remediations);
    assert_eq!(after.last_run, Some(epoch() + h.config.cooldown));
    // Header plus one row per detection, nothing repeated.
    assert_eq!(h.audit_lines().len(), 3);
}

#[tokio::test]
async fn profile_timeout_is_treated_as_valid() {
    let h = Harness::new(
        MockActuator::new()
            .follow("slowpoke", MockProfile::Timeout)
            .follow("ghost", MockProfile::text("Couldn't find this account")),
    );

    let stats = h.run().await;

    assert_eq!(h.actuator.clicks(), vec!["ghost"]);
    assert_eq!(stats.invalid_found, 1);
    let ledger = h.ledger();
    assert!(ledger.is_classified("slowpoke"));
    assert_eq!(ledger.flagged_reason("slowpoke"), None);
    assert_eq!(ledger.flagged_reason("ghost"), Some(InvalidReason::AccountNotFound));
}

#[tokio::test]
async fn profile_load_failure_is_retried_once() {
    let h = Harness::new(
        MockActuator::new()
            .follow("recovers", MockProfile::flaky(1, MockProfile::posts(3)))
            .follow("never_loads", MockProfile::flaky(5, MockProfile::posts(3)))
            .follow("empty_after_retry", MockProfile::flaky(1, MockProfile::text(""))),
    );

    h.run().await;

    let visits = h.actuator.profile_visits();
    for handle in ["recovers", "never_loads", "empty_after_retry"] {
        let url = format!("https://www.tiktok.com/@{handle}");
        assert_eq!(visits.iter().filter(|v| **v == url).count(), 2, "{handle}");
    }
    assert_eq!(h.actuator.clicks(), vec!["empty_after_retry"]);
    assert_eq!(
        h.ledger().flagged_reason("empty_after_retry"),
        Some(InvalidReason::NoContent)
    );
}

#[tokio::test]
async fn dry_run_records_intent_without_clicking() {
    let mut h = Harness::new(default_handles(MockActuator::new(), 5));
    h.config.dry_run = true;

    let stats = h.run().await;

    assert_eq!(stats.attempted, 5);
    assert_eq!(stats.dry_run, 5);
    assert_eq!(stats.unfollowed, 0);
    assert!(h.actuator.clicks().is_empty());

    let ledger = h.ledger();
    assert!(ledger.remediations.is_empty());
    assert_eq!(ledger.dry_run.len(), 5);
    assert_eq!(ledger.last_run, Some(epoch()));

    // Not eligible again by default.
    h.skip_cooldown();
    assert_eq!(h.run().await.eligible, 0);

    // Eligible once the policy allows it and dry run is off.
    h.config.dry_run = false;
    h.config.dry_run_reeligible = true;
    h.skip_cooldown();
    let live = h.run().await;
    assert_eq!(live.unfollowed, 5);
    assert!(h.ledger().dry_run.is_empty());
}

#[tokio::test]
async fn rows_are_re_resolved_after_the_list_reflows() {
    let h = Harness::new(default_handles(MockActuator::new(), 3));

    let stats = h.run().await;

    // Each click shifts the rows below it up by one.
    assert_eq!(stats.unfollowed, 3);
    assert_eq!(h.actuator.clicks(), vec!["user1", "user2", "user3"]);
    assert!(h.actuator.remaining().is_empty());
}

#[tokio::test]
async fn row_that_disappears_is_skipped_not_recorded() {
    let h = Harness::new(
        MockActuator::new()
            .follow("user1", MockProfile::posts(1))
            .follow_vanishing("user2", MockProfile::posts(1))
            .follow("user3", MockProfile::posts(1)),
    );

    let stats = h.run().await;

    assert_eq!(stats.unfollowed, 2);
    assert_eq!(stats.skipped, 1);
    assert_eq!(h.actuator.clicks(), vec!["user1", "user3"]);
    let ledger = h.ledger();
    assert!(!ledger.is_remediated("user2"));
    assert!(ledger.flagged_reason("user2").is_some());
}

#[tokio::test]
async fn click_is_refused_when_a_new_row_pushes_the_target_down() {
    let h = Harness::new(
        MockActuator::new()
            .follow("user1", MockProfile::posts(1))
            .follow_arriving("newcomer", MockProfile::posts(8)),
    );

    // "newcomer" lands at row 0 after user1 was resolved there.
    let first = h.run().await;
    assert_eq!(first.attempted, 1);
    assert_eq!(first.skipped, 1);
    assert!(h.actuator.clicks().is_empty());
    assert!(!h.ledger().is_remediated("user1"));

    h.skip_cooldown();
    let second = h.run().await;
    assert_eq!(second.classified, 1);
    assert_eq!(second.unfollowed, 1);
    assert_eq!(h.actuator.clicks(), vec!["user1"]);
    assert_eq!(h.ledger().flagged_reason("newcomer"), None);
}

#[tokio::test]
async fn interrupted_batch_keeps_every_finished_item() {
    let mut h = Harness::new(default_handles(MockActuator::new(), 5));
    h.sleeper = Arc::new(RecordingSleeper::stalling_at(h.config.action_delay, 2));

    let run = tokio::time::timeout(Duration::from_millis(500), h.sweep().run()).await;
    assert!(run.is_err(), "run should still be waiting after the second unfollow");

    assert_eq!(h.actuator.clicks(), vec!["user1", "user2"]);
    let ledger = h.ledger();
    assert_eq!(ledger.classified.len(), 5);
    let done: Vec<_> = ledger.remediations.iter().map(|r| r.handle.as_str()).collect();
    assert_eq!(done, vec!["user1", "user2"]);
    assert_eq!(ledger.last_run, None);

    // The next run picks up where this one stopped.
    h.sleeper = Arc::new(RecordingSleeper::new());
    let resumed = h.run().await;
    assert_eq!(resumed.classified, 0);
    assert_eq!(resumed.unfollowed, 3);
    assert_eq!(h.ledger().remediations.len(), 5);
}

#[tokio::test]
async fn missing_unfollow_control_is_skipped() {
    let h = Harness::new(
        MockActuator::new()
            .follow_without_control("user9", MockProfile::posts(1))
            .follow("user10", MockProfile::posts(1)),
    );

    let stats = h.run().await;

    assert_eq!(stats.attempted, 2);
    assert_eq!(stats.skipped, 1);
    assert_eq!(h.actuator.clicks(), vec!["user10"]);
    assert!(!h.ledger().is_remediated("user9"));
}

#[tokio::test]
async fn cooldown_gates_the_next_run() {
    let h = Harness::new(MockActuator::new().follow("active", MockProfile::posts(3)));
    h.run().await;
    let navigations = h.actuator.navigations().len();

    h.clock.advance(chrono::Duration::seconds(7_200));
    match h.outcome().await {
        SweepOutcome::Cooldown { next_run } => {
            assert_eq!(next_run, epoch() + chrono::Duration::seconds(10_800));
        }
        other => panic!("expected cooldown, got {other:?}"),
    }
    assert_eq!(h.actuator.navigations().len(), navigations);

    // Exactly at the boundary the run goes ahead.
    h.clock.set(epoch() + h.config.cooldown);
    assert!(matches!(h.outcome().await, SweepOutcome::Completed(_)));
}

#[tokio::test]
async fn row_markers_and_unreadable_rows_skip_the_profile() {
    let h = Harness::new(
        MockActuator::new()
            .follow_with_text("banned_one", "banned_one\n@banned_one\nThis account was banned")
            .follow_unnamed("Deleted account")
            .follow("fine", MockProfile::posts(2)),
    );

    let stats = h.run().await;

    assert_eq!(stats.unreadable_rows, 1);
    assert_eq!(
        h.actuator.profile_visits(),
        vec!["https://www.tiktok.com/@fine"]
    );
    assert_eq!(h.actuator.clicks(), vec!["banned_one"]);

    let ledger = h.ledger();
    assert!(!ledger.classified.contains(""));
    assert_eq!(
        h.audit_lines(),
        vec![
            "Timestamp,Username,Detection Reason",
            "2025-06-01T12:00:00Z,banned_one,Banned account",
            "2025-06-01T12:00:00Z,(unknown),Missing username",
        ]
    );
}

#[tokio::test]
async fn checks_are_paced_but_the_first_is_not() {
    let h = Harness::new(
        MockActuator::new()
            .follow("alpha", MockProfile::posts(1))
            .follow("bravo", MockProfile::posts(1))
            .follow("charlie", MockProfile::posts(1)),
    );

    h.run().await;

    // Check delay is 3s ± 30%; nothing else sleeps inside that band.
    let paced = h
        .sleeper
        .sleeps()
        .into_iter()
        .filter(|d| *d > Duration::from_millis(2_050) && *d < Duration::from_millis(3_950))
        .count();
    assert_eq!(paced, 2);
}

#[tokio::test]
async fn each_unfollow_waits_the_action_delay() {
    let h = Harness::new(default_handles(MockActuator::new(), 3));
    h.run().await;
    assert_eq!(h.sleeper.count_of(h.config.action_delay), 3);
}

#[tokio::test]
async fn corrupt_ledger_is_backed_up_and_the_run_proceeds() {
    let h = Harness::new(default_handles(MockActuator::new(), 1));
    std::fs::write(&h.config.state_file, "{ definitely not json").unwrap();

    let stats = h.run().await;

    assert_eq!(stats.unfollowed, 1);
    let mut backup = h.config.state_file.clone().into_os_string();
    backup.push(".backup");
    assert!(std::path::Path::new(&backup).exists());
}

#[tokio::test]
async fn session_is_restored_and_saved_back() {
    let mut h = Harness::new(
        MockActuator::new()
            .follow("active", MockProfile::posts(1))
            .with_session(r#"[{"name":"sessionid","value":"fresh"}]"#),
    );
    h.config.persist_session = true;
    std::fs::write(&h.config.session_file, r#"[{"name":"sessionid","value":"old"}]"#).unwrap();

    h.run().await;

    assert_eq!(
        h.actuator.imported_session().as_deref(),
        Some(r#"[{"name":"sessionid","value":"old"}]"#)
    );
    assert_eq!(
        std::fs::read_to_string(&h.config.session_file).unwrap(),
        r#"[{"name":"sessionid","value":"fresh"}]"#
    );
}

#[tokio::test]
async fn missing_session_file_stops_before_touching_the_browser() {
    let mut h = Harness::new(MockActuator::new().follow("active", MockProfile::posts(1)));
    h.config.persist_session = true;

    let err = h.sweep().run().await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<SweepError>(),
        Some(SweepError::Config(_))
    ));
    assert!(h.actuator.navigations().is_empty());
}
