//! Follow-list enumeration against a lazily rendered list.

mod harness;

use harness::{default_handles, Harness};
use sweep_common::AccountRecord;
use sweep_worker::follow_list::FollowList;
use sweep_worker::locator;
use sweep_worker::testing::{test_config, MockActuator, MockProfile, RecordingSleeper};

#[tokio::test]
async fn scrolling_loads_every_row() {
    let h = Harness::new(default_handles(MockActuator::new().with_page_size(2), 5));

    let stats = h.run().await;

    assert_eq!(stats.accounts_enumerated, 5);
    assert_eq!(stats.unfollowed, 5);
}

#[tokio::test]
async fn max_accounts_truncates_the_enumeration() {
    let mut h = Harness::new(default_handles(MockActuator::new().with_page_size(2), 6));
    h.config.max_accounts = 3;

    let stats = h.run().await;

    assert_eq!(stats.accounts_enumerated, 3);
    assert_eq!(h.actuator.clicks(), vec!["user1", "user2", "user3"]);
}

#[tokio::test]
async fn handles_fall_back_to_row_text() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let actuator = MockActuator::new()
        .follow("named", MockProfile::posts(1))
        .follow_unnamed("Someone\n@from.text\nFollowing")
        .follow_unnamed("No handle at all");
    let sleeper = RecordingSleeper::new();
    let list = FollowList::new(&actuator, &sleeper, &config);

    list.open().await.unwrap();
    let accounts = list.load().await.unwrap();

    let handles: Vec<_> = accounts.iter().map(|a| a.handle.as_str()).collect();
    assert_eq!(handles, vec!["named", "from.text", ""]);
    assert_eq!(accounts[2].position, 2);
}

#[tokio::test]
async fn resolve_finds_a_row_at_its_recorded_position() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let actuator = MockActuator::new()
        .follow("first", MockProfile::posts(1))
        .follow("second", MockProfile::posts(1));
    let sleeper = RecordingSleeper::new();
    let list = FollowList::new(&actuator, &sleeper, &config);
    list.open().await.unwrap();
    list.load().await.unwrap();

    let row = list
        .resolve(&AccountRecord::new("second", "", 1))
        .await
        .unwrap();
    assert_eq!(row.index, 1);

    let missing = list.resolve(&AccountRecord::new("nobody", "", 0)).await;
    assert!(missing.is_err());
}

#[tokio::test]
async fn list_container_falls_back_to_the_next_strategy() {
    let legacy = locator::LIST_CONTAINER[1].selector;
    let h = Harness::new(default_handles(
        MockActuator::new().with_container(legacy).with_page_size(2),
        4,
    ));

    let stats = h.run().await;

    assert_eq!(stats.accounts_enumerated, 4);
    let containers = h.actuator.scroll_containers();
    assert!(!containers.is_empty());
    assert!(containers.iter().all(|c| c.as_deref() == Some(legacy)));
}

#[tokio::test]
async fn first_list_container_is_preferred() {
    let h = Harness::new(default_handles(MockActuator::new(), 2));

    h.run().await;

    let first = locator::LIST_CONTAINER[0].selector;
    assert!(h
        .actuator
        .scroll_containers()
        .iter()
        .all(|c| c.as_deref() == Some(first)));
}
