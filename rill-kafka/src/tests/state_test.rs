use super::*;
use crate::state::TopicStateManager;

fn manager(broker: &Arc<FakeBroker>) -> TopicStateManager<FakeBroker> {
    TopicStateManager::new(Arc::clone(broker), Arc::new(|| BASE_TIME))
}

#[rstest]
fn assign_records_clock_time(broker: Arc<FakeBroker>) {
    let state = manager(&broker);
    let orders = tp("orders", 0);

    state.assign(&orders);

    assert_eq!(state.assigned_at(&orders), Some(BASE_TIME));
    assert_eq!(state.assigned_at(&tp("orders", 1)), None);
}

#[rstest]
fn store_offset_keeps_commit_position(broker: Arc<FakeBroker>) {
    let state = manager(&broker);

    state.store_offset(&at("orders", 0, 6));

    assert_eq!(state.latest_committed_offset(&tp("orders", 0)), Some(7));
    assert_eq!(broker.calls(), [Call::Store(at("orders", 0, 7))]);
}

#[rstest]
fn store_offset_behind_cache_is_skipped(broker: Arc<FakeBroker>) {
    let state = manager(&broker);
    state.store_offset(&at("orders", 0, 6));

    state.store_offset(&at("orders", 0, 4));

    assert_eq!(state.latest_committed_offset(&tp("orders", 0)), Some(7));
    assert_eq!(broker.count(|c| matches!(c, Call::Store(_))), 1);
}

#[rstest]
fn store_offset_same_position_is_stored_again(broker: Arc<FakeBroker>) {
    let state = manager(&broker);
    state.store_offset(&at("orders", 0, 6));
    state.store_offset(&at("orders", 0, 6));
    assert_eq!(broker.count(|c| matches!(c, Call::Store(_))), 2);
}

#[rstest]
fn pause_is_idempotent(broker: Arc<FakeBroker>) {
    let state = manager(&broker);
    let orders = tp("orders", 0);

    state.pause(&at("orders", 0, 3));
    state.pause(&at("orders", 0, 8));

    assert!(state.is_paused(&orders));
    assert_eq!(state.paused_at(&orders), Some(3));
    assert_eq!(broker.calls(), [Call::Pause(orders)]);
}

#[rstest]
fn failed_pause_leaves_partition_unpaused(broker: Arc<FakeBroker>) {
    *broker.pause_error.lock() = Some("broker unavailable".into());
    let state = manager(&broker);

    state.pause(&at("orders", 0, 3));

    assert!(!state.is_paused(&tp("orders", 0)));
}

#[rstest]
fn resume_seeks_to_pause_offset(broker: Arc<FakeBroker>) {
    let state = manager(&broker);
    let orders = tp("orders", 0);
    state.pause(&at("orders", 0, 3));

    state.resume(&orders);
    state.resume(&orders);

    assert!(!state.is_paused(&orders));
    assert_eq!(
        broker.calls(),
        [
            Call::Pause(orders.clone()),
            Call::Seek(at("orders", 0, 3)),
            Call::Resume(orders),
        ]
    );
}

#[rstest]
fn resume_without_pause_does_nothing(broker: Arc<FakeBroker>) {
    let state = manager(&broker);
    state.resume(&tp("orders", 0));
    assert!(broker.calls().is_empty());
}

#[rstest]
fn commit_uses_cached_position(broker: Arc<FakeBroker>) {
    let state = manager(&broker);
    let orders = tp("orders", 0);

    state.commit_latest_stored_offset(&orders);
    assert!(broker.calls().is_empty());

    state.store_offset(&at("orders", 0, 4));
    state.commit_latest_stored_offset(&orders);
    assert_eq!(broker.count(|c| *c == Call::Commit(at("orders", 0, 5))), 1);
}

#[rstest]
#[case(BrokerError::NotMember("rebalanced".to_string()))]
#[case(BrokerError::Transient("timed out".to_string()))]
fn commit_failures_are_not_propagated(broker: Arc<FakeBroker>, #[case] error: BrokerError) {
    *broker.commit_error.lock() = Some(error);
    let state = manager(&broker);
    state.store_offset(&at("orders", 0, 4));

    state.commit_latest_stored_offset(&tp("orders", 0));

    assert_eq!(state.latest_committed_offset(&tp("orders", 0)), Some(5));
}

#[rstest]
fn revoke_clears_partition(broker: Arc<FakeBroker>) {
    let state = manager(&broker);
    let orders = tp("orders", 0);
    let other = tp("orders", 1);
    for partition in [&orders, &other] {
        state.assign(partition);
    }
    state.pause(&at("orders", 0, 3));
    state.store_offset(&at("orders", 0, 2));
    state.store_offset(&at("orders", 1, 9));

    state.revoke(&orders);

    assert!(!state.is_paused(&orders));
    assert_eq!(state.latest_committed_offset(&orders), None);
    assert_eq!(state.assigned_at(&orders), None);
    assert_eq!(state.latest_committed_offset(&other), Some(10));
    assert_eq!(state.assigned_at(&other), Some(BASE_TIME));
}
