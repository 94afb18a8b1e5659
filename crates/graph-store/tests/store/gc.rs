use std::sync::Arc;

use graph_store::{
    selection::ScalarField, source::RecordSource, DataId, OptimisticToken, OptimisticUpdate, RecordSourceProxy, Store,
    UpdateError, Updater,
};
use serde_json::json;

use super::{commit, data, me_query, query, scalars, store_without_release_buffer, user, Notifications};

#[test]
fn collection_never_removes_what_retained_operations_reach() {
    let store = store_without_release_buffer();
    let profile = query(
        "ProfileQuery",
        vec![user(
            "me",
            vec![
                ScalarField::new("id").into(),
                user("bestFriend", scalars(&["id", "name"])),
                user("friends", scalars(&["id"])),
            ],
        )],
    );
    let boss = query("BossQuery", vec![user("boss", scalars(&["id", "name"]))]);

    let _retained = store.retain(&profile);
    commit(
        &store,
        &profile,
        json!({"me": {"id": "1", "bestFriend": {"id": "2", "name": "Chan"}, "friends": {"id": "1"}}}),
    );
    commit(&store, &boss, json!({"boss": {"id": "3", "name": "Sheryl"}}));
    let reachable = store.lookup(&profile.root).seen_records;

    let outcome = store.collect().unwrap();

    assert_eq!(outcome.collected.len(), 1);
    assert!(outcome.collected.contains(&DataId::new("3")));
    assert!(outcome.safety_warnings.is_empty());
    let source = store.source();
    for id in &reachable {
        assert!(source.has(id), "{id} was collected");
    }
    assert!(!source.has(&DataId::new("3")));
    assert_eq!(data(&store, &boss), Some(json!({"boss": null})));
    assert!(store.lookup(&boss.root).is_missing_data);
}

#[test]
fn released_operations_linger_in_the_release_buffer() {
    let store = Store::default();
    let me = me_query();

    let retained = store.retain(&me);
    commit(&store, &me, json!({"me": {"id": "1", "name": "Zuck"}}));
    retained.dispose();
    store.collect();

    assert_eq!(data(&store, &me), Some(json!({"me": {"id": "1", "name": "Zuck"}})));
}

#[test]
fn releasing_the_last_reference_collects_right_away() {
    let store = store_without_release_buffer();
    let me = me_query();

    let first = store.retain(&me);
    let second = store.retain(&me);
    commit(&store, &me, json!({"me": {"id": "1", "name": "Zuck"}}));

    drop(first);
    assert!(store.check(&me.root));
    drop(second);
    assert!(!store.check(&me.root));
    assert!(store.source().is_empty());
}

#[test]
fn in_flight_data_is_kept_and_reported() {
    let store = store_without_release_buffer();
    let me = me_query();
    let boss = query("BossQuery", vec![user("boss", scalars(&["id", "name"]))]);

    let _retained = store.retain(&me);
    commit(&store, &me, json!({"me": {"id": "1", "name": "Zuck"}}));
    let fetch = store.track_fetch(&boss);
    commit(&store, &boss, json!({"boss": {"id": "2", "name": "Sheryl"}}));

    let outcome = store.collect().unwrap();
    assert!(outcome.collected.is_empty());
    assert_eq!(outcome.safety_warnings.len(), 1);
    assert_eq!(outcome.safety_warnings[0].data_id, DataId::new("2"));
    assert_eq!(outcome.safety_warnings[0].request, boss.identifier());

    fetch.complete();
    let outcome = store.collect().unwrap();
    assert_eq!(outcome.collected.len(), 1);
    assert!(outcome.safety_warnings.is_empty());
}

#[test]
fn late_responses_are_written_without_notifying_disposed_subscribers() {
    let store = Store::default();
    let me = me_query();
    let notifications = Notifications::default();

    let retained = store.retain(&me);
    let subscription = store.subscribe(&me.root, notifications.callback());
    subscription.dispose();
    retained.dispose();

    commit(&store, &me, json!({"me": {"id": "1", "name": "Zuck"}}));

    assert_eq!(notifications.count(), 0);
    assert_eq!(data(&store, &me), Some(json!({"me": {"id": "1", "name": "Zuck"}})));
}

#[test]
fn holding_collection_defers_it() {
    let store = store_without_release_buffer();
    let me = me_query();
    let retained = store.retain(&me);
    commit(&store, &me, json!({"me": {"id": "1", "name": "Zuck"}}));

    let hold = store.hold_gc();
    retained.dispose();
    assert_eq!(store.collect(), None);
    assert!(store.check(&me.root));

    drop(hold);
    assert!(!store.check(&me.root));
}

#[test]
fn records_only_optimistic_updates_reach_are_kept_until_reverted() {
    let store = store_without_release_buffer();
    let boss = query("BossQuery", vec![user("boss", scalars(&["id", "name"]))]);
    commit(&store, &boss, json!({"boss": {"id": "2", "name": "Sheryl"}}));

    let pin: Updater = Arc::new(|proxy: &mut RecordSourceProxy<'_>| -> Result<(), UpdateError> {
        proxy.root().set_link("pinned", DataId::new("2"));
        Ok(())
    });
    let token = OptimisticToken::new("pin-boss");
    assert!(store.apply_optimistic(token.clone(), OptimisticUpdate::updater(pin)));

    let outcome = store.collect().unwrap();
    assert!(outcome.collected.is_empty());
    assert!(store.source().has(&DataId::new("2")));

    assert!(store.revert_optimistic(&token));
    let outcome = store.collect().unwrap();
    assert_eq!(outcome.collected.len(), 2);
    assert!(outcome.collected.contains(&DataId::new("2")));
    assert!(store.source().is_empty());
}
