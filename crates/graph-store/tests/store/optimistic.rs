use std::sync::Arc;

use graph_store::{
    selection::Operation,
    DataId, OperationDescriptor, OptimisticToken, OptimisticUpdate, RecordSourceProxy, ResponsePayload, Store,
    UpdateError, Updater,
};
use serde_json::json;

use super::{commit, data, query, scalars, user, Notifications};

/// `query PostQuery { post { id likeCount viewerHasLiked } }`
fn post_query() -> OperationDescriptor {
    let post = user("post", scalars(&["id", "likeCount", "viewerHasLiked"]));
    query("PostQuery", vec![post])
}

/// Reads the current count through the proxy, so replaying it on fresher data stays correct.
fn like() -> Updater {
    Arc::new(|proxy: &mut RecordSourceProxy<'_>| -> Result<(), UpdateError> {
        let post = DataId::new("p1");
        let count = proxy
            .record_mut(&post)?
            .value("likeCount")
            .and_then(|count| count.as_i64())
            .unwrap_or_default();
        proxy.set_value(&post, "likeCount", json!(count + 1))?;
        proxy.set_value(&post, "viewerHasLiked", json!(true))
    })
}

fn seeded_store() -> (Store, OperationDescriptor) {
    let store = Store::default();
    let post = post_query();
    commit(
        &store,
        &post,
        json!({"post": {"id": "p1", "likeCount": 10, "viewerHasLiked": false}}),
    );
    (store, post)
}

#[test]
fn reverting_right_after_applying_restores_the_exact_same_source() {
    let (store, post) = seeded_store();
    let before = store.source();
    let token = OptimisticToken::new("like");

    assert!(store.apply_optimistic(token.clone(), OptimisticUpdate::updater(like())));
    assert_eq!(
        data(&store, &post),
        Some(json!({"post": {"id": "p1", "likeCount": 11, "viewerHasLiked": true}}))
    );
    assert!(store.revert_optimistic(&token));

    assert_eq!(store.source(), before);
    assert!(!store.revert_optimistic(&token));
}

#[test]
fn optimistic_layers_are_replayed_on_committed_data() {
    let (store, post) = seeded_store();
    let notifications = Notifications::default();
    let _subscription = store.subscribe(&post.root, notifications.callback());

    store.apply_optimistic("like".into(), OptimisticUpdate::updater(like()));
    assert_eq!(notifications.count(), 1);

    commit(&store, &post, json!({"post": {"id": "p1", "likeCount": 20}}));
    assert_eq!(
        data(&store, &post),
        Some(json!({"post": {"id": "p1", "likeCount": 21, "viewerHasLiked": true}}))
    );
    assert_eq!(notifications.count(), 2);

    store.revert_optimistic(&"like".into());
    assert_eq!(
        data(&store, &post),
        Some(json!({"post": {"id": "p1", "likeCount": 20, "viewerHasLiked": false}}))
    );
    assert_eq!(notifications.count(), 3);
}

#[test]
fn applying_the_same_token_twice_is_ignored() {
    let (store, post) = seeded_store();

    assert!(store.apply_optimistic("like".into(), OptimisticUpdate::updater(like())));
    assert!(!store.apply_optimistic("like".into(), OptimisticUpdate::updater(like())));

    assert_eq!(data(&store, &post).unwrap()["post"]["likeCount"], json!(11));
}

#[test]
fn optimistic_responses_are_normalized_like_server_payloads() {
    let (store, post) = seeded_store();
    let update = OptimisticUpdate::response(
        post.root.clone(),
        ResponsePayload::from_data(json!({"post": {"id": "p1", "viewerHasLiked": true}})),
    )
    .with_updater(Arc::new(|proxy: &mut RecordSourceProxy<'_>| {
        proxy.set_value(&DataId::new("p1"), "likeCount", json!(11))
    }));

    store.apply_optimistic("like".into(), update);
    assert_eq!(
        data(&store, &post),
        Some(json!({"post": {"id": "p1", "likeCount": 11, "viewerHasLiked": true}}))
    );

    store.revert_optimistic(&"like".into());
    assert_eq!(
        data(&store, &post),
        Some(json!({"post": {"id": "p1", "likeCount": 10, "viewerHasLiked": false}}))
    );
}

#[test]
fn failing_optimistic_updates_leave_an_empty_layer() {
    let (store, post) = seeded_store();
    let before = data(&store, &post);

    let failing: Updater = Arc::new(|proxy: &mut RecordSourceProxy<'_>| -> Result<(), UpdateError> {
        proxy.set_value(&DataId::new("p1"), "likeCount", json!(0))?;
        Err(UpdateError::Aborted("offline".to_string()))
    });
    assert!(store.apply_optimistic("like".into(), OptimisticUpdate::updater(failing)));

    assert_eq!(data(&store, &post), before);
}

#[test]
fn mutation_updaters_run_on_top_of_their_payload() {
    let (store, post) = seeded_store();
    let mutation = OperationDescriptor::new(
        Arc::new(Operation::mutation(
            "LikeMutation",
            vec![user("likePost", scalars(&["id", "likeCount"]))],
        )),
        Default::default(),
    );

    store
        .commit_payload_with_updater(
            &mutation,
            &ResponsePayload::from_data(json!({"likePost": {"id": "p1", "likeCount": 11}})),
            Some(Arc::new(|proxy: &mut RecordSourceProxy<'_>| {
                proxy.set_value(&DataId::new("p1"), "viewerHasLiked", json!(true))
            })),
        )
        .unwrap();

    assert_eq!(
        data(&store, &post),
        Some(json!({"post": {"id": "p1", "likeCount": 11, "viewerHasLiked": true}}))
    );
}
