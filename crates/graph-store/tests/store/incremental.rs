use graph_store::{
    selection::{Defer, LinkedField, ScalarField, Stream},
    NormalizationError, OperationDescriptor, PathSegment, ResponsePayload, Store, StoreError,
};
use serde_json::json;

use super::{commit, data, query, scalars, user, Notifications};

/// ```graphql
/// query ProfileQuery {
///   me {
///     id
///     name
///     ... @defer(label: "ProfileQuery$defer$bio") { bio }
///     friends @stream(label: "ProfileQuery$stream$friends") { id name }
///   }
/// }
/// ```
fn profile_query() -> OperationDescriptor {
    query(
        "ProfileQuery",
        vec![user(
            "me",
            vec![
                ScalarField::new("id").into(),
                ScalarField::new("name").into(),
                Defer::new("ProfileQuery$defer$bio", vec![ScalarField::new("bio").into()]).into(),
                Stream::new(
                    "ProfileQuery$stream$friends",
                    LinkedField::new("friends", scalars(&["id", "name"]))
                        .concrete_type("User")
                        .plural(),
                )
                .into(),
            ],
        )],
    )
}

fn initial(store: &Store, profile: &OperationDescriptor) {
    commit(
        store,
        profile,
        json!({"me": {"id": "1", "name": "Zuck", "friends": [{"id": "2", "name": "Chan"}]}}),
    );
}

#[test]
fn pending_parts_read_as_empty_until_they_arrive() {
    let store = Store::default();
    let profile = profile_query();
    initial(&store, &profile);

    let snapshot = store.lookup(&profile.root);
    assert!(!snapshot.is_missing_data);
    assert_eq!(
        snapshot.data,
        Some(json!({"me": {"id": "1", "name": "Zuck", "bio": null, "friends": [{"id": "2", "name": "Chan"}]}}))
    );
    assert!(store.diff(&profile.root).is_none());
    assert!(store.check(&profile.root));
}

#[test]
fn deferred_and_streamed_payloads_land_in_their_parent() {
    let store = Store::default();
    let profile = profile_query();
    let _fetch = store.track_fetch(&profile);
    initial(&store, &profile);
    let notifications = Notifications::default();
    let _subscription = store.subscribe(&profile.root, notifications.callback());

    store
        .commit_incremental_payload(
            &profile,
            &ResponsePayload::from_data(json!({"bio": "Building things"}))
                .incremental("ProfileQuery$defer$bio", ["me".into()]),
        )
        .unwrap();
    store
        .commit_incremental_payload(
            &profile,
            &ResponsePayload::from_data(json!({"id": "3", "name": "Priscilla"})).incremental(
                "ProfileQuery$stream$friends",
                ["me".into(), "friends".into(), PathSegment::Index(1)],
            ),
        )
        .unwrap();

    assert_eq!(notifications.count(), 2);
    assert_eq!(
        data(&store, &profile),
        Some(json!({"me": {
            "id": "1",
            "name": "Zuck",
            "bio": "Building things",
            "friends": [{"id": "2", "name": "Chan"}, {"id": "3", "name": "Priscilla"}]
        }}))
    );
}

#[test]
fn unknown_or_consumed_placeholders_are_rejected() {
    let store = Store::default();
    let profile = profile_query();
    initial(&store, &profile);
    let bio = ResponsePayload::from_data(json!({"bio": "Building things"})).incremental("ProfileQuery$defer$bio", ["me".into()]);

    assert_eq!(
        store.commit_incremental_payload(&profile, &ResponsePayload::from_data(json!({}))),
        Err(StoreError::NotIncremental)
    );
    assert_eq!(
        store.commit_incremental_payload(
            &profile,
            &ResponsePayload::from_data(json!({})).incremental("ProfileQuery$defer$bio", ["you".into()])
        ),
        Err(StoreError::UnknownIncrementalPlaceholder {
            label: "ProfileQuery$defer$bio".to_string(),
            path: "you".to_string()
        })
    );

    store.commit_incremental_payload(&profile, &bio).unwrap();
    assert!(matches!(
        store.commit_incremental_payload(&profile, &bio),
        Err(StoreError::UnknownIncrementalPlaceholder { .. })
    ));
}

#[rstest::rstest]
#[case::skips_an_item(2)]
#[case::far_ahead(1 << 40)]
#[case::last_index(usize::MAX)]
fn stream_items_must_arrive_in_order(#[case] index: usize) {
    let store = Store::default();
    let profile = profile_query();
    let _fetch = store.track_fetch(&profile);
    initial(&store, &profile);
    let before = store.source();

    let item = ResponsePayload::from_data(json!({"id": "3", "name": "Priscilla"})).incremental(
        "ProfileQuery$stream$friends",
        ["me".into(), "friends".into(), PathSegment::Index(index)],
    );
    assert_eq!(
        store.commit_incremental_payload(&profile, &item),
        Err(StoreError::Normalization(NormalizationError::StreamItemOutOfOrder {
            path: format!("me.friends.{index}"),
            index,
            received: 1,
        }))
    );
    assert_eq!(store.source(), before);
}

#[test]
fn finished_requests_forget_their_placeholders() {
    let store = Store::default();
    let profile = profile_query();
    let fetch = store.track_fetch(&profile);
    initial(&store, &profile);
    fetch.complete();

    let item = ResponsePayload::from_data(json!({"id": "3", "name": "Priscilla"})).incremental(
        "ProfileQuery$stream$friends",
        ["me".into(), "friends".into(), PathSegment::Index(1)],
    );
    assert!(matches!(
        store.commit_incremental_payload(&profile, &item),
        Err(StoreError::UnknownIncrementalPlaceholder { .. })
    ));
}
