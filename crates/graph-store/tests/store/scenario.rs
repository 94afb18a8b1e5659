use graph_store::{
    selection::{Argument, LinkedField, RequiredAction, RequiredField, ScalarField},
    source::RecordSource,
    DataId, ReadError, Store,
};
use serde_json::{json, Value};

use super::{commit, data, me_query, query, scalars, user};

#[test]
fn written_data_reads_back_and_survives_partial_writes() {
    let store = Store::default();
    let me = me_query();

    commit(&store, &me, json!({"me": {"id": "1", "name": "Zuck"}}));
    let snapshot = store.lookup(&me.root);
    assert_eq!(snapshot.data, Some(json!({"me": {"id": "1", "name": "Zuck"}})));
    assert!(!snapshot.is_missing_data);

    commit(&store, &me, json!({"me": {"id": "1"}}));
    let snapshot = store.lookup(&me.root);
    assert_eq!(snapshot.data, Some(json!({"me": {"id": "1", "name": "Zuck"}})));
    assert!(!snapshot.is_missing_data);
}

#[test]
fn throwing_required_field_absent_from_the_first_payload_fails_the_read() {
    let store = Store::default();
    let me = query(
        "MeQuery",
        vec![user(
            "me",
            vec![
                ScalarField::new("id").into(),
                RequiredField::new(ScalarField::new("name"), RequiredAction::Throw, "me.name").into(),
            ],
        )],
    );

    commit(&store, &me, json!({"me": {"id": "1"}}));

    let snapshot = store.lookup(&me.root);
    assert_ne!(snapshot.data, Some(json!({"me": {"id": "1", "name": null}})));
    let Err(ReadError::RequiredField(error)) = snapshot.result() else {
        unreachable!("the read should fail");
    };
    assert_eq!(error.path, "me.name");
    assert_eq!(error.owner, "MeQuery");
}

#[test]
fn payloads_round_trip() {
    let store = Store::default();
    let operation = query(
        "ProfileQuery",
        vec![LinkedField::new(
            "me",
            vec![
                ScalarField::new("id").into(),
                ScalarField::new("name").into(),
                LinkedField::new("address", scalars(&["city", "country"]))
                    .concrete_type("Address")
                    .into(),
                LinkedField::new("friends", scalars(&["id", "name"]))
                    .with_alias("firstFriends")
                    .with_argument(Argument::literal("first", json!(3)))
                    .concrete_type("User")
                    .plural()
                    .into(),
                LinkedField::new("emails", scalars(&["value"]))
                    .concrete_type("Email")
                    .plural()
                    .into(),
                ScalarField::new("tags").into(),
            ],
        )
        .with_alias("viewer")
        .concrete_type("User")
        .into()],
    );
    let payload = json!({
        "viewer": {
            "id": "1",
            "name": "Zuck",
            "address": {"city": "Palo Alto", "country": null},
            "firstFriends": [{"id": "2", "name": "Chan"}, null, {"id": "3", "name": "Priscilla"}],
            "emails": [{"value": "zuck@fb.com"}],
            "tags": ["founder", "ceo"]
        }
    });

    commit(&store, &operation, payload.clone());

    let snapshot = store.lookup(&operation.root);
    assert_eq!(snapshot.data, Some(payload));
    assert!(!snapshot.is_missing_data);

    let source = store.source();
    let zuck = source.record(&DataId::new("1")).unwrap();
    assert_eq!(
        zuck.links("friends(first:3)"),
        Some(&[Some(DataId::new("2")), None, Some(DataId::new("3"))][..])
    );
    assert_eq!(zuck.link("address"), Some(&DataId::new("client:1:address")));
}

#[test]
fn client_identities_are_stable_across_writes() {
    let store = Store::default();
    let operation = query(
        "AddressQuery",
        vec![user(
            "me",
            vec![
                ScalarField::new("id").into(),
                LinkedField::new("address", scalars(&["city"]))
                    .concrete_type("Address")
                    .into(),
                LinkedField::new("emails", scalars(&["value"]))
                    .concrete_type("Email")
                    .plural()
                    .into(),
            ],
        )],
    );
    let payload = json!({"me": {"id": "1", "address": {"city": "Palo Alto"}, "emails": [{"value": "zuck@fb.com"}]}});

    commit(&store, &operation, payload.clone());
    let first = store.source();
    commit(&store, &operation, payload);

    assert_eq!(store.source(), first);
    let emails = first.record(&DataId::new("client:1:emails:0")).unwrap();
    assert_eq!(emails.value("value"), Some(&json!("zuck@fb.com")));
    assert_eq!(emails.len(), 1);
}

#[test]
fn written_fields_are_never_erased_by_omission() {
    let store = Store::default();
    let profile = query("ProfileQuery", vec![user("me", scalars(&["id", "name", "bio"]))]);
    let me = me_query();

    commit(&store, &me, json!({"me": {"id": "1", "name": "Zuck"}}));
    assert!(store.lookup(&profile.root).is_missing_data);

    let bio = query("BioQuery", vec![user("me", scalars(&["id", "bio"]))]);
    commit(&store, &bio, json!({"me": {"id": "1", "bio": null}}));
    let snapshot = store.lookup(&profile.root);
    assert!(!snapshot.is_missing_data);
    assert_eq!(snapshot.data, Some(json!({"me": {"id": "1", "name": "Zuck", "bio": null}})));

    commit(&store, &me, json!({"me": {"id": "1"}}));
    commit(&store, &bio, json!({"me": {"id": "1"}}));
    assert!(!store.lookup(&profile.root).is_missing_data);

    commit(&store, &me, json!({"me": {"id": "1", "name": null}}));
    assert_eq!(data(&store, &me), Some(json!({"me": {"id": "1", "name": Value::Null}})));
}
