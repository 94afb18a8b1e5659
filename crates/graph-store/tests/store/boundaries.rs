use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use graph_store::{
    selection::{
        CatchField, CatchTo, Fragment, FragmentSpread, LinkedField, RequiredAction, RequiredField, ResolverField,
        ScalarField,
    },
    DataId, PathSegment, PayloadError, RecordSourceProxy, ResolverError, ResolverInput, ResponsePayload, Selector,
    Store, WriteReport,
};
use serde_json::{json, Value};

use super::{commit, data, query, scalars, user, Notifications};

#[test]
fn logged_required_fields_null_their_parent_without_failing() {
    let store = Store::default();
    let me = query(
        "MeQuery",
        vec![user(
            "me",
            vec![
                ScalarField::new("id").into(),
                RequiredField::new(ScalarField::new("name"), RequiredAction::Log, "me.name").into(),
            ],
        )],
    );

    commit(&store, &me, json!({"me": {"id": "1", "name": null}}));

    let snapshot = store.lookup(&me.root);
    assert_eq!(snapshot.result(), Ok(Some(&json!({"me": null}))));
    let missing = snapshot.missing_required_fields.unwrap();
    assert_eq!(missing.action, RequiredAction::Log);
    assert_eq!(missing.fields[0].path, "me.name");
}

#[test]
fn payloads_missing_required_fields_are_reported_when_written() {
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

    let report = store
        .commit_payload(&me, &ResponsePayload::from_data(json!({"me": {"id": "1"}})))
        .unwrap();

    let missing = report.missing_required_fields.unwrap();
    assert_eq!(missing.action, RequiredAction::Throw);
    assert_eq!(missing.fields[0].path, "me.name");
    assert!(report.errors.is_empty());
    assert!(store.lookup(&me.root).result().is_err());

    let report = store
        .commit_payload(&me, &ResponsePayload::from_data(json!({"me": {"id": "1", "name": "Zuck"}})))
        .unwrap();
    assert_eq!(report, WriteReport::default());
}

#[test]
fn server_errors_are_caught_where_the_operation_asks_for_it() {
    let store = Store::default();
    let profile = query(
        "ProfileQuery",
        vec![
            user("me", scalars(&["id", "name"])),
            CatchField::new(
                LinkedField::new("me", scalars(&["id", "bio"]))
                    .with_alias("profile")
                    .concrete_type("User"),
                CatchTo::Result,
                "profile",
            )
            .into(),
        ],
    );

    let report = store
        .commit_payload(
            &profile,
            &ResponsePayload::from_data(json!({
                "me": {"id": "1", "name": "Zuck"},
                "profile": {"id": "1", "bio": null}
            }))
            .with_errors([PayloadError::new("bio service down").with_path(["profile".into(), "bio".into()])]),
        )
        .unwrap();
    assert!(report.is_empty());

    let snapshot = store.lookup(&profile.root);
    assert!(snapshot.errors.is_empty());
    insta::assert_json_snapshot!(snapshot.data, @r###"
    {
      "me": {
        "id": "1",
        "name": "Zuck"
      },
      "profile": {
        "ok": false,
        "errors": [
          {
            "kind": "payload",
            "message": "bio service down",
            "path": [
              "profile",
              "bio"
            ]
          }
        ]
      }
    }
    "###);
}

#[test]
fn uncaught_server_errors_are_reported_on_the_snapshot() {
    let store = Store::default();
    let me = query("MeQuery", vec![user("me", scalars(&["id", "name"]))]);

    let report = store
        .commit_payload(
            &me,
            &ResponsePayload::from_data(json!({"me": {"id": "1", "name": null}}))
                .with_errors([PayloadError::new("forbidden").with_path(["me".into(), "name".into()])]),
        )
        .unwrap();
    assert_eq!(report.errors.len(), 1);

    let snapshot = store.lookup(&me.root);
    assert_eq!(snapshot.errors.len(), 1);
    assert_eq!(snapshot.errors[0].message, "forbidden");
    assert_eq!(snapshot.errors[0].path, vec![PathSegment::from("me"), "name".into()]);
}

#[test]
fn resolver_outputs_are_recomputed_after_their_input_is_written() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let greeting = ResolverField::new(
        "greeting",
        Some(Arc::new(Fragment::new("GreetingResolver", "User", scalars(&["name"])))),
        Arc::new(move |input: ResolverInput<'_>| -> Result<Value, ResolverError> {
            counter.fetch_add(1, Ordering::SeqCst);
            let name = input.data.and_then(|data| data["name"].as_str()).unwrap_or_default();
            Ok(json!(format!("Hello, {name}!")))
        }),
    );
    let store = Store::default();
    let me = query("MeQuery", vec![user("me", scalars(&["id", "name"]))]);
    let greeting_query = query(
        "GreetingQuery",
        vec![user("me", vec![ScalarField::new("id").into(), greeting.into()])],
    );
    commit(&store, &me, json!({"me": {"id": "1", "name": "Zuck"}}));

    let notifications = Notifications::default();
    let _subscription = store.subscribe(&greeting_query.root, notifications.callback());
    assert_eq!(
        data(&store, &greeting_query),
        Some(json!({"me": {"id": "1", "greeting": "Hello, Zuck!"}}))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    store
        .commit_update(Arc::new(|proxy: &mut RecordSourceProxy<'_>| {
            proxy.set_value(&DataId::new("1"), "name", json!("Mark"))
        }))
        .unwrap();

    assert_eq!(notifications.count(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        data(&store, &greeting_query),
        Some(json!({"me": {"id": "1", "greeting": "Hello, Mark!"}}))
    );
}

#[test]
fn masked_fragments_notify_only_their_own_readers() {
    let store = Store::default();
    let avatar = Arc::new(Fragment::new("UserAvatar", "User", scalars(&["avatar"])));
    let profile = query(
        "ProfileQuery",
        vec![user(
            "me",
            vec![
                ScalarField::new("id").into(),
                FragmentSpread::new(Arc::clone(&avatar)).into(),
            ],
        )],
    );
    commit(&store, &profile, json!({"me": {"id": "1", "avatar": "z.png"}}));

    let parent = store.lookup(&profile.root);
    let reference = &parent.data.as_ref().unwrap()["me"];
    assert!(reference.get("avatar").is_none());
    let fragment = Selector::from_fragment_ref(avatar, reference).unwrap();
    assert_eq!(store.lookup(&fragment).data, Some(json!({"avatar": "z.png"})));

    let parent_notifications = Notifications::default();
    let fragment_notifications = Notifications::default();
    let _parent = store.subscribe(&profile.root, parent_notifications.callback());
    let _fragment = store.subscribe(&fragment, fragment_notifications.callback());

    commit(&store, &profile, json!({"me": {"id": "1", "avatar": "zuck.png"}}));

    assert_eq!(parent_notifications.count(), 0);
    assert_eq!(fragment_notifications.count(), 1);
    assert_eq!(store.lookup(&fragment).data, Some(json!({"avatar": "zuck.png"})));
}
