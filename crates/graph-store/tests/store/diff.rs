use std::sync::Arc;

use graph_store::{
    selection::{Argument, Defer, LinkedField, Operation, ScalarField, Selection, Stream},
    OperationDescriptor, Store,
};
use serde_json::{json, Value};

use super::{commit, query, scalars, user};

/// `query FriendsQuery { me { id name friends(first: 2) { id name avatar } } }`
fn friends_query() -> OperationDescriptor {
    query(
        "FriendsQuery",
        vec![LinkedField::new(
            "me",
            vec![
                ScalarField::new("id").into(),
                ScalarField::new("name").into(),
                LinkedField::new("friends", scalars(&["id", "name", "avatar"]))
                    .with_argument(Argument::literal("first", json!(2)))
                    .concrete_type("User")
                    .plural()
                    .into(),
            ],
        )
        .concrete_type("User")
        .into()],
    )
}

fn shape(selections: &[Selection]) -> Vec<String> {
    selections
        .iter()
        .map(|selection| match selection {
            Selection::LinkedField(field) => format!("{}{{{}}}", field.name, shape(&field.selections).join(" ")),
            other => other.response_key().unwrap_or("...").to_string(),
        })
        .collect()
}

#[rstest::rstest]
#[case::empty(None)]
#[case::root_only(Some(json!({"me": {"id": "1"}})))]
#[case::without_friends(Some(json!({"me": {"id": "1", "name": "Zuck"}})))]
#[case::partial_friends(Some(json!({"me": {"id": "1", "name": "Zuck", "friends": [{"id": "2", "name": "Chan"}]}})))]
#[case::null_friends(Some(json!({"me": {"id": "1", "name": "Zuck", "friends": null}})))]
#[case::complete(Some(json!({"me": {"id": "1", "name": "Zuck", "friends": [{"id": "2", "name": "Chan", "avatar": null}]}})))]
#[case::null_root(Some(json!({"me": null})))]
fn diffs_are_empty_exactly_when_nothing_is_missing(#[case] cached: Option<Value>) {
    let store = Store::default();
    let operation = friends_query();
    if let Some(cached) = cached {
        commit(&store, &operation, cached);
    }

    let missing = store.lookup(&operation.root).is_missing_data;
    assert_eq!(store.diff(&operation.root).is_none(), !missing);
    assert_eq!(store.check(&operation.root), !missing);
}

/// ```graphql
/// query ProfileQuery {
///   me {
///     id
///     ... @defer(label: "ProfileQuery$defer$bio") { bio }
///     friends @stream(label: "ProfileQuery$stream$friends") { id name }
///   }
/// }
/// ```
fn incremental_query() -> OperationDescriptor {
    query(
        "ProfileQuery",
        vec![user(
            "me",
            vec![
                ScalarField::new("id").into(),
                Defer::new("ProfileQuery$defer$bio", scalars(&["bio"])).into(),
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

#[rstest::rstest]
#[case::nothing_delivered(json!({"me": {"id": "1"}}))]
#[case::deferred_delivered(json!({"me": {"id": "1", "bio": "Building things"}}))]
#[case::first_item_streamed(json!({"me": {"id": "1", "friends": [{"id": "2", "name": "Chan"}]}}))]
#[case::incomplete_item_streamed(json!({"me": {"id": "1", "friends": [{"id": "2"}]}}))]
#[case::everything_delivered(json!({"me": {"id": "1", "bio": null, "friends": []}}))]
fn pending_incremental_data_is_neither_missing_nor_diffed(#[case] cached: Value) {
    let store = Store::default();
    let operation = incremental_query();
    commit(&store, &operation, cached);

    let missing = store.lookup(&operation.root).is_missing_data;
    assert_eq!(store.diff(&operation.root).is_none(), !missing);
    assert_eq!(store.check(&operation.root), !missing);
}

#[test]
fn fetching_the_diff_completes_the_operation() {
    let store = Store::default();
    let operation = friends_query();
    commit(
        &store,
        &operation,
        json!({"me": {"id": "1", "friends": [{"id": "2", "name": "Chan"}, {"id": "3", "avatar": "p.png"}]}}),
    );

    let diffed = store.diff(&operation.root).unwrap();
    assert_eq!(
        shape(&diffed.node.selections),
        ["me{id name friends{id name avatar}}"]
    );

    let refetch = OperationDescriptor::new(
        Arc::new(Operation::query("FriendsRefetchQuery", Arc::clone(&diffed.node.selections))),
        Default::default(),
    );
    commit(
        &store,
        &refetch,
        json!({"me": {"id": "1", "name": "Zuck", "friends": [
            {"id": "2", "name": "Chan", "avatar": "c.png"},
            {"id": "3", "name": "Priscilla", "avatar": "p.png"}
        ]}}),
    );

    assert!(store.diff(&operation.root).is_none());
    assert!(store.check(&operation.root));
    let snapshot = store.lookup(&operation.root);
    assert!(!snapshot.is_missing_data);
    assert_eq!(snapshot.data.unwrap()["me"]["friends"][1]["name"], json!("Priscilla"));
}
