//! End-to-end scenarios: configuration loaded from disk, entities hydrated
//! through the store, bindings rendered against them.

use std::cell::RefCell;
use std::rc::Rc;

use graphbind::graphbind_model::{
    AddOptions, CollectionError, Event, FetchOptions, MemoryTransport, Store, Value,
};
use graphbind::graphbind_view::{BindRuntime, Element, Scope, View};
use graphbind::project::{MANIFEST_NAME, ProjectLoader};
use serde_json::json;
use tempfile::TempDir;

const MANIFEST: &str = r#"
base_path = "/api"

[[models]]
name = "User"
endpoint = "/users"

[models.schema]
name = "string"
joined = "date"
friend = "User"
tags = ["Tag"]

[models.validation]
name = ["not_null"]

[[models]]
name = "Tag"
endpoint = "/tags"

[[collections]]
name = "Users"
model = "User"
endpoint = "/users"
"#;

async fn load_store(transport: Option<Rc<MemoryTransport>>) -> (TempDir, Store) {
    let dir = TempDir::new().unwrap();
    tokio::fs::write(dir.path().join(MANIFEST_NAME), MANIFEST)
        .await
        .unwrap();
    let project = ProjectLoader::load(dir.path()).await.unwrap();
    let store = match transport {
        Some(transport) => project.into_store_with(transport),
        None => project.into_store(),
    };
    (dir, store)
}

#[tokio::test]
async fn test_coercion_round_trips_through_json() {
    let (_dir, store) = load_store(None).await;
    let user = store
        .hydrate(
            "User",
            json!({
                "_id": "u1",
                "name": "Ann",
                "joined": "2024-03-01T12:00:00Z",
                "friend": {"_id": "u2", "name": "Bea"},
                "tags": [{"_id": "t1"}, {"_id": "t2"}]
            }),
        )
        .unwrap();

    let raw = user.to_json();
    let again = store.hydrate("User", raw.clone()).unwrap();
    assert_eq!(again, user);
    assert_eq!(again.to_json(), raw);
    assert_eq!(again.get("friend.name"), Some(Value::from("Bea")));
    assert_eq!(again.get("tags.length"), Some(Value::Int(2)));
}

#[tokio::test]
async fn test_same_identifier_yields_same_instance() {
    let (_dir, store) = load_store(None).await;
    let first = store
        .hydrate("User", json!({"_id": "u1", "name": "Ann"}))
        .unwrap();
    let second = store
        .hydrate("User", json!({"_id": "u1", "name": "Bea", "extra": 1}))
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first.get("name"), Some(Value::from("Bea")));
    assert_eq!(first.get("extra"), Some(Value::Int(1)));
}

#[tokio::test]
async fn test_get_returns_value_just_set() {
    let (_dir, store) = load_store(None).await;
    let user = store.hydrate("User", json!({"name": "Ann"})).unwrap();
    for value in [Value::from("Bea"), Value::Int(3), Value::Bool(false)] {
        user.set("note", value.clone()).unwrap();
        assert_eq!(user.get("note"), Some(value));
    }
}

#[tokio::test]
async fn test_nested_subscription_survives_replacement() {
    let (_dir, store) = load_store(None).await;
    let user = store
        .hydrate("User", json!({"_id": "u1", "name": "Ann", "friend": {"_id": "f1", "name": "Old"}}))
        .unwrap();
    let old_friend = user.get("friend").and_then(|v| v.as_entity().cloned()).unwrap();

    let seen = Rc::new(RefCell::new(Vec::new()));
    let log = seen.clone();
    user.on(
        "change:friend.name",
        Rc::new(move |event: &Event| log.borrow_mut().push(event.value().cloned())),
    );

    let new_friend = store
        .hydrate("User", json!({"_id": "f2", "name": "New"}))
        .unwrap();
    user.set("friend", new_friend.clone()).unwrap();
    assert_eq!(*seen.borrow(), vec![Some(Value::from("New"))]);

    old_friend.set("name", "Stale").unwrap();
    assert_eq!(seen.borrow().len(), 1);

    new_friend.set("name", "Newer").unwrap();
    assert_eq!(seen.borrow().last(), Some(&Some(Value::from("Newer"))));
    assert_eq!(seen.borrow().len(), 2);
}

#[tokio::test]
async fn test_batch_add_with_one_invalid_adds_nothing() {
    let (_dir, store) = load_store(None).await;
    let users = store.create_collection("Users").unwrap();
    let mut batch = Vec::new();
    for i in 0..5 {
        batch.push(store.hydrate("User", json!({"name": format!("u{i}")})).unwrap());
    }
    batch.insert(3, store.hydrate("User", json!({"name": null})).unwrap());

    let result = users.add(batch, AddOptions::default());
    assert!(matches!(result, Err(CollectionError::Invalid { index: 3, .. })));
    assert!(users.is_empty());
}

#[tokio::test]
async fn test_tags_scenario() {
    let (_dir, store) = load_store(None).await;
    let user = store
        .hydrate("User", json!({"_id": "abc", "name": "x", "tags": [{"_id": "t1"}]}))
        .unwrap();

    assert_eq!(user.id().as_deref(), Some("abc"));
    assert_eq!(user.get("name"), Some(Value::from("x")));
    let tags = user.get("tags").and_then(|v| v.as_collection().cloned()).unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags.at(0).and_then(|tag| tag.id()).as_deref(), Some("t1"));
}

#[tokio::test]
async fn test_text_binding_scenario() {
    let (_dir, store) = load_store(None).await;
    let user = store.hydrate("User", json!({"name": "Ann"})).unwrap();

    let element = Element::new("span").with_bind("text: ~user:name");
    let view = View::new(BindRuntime::new(), element.clone(), Scope::new().with("user", user.clone()));
    view.bind().unwrap();
    assert_eq!(element.text(), "Ann");

    let binding = view.binder().bindings().remove(0);
    user.set("name", "Bea").unwrap();
    assert_eq!(element.text(), "Bea");
    assert_eq!(binding.run_count(), 2);

    for i in 0..10 {
        user.set("name", format!("n{i}")).unwrap();
    }
    assert_eq!(binding.run_count(), 12);
    assert_eq!(user.listener_count(Some("change:name")), 1);

    view.remove();
    assert_eq!(user.listener_count(None), 0);
}

#[tokio::test]
async fn test_second_fetch_aborts_first() {
    let transport = MemoryTransport::new();
    let (_dir, store) = load_store(Some(transport.clone())).await;
    let users = store.create_collection("Users").unwrap();

    let first_fired = Rc::new(RefCell::new(false));
    let fired = first_fired.clone();
    let first = users.fetch(FetchOptions::default()).unwrap();
    first.success(move |_| *fired.borrow_mut() = true);
    let second = users.fetch(FetchOptions::default()).unwrap();
    assert!(first.is_aborted());

    let request = transport
        .respond(
            1,
            json!({"result": ["User", "u2"], "models": {"User": [{"_id": "u2", "name": "Bea"}]}}),
        )
        .unwrap();
    assert_eq!(request.endpoint, "/api/users");
    transport.respond(
        0,
        json!({"result": ["User", "u1"], "models": {"User": [{"_id": "u1", "name": "Ann"}]}}),
    );

    assert!(!*first_fired.borrow());
    assert!(matches!(second.outcome(), Some(Ok(_))));
    assert_eq!(users.len(), 1);
    assert_eq!(users.at(0).and_then(|user| user.id()).as_deref(), Some("u2"));
}
