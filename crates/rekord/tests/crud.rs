//! End-to-end CRUD against in-memory SQLite.

#![cfg(feature = "sqlite")]

use rekord::prelude::*;
use rekord::CastKind;
use serde_json::{json, Value};
use std::sync::Arc;

fn attrs(pairs: &[(&str, Value)]) -> Attributes {
    let mut map = Attributes::new();
    for (key, value) in pairs {
        map.insert(key.to_string(), value.clone());
    }
    map
}

async fn setup() -> (Arc<dyn Driver>, Arc<EntityType>) {
    let conn = rekord::connect("sqlite::memory:").await.unwrap();
    conn.exec_batch(
        "CREATE TABLE users (\
         id INTEGER PRIMARY KEY AUTOINCREMENT, \
         name TEXT, age INTEGER, created_at TEXT, updated_at TEXT);",
    )
    .await
    .unwrap();
    let users = EntityType::builder("users")
        .timestamps(true)
        .cast("age", CastKind::Int)
        .connection(conn.clone())
        .build();
    (conn, users)
}

#[tokio::test]
async fn basic_crud_lifecycle() {
    let (_conn, users) = setup().await;

    let alice = users
        .create(attrs(&[("name", json!("Alice")), ("age", json!(30))]))
        .await
        .unwrap();
    assert!(alice.exists());
    assert_eq!(alice.key(), json!(1));

    let found = users.find(1).await.unwrap().unwrap();
    assert_eq!(found.get_attribute("age").unwrap(), json!(30));
    assert_eq!(found.get_attribute("name").unwrap(), json!("Alice"));

    users
        .update_by_id(1, attrs(&[("age", json!(32))]))
        .await
        .unwrap();
    users
        .query()
        .where_("id", "=", 1)
        .increment("age", 1)
        .await
        .unwrap();
    users
        .query()
        .where_("id", "=", 1)
        .decrement("age", 1)
        .await
        .unwrap();
    let found = users.find(1).await.unwrap().unwrap();
    assert_eq!(found.get_attribute("age").unwrap(), json!(32));

    let deleted = users
        .query()
        .where_("name", "=", "Alice")
        .delete()
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(users.count().await.unwrap(), 0);
}

#[tokio::test]
async fn saved_entities_round_trip_through_find() {
    let (_conn, users) = setup().await;

    let mut entity = Entity::new(users.clone());
    entity
        .fill(attrs(&[("name", json!("Bob")), ("age", json!("44"))]))
        .unwrap();
    entity.save().await.unwrap();

    let reloaded = users.find(entity.key()).await.unwrap().unwrap();
    assert_eq!(
        reloaded.get_attribute("name").unwrap(),
        entity.get_attribute("name").unwrap()
    );
    // cast applied on write: the string "44" persisted as an integer
    assert_eq!(reloaded.get_attribute("age").unwrap(), json!(44));
    assert!(!reloaded.is_dirty());
}

#[tokio::test]
async fn update_path_only_touches_dirty_columns() {
    let (_conn, users) = setup().await;
    let mut entity = users
        .create(attrs(&[("name", json!("Carol")), ("age", json!(20))]))
        .await
        .unwrap();

    entity.set_attribute("age", json!(21)).unwrap();
    entity.save().await.unwrap();

    let reloaded = users.find(entity.key()).await.unwrap().unwrap();
    assert_eq!(reloaded.get_attribute("age").unwrap(), json!(21));
    assert_eq!(reloaded.get_attribute("name").unwrap(), json!("Carol"));
}

#[tokio::test]
async fn destroy_removes_the_row() {
    let (_conn, users) = setup().await;
    let mut entity = users
        .create(attrs(&[("name", json!("Dora")), ("age", json!(5))]))
        .await
        .unwrap();
    assert!(entity.destroy().await.unwrap());
    assert!(!entity.exists());
    assert!(users.find(1).await.unwrap().is_none());
}

#[tokio::test]
async fn pagination_arithmetic_holds() {
    let (_conn, users) = setup().await;
    for i in 0..5 {
        users
            .create(attrs(&[("name", json!(format!("u{i}"))), ("age", json!(i))]))
            .await
            .unwrap();
    }

    let page = users
        .query()
        .order_by("id", "asc")
        .paginate(2, 2)
        .await
        .unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.last_page, 3);
    assert_eq!(page.data.len(), 2);
    assert_eq!(page.from, Some(3));
    assert_eq!(page.to, 4);
    assert_eq!(page.data[0].get_attribute("name").unwrap(), json!("u2"));

    let past_the_end = users.query().paginate(9, 2).await.unwrap();
    assert_eq!(past_the_end.data.len(), 0);
    assert_eq!(past_the_end.to, 16);

    let json = page.to_json();
    assert_eq!(json["per_page"], json!(2));
    assert_eq!(json["current_page"], json!(2));
}

#[tokio::test]
async fn exists_and_first_or_fail() {
    let (_conn, users) = setup().await;
    assert!(!users.query().exists().await.unwrap());
    let err = users.query().first_or_fail().await.unwrap_err();
    assert!(err.is_not_found());

    users
        .create(attrs(&[("name", json!("Eve")), ("age", json!(1))]))
        .await
        .unwrap();
    assert!(users.query().exists().await.unwrap());
    assert!(users.query().first_or_fail().await.is_ok());
}

#[tokio::test]
async fn insert_many_in_one_statement() {
    let (_conn, users) = setup().await;
    let inserted = users
        .insert(vec![
            attrs(&[("name", json!("A")), ("age", json!(1))]),
            attrs(&[("name", json!("B")), ("age", json!(2))]),
            attrs(&[("name", json!("C")), ("age", json!(3))]),
        ])
        .await
        .unwrap();
    assert_eq!(inserted, 3);
    assert_eq!(users.count().await.unwrap(), 3);
}

#[tokio::test]
async fn unknown_scheme_fails_cleanly() {
    let err = rekord::connect("oracle://nope").await.unwrap_err();
    assert!(matches!(err, Error::ConnectionFailed(_)));
}
