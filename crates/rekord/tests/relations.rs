//! Through traversal, pivot mutations, belongsTo extras.

#![cfg(feature = "sqlite")]

use rekord::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;

fn attrs(pairs: &[(&str, Value)]) -> Attributes {
    let mut map = Attributes::new();
    for (key, value) in pairs {
        map.insert(key.to_string(), value.clone());
    }
    map
}

fn values(ids: &[i64]) -> Vec<Value> {
    ids.iter().map(|&i| json!(i)).collect()
}

async fn seed_blog() -> (Arc<EntityType>, Arc<EntityType>, Arc<EntityType>) {
    let conn = rekord::connect("sqlite::memory:").await.unwrap();
    conn.exec_batch(
        "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT);
         CREATE TABLE posts (id INTEGER PRIMARY KEY AUTOINCREMENT, user_id INTEGER, title TEXT);
         CREATE TABLE comments (id INTEGER PRIMARY KEY AUTOINCREMENT, post_id INTEGER, user_id INTEGER, body TEXT);",
    )
    .await
    .unwrap();
    let users = EntityType::builder("users").connection(conn.clone()).build();
    let posts = EntityType::builder("posts").connection(conn.clone()).build();
    let comments = EntityType::builder("comments").connection(conn.clone()).build();

    for name in ["Alice", "Bob", "Charlie"] {
        users.create(attrs(&[("name", json!(name))])).await.unwrap();
    }
    for (user, title) in [(1, "Alice Post 1"), (1, "Alice Post 2"), (2, "Bob Post 1")] {
        posts
            .create(attrs(&[("user_id", json!(user)), ("title", json!(title))]))
            .await
            .unwrap();
    }
    for (post, user, body) in [
        (1, 2, "Nice"),
        (1, 3, "Agreed"),
        (2, 1, "Self"),
        (3, 1, "Great"),
    ] {
        comments
            .create(attrs(&[
                ("post_id", json!(post)),
                ("user_id", json!(user)),
                ("body", json!(body)),
            ]))
            .await
            .unwrap();
    }
    (users, posts, comments)
}

#[tokio::test]
async fn has_many_through_collects_finals_per_parent() {
    let (users, posts, comments) = seed_blog().await;
    let alice = users.find(1).await.unwrap().unwrap();
    let alice_comments = alice
        .has_many_through(&comments, &posts, "user_id", "post_id")
        .all()
        .await
        .unwrap();
    let bodies: Vec<Value> = alice_comments
        .iter()
        .map(|c| c.get_attribute("body").unwrap())
        .collect();
    assert_eq!(bodies, vec![json!("Nice"), json!("Agreed"), json!("Self")]);

    let charlie = users.find(3).await.unwrap().unwrap();
    let none = charlie
        .has_many_through(&comments, &posts, "user_id", "post_id")
        .all()
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn has_one_through_keeps_the_first_final() {
    let (users, posts, comments) = seed_blog().await;
    let alice = users.find(1).await.unwrap().unwrap();
    let first = alice
        .has_one_through(&comments, &posts, "user_id", "post_id")
        .first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.get_attribute("body").unwrap(), json!("Nice"));
}

#[tokio::test]
async fn eager_loaded_through_matches_per_parent_gets() {
    let (users, posts, comments) = seed_blog().await;
    users.add_relation(
        "post_comments",
        Relation::has_many_through(&users, &comments, &posts, "user_id", "post_id"),
    );
    let loaded = users
        .with("post_comments")
        .order_by("id", "asc")
        .get()
        .await
        .unwrap();
    let counts: Vec<usize> = loaded
        .iter()
        .map(|u| {
            u.related("post_comments")
                .and_then(Related::as_many)
                .map(<[_]>::len)
                .unwrap()
        })
        .collect();
    assert_eq!(counts, vec![3, 1, 0]);
}

async fn seed_pivot() -> (Arc<EntityType>, Arc<EntityType>) {
    let conn = rekord::connect("sqlite::memory:").await.unwrap();
    conn.exec_batch(
        "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT);
         CREATE TABLE roles (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT);
         CREATE TABLE role_user (user_id INTEGER, role_id INTEGER, note TEXT, \
         created_at TEXT, updated_at TEXT);",
    )
    .await
    .unwrap();
    let users = EntityType::builder("users").connection(conn.clone()).build();
    let roles = EntityType::builder("roles").connection(conn.clone()).build();
    users.add_relation(
        "roles",
        Relation::belongs_to_many(&users, &roles, "role_user", "user_id", "role_id")
            .with_pivot(["note"])
            .with_pivot_timestamps(),
    );
    users.create(attrs(&[("name", json!("Alice"))])).await.unwrap();
    for name in ["admin", "editor", "viewer", "auditor"] {
        roles.create(attrs(&[("name", json!(name))])).await.unwrap();
    }
    (users, roles)
}

#[tokio::test]
async fn attach_detach_and_fetch() {
    let (users, _roles) = seed_pivot().await;
    let alice = users.find(1).await.unwrap().unwrap();
    let pivot = alice.pivot("roles").unwrap();

    pivot.attach(values(&[1, 2])).await.unwrap();
    let fetched = alice.relation_query("roles").unwrap().all().await.unwrap();
    assert_eq!(fetched.len(), 2);
    // the pivot payload rides along, including the attach timestamps
    let payload = fetched[0].get_attribute("pivot").unwrap();
    assert!(payload.get("created_at").is_some());

    let removed = pivot.detach(Some(values(&[1]))).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(pivot.attached_ids().await.unwrap(), values(&[2]));

    pivot.detach(None).await.unwrap();
    assert!(pivot.attached_ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn sync_and_toggle_reconcile_the_set() {
    let (users, _roles) = seed_pivot().await;
    let alice = users.find(1).await.unwrap().unwrap();
    let pivot = alice.pivot("roles").unwrap();

    pivot.attach(values(&[1, 2])).await.unwrap();
    pivot.sync(values(&[2, 3])).await.unwrap();
    assert_eq!(pivot.attached_ids().await.unwrap(), values(&[2, 3]));

    pivot.sync_without_detaching(values(&[3, 4])).await.unwrap();
    assert_eq!(pivot.attached_ids().await.unwrap(), values(&[2, 3, 4]));

    // 3 and 4 are attached (detach them), 1 is not (attach it)
    pivot.toggle(values(&[1, 3, 4])).await.unwrap();
    assert_eq!(pivot.attached_ids().await.unwrap(), values(&[2, 1]));
}

#[tokio::test]
async fn update_existing_pivot_and_create() {
    let (users, roles) = seed_pivot().await;
    let alice = users.find(1).await.unwrap().unwrap();
    let pivot = alice.pivot("roles").unwrap();

    pivot.attach(values(&[1])).await.unwrap();
    let updated = pivot
        .update_existing_pivot(json!(1), attrs(&[("note", json!("promoted"))]))
        .await
        .unwrap();
    assert_eq!(updated, 1);
    let fetched = alice.relation_query("roles").unwrap().all().await.unwrap();
    assert_eq!(fetched[0].get_attribute("pivot").unwrap()["note"], json!("promoted"));

    let owner = pivot
        .create(attrs(&[("name", json!("owner"))]), attrs(&[("note", json!("new"))]))
        .await
        .unwrap();
    assert!(owner.exists());
    assert_eq!(roles.count().await.unwrap(), 5);
    assert_eq!(pivot.attached_ids().await.unwrap().len(), 2);
}

#[tokio::test]
async fn belongs_to_default_and_touch() {
    let conn = rekord::connect("sqlite::memory:").await.unwrap();
    conn.exec_batch(
        "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, \
         created_at TEXT, updated_at TEXT);
         CREATE TABLE posts (id INTEGER PRIMARY KEY AUTOINCREMENT, user_id INTEGER, \
         title TEXT, created_at TEXT, updated_at TEXT);",
    )
    .await
    .unwrap();
    let users = EntityType::builder("users")
        .timestamps(true)
        .connection(conn.clone())
        .build();
    let posts = EntityType::builder("posts")
        .timestamps(true)
        .connection(conn.clone())
        .build();
    posts.add_relation(
        "author",
        Relation::belongs_to(&users, "user_id", "id")
            .touches()
            .with_default(attrs(&[("name", json!("guest"))])),
    );

    let author = users.create(attrs(&[("name", json!("Alice"))])).await.unwrap();
    conn.exec(
        "UPDATE users SET updated_at = ? WHERE id = ?",
        &[json!("2000-01-01T00:00:00Z"), author.key()],
    )
    .await
    .unwrap();

    // saving a touching child refreshes the parent's updated_at
    posts
        .create(attrs(&[
            ("user_id", author.key()),
            ("title", json!("Hello")),
        ]))
        .await
        .unwrap();
    let refreshed = users.find(author.key()).await.unwrap().unwrap();
    assert_ne!(
        refreshed.get_attribute("updated_at").unwrap(),
        json!("2000-01-01T00:00:00Z")
    );

    // orphan child falls back to the declared default instance
    let orphan = posts
        .create(attrs(&[("title", json!("Orphan"))]))
        .await
        .unwrap();
    let fallback = orphan
        .relation_query("author")
        .unwrap()
        .first()
        .await
        .unwrap()
        .unwrap();
    assert!(!fallback.exists());
    assert_eq!(fallback.get_attribute("name").unwrap(), json!("guest"));
}
