//! Nested eager loading over a users → posts → comments graph.

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

struct Blog {
    users: Arc<EntityType>,
    posts: Arc<EntityType>,
    comments: Arc<EntityType>,
}

async fn seed_blog() -> Blog {
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
    users.has_many("posts", &posts, "user_id", "id");
    posts.has_many("comments", &comments, "post_id", "id");
    posts.belongs_to("author", &users, "user_id", "id");
    comments.belongs_to("author", &users, "user_id", "id");

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

    Blog {
        users,
        posts,
        comments,
    }
}

fn many<'a>(entity: &'a Entity, name: &str) -> &'a [Entity] {
    entity.related(name).and_then(Related::as_many).unwrap()
}

fn one<'a>(entity: &'a Entity, name: &str) -> &'a Entity {
    entity.related(name).and_then(Related::as_one).unwrap()
}

#[tokio::test]
async fn nested_dot_paths_hydrate_three_levels() {
    let blog = seed_blog().await;

    let loaded = blog
        .users
        .with("posts.comments.author")
        .order_by("id", "asc")
        .get()
        .await
        .unwrap();
    assert_eq!(loaded.len(), 3);

    let alice = &loaded[0];
    let alice_posts = many(alice, "posts");
    assert_eq!(alice_posts.len(), 2);
    let first_comments = many(&alice_posts[0], "comments");
    assert_eq!(first_comments.len(), 2);
    assert_eq!(
        one(&first_comments[0], "author").get_attribute("name").unwrap(),
        json!("Bob")
    );
    assert_eq!(
        one(&first_comments[1], "author").get_attribute("name").unwrap(),
        json!("Charlie")
    );

    let bob = &loaded[1];
    assert_eq!(many(bob, "posts").len(), 1);
    let charlie = &loaded[2];
    assert_eq!(many(charlie, "posts").len(), 0);
}

#[tokio::test]
async fn serialization_includes_the_loaded_graph() {
    let blog = seed_blog().await;
    let loaded = blog
        .users
        .with("posts.comments")
        .order_by("id", "asc")
        .get()
        .await
        .unwrap();
    let json = loaded[0].to_json();
    assert_eq!(json["name"], json!("Alice"));
    assert_eq!(json["posts"][0]["comments"][0]["body"], json!("Nice"));
}

#[tokio::test]
async fn instance_load_mirrors_with() {
    let blog = seed_blog().await;
    let mut alice = blog.users.find(1).await.unwrap().unwrap();
    assert!(alice.related("posts").is_none());
    alice.load(&["posts.comments"]).await.unwrap();
    let posts = many(&alice, "posts");
    assert_eq!(posts.len(), 2);
    assert_eq!(many(&posts[0], "comments").len(), 2);
}

#[tokio::test]
async fn leaf_constraints_filter_only_the_leaf() {
    let blog = seed_blog().await;
    let loaded = blog
        .users
        .query()
        .with_constrained("posts.comments", |q| q.where_("body", "=", "Nice"))
        .order_by("id", "asc")
        .get()
        .await
        .unwrap();
    let alice_posts = many(&loaded[0], "posts");
    // intermediate level unfiltered
    assert_eq!(alice_posts.len(), 2);
    assert_eq!(many(&alice_posts[0], "comments").len(), 1);
    assert_eq!(many(&alice_posts[1], "comments").len(), 0);
}

#[tokio::test]
async fn belongs_to_eager_load_assigns_owners() {
    let blog = seed_blog().await;
    let loaded = blog
        .posts
        .with("author")
        .order_by("id", "asc")
        .get()
        .await
        .unwrap();
    assert_eq!(
        one(&loaded[0], "author").get_attribute("name").unwrap(),
        json!("Alice")
    );
    assert_eq!(
        one(&loaded[2], "author").get_attribute("name").unwrap(),
        json!("Bob")
    );
}

#[tokio::test]
async fn relation_queries_fetch_per_parent() {
    let blog = seed_blog().await;
    let alice = blog.users.find(1).await.unwrap().unwrap();
    let posts = alice.relation_query("posts").unwrap().all().await.unwrap();
    assert_eq!(posts.len(), 2);

    let first_post = blog.posts.find(1).await.unwrap().unwrap();
    let author = first_post
        .relation_query("author")
        .unwrap()
        .first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(author.get_attribute("name").unwrap(), json!("Alice"));

    let _ = &blog.comments;
}
