//! Polymorphic relations over the process-wide morph map.
//!
//! The morph map installs once per process, so everything polymorphic
//! shares this test binary.

#![cfg(feature = "sqlite")]

use rekord::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;

fn attrs(pairs: &[(&str, Value)]) -> Attributes {
    let mut map = Attributes::new();
    for (key, value) in pairs {
        map.insert(key.to_string(), value.clone());
    }
    map
}

struct Fixture {
    posts: Arc<EntityType>,
    videos: Arc<EntityType>,
    comments: Arc<EntityType>,
}

static FIXTURE: OnceCell<Fixture> = OnceCell::const_new();

async fn fixture() -> &'static Fixture {
    FIXTURE
        .get_or_init(|| async {
            let conn = rekord::connect("sqlite::memory:").await.unwrap();
            conn.exec_batch(
                "CREATE TABLE posts (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT);
                 CREATE TABLE videos (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT);
                 CREATE TABLE comments (id INTEGER PRIMARY KEY AUTOINCREMENT, \
                 commentable_type TEXT, commentable_id INTEGER, body TEXT);",
            )
            .await
            .unwrap();

            let posts = EntityType::builder("posts").connection(conn.clone()).build();
            let videos = EntityType::builder("videos").connection(conn.clone()).build();
            let comments = EntityType::builder("comments").connection(conn.clone()).build();
            comments.add_relation("commentable", Relation::morph_to("commentable"));
            posts.add_relation(
                "comments",
                Relation::morph_many(&posts, &comments, "commentable"),
            );
            videos.add_relation(
                "comments",
                Relation::morph_many(&videos, &comments, "commentable"),
            );
            MorphMap::install([
                ("posts", posts.clone()),
                ("videos", videos.clone()),
            ])
            .unwrap();

            posts
                .create(attrs(&[("title", json!("First Post"))]))
                .await
                .unwrap();
            videos
                .create(attrs(&[("title", json!("First Video"))]))
                .await
                .unwrap();
            comments
                .create(attrs(&[
                    ("commentable_type", json!("posts")),
                    ("commentable_id", json!(1)),
                    ("body", json!("Nice post")),
                ]))
                .await
                .unwrap();
            comments
                .create(attrs(&[
                    ("commentable_type", json!("videos")),
                    ("commentable_id", json!(1)),
                    ("body", json!("Nice video")),
                ]))
                .await
                .unwrap();

            Fixture {
                posts,
                videos,
                comments,
            }
        })
        .await
}

#[tokio::test]
async fn morph_to_resolves_through_the_map() {
    let fx = fixture().await;
    let comment = fx.comments.find(1).await.unwrap().unwrap();
    let parent = comment
        .morph_to("commentable")
        .first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(parent.get_attribute("title").unwrap(), json!("First Post"));
}

#[tokio::test]
async fn morph_to_eager_load_partitions_by_type() {
    let fx = fixture().await;
    let loaded = fx
        .comments
        .with("commentable")
        .where_in("id", vec![json!(1), json!(2)])
        .order_by("id", "asc")
        .get()
        .await
        .unwrap();
    assert_eq!(loaded.len(), 2);
    let first = loaded[0].related("commentable").and_then(Related::as_one).unwrap();
    let second = loaded[1].related("commentable").and_then(Related::as_one).unwrap();
    assert_eq!(first.get_attribute("title").unwrap(), json!("First Post"));
    assert_eq!(second.get_attribute("title").unwrap(), json!("First Video"));
}

#[tokio::test]
async fn morph_many_scopes_by_type_column() {
    let fx = fixture().await;
    let post = fx.posts.find(1).await.unwrap().unwrap();
    let post_comments = post.relation_query("comments").unwrap().all().await.unwrap();
    assert_eq!(post_comments.len(), 1);
    assert_eq!(
        post_comments[0].get_attribute("body").unwrap(),
        json!("Nice post")
    );

    let video = fx.videos.find(1).await.unwrap().unwrap();
    let video_comments = video.relation_query("comments").unwrap().all().await.unwrap();
    assert_eq!(video_comments.len(), 1);
    assert_eq!(
        video_comments[0].get_attribute("body").unwrap(),
        json!("Nice video")
    );
}

#[tokio::test]
async fn unmapped_alias_is_an_error() {
    let fx = fixture().await;
    fx.comments
        .create(attrs(&[
            ("commentable_type", json!("podcasts")),
            ("commentable_id", json!(1)),
            ("body", json!("??")),
        ]))
        .await
        .unwrap();
    let stray = fx
        .comments
        .query()
        .where_("commentable_type", "=", "podcasts")
        .first()
        .await
        .unwrap()
        .unwrap();
    let err = stray.morph_to("commentable").get().await.unwrap_err();
    assert!(matches!(err, Error::MorphUnresolved(alias) if alias == "podcasts"));
}
