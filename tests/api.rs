mod support;

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use cuplore::application::follows::FollowService;
use cuplore::application::jobs::{DeadLetter, DeadLetterQueue, IngestReceiver, ingest_channel};
use cuplore::application::likes::LikeService;
use cuplore::application::notes::NoteService;
use cuplore::cache::{SetCache, likes_key};
use cuplore::domain::entities::FollowTask;
use cuplore::infra::cache::MemorySetCache;
use cuplore::infra::http::{ACTOR_HEADER, ApiState, build_router};

use support::{FlakyCache, InMemoryStore, user};

const ADMIN: &str = "1";

struct TestApp {
    router: Router,
    store: Arc<InMemoryStore>,
    dead_letters: Arc<DeadLetterQueue>,
    _receiver: IngestReceiver,
}

fn test_app(queue_capacity: usize) -> TestApp {
    test_app_with_cache(queue_capacity, Arc::new(MemorySetCache::new()))
}

fn test_app_with_cache(queue_capacity: usize, cache: Arc<dyn SetCache>) -> TestApp {
    let store = InMemoryStore::new();
    let (queue, receiver) = ingest_channel(NonZeroUsize::new(queue_capacity).expect("non-zero"));
    let dead_letters = Arc::new(DeadLetterQueue::new(
        NonZeroUsize::new(16).expect("non-zero"),
    ));

    let state = ApiState {
        notes: Arc::new(NoteService::new(store.clone(), store.clone())),
        likes: Arc::new(LikeService::new(cache)),
        follows: Arc::new(FollowService::new(queue, dead_letters.clone())),
        health: store.clone(),
        admins: Arc::new(HashSet::from([user(1)])),
    };

    TestApp {
        router: build_router(state),
        store,
        dead_letters,
        _receiver: receiver,
    }
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    actor: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, axum::http::HeaderMap, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(actor) = actor {
        builder = builder.header(ACTOR_HEADER, actor);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request should build");

    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, headers, value)
}

#[tokio::test]
async fn health_reflects_store_availability() {
    let app = test_app(4);

    let (status, _, _) = send(&app.router, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    app.store.set_healthy(false);
    let (status, _, _) = send(&app.router, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn requests_without_actor_are_unauthorized() {
    let app = test_app(4);

    for actor in [None, Some("abc"), Some("-3")] {
        let (status, _, body) = send(&app.router, Method::POST, "/follow/2", actor, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "unauthorized");
    }
}

#[tokio::test]
async fn note_lifecycle_and_like_toggle() {
    let app = test_app(4);

    let (status, _, created) = send(
        &app.router,
        Method::POST,
        "/notes",
        Some("1"),
        Some(json!({"title": "Hello", "content": "First note"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let note_id = created["note_id"].as_i64().expect("note id");

    let (status, _, note) = send(
        &app.router,
        Method::GET,
        &format!("/notes/{note_id}"),
        Some("2"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(note["title"], "Hello");
    assert_eq!(note["author_id"], 1);
    assert_eq!(note["like_count"], 0);

    let like_uri = format!("/notes/{note_id}/like");
    let (status, _, toggled) = send(&app.router, Method::POST, &like_uri, Some("2"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(toggled, json!({"note_id": note_id, "state": "liked"}));

    let (_, _, count) = send(
        &app.router,
        Method::GET,
        &format!("/notes/{note_id}/likes"),
        Some("2"),
        None,
    )
    .await;
    assert_eq!(count, json!({"note_id": note_id, "likes": 1}));

    let (_, _, toggled) = send(&app.router, Method::POST, &like_uri, Some("2"), None).await;
    assert_eq!(toggled["state"], "unliked");
}

#[tokio::test]
async fn note_validation_and_lookup_errors() {
    let app = test_app(4);

    let (status, _, body) = send(
        &app.router,
        Method::POST,
        "/notes",
        Some("1"),
        Some(json!({"title": "   ", "content": "body"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _, body) = send(&app.router, Method::GET, "/notes/999", Some("1"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, _, body) = send(&app.router, Method::GET, "/notes/zero", Some("1"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn follow_is_accepted_until_queue_is_full() {
    let app = test_app(1);

    let (status, _, body) = send(&app.router, Method::POST, "/follow/2", Some("1"), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, json!({"status": "accepted"}));

    let (status, headers, body) =
        send(&app.router, Method::POST, "/follow/3", Some("1"), None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "service_busy");
    assert!(headers.contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn self_follow_is_rejected() {
    let app = test_app(4);

    let (status, _, body) = send(&app.router, Method::POST, "/follow/5", Some("5"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn dead_letters_can_be_listed_and_replayed() {
    let app = test_app(4);
    app.dead_letters.push(DeadLetter::new(
        FollowTask::new(user(1), user(2)),
        3,
        "database timeout",
    ));

    let (status, _, listed) = send(
        &app.router,
        Method::GET,
        "/admin/dead-letters",
        Some(ADMIN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["items"][0]["task"]["followed_id"], 2);
    assert_eq!(listed["items"][0]["attempts"], 3);

    let (status, _, replayed) = send(
        &app.router,
        Method::POST,
        "/admin/dead-letters/replay",
        Some(ADMIN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replayed, json!({"replayed": 1, "rejected": 0}));
    assert!(app.dead_letters.is_empty());
}

#[tokio::test]
async fn admin_routes_require_an_allow_listed_actor() {
    let app = test_app(4);
    app.dead_letters.push(DeadLetter::new(
        FollowTask::new(user(1), user(2)),
        3,
        "database timeout",
    ));

    for (method, uri) in [
        (Method::GET, "/admin/dead-letters"),
        (Method::POST, "/admin/dead-letters/replay"),
    ] {
        let (status, _, body) = send(&app.router, method.clone(), uri, Some("2"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "forbidden");

        let (status, _, _) = send(&app.router, method, uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    assert_eq!(app.dead_letters.len(), 1);
}

#[tokio::test]
async fn cache_failure_during_toggle_is_a_500_without_side_effects() {
    let cache = FlakyCache::new();
    let app = test_app_with_cache(4, cache.clone());
    let note = app.store.seed_note(user(1), "cached").await;
    let like_uri = format!("/notes/{note}/like");
    let key = likes_key(note);

    cache.fail_writes(true);
    let (status, _, body) = send(&app.router, Method::POST, &like_uri, Some("2"), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "cache_error");
    assert_eq!(cache.inner().set_cardinality(&key).await.expect("card"), 0);

    cache.fail_writes(false);
    let (status, _, _) = send(&app.router, Method::POST, &like_uri, Some("2"), None).await;
    assert_eq!(status, StatusCode::OK);

    cache.fail_writes(true);
    let (status, _, body) = send(&app.router, Method::POST, &like_uri, Some("2"), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "cache_error");
    assert_eq!(cache.inner().set_cardinality(&key).await.expect("card"), 1);

    cache.fail_writes(false);
    let (_, _, count) = send(
        &app.router,
        Method::GET,
        &format!("/notes/{note}/likes"),
        Some("2"),
        None,
    )
    .await;
    assert_eq!(count["likes"], 1);
}

#[tokio::test]
async fn request_id_is_echoed_or_generated() {
    let app = test_app(4);

    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "trace-abc")
        .body(Body::empty())
        .expect("request should build");
    let response = app
        .router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    assert_eq!(
        response.headers().get("x-request-id").map(|v| v.as_bytes()),
        Some(b"trace-abc".as_slice())
    );

    let (_, headers, _) = send(&app.router, Method::GET, "/health", None, None).await;
    let generated = headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .expect("generated request id");
    assert!(uuid::Uuid::parse_str(generated).is_ok());
}
