use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
};
use kestrel::{mutation, query, BoxError, Instance, Router};
use kestrel_axum::Endpoint;
use serde_json::{json, Value};
use tower::ServiceExt;

fn instance() -> Instance {
    Router::new()
        .add(query("ping", |_, _: ()| async { Ok::<_, BoxError>("pong") }))
        .add(query("get_user", |_, id: u32| async move {
            Ok::<_, BoxError>(format!("user {id}"))
        }))
        .add(mutation("create_user", |_, name: String| async move {
            Ok::<_, BoxError>(name.to_uppercase())
        }))
        .build()
        .unwrap()
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let body = body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn rpc_route() {
    let app: axum::Router = Endpoint::new(instance());

    let (status, body) = send(
        &app,
        Request::get("/_kestrel?__proc=q__ping")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true, "data": "pong" }));

    let (status, body) = send(
        &app,
        Request::post("/_kestrel?__proc=m__create_user")
            .body(Body::from(r#"{"d":"ferris"}"#))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true, "data": "FERRIS" }));
}

#[tokio::test]
async fn custom_route() {
    let app: axum::Router = Endpoint::builder(instance()).with_route("/rpc/").build();

    let (status, body) = send(
        &app,
        Request::get("/rpc?__proc=q__ping").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!("pong"));
}

#[tokio::test]
async fn rest_projection() {
    let app: axum::Router = Endpoint::builder(instance()).with_rest().build();

    let (status, body) = send(
        &app,
        Request::get("/api/user")
            .body(Body::from(r#"{"d":7}"#))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true, "data": "user 7" }));

    // Same path, told apart by method.
    let (status, body) = send(
        &app,
        Request::post("/api/user")
            .body(Body::from(r#"{"d":"crab"}"#))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!("CRAB"));

    let (status, body) = send(
        &app,
        Request::delete("/api/user").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["ok"], json!(false));
}

#[tokio::test]
async fn not_found_fallback() {
    let app: axum::Router = Endpoint::builder(instance()).with_rest().build();

    let (status, body) = send(
        &app,
        Request::get("/nowhere").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "ok": false, "error": "resource not found" }));

    let app: axum::Router = Endpoint::builder(instance())
        .with_rest()
        .without_not_found()
        .build();
    let res = app
        .oneshot(Request::get("/nowhere").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body = body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn body_limit() {
    let app: axum::Router = Endpoint::builder(instance()).with_body_limit(4).build();

    let (status, body) = send(
        &app,
        Request::post("/_kestrel?__proc=m__create_user")
            .body(Body::from(r#"{"d":"a long name"}"#))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(
        body,
        json!({ "ok": false, "error": "request body is larger than the limit of 4 bytes" })
    );

    let app: axum::Router = Endpoint::builder(instance())
        .with_body_limit(64)
        .build();
    let (status, _) = send(
        &app,
        Request::post("/_kestrel?__proc=m__create_user")
            .body(Body::from(r#"{"d":"a long name"}"#))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}
