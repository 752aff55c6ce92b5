use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use http::{header, HeaderValue, StatusCode};
use kestrel::{
    mutation, query, ApiError, BoxError, Config, Context, Error, ErrorBody, ErrorCode, Instance,
    Payload, ProcedureKind, RawBody, Router, Type,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

mod utils;
use utils::*;

#[derive(Debug, Deserialize, Type)]
struct NewTodo {
    title: String,
}

#[derive(Debug, Serialize, Deserialize, Type)]
struct Note {
    title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    body: String,
    tags: Option<Vec<String>>,
}

fn instance() -> Instance {
    Router::new()
        .add(query("ping", |_, _: ()| async { Ok::<_, BoxError>("pong") }))
        .add(query("getUser", |_, id: u32| async move {
            Ok::<_, BoxError>(format!("user {id}"))
        }))
        .add(mutation("create", |_, todo: NewTodo| async move {
            Ok::<_, BoxError>(todo.title)
        }))
        .add(mutation("greet", |_, name: Option<String>| async move {
            Ok::<_, BoxError>(format!("hello {}", name.as_deref().unwrap_or("anon")))
        }))
        .build()
        .unwrap()
}

#[tokio::test]
async fn ping() {
    let (status, body) = rpc(&instance(), get("/_kestrel?__proc=q__ping")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true, "data": "pong" }));
}

#[tokio::test]
async fn payload_is_coerced() {
    let instance = instance();

    let (status, body) = rpc(&instance, post("/_kestrel?__proc=q__getUser", r#"{"d":7.9}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!("user 7"));

    let (_, body) = rpc(
        &instance,
        post("/_kestrel?__proc=m__create", r#"{"d":{"title":"write tests","extra":true}}"#),
    )
    .await;
    assert_eq!(body, json!({ "ok": true, "data": "write tests" }));

    // Missing fields keep their zero value.
    let (_, body) = rpc(&instance, post("/_kestrel?__proc=m__create", r#"{"d":{}}"#)).await;
    assert_eq!(body, json!({ "ok": true, "data": "" }));
}

#[tokio::test]
async fn fields_omitted_on_output_are_accepted_on_input() {
    let instance = Router::new()
        .add(mutation("save_note", |_, note: Note| async move {
            Ok::<_, BoxError>(note)
        }))
        .build()
        .unwrap();

    let (status, body) = rpc(
        &instance,
        post("/_kestrel?__proc=m__save_note", r#"{"d":{"title":"x"}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "ok": true, "data": { "title": "x", "tags": null } })
    );

    // What the procedure sent back is accepted as its input.
    let echoed = json!({ "d": body["data"] }).to_string();
    let (status, _) = rpc(&instance, post("/_kestrel?__proc=m__save_note", &echoed)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn coercion_failure() {
    let (status, body) = rpc(
        &instance(),
        post("/_kestrel?__proc=m__create", r#"{"d":{"title":42}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({
            "ok": false,
            "error": "failed to cast value, expected `String`, got `number`"
        })
    );
}

#[tokio::test]
async fn undecodable_body() {
    let (status, body) = rpc(&instance(), post("/_kestrel?__proc=m__create", "{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        json!("failed to cast value, expected `NewTodo`, got `absent`")
    );
}

#[tokio::test]
async fn absent_payload() {
    let instance = instance();

    for body in ["", "  \n", "null", " null ", r#"{}"#, r#"{"d":null}"#] {
        let (status, res) = rpc(&instance, post("/_kestrel?__proc=m__greet", body)).await;
        assert_eq!(status, StatusCode::OK, "{body:?}");
        assert_eq!(res["data"], json!("hello anon"), "{body:?}");
    }

    let (_, res) = rpc(&instance, post("/_kestrel?__proc=m__greet", r#"{"d":"ferris"}"#)).await;
    assert_eq!(res["data"], json!("hello ferris"));
}

#[tokio::test]
async fn no_payload_never_decodes_body() {
    let instance = instance();

    for body in ["", "definitely not json", r#"{"d":{"nested":[1,2]}}"#] {
        let (status, res) = rpc(&instance, post("/_kestrel?__proc=q__ping", body)).await;
        assert_eq!(status, StatusCode::OK, "{body:?}");
        assert_eq!(res, json!({ "ok": true, "data": "pong" }));
    }
}

#[tokio::test]
async fn not_found_suggests_nearest() {
    let (status, body) = rpc(&instance(), get("/_kestrel?__proc=q__getUsr")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body["error"],
        json!("query `getUsr` not found, did you mean `getUser`?")
    );

    let empty = Router::new().build().unwrap();
    let (status, body) = rpc(&empty, get("/_kestrel?__proc=q__getUsr")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("query `getUsr` not found"));
}

#[tokio::test]
async fn routing_errors() {
    let instance = instance();

    for (uri, error) in [
        ("/_kestrel", "no procedure name provided"),
        ("/_kestrel?__proc=", "no procedure name provided"),
        ("/_kestrel?__proc=q__", "no procedure name provided"),
        (
            "/_kestrel?__proc=ping",
            "invalid procedure param `ping`, expected format (q|m)__[name] e.g q__getUser",
        ),
        (
            "/_kestrel?__proc=q__a__b",
            "invalid procedure param `q__a__b`, expected format (q|m)__[name] e.g q__getUser",
        ),
        (
            "/_kestrel?__proc=s__ping",
            "unknown procedure kind `s`, expected `q` or `m`",
        ),
    ] {
        let (status, body) = rpc(&instance, get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body, json!({ "ok": false, "error": error }), "{uri}");
    }
}

#[tokio::test]
async fn kind_is_part_of_the_key() {
    let (status, _) = rpc(&instance(), post("/_kestrel?__proc=m__ping", "")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn method_enforcement() {
    let router = || {
        Router::new()
            .add(query("ping", |_, _: ()| async { Ok::<_, BoxError>("pong") }))
            .add(mutation("touch", |_, _: ()| async { Ok::<_, BoxError>(()) }))
    };

    let lenient = router().build().unwrap();
    let (status, _) = rpc(&lenient, post("/_kestrel?__proc=q__ping", "")).await;
    assert_eq!(status, StatusCode::OK);

    let strict = router()
        .config(Config::new().enforce_methods(true))
        .build()
        .unwrap();
    let (status, body) = rpc(&strict, post("/_kestrel?__proc=q__ping", "")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(
        body["error"],
        json!("method `POST` is not allowed for query procedures, use `GET`")
    );

    let (status, _) = rpc(&strict, get("/_kestrel?__proc=m__touch")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    let (status, body) = rpc(&strict, post("/_kestrel?__proc=m__touch", "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true, "data": null }));
}

#[tokio::test]
async fn panics_become_internal_errors() {
    let instance = Router::new()
        .add(query("explode", |_, _: ()| async {
            let value: Option<u32> = None;
            Ok::<_, BoxError>(value.expect("secret detail"))
        }))
        .use_middleware("fragile", |ctx| {
            if ctx.query("boom").is_some() {
                panic!("middleware blew up");
            }
            Ok(())
        })
        .add(query("fine", |_, _: ()| async { Ok::<_, BoxError>(1) }))
        .build()
        .unwrap();

    let internal = json!({ "ok": false, "error": "internal server error" });

    let (status, body) = rpc(&instance, get("/_kestrel?__proc=q__explode")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, internal);

    let (status, body) = rpc(&instance, get("/_kestrel?__proc=q__fine&boom")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, internal);

    // The instance keeps serving after a panic.
    let (status, body) = rpc(&instance, get("/_kestrel?__proc=q__fine")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!(1));
}

#[tokio::test]
async fn api_errors_pick_the_status() {
    let instance = Router::new()
        .add(mutation("claim", |_, name: String| async move {
            match name.as_str() {
                "taken" => Err(ApiError::new(ErrorCode::Conflict, "name is taken")),
                "teapot" => Err(ApiError::with_status(418, "short and stout")),
                "redirect" => Err(ApiError::with_status(302, "elsewhere")),
                _ => Ok(name),
            }
        }))
        .add(query("plain", |_, _: ()| async {
            Err::<(), _>(std::io::Error::other("disk on fire"))
        }))
        .build()
        .unwrap();

    for (name, status, error) in [
        ("taken", 409, "name is taken"),
        ("teapot", 418, "short and stout"),
        ("redirect", 500, "elsewhere"),
    ] {
        let body = format!(r#"{{"d":"{name}"}}"#);
        let (got, res) = rpc(&instance, post("/_kestrel?__proc=m__claim", &body)).await;
        assert_eq!(got.as_u16(), status, "{name}");
        assert_eq!(res, json!({ "ok": false, "error": error }), "{name}");
    }

    let (status, body) = rpc(&instance, get("/_kestrel?__proc=q__plain")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], json!("disk on fire"));
}

#[tokio::test]
async fn custom_error_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let instance = Router::new()
        .add(query("denied", |_, _: ()| async {
            Err::<(), _>(
                ApiError::new(ErrorCode::Forbidden, "nope").with_meta(json!({ "role": "guest" })),
            )
        }))
        .error_handler({
            let calls = calls.clone();
            move |err: &Error| {
                calls.fetch_add(1, Ordering::SeqCst);
                let body: ErrorBody = match err.downcast_ref::<ApiError>() {
                    Some(api) => Box::new(api.clone()),
                    None => Box::new(err.to_string()),
                };
                (body, err.status())
            }
        })
        .build()
        .unwrap();

    let (status, body) = rpc(&instance, get("/_kestrel?__proc=q__denied")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        body,
        json!({
            "ok": false,
            "error": { "message": "nope", "code": 403, "meta": { "role": "guest" } }
        })
    );

    let (status, body) = rpc(&instance, get("/_kestrel?__proc=q__missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("query `missing` not found, did you mean `denied`?"));

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn custom_error_handler_cannot_leak_internal_errors() {
    let instance = Router::new()
        .add(query("explode", |_, _: ()| async {
            let value: Option<u32> = None;
            Ok::<_, BoxError>(value.expect("secret detail"))
        }))
        .error_handler(|err: &Error| -> (ErrorBody, u16) { (Box::new(err.to_string()), 422) })
        .build()
        .unwrap();

    let (status, body) = rpc(&instance, get("/_kestrel?__proc=q__explode")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "ok": false, "error": "internal server error" }));
}

#[tokio::test]
async fn failing_error_handler_falls_back() {
    let instance = Router::new()
        .add(query("fail", |_, _: ()| async { Err::<(), _>(BoxError::from("nope")) }))
        .error_handler(|_: &Error| -> (ErrorBody, u16) { panic!("handler bug") })
        .build()
        .unwrap();

    let (status, body) = rpc(&instance, get("/_kestrel?__proc=q__fail")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "ok": false, "error": "internal server error" }));
}

#[tokio::test]
async fn raw_payload() {
    let instance = Router::new()
        .add(
            mutation("upload", |_, body: RawBody| async move {
                Ok::<_, BoxError>(String::from_utf8_lossy(&body).len())
            })
            .with_raw_payload::<String>(),
        )
        .build()
        .unwrap();

    let (status, body) = rpc(&instance, post("/_kestrel?__proc=m__upload", "hello world")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!(11));
}

#[tokio::test]
async fn handlers_set_response_headers() {
    let instance = Router::new()
        .add(query("cached", |ctx: Context, _: ()| async move {
            ctx.set_header(header::CACHE_CONTROL, HeaderValue::from_static("max-age=60"));
            Ok::<_, BoxError>(true)
        }))
        .build()
        .unwrap();

    let res = instance.handle(get("/_kestrel?__proc=q__cached")).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CACHE_CONTROL], "max-age=60");
    assert_eq!(res.headers()[header::CONTENT_TYPE], "application/json");

    let res = instance.handle_rest(get("/api/cached")).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CACHE_CONTROL], "max-age=60");
}

#[tokio::test]
async fn in_process_calls() {
    let instance = Router::new()
        .add(query("double", |_, n: i32| async move { Ok::<_, BoxError>(n * 2) }))
        .use_middleware("tag", |ctx| {
            ctx.set("seen", true);
            Ok(())
        })
        .add(query("seen", |ctx: Context, _: ()| async move {
            Ok::<_, BoxError>(ctx.get::<bool>("seen").copied().unwrap_or(false))
        }))
        .build()
        .unwrap();

    let out = instance
        .call("double", ProcedureKind::Query, Context::default(), Payload::typed(21i32))
        .await
        .unwrap();
    assert_eq!(out, json!(42));

    let out = instance
        .call("double", ProcedureKind::Query, Context::default(), json!(4.0).into())
        .await
        .unwrap();
    assert_eq!(out, json!(8));

    let err = instance
        .call("double", ProcedureKind::Query, Context::default(), Payload::typed("21"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Coercion(_)), "{err:?}");
    assert_eq!(err.status(), 400);

    let out = instance
        .call("seen", ProcedureKind::Query, Context::default(), Payload::Absent)
        .await
        .unwrap();
    assert_eq!(out, json!(true));

    let err = instance
        .call("double", ProcedureKind::Mutation, Context::default(), Payload::Absent)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "{err:?}");
}

#[tokio::test]
async fn concurrent_requests() {
    let instance = instance();

    let handles = (0..32u32)
        .map(|id| {
            let instance = instance.clone();
            tokio::spawn(async move {
                let body = format!(r#"{{"d":{id}}}"#);
                rpc(&instance, post("/_kestrel?__proc=q__getUser", &body)).await
            })
        })
        .collect::<Vec<_>>();

    for (id, handle) in handles.into_iter().enumerate() {
        let (status, body) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!(format!("user {id}")));
    }
}
