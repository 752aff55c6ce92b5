#![allow(dead_code)]

use bytes::Bytes;
use http::{Request, StatusCode};
use kestrel::Instance;
use serde_json::Value;

pub fn get(uri: &str) -> Request<Bytes> {
    Request::get(uri).body(Bytes::new()).unwrap()
}

pub fn post(uri: &str, body: &str) -> Request<Bytes> {
    Request::post(uri)
        .body(Bytes::copy_from_slice(body.as_bytes()))
        .unwrap()
}

/// Send `req` to the RPC route and decode the envelope.
pub async fn rpc(instance: &Instance, req: Request<Bytes>) -> (StatusCode, Value) {
    let res = instance.handle(req).await;
    decode(res)
}

pub async fn rest(instance: &Instance, req: Request<Bytes>) -> (StatusCode, Value) {
    let res = instance.handle_rest(req).await;
    decode(res)
}

fn decode(res: http::Response<Bytes>) -> (StatusCode, Value) {
    assert_eq!(
        res.headers()[http::header::CONTENT_TYPE],
        "application/json",
        "every response is a JSON envelope"
    );
    let status = res.status();
    let body = serde_json::from_slice(res.body()).unwrap();
    (status, body)
}
