//! kestrel: strongly typed queries and mutations over a single JSON endpoint, with a schema for
//! generating clients.
//!
//! ```rust
//! use kestrel::{query, BoxError, Router};
//!
//! # async fn run() {
//! let instance = Router::new()
//!     .add(query("ping", |_, _: ()| async { Ok::<_, BoxError>("pong") }))
//!     .build()
//!     .unwrap();
//!
//! let req = http::Request::get("/_kestrel?__proc=q__ping")
//!     .body(bytes::Bytes::new())
//!     .unwrap();
//! let res = instance.handle(req).await;
//! assert_eq!(res.body().as_ref(), br#"{"ok":true,"data":"pong"}"#);
//! # }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

mod config;
mod context;
mod error;
mod instance;
mod procedure;
mod procedure_kind;
mod procedures;
mod router;

pub mod coerce;
pub mod middleware;
pub mod rest;
pub mod schema;
pub mod shape;

pub use config::*;
pub use context::Context;
pub use error::*;
pub use instance::{Instance, PROC_PARAM, PROC_SEPARATOR};
pub use middleware::Middleware;
pub use procedure::{
    derive_alias, is_valid_name, mutation, query, ExpectedPayload, Procedure, RawBody,
    NAME_PATTERN,
};
pub use procedure_kind::ProcedureKind;
pub use procedures::Procedures;
pub use router::Router;

pub use coerce::Payload;
pub use specta::Type;
