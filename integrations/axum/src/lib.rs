//! Expose your [kestrel](kestrel) application as an HTTP API using [Axum](https://github.com/tokio-rs/axum).
//!
//! # Example
//!
//! ```rust,no_run
//! use kestrel::{query, BoxError};
//! use kestrel_axum::Serve;
//!
//! #[tokio::main]
//! async fn main() {
//!     let instance = kestrel::Router::new()
//!         .add(query("ping", |_, _: ()| async { Ok::<_, BoxError>("pong") }))
//!         .build()
//!         .unwrap();
//!
//!     instance.serve(3000, "_kestrel").await.unwrap();
//! }
//! ```
//!
//! Use [`Endpoint`] to mount the routes on an existing [`axum::Router`](axum::Router) instead.
#![cfg_attr(docsrs, feature(doc_cfg))]

mod endpoint;
mod serve;

pub use endpoint::{Endpoint, DEFAULT_BODY_LIMIT};
pub use serve::{Serve, ServeOptions};
