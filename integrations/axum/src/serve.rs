use std::{
    future::Future,
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};

use kestrel::Instance;

use crate::Endpoint;

/// Where and how [`Serve::serve_with`] listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeOptions {
    pub host: IpAddr,
    pub port: u16,
    /// Overrides the route in the instance's config.
    pub route: Option<String>,
    /// Also expose the REST projection.
    pub rest: bool,
}

impl ServeOptions {
    pub fn new(port: u16) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            route: None,
            rest: false,
        }
    }

    pub fn host(self, host: impl Into<IpAddr>) -> Self {
        Self {
            host: host.into(),
            ..self
        }
    }

    pub fn route(self, route: impl Into<String>) -> Self {
        Self {
            route: Some(route.into()),
            ..self
        }
    }

    pub fn rest(self, rest: bool) -> Self {
        Self { rest, ..self }
    }
}

/// Serve an [`Instance`] with Axum on a Tokio [`TcpListener`](tokio::net::TcpListener).
pub trait Serve {
    /// Listen on every interface on `port`, serving the RPC endpoint on `route`.
    fn serve(&self, port: u16, route: &str) -> impl Future<Output = io::Result<()>> + Send;

    fn serve_with(&self, options: ServeOptions) -> impl Future<Output = io::Result<()>> + Send;
}

impl Serve for Instance {
    fn serve(&self, port: u16, route: &str) -> impl Future<Output = io::Result<()>> + Send {
        self.serve_with(ServeOptions::new(port).route(route))
    }

    fn serve_with(&self, options: ServeOptions) -> impl Future<Output = io::Result<()>> + Send {
        let mut endpoint = Endpoint::builder(self.clone());
        if let Some(route) = options.route {
            endpoint = endpoint.with_route(route);
        }
        if options.rest {
            endpoint = endpoint.with_rest();
        }

        let app: axum::Router = endpoint.build();
        let addr = SocketAddr::new(options.host, options.port);

        async move {
            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::info!(addr = %listener.local_addr()?, "kestrel listening");
            axum::serve(listener, app).await
        }
    }
}
