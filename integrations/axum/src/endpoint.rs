use std::{collections::BTreeMap, error};

use axum::{
    body::{self, Body, Bytes},
    extract::Request,
    http,
    response::Response,
    routing::{any, get, post, MethodRouter},
};
use http_body_util::LengthLimitError;
use kestrel::{Error, Instance, InternalError, ProcedureKind, RoutingError};

/// The largest request body read by default, in bytes.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Construct a new [`axum::Router`](axum::Router) to expose a built [`kestrel::Router`](kestrel::Router).
pub struct Endpoint {
    instance: Instance,
    route: Option<String>,
    rest_prefix: Option<String>,
    not_found: bool,
    body_limit: usize,
}

impl Endpoint {
    /// Construct a new [`axum::Router`](axum::Router) serving the RPC route only.
    ///
    /// # Usage
    ///
    /// ```rust
    /// axum::Router::<()>::new().merge(kestrel_axum::Endpoint::new(
    ///     kestrel::Router::new().build().unwrap(),
    /// ));
    /// ```
    pub fn new<S>(instance: Instance) -> axum::Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        Self::builder(instance).build()
    }

    /// Construct a new [`Endpoint`] which can be configured before it is built.
    ///
    /// # Usage
    ///
    /// ```rust
    /// axum::Router::<()>::new().merge(
    ///     kestrel_axum::Endpoint::builder(kestrel::Router::new().build().unwrap())
    ///         // Exposes every procedure at `<method> <prefix>/<alias>`.
    ///         .with_rest()
    ///         .build(),
    /// );
    /// ```
    pub fn builder(instance: Instance) -> Self {
        Self {
            instance,
            route: None,
            rest_prefix: None,
            not_found: true,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    /// Serve the RPC endpoint on `route` instead of the route in the instance's config.
    pub fn with_route(self, route: impl Into<String>) -> Self {
        Self {
            route: Some(route.into()),
            ..self
        }
    }

    /// Expose the REST projection under the prefix in the instance's config.
    pub fn with_rest(self) -> Self {
        let prefix = self.instance.config().get_rest_prefix().to_string();
        self.with_rest_prefix(prefix)
    }

    pub fn with_rest_prefix(self, prefix: impl Into<String>) -> Self {
        Self {
            rest_prefix: Some(prefix.into()),
            ..self
        }
    }

    /// Don't answer unmatched paths with a `404` envelope, leaving them to the outer router.
    pub fn without_not_found(self) -> Self {
        Self {
            not_found: false,
            ..self
        }
    }

    pub fn with_body_limit(self, body_limit: usize) -> Self {
        Self { body_limit, ..self }
    }

    /// Build an [`axum::Router`](axum::Router) with the configured routes.
    pub fn build<S>(self) -> axum::Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let limit = self.body_limit;
        let route = self
            .route
            .unwrap_or_else(|| self.instance.config().get_route().to_string());
        let route = format!("/{}", route.trim_matches('/'));

        let instance = self.instance.clone();
        let mut router = axum::Router::new().route(
            &route,
            any(move |req: Request| {
                let instance = instance.clone();
                async move {
                    match read_body(&instance, req, limit).await {
                        Ok(req) => instance.handle(req).await.map(Body::from),
                        Err(res) => res,
                    }
                }
            }),
        );

        let Some(prefix) = self.rest_prefix else {
            return router;
        };

        let mut routes = BTreeMap::<String, MethodRouter<S>>::new();
        for endpoint in &self.instance.rest_endpoints_with_prefix(&prefix) {
            if endpoint.path == route {
                tracing::warn!(
                    procedure = %endpoint.procedure,
                    path = %endpoint.path,
                    "skipping REST endpoint which conflicts with the RPC route"
                );
                continue;
            }

            let instance = self.instance.clone();
            let (kind, name) = (endpoint.kind, endpoint.procedure.clone());
            let handler = move |req: Request| {
                let instance = instance.clone();
                let name = name.clone();
                async move {
                    match read_body(&instance, req, limit).await {
                        Ok(req) => instance
                            .handle_procedure(kind, &name, req)
                            .await
                            .map(Body::from),
                        Err(res) => res,
                    }
                }
            };

            let method_router = match kind {
                ProcedureKind::Query => get(handler),
                ProcedureKind::Mutation => post(handler),
            };
            let method_router = match routes.remove(&endpoint.path) {
                Some(existing) => existing.merge(method_router),
                None => method_router,
            };
            routes.insert(endpoint.path.clone(), method_router);
        }

        let miss = {
            let instance = self.instance.clone();
            move |req: Request| rest_miss(instance.clone(), req)
        };

        for (path, method_router) in routes {
            // Other methods on a known path get a `405` envelope.
            router = router.route(&path, method_router.fallback(miss.clone()));
        }

        if self.not_found {
            router = router.fallback(miss);
        }

        router
    }
}

/// Answer a request no REST endpoint matched with a `404` or `405` envelope.
async fn rest_miss(instance: Instance, req: Request) -> Response {
    let (parts, _) = req.into_parts();
    let req = http::Request::from_parts(parts, Bytes::new());
    instance.handle_rest(req).await.map(Body::from)
}

async fn read_body(
    instance: &Instance,
    req: Request,
    limit: usize,
) -> Result<http::Request<Bytes>, Response> {
    let (parts, body) = req.into_parts();
    match body::to_bytes(body, limit).await {
        Ok(bytes) => Ok(http::Request::from_parts(parts, bytes)),
        Err(err) => {
            let err = err.into_inner();
            let err = match exceeds_limit(&*err) {
                true => Error::from(RoutingError::PayloadTooLarge { limit }),
                false => Error::from(InternalError::Body(err)),
            };
            Err(instance.error_response(&err).map(Body::from))
        }
    }
}

fn exceeds_limit(err: &(dyn error::Error + 'static)) -> bool {
    let mut source = Some(err);
    while let Some(err) = source {
        if err.is::<LengthLimitError>() {
            return true;
        }
        source = err.source();
    }
    false
}
