use std::{borrow::Cow, fmt, sync::Arc};

use futures::future::BoxFuture;

use crate::{
    error::default_error_handler,
    instance::Instance,
    middleware,
    schema::{ExportOutcome, Renderer},
    BoxError, BuildError, Config, Context, Error, ErrorBody, ErrorHandler, Middleware, Procedure,
    ProcedureKind, Procedures,
};

/// Collects procedures, global middleware and settings, then [builds](Router::build) them into an
/// [`Instance`] which can serve requests.
///
/// ```rust
/// use kestrel::{query, BoxError, Router};
///
/// let instance = Router::new()
///     .add(query("ping", |_, _: ()| async { Ok::<_, BoxError>("pong") }))
///     .use_middleware("auth", |ctx| match ctx.header("authorization") {
///         Some(_) => Ok(()),
///         None => Err("unauthorized".into()),
///     })
///     .build()
///     .unwrap();
/// ```
pub struct Router {
    config: Config,
    procedures: Procedures,
    middleware: Vec<Middleware>,
    error_handler: Option<ErrorHandler>,
    renderer: Option<Box<dyn Renderer + Send + Sync>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::with_config(Config::default())
    }
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            procedures: Procedures::new(),
            middleware: Vec::new(),
            error_handler: None,
            renderer: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Register a procedure. A procedure with the same name and kind as one already registered is
    /// skipped with a warning.
    pub fn add(mut self, procedure: Procedure) -> Self {
        self.procedures.add(procedure);
        self
    }

    pub fn query<F, Fut, In, Out, E>(self, name: impl Into<Cow<'static, str>>, handler: F) -> Self
    where
        F: Fn(Context, In) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Out, E>> + Send + 'static,
        In: serde::de::DeserializeOwned + crate::Type + Send + 'static,
        Out: serde::Serialize + crate::Type + Send + 'static,
        E: Into<BoxError>,
    {
        self.add(Procedure::query(name, handler))
    }

    pub fn mutation<F, Fut, In, Out, E>(
        self,
        name: impl Into<Cow<'static, str>>,
        handler: F,
    ) -> Self
    where
        F: Fn(Context, In) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Out, E>> + Send + 'static,
        In: serde::de::DeserializeOwned + crate::Type + Send + 'static,
        Out: serde::Serialize + crate::Type + Send + 'static,
        E: Into<BoxError>,
    {
        self.add(Procedure::mutation(name, handler))
    }

    /// Remove a previously registered procedure.
    pub fn remove(&mut self, name: &str, kind: ProcedureKind) -> Option<Procedure> {
        self.procedures.remove(name, kind)
    }

    /// Add global middleware. It runs before every procedure's own middleware, in the order it was
    /// added, unless the procedure excludes `name`.
    pub fn use_middleware(
        mut self,
        name: impl Into<Cow<'static, str>>,
        func: impl Fn(&mut Context) -> Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.middleware.push(Middleware::named(name, func));
        self
    }

    /// Add global middleware which awaits before deciding. See [`Middleware::from_async`].
    pub fn use_async_middleware<F>(mut self, name: impl Into<Cow<'static, str>>, func: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<(), BoxError>>
            + Send
            + Sync
            + 'static,
    {
        self.middleware.push(Middleware::named_async(name, func));
        self
    }

    /// Replace the function turning errors into response bodies. Defaults to [`default_error_handler`].
    pub fn error_handler(
        mut self,
        handler: impl Fn(&Error) -> (ErrorBody, u16) + Send + Sync + 'static,
    ) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// The renderer used to write client bindings when binding export is enabled. Defaults to
    /// [`TypescriptRenderer`](crate::schema::TypescriptRenderer).
    pub fn renderer(mut self, renderer: impl Renderer + Send + Sync + 'static) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    pub fn procedures(&self) -> &Procedures {
        &self.procedures
    }

    /// Validate every procedure, resolve middleware chains and run any enabled exports.
    pub fn build(self) -> Result<Instance, BuildError> {
        let Self {
            mut config,
            mut procedures,
            middleware: global,
            error_handler,
            renderer,
        } = self;

        let invalid = procedures
            .iter()
            .flat_map(Procedure::validate)
            .collect::<Vec<_>>();
        if !invalid.is_empty() {
            return Err(BuildError::InvalidProcedures(invalid));
        }

        config.apply_env();

        for procedure in procedures.iter_mut() {
            let chain = middleware::resolve(&global, procedure.exclusions(), procedure.middleware());
            procedure.set_middleware(chain);
        }

        let instance = Instance::new(
            config,
            procedures,
            error_handler.unwrap_or_else(|| Arc::new(default_error_handler)),
            renderer,
        );

        if instance.config().is_debug() {
            tracing::info!("REST endpoints\n{}", instance.rest_endpoints());
        }

        let report = instance.export()?;
        for outcome in [report.schema, report.bindings] {
            if let ExportOutcome::Written(path) = outcome {
                tracing::info!(path = %path.display(), "exported bindings");
            }
        }

        Ok(instance)
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("config", &self.config)
            .field("procedures", &self.procedures)
            .field("middleware", &self.middleware)
            .finish()
    }
}
