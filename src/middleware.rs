use std::{borrow::Cow, collections::BTreeSet, fmt, sync::Arc};

use futures::future::{self, BoxFuture, FutureExt};

use crate::{BoxError, Context, Error};

type Guard = dyn for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<(), BoxError>> + Send + Sync;

/// A guard which runs before a procedure's handler.
///
/// Returning an error aborts the call with [`Error::Middleware`]. Guards which need to await
/// something, such as a session lookup, are built with [`Middleware::from_async`].
#[derive(Clone)]
pub struct Middleware {
    name: Option<Cow<'static, str>>,
    func: Arc<Guard>,
}

impl Middleware {
    pub fn new(func: impl Fn(&mut Context) -> Result<(), BoxError> + Send + Sync + 'static) -> Self {
        Self::from_async(move |ctx| future::ready(func(ctx)).boxed())
    }

    /// Construct a middleware which procedures can opt out of by name.
    pub fn named(
        name: impl Into<Cow<'static, str>>,
        func: impl Fn(&mut Context) -> Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        Self::new(func).with_name(name)
    }

    /// ```rust
    /// use futures::FutureExt;
    /// use kestrel::Middleware;
    ///
    /// let mw = Middleware::from_async(|ctx| {
    ///     async move {
    ///         let user = ctx.header("x-user").map(str::to_string);
    ///         tokio::task::yield_now().await;
    ///         ctx.set("user", user);
    ///         Ok::<_, kestrel::BoxError>(())
    ///     }
    ///     .boxed()
    /// });
    /// ```
    pub fn from_async<F>(func: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<(), BoxError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: None,
            func: Arc::new(func),
        }
    }

    pub fn named_async<F>(name: impl Into<Cow<'static, str>>, func: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<(), BoxError>>
            + Send
            + Sync
            + 'static,
    {
        Self::from_async(func).with_name(name)
    }

    fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn call<'a>(&self, ctx: &'a mut Context) -> BoxFuture<'a, Result<(), BoxError>> {
        (self.func)(ctx)
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Middleware")
            .field(&self.name.as_deref().unwrap_or("<anonymous>"))
            .finish()
    }
}

impl<F> From<F> for Middleware
where
    F: Fn(&mut Context) -> Result<(), BoxError> + Send + Sync + 'static,
{
    fn from(func: F) -> Self {
        Self::new(func)
    }
}

/// The global middleware a procedure opted out of.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Exclusions {
    #[default]
    None,
    Names(BTreeSet<String>),
    /// Set by excluding [`Exclusions::WILDCARD`]. No global middleware runs.
    All,
}

impl Exclusions {
    pub const WILDCARD: &'static str = "*";

    pub fn add(&mut self, name: impl Into<String>) {
        let name = name.into();
        if name == Self::WILDCARD {
            *self = Self::All;
            return;
        }

        match self {
            Self::None => *self = Self::Names(BTreeSet::from([name])),
            Self::Names(names) => {
                names.insert(name);
            }
            Self::All => {}
        }
    }

    pub fn excludes(&self, name: &str) -> bool {
        match self {
            Self::None => false,
            Self::Names(names) => names.contains(name),
            Self::All => true,
        }
    }
}

/// Build the chain a procedure runs: global middleware not excluded by the procedure, in
/// registration order, followed by the procedure's own middleware.
pub(crate) fn resolve(
    global: &[Middleware],
    exclusions: &Exclusions,
    local: &[Middleware],
) -> Vec<Middleware> {
    global
        .iter()
        .filter(|mw| !mw.name().is_some_and(|name| exclusions.excludes(name)))
        .chain(local)
        .cloned()
        .collect()
}

/// Run a chain in order, stopping at the first failure.
pub(crate) async fn run(chain: &[Middleware], ctx: &mut Context) -> Result<(), Error> {
    for mw in chain {
        if let Err(err) = mw.call(ctx).await {
            tracing::debug!(middleware = mw.name(), error = %err, "middleware rejected call");
            return Err(Error::Middleware(err));
        }
    }

    Ok(())
}
