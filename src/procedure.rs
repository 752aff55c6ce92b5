use std::{
    any::{type_name, TypeId},
    borrow::Cow,
    fmt,
    future::Future,
    ops::Deref,
    sync::Arc,
};

use bytes::Bytes;
use futures::future::{self, BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use specta::{datatype::DataType, Generics, Type, TypeMap};

use crate::{
    coerce::{coerce, InputShape, Payload},
    middleware::{Exclusions, Middleware},
    shape, BoxError, Context, Error, InternalError, InvalidProcedure, ProcedureKind,
};

/// The procedure name pattern, used in error messages.
pub const NAME_PATTERN: &str = "^[A-Za-z0-9]+([._-][A-Za-z0-9]+)*$";

const QUERY_VERBS: &[&str] = &[
    "get", "list", "fetch", "find", "read", "query", "search", "load", "show", "view",
];

const MUTATION_VERBS: &[&str] = &[
    "create", "add", "update", "delete", "remove", "set", "edit", "put", "post", "patch",
    "insert", "upsert", "save",
];

type Handler = Arc<dyn Fn(Context, Payload) -> BoxFuture<'static, Result<Value, Error>> + Send + Sync>;

/// How a procedure reads its payload from the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedPayload {
    /// The input is `()`, the body is never read.
    None,
    /// The body is a JSON document of the form `{"d": <payload>}`.
    Json,
    /// The input is [`RawBody`], the body is handed over undecoded.
    Raw,
}

/// The undecoded body of a request.
///
/// Use it as a procedure's input to handle uploads or any other non-JSON body yourself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct RawBody(pub Bytes);

impl RawBody {
    pub fn into_inner(self) -> Bytes {
        self.0
    }
}

impl Deref for RawBody {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Type for RawBody {
    fn inline(types: &mut TypeMap, generics: Generics) -> DataType {
        <Vec<u8> as Type>::inline(types, generics)
    }
}

/// A single query or mutation.
///
/// The strongly typed handler is closed over when the procedure is constructed, so a router only
/// ever deals with this type erased form.
#[derive(Clone)]
pub struct Procedure {
    name: Cow<'static, str>,
    kind: ProcedureKind,
    alias: Option<String>,
    payload: ExpectedPayload,
    middleware: Vec<Middleware>,
    exclusions: Exclusions,
    input: fn(&mut TypeMap) -> DataType,
    input_name: &'static str,
    input_override: Option<fn(&mut TypeMap) -> DataType>,
    output: fn(&mut TypeMap) -> DataType,
    handler: Handler,
}

impl Procedure {
    pub fn query<F, Fut, In, Out, E>(name: impl Into<Cow<'static, str>>, handler: F) -> Self
    where
        F: Fn(Context, In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, E>> + Send + 'static,
        In: DeserializeOwned + Type + Send + 'static,
        Out: Serialize + Type + Send + 'static,
        E: Into<BoxError>,
    {
        Self::new(ProcedureKind::Query, name, handler)
    }

    pub fn mutation<F, Fut, In, Out, E>(name: impl Into<Cow<'static, str>>, handler: F) -> Self
    where
        F: Fn(Context, In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, E>> + Send + 'static,
        In: DeserializeOwned + Type + Send + 'static,
        Out: Serialize + Type + Send + 'static,
        E: Into<BoxError>,
    {
        Self::new(ProcedureKind::Mutation, name, handler)
    }

    pub fn new<F, Fut, In, Out, E>(
        kind: ProcedureKind,
        name: impl Into<Cow<'static, str>>,
        handler: F,
    ) -> Self
    where
        F: Fn(Context, In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, E>> + Send + 'static,
        In: DeserializeOwned + Type + Send + 'static,
        Out: Serialize + Type + Send + 'static,
        E: Into<BoxError>,
    {
        let payload = if TypeId::of::<In>() == TypeId::of::<()>() {
            ExpectedPayload::None
        } else if TypeId::of::<In>() == TypeId::of::<RawBody>() {
            ExpectedPayload::Raw
        } else {
            ExpectedPayload::Json
        };

        let input_shape = InputShape::of::<In>();
        let handler: Handler = Arc::new(move |ctx: Context, payload: Payload| {
            match coerce::<In>(payload, &input_shape) {
                Ok(input) => handler(ctx, input)
                    .map(|result| -> Result<Value, Error> {
                        let output = result.map_err(|err| Error::Handler(err.into()))?;
                        Ok(serde_json::to_value(output).map_err(InternalError::from)?)
                    })
                    .boxed(),
                Err(err) => future::ready(Err(Error::from(err))).boxed(),
            }
        });

        Self {
            name: name.into(),
            kind,
            alias: None,
            payload,
            middleware: Vec::new(),
            exclusions: Exclusions::default(),
            input: shape::inline::<In>,
            input_name: type_name::<In>(),
            input_override: None,
            output: shape::inline::<Out>,
            handler,
        }
    }

    /// Set the name used to build the procedure's REST path. Defaults to one derived from the name.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        let alias = alias.into();
        self.alias = (!alias.is_empty()).then_some(alias);
        self
    }

    /// Append middleware to run after any global middleware.
    pub fn with(mut self, mw: impl Into<Middleware>) -> Self {
        self.middleware.push(mw.into());
        self
    }

    pub fn with_middleware(mut self, mw: impl IntoIterator<Item = Middleware>) -> Self {
        self.middleware.extend(mw);
        self
    }

    /// Insert middleware at the start of the procedure's own chain. Global middleware still runs first.
    pub fn prepend_middleware(mut self, mw: impl IntoIterator<Item = Middleware>) -> Self {
        let mut chain = mw.into_iter().collect::<Vec<_>>();
        chain.append(&mut self.middleware);
        self.middleware = chain;
        self
    }

    /// Opt out of global middleware by name. Excluding `"*"` opts out of all of it.
    pub fn exclude_middleware<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.exclusions.add(name);
        }
        self
    }

    /// Declare the type clients should send for a procedure taking a [`RawBody`].
    ///
    /// Calling this on a procedure with any other input is reported when the router is built.
    pub fn with_raw_payload<T: Type + 'static>(mut self) -> Self {
        self.input_override = Some(shape::inline::<T>);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProcedureKind {
        self.kind
    }

    /// The alias used for the REST path. Never empty for a valid name.
    pub fn alias(&self) -> Cow<'_, str> {
        match &self.alias {
            Some(alias) => Cow::Borrowed(alias),
            None => Cow::Owned(derive_alias(&self.name, self.kind)),
        }
    }

    pub fn expected_payload(&self) -> ExpectedPayload {
        self.payload
    }

    pub fn middleware(&self) -> &[Middleware] {
        &self.middleware
    }

    pub fn exclusions(&self) -> &Exclusions {
        &self.exclusions
    }

    /// The input type clients see, taking [`Procedure::with_raw_payload`] into account.
    ///
    /// Named types the input refers to are registered in `types`.
    pub fn input_type(&self, types: &mut TypeMap) -> DataType {
        match (self.payload, self.input_override) {
            (ExpectedPayload::Raw, Some(ty)) => ty(types),
            _ => (self.input)(types),
        }
    }

    pub fn output_type(&self, types: &mut TypeMap) -> DataType {
        (self.output)(types)
    }

    /// Run the handler without any middleware.
    pub fn exec(&self, ctx: Context, payload: Payload) -> BoxFuture<'static, Result<Value, Error>> {
        (self.handler)(ctx, payload)
    }

    pub(crate) fn set_middleware(&mut self, chain: Vec<Middleware>) {
        self.middleware = chain;
    }

    pub(crate) fn validate(&self) -> Vec<InvalidProcedure> {
        let mut errors = Vec::new();
        if !is_valid_name(&self.name) {
            errors.push(InvalidProcedure::Name {
                name: self.name.to_string(),
                kind: self.kind,
                pattern: NAME_PATTERN,
            });
        }

        if self.input_override.is_some() && self.payload != ExpectedPayload::Raw {
            errors.push(InvalidProcedure::RawPayload {
                name: self.name.to_string(),
                kind: self.kind,
                input: self.input_name.to_string(),
            });
        }

        errors
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Procedure")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("alias", &self.alias())
            .field("payload", &self.payload)
            .field("middleware", &self.middleware)
            .field("exclusions", &self.exclusions)
            .finish()
    }
}

/// Define a query. Shorthand for [`Procedure::query`].
pub fn query<F, Fut, In, Out, E>(name: impl Into<Cow<'static, str>>, handler: F) -> Procedure
where
    F: Fn(Context, In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Out, E>> + Send + 'static,
    In: DeserializeOwned + Type + Send + 'static,
    Out: Serialize + Type + Send + 'static,
    E: Into<BoxError>,
{
    Procedure::query(name, handler)
}

/// Define a mutation. Shorthand for [`Procedure::mutation`].
pub fn mutation<F, Fut, In, Out, E>(name: impl Into<Cow<'static, str>>, handler: F) -> Procedure
where
    F: Fn(Context, In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Out, E>> + Send + 'static,
    In: DeserializeOwned + Type + Send + 'static,
    Out: Serialize + Type + Send + 'static,
    E: Into<BoxError>,
{
    Procedure::mutation(name, handler)
}

/// Alphanumeric segments separated by single `.`, `-` or `_` characters.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .split(['.', '-', '_'])
            .all(|segment| !segment.is_empty() && segment.chars().all(|c| c.is_ascii_alphanumeric()))
}

/// Collapse every run of non alphanumeric characters into a single `.` and trim the ends.
fn normalize(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}

/// Derive a REST friendly alias by dropping a conventional leading verb for the kind.
///
/// `get_user` and `create_user` both become `user`, `getUser` becomes `user` and `my_user`
/// becomes `my.user`. Falls back to the normalized name if nothing would be left.
pub fn derive_alias(name: &str, kind: ProcedureKind) -> String {
    let normalized = normalize(name);
    let verbs = match kind {
        ProcedureKind::Query => QUERY_VERBS,
        ProcedureKind::Mutation => MUTATION_VERBS,
    };

    let (first, rest) = match normalized.split_once('.') {
        Some((first, rest)) => (first, Some(rest)),
        None => (normalized.as_str(), None),
    };

    let stripped = match rest {
        Some(rest) if verbs.iter().any(|v| first.eq_ignore_ascii_case(v)) => rest.to_string(),
        Some(_) => normalized.clone(),
        None => strip_camel_case_verb(first, verbs).unwrap_or_else(|| normalized.clone()),
    };

    if stripped.is_empty() {
        normalized
    } else {
        stripped
    }
}

// `getUser` -> `user`
fn strip_camel_case_verb(segment: &str, verbs: &[&str]) -> Option<String> {
    verbs.iter().find_map(|verb| {
        let rest = segment.strip_prefix(verb)?;
        let mut chars = rest.chars();
        let first = chars.next().filter(char::is_ascii_uppercase)?;
        Some(first.to_ascii_lowercase().to_string() + chars.as_str())
    })
}
