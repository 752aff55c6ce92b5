use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use futures::FutureExt;
use http::{header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use specta::TypeMap;
use tracing::Instrument;

use crate::{
    coerce::Payload,
    context::lock,
    middleware,
    procedure::ExpectedPayload,
    rest::{Endpoints, RestEndpoint},
    schema::{
        self, ExportOutcome, ExportReport, JsonRenderer, Renderer, Schema, TypescriptRenderer,
    },
    shape, CoercionError, Config, Context, Error, ErrorBody, ErrorHandler, ExportError, InternalError,
    NotFoundError, Procedure, ProcedureKind, Procedures, RawBody, RoutingError,
};

/// The query parameter carrying the routing key on the RPC route.
pub const PROC_PARAM: &str = "__proc";

/// Separates the kind from the name in a routing key, `q__getUser`.
pub const PROC_SEPARATOR: &str = "__";

// Sent when even the error body can't be produced.
const FALLBACK_BODY: &[u8] = br#"{"ok":false,"error":"internal server error"}"#;

/// A built [`Router`](crate::Router), ready to serve requests.
///
/// Cheap to clone, every clone shares the same procedures.
#[derive(Clone)]
pub struct Instance(Arc<Inner>);

struct Inner {
    config: Config,
    procedures: Procedures,
    endpoints: Endpoints,
    error_handler: ErrorHandler,
    renderer: Option<Box<dyn Renderer + Send + Sync>>,
}

#[derive(Serialize)]
struct Success {
    ok: bool,
    data: Value,
}

#[derive(Serialize)]
struct Failure<'a> {
    ok: bool,
    error: &'a ErrorBody,
}

// A `null` document decodes to `None`.
#[derive(Deserialize)]
struct RequestBody {
    #[serde(default)]
    d: Option<Value>,
}

impl Instance {
    pub(crate) fn new(
        config: Config,
        procedures: Procedures,
        error_handler: ErrorHandler,
        renderer: Option<Box<dyn Renderer + Send + Sync>>,
    ) -> Self {
        let endpoints = Endpoints::build(&procedures, config.get_rest_prefix());
        Self(Arc::new(Inner {
            config,
            procedures,
            endpoints,
            error_handler,
            renderer,
        }))
    }

    pub fn config(&self) -> &Config {
        &self.0.config
    }

    pub fn procedures(&self) -> &Procedures {
        &self.0.procedures
    }

    /// The REST projection under the configured prefix.
    pub fn rest_endpoints(&self) -> &Endpoints {
        &self.0.endpoints
    }

    /// The REST projection under another prefix.
    pub fn rest_endpoints_with_prefix(&self, prefix: &str) -> Endpoints {
        Endpoints::build(&self.0.procedures, prefix)
    }

    /// Serve a request made to the RPC route. The procedure is picked by the `__proc` query parameter.
    ///
    /// Always produces a complete response, errors included.
    pub async fn handle(&self, req: Request<Bytes>) -> Response<Bytes> {
        let (parts, body) = req.into_parts();
        let ctx = Context::new(parts);
        let headers = ctx.response_headers_handle();

        let result = match self.route(ctx.request()) {
            Ok((kind, name)) => self.guarded(kind, &name, ctx, Input::Body(body)).await,
            Err(err) => Err(err.into()),
        };

        let response_headers = lock(&headers);
        self.respond(result, &response_headers)
    }

    /// Serve a request made to a REST endpoint, picking the procedure by method and path.
    pub async fn handle_rest(&self, req: Request<Bytes>) -> Response<Bytes> {
        let endpoint = self
            .0
            .endpoints
            .find(req.method(), req.uri().path())
            .map(|endpoint| (endpoint.kind, endpoint.procedure.clone()));

        match endpoint {
            Some((kind, name)) => self.handle_procedure(kind, &name, req).await,
            None => {
                let err = self.rest_miss(req.method(), req.uri().path());
                self.respond(Err(err), &HeaderMap::new())
            }
        }
    }

    /// Serve a request for a procedure which has already been picked, as done by a REST endpoint.
    pub async fn handle_procedure(
        &self,
        kind: ProcedureKind,
        name: &str,
        req: Request<Bytes>,
    ) -> Response<Bytes> {
        let (parts, body) = req.into_parts();
        let ctx = Context::new(parts);
        let headers = ctx.response_headers_handle();

        let result = self.guarded(kind, name, ctx, Input::Body(body)).await;
        let response_headers = lock(&headers);
        self.respond(result, &response_headers)
    }

    /// Call a procedure in process, running its middleware and coercing `payload` like a request would.
    pub async fn call(
        &self,
        name: &str,
        kind: ProcedureKind,
        ctx: Context,
        payload: Payload,
    ) -> Result<Value, Error> {
        self.guarded(kind, name, ctx, Input::Payload(payload)).await
    }

    /// The response sent for `err`, produced by the configured error handler.
    pub fn error_response(&self, err: &Error) -> Response<Bytes> {
        let (status, body) = self.encode_error(err);
        response(status, body, &HeaderMap::new())
    }

    pub fn schema(&self) -> Schema {
        Schema::export(&self.0.procedures)
    }

    /// Write the schema as `schema.json` into `dir`, which must already exist.
    pub fn export_schema(&self, dir: impl AsRef<Path>) -> Result<PathBuf, ExportError> {
        schema::write(&self.schema(), &JsonRenderer, dir.as_ref())
    }

    /// Write client bindings produced by `renderer` into `dir`, which must already exist.
    pub fn export_bindings(
        &self,
        renderer: &dyn Renderer,
        dir: impl AsRef<Path>,
    ) -> Result<PathBuf, ExportError> {
        schema::write(&self.schema(), renderer, dir.as_ref())
    }

    /// Run the exports enabled in the [`ExportConfig`](crate::ExportConfig).
    pub fn export(&self) -> Result<ExportReport, ExportError> {
        let export = self.0.config.get_export();

        let schema = match export.schema_enabled() {
            true => {
                let dir = export.get_path().ok_or(ExportError::MissingPath)?;
                ExportOutcome::Written(self.export_schema(dir)?)
            }
            false => ExportOutcome::Skipped,
        };

        let bindings = match (export.bindings_enabled(), &self.0.renderer) {
            (true, Some(renderer)) => {
                let dir = export.get_path().ok_or(ExportError::MissingPath)?;
                ExportOutcome::Written(self.export_bindings(renderer.as_ref(), dir)?)
            }
            (true, None) => {
                let dir = export.get_path().ok_or(ExportError::MissingPath)?;
                ExportOutcome::Written(self.export_bindings(&TypescriptRenderer::default(), dir)?)
            }
            (false, _) => ExportOutcome::Skipped,
        };

        Ok(ExportReport { schema, bindings })
    }

    /// Parse the routing key, enforcing methods if configured.
    fn route(&self, req: &http::request::Parts) -> Result<(ProcedureKind, String), RoutingError> {
        let proc = req
            .uri
            .query()
            .and_then(|query| {
                form_urlencoded::parse(query.as_bytes())
                    .find(|(key, _)| key == PROC_PARAM)
                    .map(|(_, value)| value.into_owned())
            })
            .filter(|proc| !proc.trim().is_empty())
            .ok_or(RoutingError::MissingProcedure)?;

        let parts = proc.split(PROC_SEPARATOR).collect::<Vec<_>>();
        let [short, name] = parts.as_slice() else {
            return Err(RoutingError::Malformed(proc.clone()));
        };

        let kind =
            ProcedureKind::from_short(short).ok_or_else(|| RoutingError::UnknownKind(short.to_string()))?;
        if name.trim().is_empty() {
            return Err(RoutingError::MissingProcedure);
        }

        if self.0.config.enforces_methods() && req.method != kind.method() {
            return Err(RoutingError::MethodNotAllowed {
                method: req.method.to_string(),
                kind,
                expected: match kind {
                    ProcedureKind::Query => "GET",
                    ProcedureKind::Mutation => "POST",
                },
            });
        }

        Ok((kind, name.to_string()))
    }

    fn lookup(&self, name: &str, kind: ProcedureKind) -> Result<&Procedure, NotFoundError> {
        self.0.procedures.get(name, kind).ok_or_else(|| NotFoundError {
            name: name.to_string(),
            kind,
            suggestion: self
                .0
                .procedures
                .find_nearest(name)
                .map(|procedure| procedure.name().to_string()),
        })
    }

    fn rest_miss(&self, method: &Method, path: &str) -> Error {
        let path = crate::rest::normalize_path(path);
        let allowed = self
            .0
            .endpoints
            .iter()
            .find(|endpoint: &&RestEndpoint| endpoint.path == path);

        match allowed {
            Some(endpoint) => RoutingError::MethodNotAllowed {
                method: method.to_string(),
                kind: endpoint.kind,
                expected: match endpoint.kind {
                    ProcedureKind::Query => "GET",
                    ProcedureKind::Mutation => "POST",
                },
            }
            .into(),
            None => RoutingError::ResourceNotFound.into(),
        }
    }

    /// Run a call with a panic guard around the whole pipeline.
    async fn guarded(
        &self,
        kind: ProcedureKind,
        name: &str,
        ctx: Context,
        input: Input,
    ) -> Result<Value, Error> {
        let span = tracing::debug_span!("procedure", procedure = name, kind = %kind);
        let call = AssertUnwindSafe(self.dispatch(kind, name, ctx, input)).catch_unwind();

        match call.instrument(span).await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic);
                tracing::error!(procedure = name, kind = %kind, panic = %message, "procedure panicked");
                Err(InternalError::Panic(message).into())
            }
        }
    }

    async fn dispatch(
        &self,
        kind: ProcedureKind,
        name: &str,
        mut ctx: Context,
        input: Input,
    ) -> Result<Value, Error> {
        let procedure = self.lookup(name, kind)?;
        ctx.bind(procedure.name(), kind);

        middleware::run(procedure.middleware(), &mut ctx).await?;

        let payload = match input {
            _ if procedure.expected_payload() == ExpectedPayload::None => Payload::Absent,
            Input::Payload(payload) => payload,
            Input::Body(body) => decode(procedure, body)?,
        };

        let result = procedure.exec(ctx, payload).await;
        if let Err(err) = &result {
            tracing::debug!(error = %err, "procedure failed");
        }
        result
    }

    fn respond(&self, result: Result<Value, Error>, headers: &HeaderMap) -> Response<Bytes> {
        let encoded = result.and_then(|data| {
            serde_json::to_vec(&Success { ok: true, data })
                .map_err(|err| InternalError::from(err).into())
        });

        let (status, body) = match encoded {
            Ok(body) => (StatusCode::OK, Bytes::from(body)),
            Err(err) => self.encode_error(&err),
        };

        response(status, body, headers)
    }

    /// Internal errors are always sent with a `500`, whatever status the error handler picked.
    fn encode_error(&self, err: &Error) -> (StatusCode, Bytes) {
        match err {
            // Already logged where the panic was caught.
            Error::Internal(InternalError::Panic(_)) => {}
            Error::Internal(internal) => {
                tracing::error!(error = %internal.detail(), "an internal error occurred");
            }
            _ => {}
        }

        let handler = &self.0.error_handler;
        let Ok((body, status)) = panic::catch_unwind(AssertUnwindSafe(|| handler(err))) else {
            tracing::error!(error = %err, "error handler panicked");
            return fallback();
        };

        let status = match err.is_internal() {
            true => StatusCode::INTERNAL_SERVER_ERROR,
            false => status_code(status),
        };

        match serde_json::to_vec(&Failure {
            ok: false,
            error: &body,
        }) {
            Ok(encoded) => (status, Bytes::from(encoded)),
            Err(ser_err) => {
                tracing::error!(error = %err, serialize_error = %ser_err, "failed to serialize error body");
                fallback()
            }
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("config", &self.0.config)
            .field("procedures", &self.0.procedures)
            .finish()
    }
}

enum Input {
    Body(Bytes),
    Payload(Payload),
}

/// Decode a `{"d": ...}` body. An empty or `null` body means nothing was sent.
fn decode(procedure: &Procedure, body: Bytes) -> Result<Payload, Error> {
    if procedure.expected_payload() == ExpectedPayload::Raw {
        return Ok(Payload::typed(RawBody(body)));
    }

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Payload::Absent);
    }

    match serde_json::from_slice::<Option<RequestBody>>(&body) {
        Ok(Some(RequestBody { d: Some(value) })) => Ok(Payload::Value(value)),
        Ok(Some(RequestBody { d: None })) | Ok(None) => Ok(Payload::Absent),
        Err(err) => {
            tracing::debug!(error = %err, "failed to decode request body");
            let expected = shape::display(&procedure.input_type(&mut TypeMap::default()));
            Err(CoercionError::new(expected.clone(), expected).into())
        }
    }
}

fn response(status: StatusCode, body: Bytes, headers: &HeaderMap) -> Response<Bytes> {
    let mut res = Response::new(body);
    *res.status_mut() = status;
    res.headers_mut().extend(headers.clone());
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    res
}

fn fallback() -> (StatusCode, Bytes) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Bytes::from_static(FALLBACK_BODY),
    )
}

/// Statuses outside of 400..=599 become 500.
fn status_code(status: u16) -> StatusCode {
    match status {
        400..=599 => StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(message) => *message,
        Err(panic) => match panic.downcast_ref::<&'static str>() {
            Some(message) => message.to_string(),
            None => "unknown panic".to_string(),
        },
    }
}
