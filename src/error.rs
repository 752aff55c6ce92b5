use std::{error, fmt, path::PathBuf, sync::Arc};

use serde::{ser::SerializeStruct, Serialize, Serializer};

use crate::ProcedureKind;

/// The error type handlers and middleware return. Anything implementing [`std::error::Error`] converts into it with `?`.
pub type BoxError = Box<dyn error::Error + Send + Sync + 'static>;

/// The serializable body an [`ErrorHandler`] produces.
pub type ErrorBody = Box<dyn erased_serde::Serialize + Send + Sync>;

/// Converts a failed call into the value sent back under the `error` key and a HTTP status code.
///
/// Invoked exactly once per failed request at the outermost dispatch boundary.
pub type ErrorHandler = Arc<dyn Fn(&Error) -> (ErrorBody, u16) + Send + Sync>;

/// Message sent to clients in place of the details of an internal error.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal server error";

/// Any failure which can happen while dispatching a call.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    Coercion(#[from] CoercionError),
    /// A guard rejected the call.
    #[error("{0}")]
    Middleware(BoxError),
    /// The handler returned an error.
    #[error("{0}")]
    Handler(BoxError),
    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl Error {
    /// The status code this error maps to when the error handler doesn't decide otherwise.
    pub fn status(&self) -> u16 {
        match self {
            Self::Routing(err) => err.status(),
            Self::NotFound(_) => 404,
            Self::Coercion(_) => 400,
            Self::Middleware(err) | Self::Handler(err) => err
                .downcast_ref::<ApiError>()
                .map(ApiError::status)
                .unwrap_or(500),
            Self::Internal(_) => 500,
        }
    }

    /// Access the error returned by a handler or middleware as its concrete type.
    pub fn downcast_ref<E: error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Middleware(err) | Self::Handler(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RoutingError {
    #[error("no procedure name provided")]
    MissingProcedure,
    #[error("invalid procedure param `{0}`, expected format (q|m)__[name] e.g q__getUser")]
    Malformed(String),
    #[error("unknown procedure kind `{0}`, expected `q` or `m`")]
    UnknownKind(String),
    #[error("method `{method}` is not allowed for {kind} procedures, use `{expected}`")]
    MethodNotAllowed {
        method: String,
        kind: ProcedureKind,
        expected: &'static str,
    },
    #[error("resource not found")]
    ResourceNotFound,
    #[error("request body is larger than the limit of {limit} bytes")]
    PayloadTooLarge { limit: usize },
}

impl RoutingError {
    pub fn status(&self) -> u16 {
        match self {
            Self::MethodNotAllowed { .. } => 405,
            Self::ResourceNotFound => 404,
            Self::PayloadTooLarge { .. } => 413,
            _ => 400,
        }
    }
}

/// The routing key was well formed but no procedure is registered under it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub struct NotFoundError {
    pub name: String,
    pub kind: ProcedureKind,
    /// The closest registered name, if any.
    pub suggestion: Option<String>,
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} `{}` not found", self.kind, self.name)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, ", did you mean `{suggestion}`?")?;
        }
        Ok(())
    }
}

/// A payload didn't match the type a procedure declared.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to cast value, expected `{expected}`, got `{actual}`")]
pub struct CoercionError {
    pub expected: String,
    pub actual: String,
}

impl CoercionError {
    /// The label used for `actual` when nothing usable was decoded.
    pub const ABSENT: &'static str = "absent";

    pub fn new(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        let expected = expected.into();
        let mut actual = actual.into();
        if actual == expected {
            actual = Self::ABSENT.to_string();
        }

        Self { expected, actual }
    }
}

/// A failure on the server's side. Displays as [`INTERNAL_ERROR_MESSAGE`] so whatever renders it
/// can't leak the cause to clients, use [`InternalError::detail`] for logs.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum InternalError {
    #[error("{}", INTERNAL_ERROR_MESSAGE)]
    Panic(String),
    #[error("{}", INTERNAL_ERROR_MESSAGE)]
    Serialize(#[from] serde_json::Error),
    #[error("{}", INTERNAL_ERROR_MESSAGE)]
    Body(#[source] BoxError),
}

impl InternalError {
    pub fn detail(&self) -> String {
        match self {
            Self::Panic(message) => format!("procedure panicked: {message}"),
            Self::Serialize(err) => format!("error serializing procedure result: {err}"),
            Self::Body(err) => format!("error reading request body: {err}"),
        }
    }
}

/// A typed application error. Return it from handlers or middleware to control the status code.
#[derive(Debug, Clone)]
pub struct ApiError {
    status: u16,
    message: String,
    meta: Option<serde_json::Value>,
    // `Arc` so the error stays `Clone`.
    cause: Option<Arc<dyn error::Error + Send + Sync>>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.to_status_code(),
            message: message.into(),
            meta: None,
            cause: None,
        }
    }

    /// Statuses outside of `400..=599` fall back to `500`.
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: if (400..=599).contains(&status) {
                status
            } else {
                500
            },
            message: message.into(),
            meta: None,
            cause: None,
        }
    }

    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.status = code.to_status_code();
        self
    }

    pub fn with_cause<E: error::Error + Send + Sync + 'static>(mut self, cause: E) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn code(&self) -> Option<ErrorCode> {
        ErrorCode::from_status_code(self.status)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn meta(&self) -> Option<&serde_json::Value> {
        self.meta.as_ref()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl error::Error for ApiError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|err| err as &(dyn error::Error + 'static))
    }
}

impl PartialEq for ApiError {
    fn eq(&self, other: &Self) -> bool {
        self.status == other.status && self.message == other.message && self.meta == other.meta
    }
}

impl Serialize for ApiError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ApiError", 3)?;
        state.serialize_field("message", &self.message)?;
        state.serialize_field("code", &self.status)?;
        state.serialize_field("meta", &self.meta)?;
        state.end()
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Timeout,
    Conflict,
    PreconditionFailed,
    PayloadTooLarge,
    MethodNotSupported,
    ClientClosedRequest,
    InternalServerError,
}

impl ErrorCode {
    pub fn to_status_code(&self) -> u16 {
        match self {
            ErrorCode::BadRequest => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::Forbidden => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::Timeout => 408,
            ErrorCode::Conflict => 409,
            ErrorCode::PreconditionFailed => 412,
            ErrorCode::PayloadTooLarge => 413,
            ErrorCode::MethodNotSupported => 405,
            ErrorCode::ClientClosedRequest => 499,
            ErrorCode::InternalServerError => 500,
        }
    }

    pub const fn from_status_code(status_code: u16) -> Option<Self> {
        match status_code {
            400 => Some(ErrorCode::BadRequest),
            401 => Some(ErrorCode::Unauthorized),
            403 => Some(ErrorCode::Forbidden),
            404 => Some(ErrorCode::NotFound),
            408 => Some(ErrorCode::Timeout),
            409 => Some(ErrorCode::Conflict),
            412 => Some(ErrorCode::PreconditionFailed),
            413 => Some(ErrorCode::PayloadTooLarge),
            405 => Some(ErrorCode::MethodNotSupported),
            499 => Some(ErrorCode::ClientClosedRequest),
            500 => Some(ErrorCode::InternalServerError),
            _ => None,
        }
    }
}

/// The error handler used when none is configured.
///
/// Sends the error's message, honoring the status of an [`ApiError`]. Internal errors are
/// replaced with a generic message.
pub fn default_error_handler(err: &Error) -> (ErrorBody, u16) {
    if err.is_internal() {
        return (Box::new(INTERNAL_ERROR_MESSAGE), 500);
    }

    let message = match err.downcast_ref::<ApiError>() {
        Some(api) => api.message().to_string(),
        None => err.to_string(),
    };

    (Box::new(message), err.status())
}

/// A procedure which can't be added to a router.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidProcedure {
    #[error("invalid procedure name `{name}` for {kind}, expected string matching regex `{pattern}` (example: `get_user`, `todo.create`)")]
    Name {
        name: String,
        kind: ProcedureKind,
        pattern: &'static str,
    },
    #[error("`with_raw_payload` was called on {kind} `{name}` which doesn't take a raw payload, expected `RawBody` but got `{input}`")]
    RawPayload {
        name: String,
        kind: ProcedureKind,
        input: String,
    },
}

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum BuildError {
    #[error("invalid procedures: {}", join(.0))]
    InvalidProcedures(Vec<InvalidProcedure>),
    #[error(transparent)]
    Export(#[from] ExportError),
}

fn join(errors: &[InvalidProcedure]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ExportError {
    #[error("export path `{0}` is not an existing directory")]
    NotADirectory(PathBuf),
    #[error("no export path was configured")]
    MissingPath,
    #[error("IO error exporting schema: {0}")]
    Io(#[from] std::io::Error),
    #[error("error serializing schema: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("error rendering bindings: {0}")]
    Render(BoxError),
}
