use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcedureKind {
    Query,
    Mutation,
}

impl ProcedureKind {
    /// The single letter used in the routing key, `q__name` or `m__name`.
    pub fn short(&self) -> &'static str {
        match self {
            Self::Query => "q",
            Self::Mutation => "m",
        }
    }

    pub fn from_short(s: &str) -> Option<Self> {
        match s {
            "q" => Some(Self::Query),
            "m" => Some(Self::Mutation),
            _ => None,
        }
    }

    /// The HTTP method calls to this kind of procedure use.
    pub fn method(&self) -> http::Method {
        match self {
            Self::Query => http::Method::GET,
            Self::Mutation => http::Method::POST,
        }
    }
}

impl fmt::Display for ProcedureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Mutation => write!(f, "mutation"),
        }
    }
}
