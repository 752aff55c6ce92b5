//! The REST projection: one endpoint per procedure, derived from its kind and alias.

use std::fmt;

use http::Method;

use crate::{ProcedureKind, Procedures};

/// A single endpoint of the REST projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestEndpoint {
    pub procedure: String,
    pub kind: ProcedureKind,
    pub method: Method,
    /// Always starts with `/` and never ends with one.
    pub path: String,
}

impl fmt::Display for RestEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.procedure, self.method, self.path)
    }
}

/// Every endpoint of the REST projection, in registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoints(pub Vec<RestEndpoint>);

impl Endpoints {
    /// Derive an endpoint for every procedure, mounted under `prefix`.
    ///
    /// A procedure whose method and path are already taken by an earlier one is skipped.
    pub fn build(procedures: &Procedures, prefix: &str) -> Self {
        let prefix = normalize_path(prefix);
        let mut endpoints = Vec::<RestEndpoint>::with_capacity(procedures.len());

        for procedure in procedures {
            let endpoint = RestEndpoint {
                procedure: procedure.name().to_string(),
                kind: procedure.kind(),
                method: procedure.kind().method(),
                path: normalize_path(&format!("{prefix}/{}", procedure.alias())),
            };

            if let Some(taken) = endpoints
                .iter()
                .find(|e| e.method == endpoint.method && e.path == endpoint.path)
            {
                tracing::warn!(
                    procedure = %endpoint.procedure,
                    path = %endpoint.path,
                    taken_by = %taken.procedure,
                    "skipping REST endpoint with a conflicting path"
                );
                continue;
            }

            endpoints.push(endpoint);
        }

        Self(endpoints)
    }

    pub fn find(&self, method: &Method, path: &str) -> Option<&RestEndpoint> {
        let path = normalize_path(path);
        self.0
            .iter()
            .find(|endpoint| endpoint.method == method && endpoint.path == path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RestEndpoint> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a Endpoints {
    type Item = &'a RestEndpoint;
    type IntoIter = std::slice::Iter<'a, RestEndpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Renders as an aligned `Procedure / Method / Path` table.
impl fmt::Display for Endpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = self
            .0
            .iter()
            .map(|e| (e.procedure.as_str(), format!("[{}]", e.method), e.path.as_str()))
            .collect::<Vec<_>>();

        let name_width = rows
            .iter()
            .map(|(name, _, _)| name.len())
            .chain(["Procedure".len()])
            .max()
            .unwrap_or_default();
        let method_width = rows
            .iter()
            .map(|(_, method, _)| method.len())
            .chain(["Method".len()])
            .max()
            .unwrap_or_default();

        writeln!(f, "{:name_width$} {:method_width$} Path", "Procedure", "Method")?;
        for (name, method, path) in rows {
            writeln!(f, "{name:name_width$} {method:method_width$} {path}")?;
        }
        Ok(())
    }
}

/// `"api//v1/"` becomes `"/api/v1"`. An empty path becomes `"/"`.
pub fn normalize_path(path: &str) -> String {
    let segments = path
        .split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>();

    format!("/{}", segments.join("/"))
}
