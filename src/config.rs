use std::{borrow::Cow, env, path::PathBuf};

/// Default route the RPC endpoint is mounted on.
pub const DEFAULT_ROUTE: &str = "_kestrel";

/// Default prefix of the REST projection.
pub const DEFAULT_REST_PREFIX: &str = "/api";

pub const ENV_EXPORT_SCHEMA: &str = "KESTREL_EXPORT_SCHEMA";
pub const ENV_EXPORT_BINDINGS: &str = "KESTREL_EXPORT_BINDINGS";
pub const ENV_EXPORT_PATH: &str = "KESTREL_EXPORT_PATH";
pub const ENV_DEBUG: &str = "KESTREL_DEBUG";

/// Settings for a [`Router`](crate::Router), fixed once it is built.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) debug: bool,
    pub(crate) enforce_methods: bool,
    pub(crate) route: Cow<'static, str>,
    pub(crate) rest_prefix: Cow<'static, str>,
    pub(crate) export: ExportConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            enforce_methods: false,
            route: Cow::Borrowed(DEFAULT_ROUTE),
            rest_prefix: Cow::Borrowed(DEFAULT_REST_PREFIX),
            export: ExportConfig::default(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Default::default()
    }

    /// Log the REST endpoint table when the router is built.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Require `GET` for queries and `POST` for mutations on the RPC route.
    pub fn enforce_methods(mut self, enforce: bool) -> Self {
        self.enforce_methods = enforce;
        self
    }

    /// The route the RPC endpoint is served on. Leading and trailing slashes are ignored.
    pub fn route(mut self, route: impl Into<Cow<'static, str>>) -> Self {
        self.route = route.into();
        self
    }

    pub fn rest_prefix(mut self, prefix: impl Into<Cow<'static, str>>) -> Self {
        self.rest_prefix = prefix.into();
        self
    }

    pub fn export(mut self, export: ExportConfig) -> Self {
        self.export = export;
        self
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn enforces_methods(&self) -> bool {
        self.enforce_methods
    }

    pub fn get_route(&self) -> &str {
        self.route.trim_matches('/')
    }

    pub fn get_rest_prefix(&self) -> &str {
        &self.rest_prefix
    }

    pub fn get_export(&self) -> &ExportConfig {
        &self.export
    }

    /// Override settings from the `KESTREL_*` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| env::var(key).ok())
    }

    pub(crate) fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = flag(&lookup, ENV_DEBUG) {
            self.debug = value;
        }
        if let Some(value) = flag(&lookup, ENV_EXPORT_SCHEMA) {
            self.export.schema = value;
        }
        if let Some(value) = flag(&lookup, ENV_EXPORT_BINDINGS) {
            self.export.bindings = value;
        }
        if let Some(path) = lookup(ENV_EXPORT_PATH).filter(|path| !path.trim().is_empty()) {
            self.export.path = Some(PathBuf::from(path));
        }
    }
}

/// Controls whether the schema and client bindings are written when the router is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportConfig {
    pub(crate) schema: bool,
    pub(crate) bindings: bool,
    pub(crate) path: Option<PathBuf>,
}

impl ExportConfig {
    /// Export the schema to an existing directory.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            schema: true,
            bindings: false,
            path: Some(path.into()),
        }
    }

    pub fn schema(mut self, enabled: bool) -> Self {
        self.schema = enabled;
        self
    }

    /// Write client bindings with the router's renderer, TypeScript unless another was set.
    pub fn bindings(mut self, enabled: bool) -> Self {
        self.bindings = enabled;
        self
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn schema_enabled(&self) -> bool {
        self.schema
    }

    pub fn bindings_enabled(&self) -> bool {
        self.bindings
    }

    pub fn get_path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let value = lookup(key)?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(key, value = %value, "ignoring unrecognised boolean environment variable");
            None
        }
    }
}
