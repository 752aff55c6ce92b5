//! Structural description of every procedure, handed to a [`Renderer`] for client generation.

use std::{
    fmt::{self, Write as _},
    fs,
    path::{Path, PathBuf},
};

use serde::{ser::SerializeStruct, Serialize, Serializer};
use specta::{
    datatype::{DataType, FunctionResultVariant},
    TypeMap,
};
use specta_typescript::{BigIntExportBehavior, Typescript};

use crate::{shape, BoxError, ExportError, ProcedureKind, Procedures};

/// The shapes of one procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaRecord {
    pub name: String,
    pub alias: String,
    pub kind: ProcedureKind,
    pub input: DataType,
    pub output: DataType,
}

impl Serialize for SchemaRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("SchemaRecord", 5)?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("alias", &self.alias)?;
        s.serialize_field("kind", &self.kind)?;
        s.serialize_field("input", &shape::display(&self.input))?;
        s.serialize_field("output", &shape::display(&self.output))?;
        s.end()
    }
}

/// A snapshot of a router's procedures and the named types they refer to.
///
/// Records are in registration order and type names are sorted, so exporting the same router
/// twice gives identical output.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    procedures: Vec<SchemaRecord>,
    types: TypeMap,
}

impl Schema {
    pub fn export(procedures: &Procedures) -> Self {
        let mut types = TypeMap::default();
        let procedures = procedures
            .iter()
            .map(|procedure| SchemaRecord {
                name: procedure.name().to_string(),
                alias: procedure.alias().into_owned(),
                kind: procedure.kind(),
                input: procedure.input_type(&mut types),
                output: procedure.output_type(&mut types),
            })
            .collect();

        Self { procedures, types }
    }

    pub fn procedures(&self) -> &[SchemaRecord] {
        &self.procedures
    }

    pub fn types(&self) -> &TypeMap {
        &self.types
    }

    /// Names of the named types the procedures refer to, sorted.
    pub fn type_names(&self) -> Vec<String> {
        let mut names = self
            .types
            .iter()
            .map(|(_, ty)| ty.name().to_string())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    pub fn get(&self, name: &str, kind: ProcedureKind) -> Option<&SchemaRecord> {
        self.procedures
            .iter()
            .find(|record| record.name == name && record.kind == kind)
    }

    /// Follow a reference in `ty` to the definition it points at.
    pub fn resolve<'a>(&'a self, ty: &'a DataType) -> Option<&'a DataType> {
        shape::resolve(ty, &self.types)
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Schema", 2)?;
        s.serialize_field("procedures", &self.procedures)?;
        s.serialize_field("types", &self.type_names())?;
        s.end()
    }
}

/// Turns a [`Schema`] into the source of a client in some target language.
pub trait Renderer {
    /// Name of the file written inside the export directory.
    fn file_name(&self) -> &str;

    fn render(&self, schema: &Schema) -> Result<String, BoxError>;
}

/// Writes the schema as pretty printed JSON to `schema.json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn file_name(&self) -> &str {
        "schema.json"
    }

    fn render(&self, schema: &Schema) -> Result<String, BoxError> {
        Ok(serde_json::to_string_pretty(schema)?)
    }
}

/// Writes TypeScript bindings to `bindings.ts` with [`specta_typescript`].
///
/// Every named type is exported, followed by a `Procedures` type listing each procedure's key,
/// input and result:
///
/// ```ts
/// export type Procedures = {
///     queries: { key: "list_todos", input: null, result: Todo[] },
///     mutations: { key: "create_todo", input: string, result: Todo },
/// };
/// ```
pub struct TypescriptRenderer {
    ts: Typescript,
}

impl fmt::Debug for TypescriptRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypescriptRenderer").finish_non_exhaustive()
    }
}

impl Default for TypescriptRenderer {
    fn default() -> Self {
        Self::new(Typescript::default().bigint(BigIntExportBehavior::Number))
    }
}

impl TypescriptRenderer {
    pub fn new(ts: Typescript) -> Self {
        Self { ts }
    }

    fn procedures(&self, schema: &Schema, kind: ProcedureKind) -> Result<String, BoxError> {
        let mut variants = Vec::new();
        for record in schema.procedures().iter().filter(|r| r.kind == kind) {
            variants.push(format!(
                "{{ key: {:?}, input: {}, result: {} }}",
                record.name,
                self.datatype(&record.input, schema.types())?,
                self.datatype(&record.output, schema.types())?,
            ));
        }

        Ok(match variants.is_empty() {
            true => "never".to_string(),
            false => variants.join(" | "),
        })
    }

    fn datatype(&self, ty: &DataType, types: &TypeMap) -> Result<String, BoxError> {
        Ok(specta_typescript::datatype(
            &self.ts,
            &FunctionResultVariant::Value(ty.clone()),
            types,
        )?)
    }
}

impl Renderer for TypescriptRenderer {
    fn file_name(&self) -> &str {
        "bindings.ts"
    }

    fn render(&self, schema: &Schema) -> Result<String, BoxError> {
        let mut out = specta::Language::export(&self.ts, schema.types().clone())?;
        writeln!(out)?;
        writeln!(out, "export type Procedures = {{")?;
        writeln!(
            out,
            "\tqueries: {},",
            self.procedures(schema, ProcedureKind::Query)?
        )?;
        writeln!(
            out,
            "\tmutations: {},",
            self.procedures(schema, ProcedureKind::Mutation)?
        )?;
        writeln!(out, "}};")?;
        Ok(out)
    }
}

/// What an export did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Written(PathBuf),
    /// Export was turned off.
    Skipped,
}

/// The outcome of the exports a [`Config`](crate::Config) asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub schema: ExportOutcome,
    pub bindings: ExportOutcome,
}

/// Render `schema` and write it into `dir`, which must already exist.
pub fn write(
    schema: &Schema,
    renderer: &dyn Renderer,
    dir: &Path,
) -> Result<PathBuf, ExportError> {
    if !dir.is_dir() {
        return Err(ExportError::NotADirectory(dir.to_path_buf()));
    }

    let contents = renderer.render(schema).map_err(ExportError::Render)?;
    let path = dir.join(renderer.file_name());
    fs::write(&path, contents)?;

    tracing::debug!(path = %path.display(), "exported schema");
    Ok(path)
}
