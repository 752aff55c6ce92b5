//! Converts loosely typed payloads into the type a procedure declared.
//!
//! The rules are applied in order:
//!
//! 1. a missing or `null` value becomes the zero value of the target,
//! 2. a value which already conforms to the target is kept as is,
//! 3. numbers are cast to numeric targets with `as` semantics,
//! 4. records, lists, tuples and maps are converted element by element,
//! 5. anything else is a [`CoercionError`].
//!
//! The target is the [`DataType`] specta derives for the procedure's input. The resulting value is
//! then deserialized into the Rust type with serde.

use std::{
    any::{type_name, Any},
    fmt,
};

use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};
use specta::{
    datatype::{
        DataType, EnumRepr, EnumType, EnumVariant, EnumVariants, Field, NamedFields,
        PrimitiveType, StructFields, StructType,
    },
    SpectaID, Type, TypeMap,
};

use crate::{shape, CoercionError};

/// The raw input of a call before it has been converted into the procedure's input type.
pub enum Payload {
    /// Nothing was sent.
    Absent,
    /// A value decoded from the wire.
    Value(Value),
    /// An already typed value handed over in-process.
    Typed {
        value: Box<dyn Any + Send>,
        type_name: &'static str,
    },
}

impl Payload {
    pub fn typed<T: Any + Send>(value: T) -> Self {
        Self::Typed {
            value: Box::new(value),
            type_name: type_name::<T>(),
        }
    }

    /// The name reported as `actual` in a [`CoercionError`].
    pub fn actual_name(&self) -> &'static str {
        match self {
            Self::Absent => CoercionError::ABSENT,
            Self::Value(value) => value_kind(value),
            Self::Typed { type_name, .. } => type_name,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "Absent"),
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Typed { type_name, .. } => write!(f, "Typed({type_name})"),
        }
    }
}

/// The shape of a procedure's input, computed once when the procedure is constructed.
pub struct InputShape {
    ty: DataType,
    types: TypeMap,
}

impl InputShape {
    pub fn of<T: Type>() -> Self {
        let mut types = TypeMap::default();
        let ty = shape::inline::<T>(&mut types);
        Self { ty, types }
    }

    pub fn ty(&self) -> &DataType {
        &self.ty
    }

    /// The named types the shape refers to.
    pub fn types(&self) -> &TypeMap {
        &self.types
    }

    /// The name reported as `expected` in a [`CoercionError`].
    pub fn expected_name(&self) -> String {
        shape::display(&self.ty)
    }
}

impl fmt::Debug for InputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("InputShape")
            .field(&self.expected_name())
            .finish()
    }
}

/// Convert `payload` into `T`.
pub fn coerce<T: DeserializeOwned + 'static>(
    payload: Payload,
    shape: &InputShape,
) -> Result<T, CoercionError> {
    let value = match payload {
        Payload::Typed { value, type_name } => {
            return value
                .downcast::<T>()
                .map(|value| *value)
                .map_err(|_| CoercionError::new(shape.expected_name(), type_name));
        }
        Payload::Absent => Value::Null,
        Payload::Value(value) => value,
    };

    let actual = match &value {
        Value::Null => CoercionError::ABSENT,
        value => value_kind(value),
    };
    let value = coerce_value(value, &shape.ty, &shape.types)?;

    serde_json::from_value(value).map_err(|err| {
        tracing::debug!(error = %err, "coerced payload failed to deserialize");
        CoercionError::new(shape.expected_name(), actual)
    })
}

/// Apply the coercion rules to a generic value, producing a value which conforms to `ty`.
pub fn coerce_value(
    value: Value,
    ty: &DataType,
    types: &TypeMap,
) -> Result<Value, CoercionError> {
    if value.is_null() {
        return Ok(zero_value(ty, types));
    }

    if conforms(&value, ty, types) {
        return Ok(value);
    }

    let kind = value_kind(&value);
    let mismatch = || CoercionError::new(shape::display(ty), kind);

    let Some(resolved) = shape::resolve(ty, types) else {
        return Err(mismatch());
    };

    match (resolved, value) {
        (DataType::Primitive(p), Value::Number(n)) if is_numeric(p) => Ok(cast_number(&n, p)),
        (DataType::Nullable(inner), value) => coerce_value(value, inner, types),
        (DataType::Struct(s), value) => coerce_struct(value, s, types).unwrap_or_else(|| Err(mismatch())),
        (DataType::List(list), Value::Array(items)) => items
            .into_iter()
            .map(|item| coerce_value(item, list.ty(), types))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        (DataType::Tuple(tuple), Value::Array(items))
            if tuple.elements().len() == items.len() =>
        {
            items
                .into_iter()
                .zip(tuple.elements().iter())
                .map(|(item, ty)| coerce_value(item, ty, types))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        (DataType::Map(map), Value::Object(entries)) => entries
            .into_iter()
            .map(|(k, v)| coerce_value(v, map.value_ty(), types).map(|v| (k, v)))
            .collect::<Result<Map<_, _>, _>>()
            .map(Value::Object),
        _ => Err(mismatch()),
    }
}

/// `None` when `value` doesn't have the outline of the record at all.
fn coerce_struct(
    value: Value,
    s: &StructType,
    types: &TypeMap,
) -> Option<Result<Value, CoercionError>> {
    match (s.fields(), value) {
        (StructFields::Named(fields), Value::Object(map)) => {
            Some(coerce_object(map, &named_fields(fields, types), types))
        }
        (StructFields::Unnamed(fields), value) => match (unnamed(fields.fields()).as_slice(), value)
        {
            ([ty], value) => Some(coerce_value(value, ty, types)),
            (tys, Value::Array(items)) if tys.len() == items.len() => Some(
                items
                    .into_iter()
                    .zip(tys.iter())
                    .map(|(item, ty)| coerce_value(item, ty, types))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
            ),
            _ => None,
        },
        _ => None,
    }
}

fn coerce_object(
    mut map: Map<String, Value>,
    fields: &[FieldShape<'_>],
    types: &TypeMap,
) -> Result<Value, CoercionError> {
    let mut out = Map::with_capacity(fields.len());
    for field in fields {
        match map.remove(field.name) {
            Some(value) => {
                out.insert(field.name.to_string(), coerce_value(value, field.ty, types)?);
            }
            None if may_be_missing(field.ty, types) => {}
            None => {
                out.insert(field.name.to_string(), zero_value(field.ty, types));
            }
        }
    }

    Ok(Value::Object(out))
}

/// A field of a record as it appears on the wire: skipped fields are left out and flattened
/// records are merged into their parent.
struct FieldShape<'a> {
    name: &'a str,
    ty: &'a DataType,
}

fn named_fields<'a>(fields: &'a NamedFields, types: &'a TypeMap) -> Vec<FieldShape<'a>> {
    let mut out = Vec::new();
    collect_fields(fields, types, &mut out);
    out
}

fn collect_fields<'a>(
    fields: &'a NamedFields,
    types: &'a TypeMap,
    out: &mut Vec<FieldShape<'a>>,
) {
    for (name, field) in fields.fields() {
        let Some(ty) = field.ty() else {
            continue;
        };

        if field.flatten() {
            if let Some(DataType::Struct(s)) = shape::resolve(ty, types) {
                if let StructFields::Named(inner) = s.fields() {
                    collect_fields(inner, types, out);
                    continue;
                }
            }
        }

        out.push(FieldShape { name: &**name, ty });
    }
}

fn unnamed(fields: &[Field]) -> Vec<&DataType> {
    fields.iter().filter_map(Field::ty).collect()
}

/// serde only lets `Option` fields be left out without a default. Everything else is filled in
/// with its zero value.
fn may_be_missing(ty: &DataType, types: &TypeMap) -> bool {
    matches!(shape::resolve(ty, types), Some(DataType::Nullable(_)))
}

fn is_numeric(p: &PrimitiveType) -> bool {
    shape::is_integer(p) || shape::is_float(p)
}

fn cast_number(n: &Number, p: &PrimitiveType) -> Value {
    macro_rules! cast {
        ($t:ty) => {
            if let Some(i) = n.as_i64() {
                Value::from(i as $t)
            } else if let Some(u) = n.as_u64() {
                Value::from(u as $t)
            } else {
                Value::from(n.as_f64().unwrap_or_default() as $t)
            }
        };
    }

    match p {
        PrimitiveType::i8 => cast!(i8),
        PrimitiveType::i16 => cast!(i16),
        PrimitiveType::i32 => cast!(i32),
        PrimitiveType::i64 | PrimitiveType::i128 => cast!(i64),
        PrimitiveType::isize => cast!(isize),
        PrimitiveType::u8 => cast!(u8),
        PrimitiveType::u16 => cast!(u16),
        PrimitiveType::u32 => cast!(u32),
        PrimitiveType::u64 | PrimitiveType::u128 => cast!(u64),
        PrimitiveType::usize => cast!(usize),
        PrimitiveType::f32 => cast!(f32),
        PrimitiveType::f64 => cast!(f64),
        _ => Value::Number(n.clone()),
    }
}

/// The generic kind of a decoded value.
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Whether `value` can be deserialized into the type described by `ty` as is.
pub fn conforms(value: &Value, ty: &DataType, types: &TypeMap) -> bool {
    let Some(ty) = shape::resolve(ty, types) else {
        return false;
    };

    match (ty, value) {
        (DataType::Any | DataType::Unknown | DataType::Generic(_), _) => true,
        (DataType::Primitive(p), value) => primitive_conforms(value, p),
        (DataType::Nullable(_), Value::Null) => true,
        (DataType::Nullable(inner), value) => conforms(value, inner, types),
        (DataType::List(list), Value::Array(items)) => {
            items.iter().all(|item| conforms(item, list.ty(), types))
        }
        (DataType::Map(map), Value::Object(entries)) => entries
            .values()
            .all(|v| conforms(v, map.value_ty(), types)),
        (DataType::Tuple(tuple), Value::Null) => tuple.elements().is_empty(),
        (DataType::Tuple(tuple), Value::Array(items)) => {
            tuple.elements().len() == items.len()
                && items
                    .iter()
                    .zip(tuple.elements().iter())
                    .all(|(item, ty)| conforms(item, ty, types))
        }
        (DataType::Struct(s), value) => struct_conforms(value, s, types),
        (DataType::Enum(e), value) => enum_conforms(value, e, types),
        _ => false,
    }
}

fn primitive_conforms(value: &Value, p: &PrimitiveType) -> bool {
    match (p, value) {
        (PrimitiveType::bool, Value::Bool(_)) => true,
        (PrimitiveType::String, Value::String(_)) => true,
        (PrimitiveType::char, Value::String(s)) => s.chars().count() == 1,
        (p, Value::Number(_)) if shape::is_float(p) => true,
        (p, Value::Number(n)) if shape::is_integer(p) => integer_fits(n, p),
        _ => false,
    }
}

fn integer_fits(n: &Number, p: &PrimitiveType) -> bool {
    let v = if let Some(i) = n.as_i64() {
        i128::from(i)
    } else if let Some(u) = n.as_u64() {
        i128::from(u)
    } else {
        return false;
    };

    let (min, max): (i128, i128) = match p {
        PrimitiveType::i8 => (i8::MIN.into(), i8::MAX.into()),
        PrimitiveType::i16 => (i16::MIN.into(), i16::MAX.into()),
        PrimitiveType::i32 => (i32::MIN.into(), i32::MAX.into()),
        PrimitiveType::i64 => (i64::MIN.into(), i64::MAX.into()),
        PrimitiveType::isize => (isize::MIN as i128, isize::MAX as i128),
        PrimitiveType::i128 => (i128::MIN, i128::MAX),
        PrimitiveType::u8 => (0, u8::MAX.into()),
        PrimitiveType::u16 => (0, u16::MAX.into()),
        PrimitiveType::u32 => (0, u32::MAX.into()),
        PrimitiveType::u64 => (0, u64::MAX.into()),
        PrimitiveType::usize => (0, usize::MAX as i128),
        PrimitiveType::u128 => (0, i128::MAX),
        _ => return false,
    };

    (min..=max).contains(&v)
}

fn struct_conforms(value: &Value, s: &StructType, types: &TypeMap) -> bool {
    match (s.fields(), value) {
        (StructFields::Unit, value) => value.is_null(),
        (StructFields::Unnamed(fields), value) => {
            unnamed_conforms(value, &unnamed(fields.fields()), types)
        }
        (StructFields::Named(fields), Value::Object(map)) => {
            fields_conform(map, &named_fields(fields, types), types)
        }
        _ => false,
    }
}

// A single field is a newtype and has the representation of its field.
fn unnamed_conforms(value: &Value, tys: &[&DataType], types: &TypeMap) -> bool {
    match (tys, value) {
        ([ty], value) => conforms(value, ty, types),
        (tys, Value::Array(items)) => {
            tys.len() == items.len()
                && items
                    .iter()
                    .zip(tys.iter())
                    .all(|(item, ty)| conforms(item, ty, types))
        }
        _ => false,
    }
}

fn fields_conform(map: &Map<String, Value>, fields: &[FieldShape<'_>], types: &TypeMap) -> bool {
    fields.iter().all(|field| match map.get(field.name) {
        Some(value) => conforms(value, field.ty, types),
        None => may_be_missing(field.ty, types),
    })
}

fn variants<'a>(e: &'a EnumType) -> impl Iterator<Item = (&'a str, &'a EnumVariant)> + 'a {
    e.variants()
        .iter()
        .filter(|(_, variant)| !variant.skip())
        .map(|(name, variant)| (&**name, variant))
}

fn variant_conforms(content: &Value, variant: &EnumVariant, types: &TypeMap) -> bool {
    match (variant.inner(), content) {
        (EnumVariants::Unit, content) => content.is_null(),
        (EnumVariants::Unnamed(fields), content) => {
            unnamed_conforms(content, &unnamed(fields.fields()), types)
        }
        (EnumVariants::Named(fields), Value::Object(map)) => {
            fields_conform(map, &named_fields(fields, types), types)
        }
        _ => false,
    }
}

fn enum_conforms(value: &Value, e: &EnumType, types: &TypeMap) -> bool {
    let find = |name: &str| {
        variants(e)
            .find(|(variant, _)| *variant == name)
            .map(|(_, variant)| variant)
    };

    match (e.repr(), value) {
        (EnumRepr::External, Value::String(name)) => matches!(
            find(name.as_str()).map(EnumVariant::inner),
            Some(EnumVariants::Unit)
        ),
        (EnumRepr::External, Value::Object(map)) if map.len() == 1 => map
            .iter()
            .next()
            .and_then(|(name, content)| Some((find(name.as_str())?, content)))
            .is_some_and(|(variant, content)| variant_conforms(content, variant, types)),
        (EnumRepr::Internal { tag, .. }, Value::Object(map)) => {
            let Some(variant) = map
                .get(&**tag)
                .and_then(Value::as_str)
                .and_then(|name| find(name))
            else {
                return false;
            };

            match variant.inner() {
                EnumVariants::Unit => true,
                EnumVariants::Named(fields) => {
                    fields_conform(map, &named_fields(fields, types), types)
                }
                EnumVariants::Unnamed(fields) => match unnamed(fields.fields()).as_slice() {
                    [ty] => conforms(value, ty, types),
                    _ => false,
                },
            }
        }
        (EnumRepr::Adjacent { tag, content, .. }, Value::Object(map)) => {
            let Some(variant) = map
                .get(&**tag)
                .and_then(Value::as_str)
                .and_then(|name| find(name))
            else {
                return false;
            };

            variant_conforms(map.get(&**content).unwrap_or(&Value::Null), variant, types)
        }
        (EnumRepr::Untagged, value) => {
            variants(e).any(|(_, variant)| variant_conforms(value, variant, types))
        }
        _ => false,
    }
}

/// The value a missing payload is replaced with: numbers are `0`, strings are empty, lists and
/// maps are empty, records have every field at its zero value and enums use their first unit variant.
pub fn zero_value(ty: &DataType, types: &TypeMap) -> Value {
    zero(ty, types, &mut Vec::new())
}

fn zero(ty: &DataType, types: &TypeMap, visiting: &mut Vec<SpectaID>) -> Value {
    match ty {
        DataType::Primitive(PrimitiveType::bool) => Value::Bool(false),
        DataType::Primitive(PrimitiveType::char) => Value::from("\0"),
        DataType::Primitive(PrimitiveType::String) => Value::from(""),
        DataType::Primitive(p) if shape::is_float(p) => Value::from(0.0),
        DataType::Primitive(p) if shape::is_integer(p) => Value::from(0),
        DataType::List(_) => Value::Array(vec![]),
        DataType::Map(_) => Value::Object(Map::new()),
        DataType::Tuple(tuple) if tuple.elements().is_empty() => Value::Null,
        DataType::Tuple(tuple) => Value::Array(
            tuple
                .elements()
                .iter()
                .map(|ty| zero(ty, types, visiting))
                .collect(),
        ),
        DataType::Struct(s) => zero_struct(s, types, visiting),
        DataType::Enum(e) => zero_enum(e, types, visiting),
        DataType::Reference(r) => {
            let sid = r.sid();
            // A type which contains itself terminates at `null`.
            if visiting.contains(&sid) {
                return Value::Null;
            }

            visiting.push(sid);
            let value = types
                .get(sid)
                .map(|def| zero(&def.inner, types, visiting))
                .unwrap_or(Value::Null);
            visiting.pop();
            value
        }
        _ => Value::Null,
    }
}

fn zero_struct(s: &StructType, types: &TypeMap, visiting: &mut Vec<SpectaID>) -> Value {
    match s.fields() {
        StructFields::Unit => Value::Null,
        StructFields::Unnamed(fields) => zero_unnamed(&unnamed(fields.fields()), types, visiting),
        StructFields::Named(fields) => zero_fields(&named_fields(fields, types), types, visiting),
    }
}

fn zero_unnamed(tys: &[&DataType], types: &TypeMap, visiting: &mut Vec<SpectaID>) -> Value {
    match tys {
        [ty] => zero(ty, types, visiting),
        tys => Value::Array(tys.iter().map(|ty| zero(ty, types, visiting)).collect()),
    }
}

fn zero_fields(
    fields: &[FieldShape<'_>],
    types: &TypeMap,
    visiting: &mut Vec<SpectaID>,
) -> Value {
    Value::Object(
        fields
            .iter()
            .filter(|field| !may_be_missing(field.ty, types))
            .map(|field| (field.name.to_string(), zero(field.ty, types, visiting)))
            .collect(),
    )
}

fn zero_enum(e: &EnumType, types: &TypeMap, visiting: &mut Vec<SpectaID>) -> Value {
    let Some((name, variant)) = variants(e)
        .find(|(_, variant)| matches!(variant.inner(), EnumVariants::Unit))
        .or_else(|| variants(e).next())
    else {
        return Value::Null;
    };

    let content = match variant.inner() {
        EnumVariants::Unit => None,
        EnumVariants::Unnamed(fields) => {
            Some(zero_unnamed(&unnamed(fields.fields()), types, visiting))
        }
        EnumVariants::Named(fields) => {
            Some(zero_fields(&named_fields(fields, types), types, visiting))
        }
    };

    match (e.repr(), content) {
        (EnumRepr::External, None) => Value::from(name),
        (EnumRepr::External, Some(content)) => {
            Value::Object(Map::from_iter([(name.to_string(), content)]))
        }
        (EnumRepr::Internal { tag, .. }, Some(Value::Object(mut map))) => {
            map.insert(tag.to_string(), Value::from(name));
            Value::Object(map)
        }
        (EnumRepr::Internal { tag, .. }, _) => {
            Value::Object(Map::from_iter([(tag.to_string(), Value::from(name))]))
        }
        (EnumRepr::Adjacent { tag, content: key, .. }, content) => {
            let mut map = Map::from_iter([(tag.to_string(), Value::from(name))]);
            if let Some(content) = content {
                map.insert(key.to_string(), content);
            }
            Value::Object(map)
        }
        (_, content) => content.unwrap_or(Value::Null),
    }
}
