//! Helpers over specta's [`DataType`] shared by payload coercion and schema export.

use specta::{
    datatype::{DataType, PrimitiveType},
    Generics, Type, TypeMap,
};

/// The shape of `T`. Named types it refers to are registered in `types`.
pub fn inline<T: Type>(types: &mut TypeMap) -> DataType {
    T::inline(types, Generics::Definition)
}

/// Follow a reference to the definition it points at. Any other type is returned as is.
pub fn resolve<'a>(ty: &'a DataType, types: &'a TypeMap) -> Option<&'a DataType> {
    match ty {
        DataType::Reference(r) => types.get(r.sid()).map(|def| &def.inner),
        ty => Some(ty),
    }
}

/// A Rust flavoured name for a shape, `Vec<Todo>`, `Option<u8>` or `(i32, String)`.
pub fn display(ty: &DataType) -> String {
    match ty {
        DataType::Primitive(p) => format!("{p:?}"),
        DataType::Literal(l) => format!("{l:?}"),
        DataType::Nullable(inner) => format!("Option<{}>", display(inner)),
        DataType::List(list) => format!("Vec<{}>", display(list.ty())),
        DataType::Map(map) => format!(
            "HashMap<{}, {}>",
            display(map.key_ty()),
            display(map.value_ty())
        ),
        DataType::Tuple(tuple) => format!(
            "({})",
            tuple
                .elements()
                .iter()
                .map(display)
                .collect::<Vec<_>>()
                .join(", ")
        ),
        DataType::Struct(s) => s.name().to_string(),
        DataType::Enum(e) => e.name().to_string(),
        DataType::Reference(r) => r.name().to_string(),
        _ => "any".to_string(),
    }
}

pub(crate) fn is_integer(p: &PrimitiveType) -> bool {
    matches!(
        p,
        PrimitiveType::i8
            | PrimitiveType::i16
            | PrimitiveType::i32
            | PrimitiveType::i64
            | PrimitiveType::i128
            | PrimitiveType::isize
            | PrimitiveType::u8
            | PrimitiveType::u16
            | PrimitiveType::u32
            | PrimitiveType::u64
            | PrimitiveType::u128
            | PrimitiveType::usize
    )
}

pub(crate) fn is_float(p: &PrimitiveType) -> bool {
    matches!(p, PrimitiveType::f32 | PrimitiveType::f64)
}
