//! Keyword-based validator/adjuster over [`Value`], plus the
//! producer/consumer compatibility check used when wiring a graph.
//!
//! A schema node is one of three shapes (primitive, object, array), and
//! every node carries a mandatory `type`. The remaining keywords belong to
//! their owning shape: `properties`/`required` to objects, `items` to
//! arrays. Each keyword checks an independent aspect, so evaluation order
//! is irrelevant.
//!
//! Errors carry a dotted/bracketed path built during recursive descent,
//! e.g. `.a[0].b: value out of range converting [int64] to [uint8]`.

use crate::error::Error;
use crate::value::convert::convert_numeric;
use crate::value::{Value, ValueType};

#[derive(Debug, Clone)]
pub struct Schema {
    kind: SchemaKind,
}

#[derive(Debug, Clone)]
enum SchemaKind {
    Primitive(ValueType),
    Object {
        properties: Vec<(String, Schema)>,
        required: Vec<String>,
    },
    Array {
        items: Box<Schema>,
    },
}

fn key_path(base: &str, key: &str) -> String {
    format!("{base}.{key}")
}

fn at(path: &str, err: Error) -> Error {
    if path.is_empty() { err } else { err.with_context(path) }
}

impl Schema {
    /// Build a schema from its definition value (an object with a `type`
    /// keyword). Nothing is partially applied: any malformation fails the
    /// whole construction.
    pub fn from_value(def: &Value) -> Result<Schema, Error> {
        Self::build(def, "")
    }

    pub fn from_json(node: &serde_json::Value) -> Result<Schema, Error> {
        Self::from_value(&Value::from_json(node))
    }

    pub fn from_json_str(text: &str) -> Result<Schema, Error> {
        Self::from_value(&Value::from_json_str(text)?)
    }

    fn build(def: &Value, path: &str) -> Result<Schema, Error> {
        if !def.is_object() {
            return Err(at(path, Error::invalid_argument("schema definition is not an object")));
        }

        let type_name = def
            .object_peek("type")
            .ok_or_else(|| at(path, Error::invalid_argument("schema has no 'type' keyword")))?
            .as_str()
            .ok_or_else(|| at(path, Error::invalid_argument("schema 'type' is not a string")))?;

        let schema_type = ValueType::from_name(type_name).ok_or_else(|| {
            at(path, Error::invalid_argument(format!("unknown schema type '{type_name}'")))
        })?;

        match schema_type {
            ValueType::Object => {
                let mut properties = Vec::new();
                if let Some(props) = def.object_peek("properties") {
                    let entries = props.as_object().ok_or_else(|| {
                        at(path, Error::invalid_argument("'properties' is not an object"))
                    })?;
                    for (name, child_def) in entries {
                        let child = Self::build(child_def, &key_path(path, name))?;
                        properties.push((name.clone(), child));
                    }
                }

                let mut required = Vec::new();
                if let Some(req) = def.object_peek("required") {
                    let names = req.as_array().ok_or_else(|| {
                        at(path, Error::invalid_argument("'required' is not an array"))
                    })?;
                    for name in names {
                        let name = name.as_str().ok_or_else(|| {
                            at(path, Error::invalid_argument("'required' entry is not a string"))
                        })?;
                        required.push(name.to_string());
                    }
                }

                Ok(Schema { kind: SchemaKind::Object { properties, required } })
            }

            ValueType::Array => {
                let items_def = def.object_peek("items").ok_or_else(|| {
                    at(path, Error::invalid_argument("array schema has no 'items' keyword"))
                })?;
                let items = Self::build(items_def, &format!("{path}[]"))?;
                Ok(Schema { kind: SchemaKind::Array { items: Box::new(items) } })
            }

            t => Ok(Schema { kind: SchemaKind::Primitive(t) }),
        }
    }

    pub fn schema_type(&self) -> ValueType {
        match &self.kind {
            SchemaKind::Primitive(t) => *t,
            SchemaKind::Object { .. } => ValueType::Object,
            SchemaKind::Array { .. } => ValueType::Array,
        }
    }

    /// Child schema of an object property, if declared.
    pub fn property(&self, name: &str) -> Option<&Schema> {
        match &self.kind {
            SchemaKind::Object { properties, .. } => {
                properties.iter().find(|(k, _)| k == name).map(|(_, s)| s)
            }
            _ => None,
        }
    }

    // -- validate ----------------------------------------------------------

    /// Check `value` against the schema without mutating it.
    ///
    /// A numeric value is admissible under a numeric schema type iff it
    /// converts losslessly; non-numeric types must match exactly. `invalid`
    /// values are always rejected.
    pub fn validate(&self, value: &Value) -> Result<(), Error> {
        self.validate_at(value, "")
    }

    fn validate_at(&self, value: &Value, path: &str) -> Result<(), Error> {
        match &self.kind {
            SchemaKind::Primitive(t) => admissible(value, *t, path),

            SchemaKind::Object { properties, required } => {
                admissible(value, ValueType::Object, path)?;
                for (name, child) in properties {
                    if let Some(cv) = value.object_peek(name) {
                        child.validate_at(cv, &key_path(path, name))?;
                    }
                }
                for name in required {
                    if value.object_peek(name).is_none() {
                        return Err(at(
                            path,
                            Error::generic(format!("required property '{name}' is absent")),
                        ));
                    }
                }
                Ok(())
            }

            SchemaKind::Array { items } => {
                admissible(value, ValueType::Array, path)?;
                for (i, item) in value.as_array().unwrap_or(&[]).iter().enumerate() {
                    items.validate_at(item, &format!("{path}[{i}]"))?;
                }
                Ok(())
            }
        }
    }

    // -- adjust ------------------------------------------------------------

    /// Mutate `value` so its tag matches the schema type, using the
    /// lossless numeric conversion rules, recursing into children.
    /// Idempotent when the tags already match.
    pub fn adjust(&self, value: &mut Value) -> Result<(), Error> {
        self.adjust_at(value, "")
    }

    fn adjust_at(&self, value: &mut Value, path: &str) -> Result<(), Error> {
        match &self.kind {
            SchemaKind::Primitive(t) => {
                if value.value_type() == *t {
                    return Ok(());
                }
                *value = convert_numeric(value, *t).map_err(|e| at(path, e))?;
                Ok(())
            }

            SchemaKind::Object { properties, .. } => {
                admissible(value, ValueType::Object, path)?;
                for (name, child) in properties {
                    if let Some(cv) = value.object_peek_mut(name) {
                        child.adjust_at(cv, &key_path(path, name))?;
                    }
                }
                Ok(())
            }

            SchemaKind::Array { items } => {
                admissible(value, ValueType::Array, path)?;
                if let Some(entries) = value.as_array_mut() {
                    for (i, item) in entries.iter_mut().enumerate() {
                        items.adjust_at(item, &format!("{path}[{i}]"))?;
                    }
                }
                Ok(())
            }
        }
    }

    // -- compatibility -----------------------------------------------------

    /// Check that a producer described by `self` can feed a consumer
    /// described by `target`:
    /// 1. the source type's value domain is contained in the target's;
    /// 2. properties present on both sides are pairwise compatible;
    /// 3. every name the target requires is also required by the source;
    /// 4. array items recurse.
    pub fn is_compatible_with(&self, target: &Schema) -> Result<(), Error> {
        self.compat_at(target, "")
    }

    fn compat_at(&self, target: &Schema, path: &str) -> Result<(), Error> {
        let (st, tt) = (self.schema_type(), target.schema_type());
        if !type_is_compatible(st, tt) {
            return Err(at(
                path,
                Error::generic(format!(
                    "type is incompatible, source is [{st}], but target is [{tt}]"
                )),
            ));
        }

        match (&self.kind, &target.kind) {
            (
                SchemaKind::Object { properties: sp, required: sr },
                SchemaKind::Object { properties: tp, required: tr },
            ) => {
                for (name, tchild) in tp {
                    if let Some((_, schild)) = sp.iter().find(|(k, _)| k == name) {
                        schild.compat_at(tchild, &key_path(path, name))?;
                    }
                }
                for name in tr {
                    if !sr.contains(name) {
                        return Err(at(
                            path,
                            Error::generic(format!(
                                "property '{name}' is required by the target but not guaranteed by the source"
                            )),
                        ));
                    }
                }
                Ok(())
            }

            (SchemaKind::Array { items: si }, SchemaKind::Array { items: ti }) => {
                si.compat_at(ti, &format!("{path}[]"))
            }

            _ => Ok(()),
        }
    }
}

/// Value-domain containment: `src` is compatible with `dst` iff every value
/// of `src` is representable in `dst`. Strings, bools, buffers and handles
/// are only compatible with themselves. Transitive by construction.
pub fn type_is_compatible(src: ValueType, dst: ValueType) -> bool {
    use ValueType::*;

    if src == Invalid || dst == Invalid {
        return false;
    }
    if src == dst {
        return true;
    }

    match (src, dst) {
        (Int8, Int16 | Int32 | Int64) => true,
        (Int16, Int32 | Int64) => true,
        (Int32, Int64) => true,

        (Uint8, Uint16 | Uint32 | Uint64 | Int16 | Int32 | Int64) => true,
        (Uint16, Uint32 | Uint64 | Int32 | Int64) => true,
        (Uint32, Uint64 | Int64) => true,

        // Exactly representable in the float's mantissa.
        (Int8 | Int16 | Uint8 | Uint16, Float32 | Float64) => true,
        (Int32 | Uint32, Float64) => true,
        (Float32, Float64) => true,

        _ => false,
    }
}

fn admissible(value: &Value, schema_type: ValueType, path: &str) -> Result<(), Error> {
    let vt = value.value_type();
    if vt == schema_type && vt != ValueType::Invalid {
        return Ok(());
    }
    if vt.is_number() && schema_type.is_number() {
        // Value-aware: the concrete value must convert losslessly.
        return convert_numeric(value, schema_type)
            .map(|_| ())
            .map_err(|e| at(path, e));
    }
    Err(at(
        path,
        Error::generic(format!(
            "the value type does not match the schema type, given: {vt}, expected: {schema_type}"
        )),
    ))
}
