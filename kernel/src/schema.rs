//! A minimal logical type system for Delta schemas.
//!
//! This is intentionally much smaller than a full Arrow-backed schema: the transaction core only
//! needs enough of the type system to validate partition columns, run the Iceberg-compat type
//! whitelist / type-widening checks, and round-trip `Metadata.schema_string`. Physical data typing
//! (Arrow <-> Parquet mapping) belongs to the read/scan path, which is out of scope here.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{DeltaResult, Error};

pub type SchemaRef = Arc<StructType>;

/// Scalar (leaf) types that can appear in a Delta schema.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    String,
    Long,
    Integer,
    Short,
    Byte,
    Float,
    Double,
    Boolean,
    Binary,
    Date,
    Timestamp,
    TimestampNtz,
    Decimal { precision: u8, scale: u8 },
    /// Not part of the Delta protocol's own type list; recognized here only so the Iceberg V3
    /// compat check (which permits it) and V2 check (which forbids it) have something to exercise.
    Void,
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimitiveType::String => write!(f, "string"),
            PrimitiveType::Long => write!(f, "long"),
            PrimitiveType::Integer => write!(f, "integer"),
            PrimitiveType::Short => write!(f, "short"),
            PrimitiveType::Byte => write!(f, "byte"),
            PrimitiveType::Float => write!(f, "float"),
            PrimitiveType::Double => write!(f, "double"),
            PrimitiveType::Boolean => write!(f, "boolean"),
            PrimitiveType::Binary => write!(f, "binary"),
            PrimitiveType::Date => write!(f, "date"),
            PrimitiveType::Timestamp => write!(f, "timestamp"),
            PrimitiveType::TimestampNtz => write!(f, "timestamp_ntz"),
            PrimitiveType::Decimal { precision, scale } => {
                write!(f, "decimal({precision},{scale})")
            }
            PrimitiveType::Void => write!(f, "void"),
        }
    }
}

impl FromStr for PrimitiveType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "string" => PrimitiveType::String,
            "long" => PrimitiveType::Long,
            "integer" => PrimitiveType::Integer,
            "short" => PrimitiveType::Short,
            "byte" => PrimitiveType::Byte,
            "float" => PrimitiveType::Float,
            "double" => PrimitiveType::Double,
            "boolean" => PrimitiveType::Boolean,
            "binary" => PrimitiveType::Binary,
            "date" => PrimitiveType::Date,
            "timestamp" => PrimitiveType::Timestamp,
            "timestamp_ntz" => PrimitiveType::TimestampNtz,
            "void" => PrimitiveType::Void,
            other if other.starts_with("decimal(") && other.ends_with(')') => {
                let inner = &other[8..other.len() - 1];
                let (p, s) = inner
                    .split_once(',')
                    .ok_or_else(|| Error::invalid_schema(format!("bad decimal type: {other}")))?;
                let precision = p
                    .trim()
                    .parse()
                    .map_err(|_| Error::invalid_schema(format!("bad decimal precision: {other}")))?;
                let scale = s
                    .trim()
                    .parse()
                    .map_err(|_| Error::invalid_schema(format!("bad decimal scale: {other}")))?;
                PrimitiveType::Decimal { precision, scale }
            }
            other => return Err(Error::invalid_schema(format!("unknown primitive type: {other}"))),
        })
    }
}

/// A (possibly nested) Delta data type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataType {
    Primitive(PrimitiveType),
    Array(Box<ArrayType>),
    Struct(Box<StructType>),
    Map(Box<MapType>),
}

impl DataType {
    pub const STRING: DataType = DataType::Primitive(PrimitiveType::String);
    pub const LONG: DataType = DataType::Primitive(PrimitiveType::Long);
    pub const INTEGER: DataType = DataType::Primitive(PrimitiveType::Integer);
    pub const BOOLEAN: DataType = DataType::Primitive(PrimitiveType::Boolean);

    pub fn decimal(precision: u8, scale: u8) -> Self {
        DataType::Primitive(PrimitiveType::Decimal { precision, scale })
    }

    /// True if this is a `Primitive` variant (i.e. a scalar leaf type).
    pub fn is_scalar(&self) -> bool {
        matches!(self, DataType::Primitive(_))
    }

    fn from_value(value: &Value) -> DeltaResult<Self> {
        match value {
            Value::String(s) => Ok(DataType::Primitive(s.parse()?)),
            Value::Object(map) => {
                let type_tag = map
                    .get("type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::invalid_schema("missing 'type' tag in schema node"))?;
                match type_tag {
                    "struct" => Ok(DataType::Struct(Box::new(StructType::from_value(value)?))),
                    "array" => Ok(DataType::Array(Box::new(ArrayType::from_value(value)?))),
                    "map" => Ok(DataType::Map(Box::new(MapType::from_value(value)?))),
                    other => Err(Error::invalid_schema(format!("unknown type tag: {other}"))),
                }
            }
            other => Err(Error::invalid_schema(format!(
                "expected a schema type, found: {other}"
            ))),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            DataType::Primitive(p) => Value::String(p.to_string()),
            DataType::Array(a) => a.to_value(),
            DataType::Struct(s) => s.to_value(),
            DataType::Map(m) => m.to_value(),
        }
    }

    /// Recursively visit every leaf (scalar) type reachable from this type.
    pub fn visit_leaves<'a>(&'a self, f: &mut impl FnMut(&'a PrimitiveType)) {
        match self {
            DataType::Primitive(p) => f(p),
            DataType::Array(a) => a.element_type.visit_leaves(f),
            DataType::Map(m) => {
                m.key_type.visit_leaves(f);
                m.value_type.visit_leaves(f);
            }
            DataType::Struct(s) => {
                for field in s.fields() {
                    field.data_type.visit_leaves(f);
                }
            }
        }
    }
}

impl Serialize for DataType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DataType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        DataType::from_value(&value).map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArrayType {
    pub element_type: DataType,
    pub contains_null: bool,
}

impl ArrayType {
    pub fn new(element_type: DataType, contains_null: bool) -> Self {
        Self {
            element_type,
            contains_null,
        }
    }

    fn from_value(value: &Value) -> DeltaResult<Self> {
        let element_type = DataType::from_value(
            value
                .get("elementType")
                .ok_or_else(|| Error::invalid_schema("array missing elementType"))?,
        )?;
        let contains_null = value
            .get("containsNull")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        Ok(Self {
            element_type,
            contains_null,
        })
    }

    fn to_value(&self) -> Value {
        serde_json::json!({
            "type": "array",
            "elementType": self.element_type.to_value(),
            "containsNull": self.contains_null,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapType {
    pub key_type: DataType,
    pub value_type: DataType,
    pub value_contains_null: bool,
}

impl MapType {
    pub fn new(key_type: DataType, value_type: DataType, value_contains_null: bool) -> Self {
        Self {
            key_type,
            value_type,
            value_contains_null,
        }
    }

    fn from_value(value: &Value) -> DeltaResult<Self> {
        let key_type = DataType::from_value(
            value
                .get("keyType")
                .ok_or_else(|| Error::invalid_schema("map missing keyType"))?,
        )?;
        let value_type = DataType::from_value(
            value
                .get("valueType")
                .ok_or_else(|| Error::invalid_schema("map missing valueType"))?,
        )?;
        let value_contains_null = value
            .get("valueContainsNull")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        Ok(Self {
            key_type,
            value_type,
            value_contains_null,
        })
    }

    fn to_value(&self) -> Value {
        serde_json::json!({
            "type": "map",
            "keyType": self.key_type.to_value(),
            "valueType": self.value_type.to_value(),
            "valueContainsNull": self.value_contains_null,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructField {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub metadata: IndexMap<String, Value>,
}

impl StructField {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
            metadata: IndexMap::new(),
        }
    }

    pub fn not_null(name: impl Into<String>, data_type: DataType) -> Self {
        Self::new(name, data_type, false)
    }

    pub fn nullable(name: impl Into<String>, data_type: DataType) -> Self {
        Self::new(name, data_type, true)
    }

    fn from_value(value: &Value) -> DeltaResult<Self> {
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_schema("field missing name"))?
            .to_string();
        let data_type = DataType::from_value(
            value
                .get("type")
                .ok_or_else(|| Error::invalid_schema("field missing type"))?,
        )?;
        let nullable = value
            .get("nullable")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let metadata = value
            .get("metadata")
            .and_then(Value::as_object)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        Ok(Self {
            name,
            data_type,
            nullable,
            metadata,
        })
    }

    fn to_value(&self) -> Value {
        serde_json::json!({
            "name": self.name,
            "type": self.data_type.to_value(),
            "nullable": self.nullable,
            "metadata": Value::Object(self.metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        })
    }
}

/// An ordered collection of fields. Field order matters for Parquet physical layout, so this
/// preserves insertion order (an [`IndexMap`], not a `HashMap`).
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct StructType {
    fields: IndexMap<String, StructField>,
}

impl StructType {
    pub fn new(fields: impl IntoIterator<Item = StructField>) -> Self {
        Self {
            fields: fields.into_iter().map(|f| (f.name.clone(), f)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &StructField> {
        self.fields.values()
    }

    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Every leaf (scalar) type reachable from this schema, in field order.
    pub fn leaf_types(&self) -> Vec<PrimitiveType> {
        let mut out = Vec::new();
        for field in self.fields() {
            field.data_type.visit_leaves(&mut |p| out.push(p.clone()));
        }
        out
    }

    fn from_value(value: &Value) -> DeltaResult<Self> {
        let fields = value
            .get("fields")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::invalid_schema("struct missing fields"))?;
        let fields = fields
            .iter()
            .map(StructField::from_value)
            .collect::<DeltaResult<Vec<_>>>()?;
        Ok(Self::new(fields))
    }

    fn to_value(&self) -> Value {
        serde_json::json!({
            "type": "struct",
            "fields": self.fields().map(StructField::to_value).collect::<Vec<_>>(),
        })
    }

    pub fn to_schema_string(&self) -> String {
        self.to_value().to_string()
    }

    pub fn parse(schema_string: &str) -> DeltaResult<Self> {
        let value: Value = serde_json::from_str(schema_string)?;
        Self::from_value(&value)
    }

    /// Compares `self` (the proposed new schema) against `original`, returning every changed
    /// leaf's `(old, new)` primitive type pair if the two schemas are otherwise structurally
    /// identical — same field names, order, and nullability, same nesting — or `None` if they
    /// differ in any other way (a field added, removed, reordered, renullabled, or a non-leaf
    /// type change). Only a pure leaf-type change is reported this way; anything else is schema
    /// evolution this crate doesn't attempt to reconcile on its own.
    pub fn type_widening_changes(&self, original: &StructType) -> Option<Vec<(PrimitiveType, PrimitiveType)>> {
        if self.fields.len() != original.fields.len() {
            return None;
        }
        let mut changes = Vec::new();
        for (new_field, old_field) in self.fields().zip(original.fields()) {
            if new_field.name != old_field.name || new_field.nullable != old_field.nullable {
                return None;
            }
            collect_type_change(&old_field.data_type, &new_field.data_type, &mut changes)?;
        }
        Some(changes)
    }
}

fn collect_type_change(
    old: &DataType,
    new: &DataType,
    changes: &mut Vec<(PrimitiveType, PrimitiveType)>,
) -> Option<()> {
    match (old, new) {
        (DataType::Primitive(o), DataType::Primitive(n)) => {
            if o != n {
                changes.push((o.clone(), n.clone()));
            }
            Some(())
        }
        (DataType::Array(o), DataType::Array(n)) if o.contains_null == n.contains_null => {
            collect_type_change(&o.element_type, &n.element_type, changes)
        }
        (DataType::Map(o), DataType::Map(n)) if o.value_contains_null == n.value_contains_null => {
            collect_type_change(&o.key_type, &n.key_type, changes)?;
            collect_type_change(&o.value_type, &n.value_type, changes)
        }
        (DataType::Struct(o), DataType::Struct(n)) => {
            let inner = n.type_widening_changes(o)?;
            changes.extend(inner);
            Some(())
        }
        _ => None,
    }
}

impl Serialize for StructType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StructType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        StructType::from_value(&value).map_err(serde::de::Error::custom)
    }
}
