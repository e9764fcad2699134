//! Route data schema and per-field validation.
//!
//! A deliberately small subset of JSON Schema: an object with an optional
//! `properties` map whose entries may declare `type` and `enum`. Other
//! keywords are preserved but not enforced.

use std::collections::BTreeMap;
use std::fmt;

use parley_types::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Null,
}

impl SchemaType {
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaType::String => "string",
            SchemaType::Number => "number",
            SchemaType::Integer => "integer",
            SchemaType::Boolean => "boolean",
            SchemaType::Array => "array",
            SchemaType::Object => "object",
            SchemaType::Null => "null",
        }
    }

    /// `integer` accepts any number with a zero fractional part.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            SchemaType::String => value.is_string(),
            SchemaType::Number => value.is_number(),
            SchemaType::Integer => match value {
                Value::Number(n) => {
                    n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
                }
                _ => false,
            },
            SchemaType::Boolean => value.is_boolean(),
            SchemaType::Array => value.is_array(),
            SchemaType::Object => value.is_object(),
            SchemaType::Null => value.is_null(),
        }
    }

    /// The runtime type name of `value`.
    pub fn name_of(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<SchemaType>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Keywords not enforced here (`format`, `minimum`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PropertySchema {
    pub fn typed(schema_type: SchemaType) -> Self {
        Self {
            schema_type: Some(schema_type),
            ..Default::default()
        }
    }

    pub fn with_enum(mut self, allowed: impl IntoIterator<Item = Value>) -> Self {
        self.allowed = Some(allowed.into_iter().collect());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// JSON Schema form of this property, defaulting the type to `string`.
    pub fn to_json_schema(&self) -> Value {
        let mut out = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        out.entry("type")
            .or_insert_with(|| Value::String(SchemaType::String.as_str().into()));
        Value::Object(out)
    }
}

fn object_type() -> SchemaType {
    SchemaType::Object
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "type", default = "object_type")]
    pub schema_type: SchemaType,
    /// `None` means fields are not checked at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, PropertySchema>>,
}

/// One field that failed schema checks. Never fatal to a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub value: Value,
    pub message: String,
    pub schema_path: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.schema_path)
    }
}

impl Schema {
    pub fn object<I, S>(properties: I) -> Self
    where
        I: IntoIterator<Item = (S, PropertySchema)>,
        S: Into<String>,
    {
        Self {
            schema_type: SchemaType::Object,
            properties: Some(
                properties
                    .into_iter()
                    .map(|(name, prop)| (name.into(), prop))
                    .collect(),
            ),
        }
    }

    /// An object schema that accepts any field.
    pub fn open() -> Self {
        Self {
            schema_type: SchemaType::Object,
            properties: None,
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn property(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.as_ref()?.get(name)
    }

    /// Check one present field. Returns every problem found.
    pub fn validate_field(&self, field: &str, value: &Value) -> Vec<ValidationError> {
        let Some(properties) = &self.properties else {
            return Vec::new();
        };
        let error = |message: String, path: String| ValidationError {
            field: field.to_string(),
            value: value.clone(),
            message,
            schema_path: path,
        };

        let Some(prop) = properties.get(field) else {
            return vec![error(
                format!("Field '{field}' is not defined in schema"),
                format!("/properties/{field}"),
            )];
        };

        let mut errors = Vec::new();
        if let Some(expected) = prop.schema_type {
            if !expected.matches(value) {
                errors.push(error(
                    format!(
                        "Field '{field}' expected {expected}, got {}",
                        SchemaType::name_of(value)
                    ),
                    format!("/properties/{field}/type"),
                ));
            }
        }
        if let Some(allowed) = &prop.allowed {
            if !allowed.contains(value) {
                errors.push(error(
                    format!("Field '{field}' must be one of {}", Value::Array(allowed.clone())),
                    format!("/properties/{field}/enum"),
                ));
            }
        }
        errors
    }
}
