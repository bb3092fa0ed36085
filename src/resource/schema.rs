//! Body schema
//!
//! Declarative validation for request bodies. Validation failures
//! produce per-field human-readable messages which the error handler
//! renders as a 422.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Field types accepted in a body schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Uuid,
    String,
    Number,
    Boolean,
    Json,
}

impl FieldType {
    /// Whether a JSON value conforms to this type.
    pub fn validate(&self, value: &Value) -> bool {
        match self {
            FieldType::Uuid => value
                .as_str()
                .map(|s| Uuid::parse_str(s).is_ok())
                .unwrap_or(false),
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Json => value.is_object() || value.is_array(),
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            FieldType::Uuid => "uuid",
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Json => "object or array",
        }
    }
}

/// One field in a body schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    #[serde(default)]
    pub required: bool,
}

impl FieldDef {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }
}

/// Schema a decode step validates the raw body against. Unknown keys
/// are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodySchema {
    pub fields: Vec<FieldDef>,
}

impl BodySchema {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }

    /// Validate a body, returning the typed payload or every violation
    /// found.
    pub fn validate(&self, body: &Value) -> Result<Value, Vec<String>> {
        let Some(object) = body.as_object() else {
            return Err(vec!["body must be a JSON object".to_string()]);
        };

        let mut messages = Vec::new();
        for field in &self.fields {
            match object.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        messages.push(format!("missing required field `{}`", field.name));
                    }
                }
                Some(value) => {
                    if !field.field_type.validate(value) {
                        messages.push(format!(
                            "field `{}`: expected {}",
                            field.name,
                            field.field_type.expected()
                        ));
                    }
                }
            }
        }
        for key in object.keys() {
            if !self.fields.iter().any(|f| &f.name == key) {
                messages.push(format!("unknown field `{}`", key));
            }
        }

        if messages.is_empty() {
            Ok(body.clone())
        } else {
            Err(messages)
        }
    }
}
