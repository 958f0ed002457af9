use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A row of the `BOOKS` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    /// Assigned by the warehouse, never changes
    pub id: i64,
    pub title: String,
    pub author: String,
    /// Publication year
    pub year: i32,
}

/// Body of create and full-replacement update requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateBook {
    pub title: String,
    pub author: String,
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub error: String,
}

/// Payload does not have the shape of a book.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid book payload: {} field error(s)", .errors.len())]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

impl ValidationError {
    fn single(field: &'static str, error: impl Into<String>) -> Self {
        Self {
            errors: vec![FieldError {
                field,
                error: error.into(),
            }],
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn text_field(
    body: &serde_json::Map<String, Value>,
    field: &'static str,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    match body.get(field) {
        Some(Value::String(text)) => Some(text.clone()),
        Some(other) => {
            errors.push(FieldError {
                field,
                error: format!("expected string, found {}", kind(other)),
            });
            None
        }
        None => {
            errors.push(FieldError {
                field,
                error: "field required".to_string(),
            });
            None
        }
    }
}

/// Integers, whole floats and numeric strings are read as a year, the way a
/// lax form binder would.
fn year_field(body: &serde_json::Map<String, Value>, errors: &mut Vec<FieldError>) -> Option<i32> {
    const FIELD: &str = "year";
    let error = match body.get(FIELD) {
        Some(Value::Number(number)) => match number.as_i64() {
            Some(whole) => match i32::try_from(whole) {
                Ok(year) => return Some(year),
                Err(_) => "integer out of range".to_string(),
            },
            None => match number.as_f64() {
                Some(float) if float.fract() != 0.0 => {
                    "expected integer, found fractional number".to_string()
                }
                Some(float) if float >= f64::from(i32::MIN) && float <= f64::from(i32::MAX) => {
                    return Some(float as i32)
                }
                _ => "integer out of range".to_string(),
            },
        },
        Some(Value::String(text)) => match text.trim().parse::<i32>() {
            Ok(year) => return Some(year),
            Err(_) => format!("expected integer, found string '{}'", text),
        },
        Some(other) => format!("expected integer, found {}", kind(other)),
        None => "field required".to_string(),
    };
    errors.push(FieldError {
        field: FIELD,
        error,
    });
    None
}

impl CreateBook {
    /// Check field types of a decoded JSON body. Every offending field is
    /// reported; unknown fields are ignored.
    pub fn from_value(body: &Value) -> Result<Self, ValidationError> {
        let Value::Object(body) = body else {
            return Err(ValidationError::single(
                "body",
                format!("expected object, found {}", kind(body)),
            ));
        };

        let mut errors = Vec::new();
        let title = text_field(body, "title", &mut errors);
        let author = text_field(body, "author", &mut errors);
        let year = year_field(body, &mut errors);

        match (title, author, year) {
            (Some(title), Some(author), Some(year)) => Ok(Self {
                title,
                author,
                year,
            }),
            _ => Err(ValidationError { errors }),
        }
    }
}
