// Copyright 2025 The Drasi Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Field-type-aware validation and coercion of documents against a model.
//!
//! The schema is permissive: attributes the model does not declare are passed
//! through untouched. Declared attributes are coerced to their canonical
//! representation:
//!
//! | type   | accepted input                              | canonical form              |
//! |--------|---------------------------------------------|-----------------------------|
//! | `bool` | bool, number (`> 0` is true), "true"/"false" | JSON bool                  |
//! | `time` | RFC3339 string, epoch milliseconds          | RFC3339 UTC, millisecond precision |
//! | others | anything                                    | unchanged                   |

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Number, Value};

use crate::error::{AutorestError, Result};
use crate::model::{Document, Field, FieldType, Model};

/// Validate `document` against `model`, returning the coerced document.
pub fn validate(model: &Model, mut document: Document) -> Result<Document> {
    for field in &model.fields {
        let Some(value) = document.get_mut(&field.name) else {
            continue;
        };
        let coerced = coerce_field(field, value.take())?;
        if field.mandatory && is_empty(&coerced) {
            return Err(AutorestError::validation(format!(
                "model '{}': field '{}' is mandatory but empty",
                model.name, field.name
            )));
        }
        *value = coerced;
    }

    if let Some(missing) = model
        .fields
        .iter()
        .find(|f| f.mandatory && !document.contains_key(&f.name))
    {
        return Err(AutorestError::validation(format!(
            "model '{}': field '{}' is mandatory but missing",
            model.name, missing.name
        )));
    }

    Ok(document)
}

fn coerce_field(field: &Field, value: Value) -> Result<Value> {
    if value.is_null() {
        return Ok(value);
    }
    if field.collection {
        return match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| coerce_value(field, item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            _ => Err(AutorestError::validation(format!(
                "field '{}' is a collection of {}, got a single value",
                field.name, field.field_type
            ))),
        };
    }
    coerce_value(field, value)
}

fn coerce_value(field: &Field, value: Value) -> Result<Value> {
    match field.field_type {
        FieldType::Bool => coerce_bool(&value).map(Value::Bool).ok_or_else(|| {
            AutorestError::validation(format!(
                "field '{}': can't convert {value} to bool",
                field.name
            ))
        }),
        FieldType::Time => coerce_time(&value).map(Value::String).ok_or_else(|| {
            AutorestError::validation(format!(
                "field '{}': can't convert {value} to time",
                field.name
            ))
        }),
        _ => Ok(value),
    }
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f > 0.0),
        Value::String(s) => parse_bool(s),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" => Some(true),
        "false" | "f" | "0" => Some(false),
        _ => None,
    }
}

/// Coerce an RFC3339 string or an epoch-millisecond number into the canonical
/// time representation.
pub fn coerce_time(value: &Value) -> Option<String> {
    let instant = match value {
        Value::String(s) => parse_time(s)?,
        Value::Number(n) => from_millis(n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?)?,
        _ => return None,
    };
    Some(instant.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(_) => from_millis(raw.parse::<i64>().ok()?),
    }
}

fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Convert a scalar payload into a value of `field_type`. Falls back to the raw
/// string when it does not parse.
pub fn coerce_scalar(field_type: FieldType, raw: &str) -> Value {
    let trimmed = raw.trim();
    let parsed = match field_type {
        FieldType::Int => trimmed.parse::<i64>().ok().map(Value::from),
        FieldType::Float => trimmed
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        FieldType::Time => parse_time(trimmed)
            .map(|t| Value::String(t.to_rfc3339_opts(SecondsFormat::Millis, true))),
        FieldType::Bool => parse_bool(trimmed).map(Value::Bool),
        FieldType::String | FieldType::Map | FieldType::File => None,
    };
    parsed.unwrap_or_else(|| Value::String(raw.to_string()))
}

/// Blob ids referenced by the `file` fields of a document, in singular or list
/// form.
pub fn referenced_files(model: &Model, document: &Document) -> Vec<String> {
    let mut files = Vec::new();
    for field in model.fields.iter().filter(|f| f.field_type == FieldType::File) {
        match document.get(&field.name) {
            Some(Value::String(id)) => files.push(id.clone()),
            Some(Value::Array(ids)) => {
                files.extend(ids.iter().filter_map(|v| v.as_str().map(str::to_string)))
            }
            _ => {}
        }
    }
    files
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reading_model() -> Model {
        Model {
            name: "reading".into(),
            fields: vec![
                Field::new("value", FieldType::Float).mandatory(),
                Field::new("ts", FieldType::Time),
                Field::new("active", FieldType::Bool),
                Field::new("tags", FieldType::String).collection(),
                Field::new("image", FieldType::File),
                Field::new("attachments", FieldType::File).collection(),
            ],
            ..Default::default()
        }
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_time_accepts_rfc3339_and_millis() {
        let model = reading_model();
        let a = validate(&model, doc(json!({"value": 1.0, "ts": "2020-04-27T09:46:01.647+02:00"}))).unwrap();
        let b = validate(&model, doc(json!({"value": 1.0, "ts": 1587973561647i64}))).unwrap();
        assert_eq!(a["ts"], "2020-04-27T07:46:01.647Z");
        assert_eq!(a["ts"], b["ts"]);
    }

    #[test]
    fn test_bool_coercion() {
        let model = reading_model();
        let cases = [
            (json!(1.5), true),
            (json!(0.0), false),
            (json!(3), true),
            (json!(-1), false),
            (json!(true), true),
            (json!("false"), false),
        ];
        for (input, expected) in cases {
            let out = validate(&model, doc(json!({"value": 1.0, "active": input}))).unwrap();
            assert_eq!(out["active"], Value::Bool(expected));
        }

        let err = validate(&model, doc(json!({"value": 1.0, "active": {"on": 1}}))).unwrap_err();
        assert!(matches!(err, AutorestError::Validation { .. }));
    }

    #[test]
    fn test_mandatory_empty_or_missing() {
        let model = reading_model();

        let err = validate(&model, doc(json!({"value": null}))).unwrap_err();
        assert!(err.to_string().contains("'value' is mandatory but empty"));

        let err = validate(&model, doc(json!({"value": ""}))).unwrap_err();
        assert!(err.to_string().contains("'value'"));

        let err = validate(&model, doc(json!({"ts": 0}))).unwrap_err();
        assert!(err.to_string().contains("'value' is mandatory but missing"));
    }

    #[test]
    fn test_collection_requires_list() {
        let model = reading_model();
        let err = validate(&model, doc(json!({"value": 1.0, "tags": "single"}))).unwrap_err();
        assert!(err.to_string().contains("collection"));

        let ok = validate(&model, doc(json!({"value": 1.0, "tags": ["a", "b"]}))).unwrap();
        assert_eq!(ok["tags"], json!(["a", "b"]));
    }

    #[test]
    fn test_unknown_fields_pass_through() {
        let model = reading_model();
        let out = validate(&model, doc(json!({"value": 2, "room": "kitchen"}))).unwrap();
        assert_eq!(out["room"], "kitchen");
        assert_eq!(out["value"], 2);
    }

    #[test]
    fn test_validation_is_idempotent() {
        let model = reading_model();
        let input = doc(json!({
            "value": 21.5,
            "ts": 1587973561647i64,
            "active": 1,
            "tags": ["x"],
            "extra": {"nested": true}
        }));
        let once = validate(&model, input).unwrap();
        let twice = validate(&model, once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_coerce_scalar() {
        assert_eq!(coerce_scalar(FieldType::Float, "21.5"), json!(21.5));
        assert_eq!(coerce_scalar(FieldType::Int, " 42 "), json!(42));
        assert_eq!(coerce_scalar(FieldType::Int, "4.2"), json!("4.2"));
        assert_eq!(coerce_scalar(FieldType::Bool, "true"), json!(true));
        assert_eq!(coerce_scalar(FieldType::Bool, "maybe"), json!("maybe"));
        assert_eq!(
            coerce_scalar(FieldType::Time, "1587973561647"),
            json!("2020-04-27T07:46:01.647Z")
        );
        assert_eq!(coerce_scalar(FieldType::String, "21.5"), json!("21.5"));
    }

    #[test]
    fn test_referenced_files() {
        let model = reading_model();
        let document = doc(json!({
            "value": 1,
            "image": "blob-1",
            "attachments": ["blob-2", "blob-3"]
        }));
        assert_eq!(
            referenced_files(&model, &document),
            vec!["blob-1", "blob-2", "blob-3"]
        );
    }
}
