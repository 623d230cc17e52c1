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

//! Interpreter for declarative JSON-to-JSON transforms.
//!
//! A transform spec is a list of operations applied in order:
//!
//! ```json
//! [
//!   {"operation": "shift", "spec": {"Temperature": "DS18B20.Temperature", "Time": "ts"}},
//!   {"operation": "default", "spec": {"Unit": "C"}},
//!   {"operation": "timestamp", "spec": {"Time": {"inputFormat": "$unixext", "outputFormat": "%Y-%m-%dT%H:%M:%S"}}},
//!   {"operation": "delete", "spec": {"paths": ["debug"]}}
//! ]
//! ```

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::error::{AutorestError, Result};
use crate::rules::path::JsonPath;

#[derive(Debug, Clone)]
enum Operation {
    Shift(Vec<(JsonPath, Vec<JsonPath>)>),
    Default(Vec<(JsonPath, Value)>),
    Delete(Vec<JsonPath>),
    Timestamp(Vec<(JsonPath, TimeFormat, TimeFormat)>),
}

#[derive(Debug, Clone, PartialEq)]
enum TimeFormat {
    Unix,
    UnixMillis,
    Rfc3339,
    Pattern(String),
}

impl TimeFormat {
    fn parse(format: &str) -> Result<Self> {
        match format {
            "$unix" => Ok(TimeFormat::Unix),
            "$unixext" => Ok(TimeFormat::UnixMillis),
            "$rfc3339" => Ok(TimeFormat::Rfc3339),
            pattern => {
                if pattern.is_empty()
                    || StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error))
                {
                    return Err(AutorestError::config(format!(
                        "invalid time format '{pattern}'"
                    )));
                }
                Ok(TimeFormat::Pattern(pattern.to_string()))
            }
        }
    }

    fn read(&self, value: &Value) -> Option<DateTime<Utc>> {
        match self {
            TimeFormat::Unix => Utc.timestamp_opt(as_i64(value)?, 0).single(),
            TimeFormat::UnixMillis => Utc.timestamp_millis_opt(as_i64(value)?).single(),
            TimeFormat::Rfc3339 => DateTime::parse_from_rfc3339(value.as_str()?)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            TimeFormat::Pattern(pattern) => {
                let raw = value.as_str()?;
                DateTime::parse_from_str(raw, pattern)
                    .map(|dt| dt.with_timezone(&Utc))
                    .or_else(|_| {
                        NaiveDateTime::parse_from_str(raw, pattern).map(|n| Utc.from_utc_datetime(&n))
                    })
                    .ok()
            }
        }
    }

    fn write(&self, instant: DateTime<Utc>) -> Value {
        match self {
            TimeFormat::Unix => Value::from(instant.timestamp()),
            TimeFormat::UnixMillis => Value::from(instant.timestamp_millis()),
            TimeFormat::Rfc3339 => {
                Value::String(instant.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            TimeFormat::Pattern(pattern) => Value::String(instant.format(pattern).to_string()),
        }
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A compiled transform, ready to be applied any number of times.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    operations: Vec<Operation>,
}

impl CompiledRule {
    /// Compile a transform spec. The spec may also be given as a JSON string
    /// holding the operation list.
    pub fn compile(spec: &Value) -> Result<Self> {
        let owned;
        let spec = match spec {
            Value::String(raw) => {
                owned = serde_json::from_str::<Value>(raw).map_err(|e| {
                    AutorestError::config(format!("transform is not valid JSON: {e}"))
                })?;
                &owned
            }
            other => other,
        };
        let steps = spec
            .as_array()
            .ok_or_else(|| AutorestError::config("transform must be a list of operations"))?;

        let operations = steps
            .iter()
            .map(compile_operation)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { operations })
    }

    /// Apply the transform to a JSON value.
    pub fn apply(&self, input: Value) -> Result<Value> {
        let mut current = input;
        for operation in &self.operations {
            current = apply_operation(operation, current)?;
        }
        Ok(current)
    }

    /// Apply the transform to raw JSON bytes.
    pub fn transform(&self, json: &[u8]) -> Result<Vec<u8>> {
        let input: Value = serde_json::from_slice(json)
            .map_err(|e| AutorestError::validation(format!("input is not valid JSON: {e}")))?;
        let output = self.apply(input)?;
        Ok(serde_json::to_vec(&output)?)
    }
}

fn compile_operation(step: &Value) -> Result<Operation> {
    let name = step
        .get("operation")
        .and_then(Value::as_str)
        .ok_or_else(|| AutorestError::config("transform step without 'operation'"))?;
    let spec = step
        .get("spec")
        .and_then(Value::as_object)
        .ok_or_else(|| AutorestError::config(format!("operation '{name}' without 'spec' object")))?;

    match name {
        "shift" => spec
            .iter()
            .map(|(output, input)| {
                let inputs = match input {
                    Value::String(path) => vec![JsonPath::parse(path)?],
                    Value::Array(paths) => paths
                        .iter()
                        .map(|p| {
                            p.as_str().ok_or_else(|| {
                                AutorestError::config(format!("shift input for '{output}' must be a path"))
                            })
                            .and_then(JsonPath::parse)
                        })
                        .collect::<Result<Vec<_>>>()?,
                    _ => {
                        return Err(AutorestError::config(format!(
                            "shift input for '{output}' must be a path or list of paths"
                        )))
                    }
                };
                Ok((JsonPath::parse_output(output)?, inputs))
            })
            .collect::<Result<Vec<_>>>()
            .map(Operation::Shift),
        "default" => spec
            .iter()
            .map(|(path, value)| Ok((JsonPath::parse_output(path)?, value.clone())))
            .collect::<Result<Vec<_>>>()
            .map(Operation::Default),
        "delete" => {
            let paths = spec
                .get("paths")
                .and_then(Value::as_array)
                .ok_or_else(|| AutorestError::config("delete spec needs a 'paths' list"))?;
            paths
                .iter()
                .map(|p| {
                    p.as_str()
                        .ok_or_else(|| AutorestError::config("delete paths must be strings"))
                        .and_then(JsonPath::parse_output)
                })
                .collect::<Result<Vec<_>>>()
                .map(Operation::Delete)
        }
        "timestamp" => spec
            .iter()
            .map(|(path, formats)| {
                let format = |key: &str| {
                    formats
                        .get(key)
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            AutorestError::config(format!("timestamp '{path}' needs '{key}'"))
                        })
                        .and_then(TimeFormat::parse)
                };
                Ok((
                    JsonPath::parse_output(path)?,
                    format("inputFormat")?,
                    format("outputFormat")?,
                ))
            })
            .collect::<Result<Vec<_>>>()
            .map(Operation::Timestamp),
        other => Err(AutorestError::config(format!(
            "unsupported transform operation '{other}'"
        ))),
    }
}

fn apply_operation(operation: &Operation, input: Value) -> Result<Value> {
    match operation {
        Operation::Shift(mappings) => {
            let mut output = Map::new();
            for (target, sources) in mappings {
                let value = sources
                    .iter()
                    .find_map(|source| source.get(&input))
                    .unwrap_or(Value::Null);
                target.set(&mut output, value);
            }
            Ok(Value::Object(output))
        }
        Operation::Default(defaults) => {
            let mut output = into_object(input)?;
            for (path, value) in defaults {
                let absent = path
                    .get(&Value::Object(output.clone()))
                    .map_or(true, |v| v.is_null());
                if absent {
                    path.set(&mut output, value.clone());
                }
            }
            Ok(Value::Object(output))
        }
        Operation::Delete(paths) => {
            let mut output = into_object(input)?;
            for path in paths {
                path.remove(&mut output);
            }
            Ok(Value::Object(output))
        }
        Operation::Timestamp(fields) => {
            let mut output = into_object(input)?;
            for (path, input_format, output_format) in fields {
                let Some(slot) = path.get_mut(&mut output) else {
                    continue;
                };
                let instant = input_format.read(slot).ok_or_else(|| {
                    AutorestError::validation(format!("can't read {slot} as a timestamp"))
                })?;
                *slot = output_format.write(instant);
            }
            Ok(Value::Object(output))
        }
    }
}

fn into_object(value: Value) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(AutorestError::validation(format!(
            "transform expects a JSON object, got {other}"
        ))),
    }
}
