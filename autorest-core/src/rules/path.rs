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

//! JSON paths used by transform specs: `a.b[2].c`, `items[*].id`, `$`.

use serde_json::{Map, Value};

use crate::error::{AutorestError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Parse a dotted path. `$` (or an empty string) addresses the whole
    /// document.
    pub fn parse(path: &str) -> Result<Self> {
        let path = path.trim();
        if path.is_empty() || path == "$" {
            return Ok(Self { segments: vec![] });
        }

        let mut segments = Vec::new();
        for part in path.split('.') {
            let (key, mut brackets) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };
            if !key.is_empty() {
                segments.push(Segment::Key(key.to_string()));
            } else if brackets.is_empty() {
                return Err(AutorestError::config(format!("empty segment in path '{path}'")));
            }
            while !brackets.is_empty() {
                let close = brackets.find(']').ok_or_else(|| {
                    AutorestError::config(format!("unclosed '[' in path '{path}'"))
                })?;
                let inner = &brackets[1..close];
                if inner == "*" {
                    segments.push(Segment::Wildcard);
                } else {
                    let index = inner.parse::<usize>().map_err(|_| {
                        AutorestError::config(format!("invalid index '{inner}' in path '{path}'"))
                    })?;
                    segments.push(Segment::Index(index));
                }
                brackets = &brackets[close + 1..];
                if !brackets.is_empty() && !brackets.starts_with('[') {
                    return Err(AutorestError::config(format!(
                        "unexpected '{brackets}' in path '{path}'"
                    )));
                }
            }
        }
        Ok(Self { segments })
    }

    /// Parse a path that is written to. Only object keys are allowed.
    pub fn parse_output(path: &str) -> Result<Self> {
        let parsed = Self::parse(path)?;
        if parsed.segments.is_empty()
            || parsed.segments.iter().any(|s| !matches!(s, Segment::Key(_)))
        {
            return Err(AutorestError::config(format!(
                "output path '{path}' must be a dotted list of keys"
            )));
        }
        Ok(parsed)
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Read the value at this path. Wildcards collect matches into a list.
    pub fn get(&self, value: &Value) -> Option<Value> {
        lookup(value, &self.segments)
    }

    /// Write `new_value` at this path, creating intermediate objects.
    pub fn set(&self, target: &mut Map<String, Value>, new_value: Value) {
        let keys: Vec<&str> = self.keys().collect();
        let Some((last, parents)) = keys.split_last() else {
            return;
        };
        let mut current = target;
        for key in parents {
            let entry = current
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(map) = entry else {
                return;
            };
            current = map;
        }
        current.insert(last.to_string(), new_value);
    }

    /// Remove the value at this path, if present.
    pub fn remove(&self, target: &mut Map<String, Value>) -> Option<Value> {
        let keys: Vec<&str> = self.keys().collect();
        let (last, parents) = keys.split_last()?;
        let mut current = target;
        for key in parents {
            current = current.get_mut(*key)?.as_object_mut()?;
        }
        current.remove(*last)
    }

    /// Mutable access to the value at a key-only path.
    pub fn get_mut<'a>(&self, target: &'a mut Map<String, Value>) -> Option<&'a mut Value> {
        let keys: Vec<&str> = self.keys().collect();
        let (last, parents) = keys.split_last()?;
        let mut current = target;
        for key in parents {
            current = current.get_mut(*key)?.as_object_mut()?;
        }
        current.get_mut(*last)
    }

    fn keys(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Key(k) => Some(k.as_str()),
            _ => None,
        })
    }
}

fn lookup(value: &Value, segments: &[Segment]) -> Option<Value> {
    let Some((head, rest)) = segments.split_first() else {
        return Some(value.clone());
    };
    match head {
        Segment::Key(key) => lookup(value.get(key)?, rest),
        Segment::Index(i) => lookup(value.as_array()?.get(*i)?, rest),
        Segment::Wildcard => {
            let items = value.as_array()?;
            Some(Value::Array(
                items.iter().filter_map(|item| lookup(item, rest)).collect(),
            ))
        }
    }
}
