// Copyright 2024, The Tremor Team
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

//! The metric model handed to the writers

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// A field value, resolved once when the metric is built.
///
/// All signed integer widths widen into `Int`, all unsigned ones into `UInt`
/// and `f32` widens into `Float`. Anything else is kept as `Unsupported` so
/// it can be reported without aborting the batch.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// signed integer
    Int(i64),
    /// unsigned integer
    UInt(u64),
    /// floating point number
    Float(f64),
    /// any non numeric value
    Unsupported(Value),
}

impl FieldValue {
    /// Name of the value type, used for diagnostics
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Float(_) => "float",
            Self::Unsupported(Value::Null) => "null",
            Self::Unsupported(Value::Bool(_)) => "bool",
            Self::Unsupported(Value::Number(_)) => "number",
            Self::Unsupported(Value::String(_)) => "string",
            Self::Unsupported(Value::Array(_)) => "array",
            Self::Unsupported(Value::Object(_)) => "object",
        }
    }
}

macro_rules! widen {
    ($variant:ident, $target:ty, $($t:ty),*) => {
        $(
            impl From<$t> for FieldValue {
                fn from(v: $t) -> Self {
                    Self::$variant(<$target>::from(v))
                }
            }
        )*
    };
}

widen!(Int, i64, i8, i16, i32, i64);
widen!(UInt, u64, u8, u16, u32, u64);
widen!(Float, f64, f32, f64);

impl From<Value> for FieldValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Number(ref n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Self::UInt(u)
                } else if let Some(f) = n.as_f64() {
                    Self::Float(f)
                } else {
                    Self::Unsupported(v)
                }
            }
            other => Self::Unsupported(other),
        }
    }
}

/// A single metric as collected by the agent
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    name: String,
    timestamp: DateTime<Utc>,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
}

impl Metric {
    /// Creates a metric without tags or fields
    pub fn new<S: Into<String>>(name: S, timestamp: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            timestamp,
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds a tag, replacing a previous tag of the same name
    #[must_use]
    pub fn with_tag<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Adds a field, replacing a previous field of the same name
    #[must_use]
    pub fn with_field<K: Into<String>, V: Into<FieldValue>>(mut self, key: K, value: V) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Measurement name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Time the metric was taken
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Tags, ordered by name
    #[must_use]
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Fields, ordered by name
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }
}
