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

//! Numeric normalization of field values for the wire encodings

use crate::metric::FieldValue;
use log::warn;

/// Renders a field value as a decimal string.
///
/// Integers are rendered in base 10 without loss, floats in their shortest
/// representation that round-trips, without exponent or trailing zeros.
/// Unsupported values are reported and yield `None`.
#[must_use]
pub fn format_field(name: &str, value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Int(i) => Some(i.to_string()),
        FieldValue::UInt(u) => Some(u.to_string()),
        FieldValue::Float(f) => Some(format_float(*f)),
        FieldValue::Unsupported(_) => {
            warn!(
                "field {name} is of unsupported value type {}",
                value.type_name()
            );
            None
        }
    }
}

/// Widens a field value to `f64`, unsupported values are reported and yield `0.0`
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn to_f64(name: &str, value: &FieldValue) -> f64 {
    match value {
        FieldValue::Int(i) => *i as f64,
        FieldValue::UInt(u) => *u as f64,
        FieldValue::Float(f) => *f,
        FieldValue::Unsupported(_) => {
            warn!(
                "field {name} is of unsupported value type {}",
                value.type_name()
            );
            0.0
        }
    }
}

/// `Display` for floats never switches to exponent notation and prints the
/// shortest digits that parse back to the same value.
pub(crate) fn format_float(f: f64) -> String {
    f.to_string()
}
