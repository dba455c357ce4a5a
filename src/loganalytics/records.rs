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

use crate::errors::{Error, Result};
use crate::metric::Metric;
use crate::normalize::{format_float, to_f64};
use chrono::SecondsFormat;
use serde::Serialize;
use std::collections::BTreeMap;

const RESERVED: [&str; 5] = ["timestamp", "category", "instance", "metric", "value"];

/// One log record, a single field of a metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    /// RFC 3339 time of the metric
    pub timestamp: String,
    /// metric name
    pub category: String,
    /// always empty
    pub instance: String,
    /// field name
    pub metric: String,
    /// field value
    pub value: String,
    /// allowed tags of the metric
    #[serde(flatten)]
    pub tags: BTreeMap<String, String>,
}

/// Flattens `metrics` into one record per field, keeping the tags named in
/// `include_tags`. Tags can't replace the record's own keys.
#[must_use]
pub fn flatten(metrics: &[Metric], include_tags: &[String]) -> Vec<LogRecord> {
    let mut records = Vec::with_capacity(metrics.iter().map(|m| m.fields().len()).sum());
    for metric in metrics {
        let timestamp = metric
            .timestamp()
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let tags: BTreeMap<String, String> = include_tags
            .iter()
            .filter(|name| !RESERVED.contains(&name.as_str()))
            .filter_map(|name| Some((name.clone(), metric.tags().get(name)?.clone())))
            .collect();

        for (name, value) in metric.fields() {
            records.push(LogRecord {
                timestamp: timestamp.clone(),
                category: metric.name().to_string(),
                instance: String::new(),
                metric: name.clone(),
                value: format_float(to_f64(name, value)),
                tags: tags.clone(),
            });
        }
    }
    records
}

/// Serializes a batch of records into the JSON array posted to the service
///
/// # Errors
/// if the batch can't be serialized, nothing is emitted in that case
pub fn encode(records: &[LogRecord]) -> Result<Vec<u8>> {
    serde_json::to_vec(records).map_err(Error::Encode)
}
