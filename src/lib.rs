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

//! Tremor Azure telemetry writers
//!
//! Writes batches of metrics to Azure Monitor custom metrics and to Azure Log Analytics.

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(
    clippy::all,
    clippy::unwrap_used,
    clippy::unnecessary_unwrap,
    clippy::pedantic,
    clippy::mod_module_files
)]

/// Managed identity tokens
pub mod auth;
/// Writer configuration
pub mod config;
/// Errors
pub mod errors;
/// Azure Log Analytics writer
pub mod loganalytics;
/// Instance metadata and resource resolution
pub mod metadata;
/// The metric model
pub mod metric;
/// Azure Monitor custom metrics writer
pub mod monitor;
/// Normalization of field values
pub mod normalize;

pub(crate) mod rest;

pub use crate::errors::{Error, Result};
pub use crate::loganalytics::LogAnalyticsWriter;
pub use crate::metric::{FieldValue, Metric};
pub use crate::monitor::metrics::MonitorWriter;

/// A destination for batches of metrics
#[async_trait::async_trait]
pub trait Writer: Send + Sync {
    /// Writes a batch of metrics, empty batches are not sent
    ///
    /// # Errors
    /// if the batch can't be encoded or the service rejects it
    async fn write(&self, metrics: &[Metric]) -> Result<()>;
}
