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

//! # Azure Monitor custom metrics writer
//!
//! Publishes metrics to the Azure Monitor custom metrics API of the virtual machine the
//! writer runs on. Each metric becomes one custom metric record, its fields are reported
//! as dimensions and the `min`, `max`, `sum` and `count` fields fill the aggregate slots
//! of the series.
//!
//! Authentication uses the managed identity of the VM, no credentials are configured.
//!
//! ## Configuration
//!
//! | Option                               | Description                                                   | Default                         |
//! |--------------------------------------|---------------------------------------------------------------|---------------------------------|
//! | `resource_id`                        | Resource id of the VM, resolved from instance metadata if unset |                               |
//! | `region`                             | Region of the ingestion endpoint, taken from instance metadata if unset |                       |
//! | `namespace`                          | Metric namespace                                              | `default`                       |
//! | `identity_endpoint`                  | `vm_extension` or `instance_metadata`                         | `vm_extension`                  |
//! | `token_resource`                     | Resource the managed identity token is requested for          | `https://monitoring.azure.com/` |
//! | `exclude_aggregates_from_dimensions` | Don't report `min`, `max`, `sum` and `count` as dimensions     | `false`                         |
//! | `timeout`                            | Timeout of the post request in milliseconds                   | `30000`                         |
//!
//! ### Example
//!
//! ```json
//! {
//!   "resource_id": "/subscriptions/<sub>/resourceGroups/<rg>/providers/Microsoft.Compute/virtualMachines/<vm>",
//!   "region": "westeurope"
//! }
//! ```
//!
//! #### Azure
//!
//! The VM needs a system assigned managed identity with the `Monitoring Metrics Publisher`
//! role on itself, otherwise the ingestion endpoint rejects the token.

/// Custom metrics flattening and writer
pub mod metrics;
