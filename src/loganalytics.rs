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

//! # Azure Log Analytics writer
//!
//! Writes metrics to a Log Analytics workspace through the HTTP data collector API.
//! Every field of a metric becomes one record of the custom log `log_name`:
//!
//! ```json
//! [{"timestamp":"2024-06-05T16:55:44Z","category":"cpu","instance":"","metric":"usage_idle","value":"97.5","host":"badger"}]
//! ```
//!
//! Requests are authenticated with the workspace shared key.
//!
//! ## Configuration
//!
//! | Option         | Description                                            | Default |
//! |----------------|--------------------------------------------------------|---------|
//! | `workspace`    | The workspace id                                       |         |
//! | `shared_key`   | The base64 encoded primary or secondary workspace key  |         |
//! | `log_name`     | Name of the custom log the records are written to      |         |
//! | `include_tags` | Tags copied into each record                           | `[]`    |
//! | `timeout`      | Timeout of the post request in milliseconds            | `30000` |

use crate::config::{self, default_post_timeout};
use crate::errors::{Error, Result};
use crate::metric::Metric;
use crate::rest;
use chrono::Utc;
use log::{debug, error, log_enabled, trace, Level};
use serde::Deserialize;
use std::time::Duration;

/// Flattening of metrics into log records
pub mod records;
/// Shared key request signing
pub mod signature;

use signature::{rfc1123_date, SignatureContext, Signer};

const METHOD: &str = "POST";
const RESOURCE: &str = "/api/logs";
const API_VERSION: &str = "2016-04-01";

/// Log Analytics writer configuration
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The workspace id. Required.
    pub workspace: String,

    /// The base64 encoded shared key of the workspace. Required.
    pub shared_key: String,

    /// The custom log to write to. Required.
    pub log_name: String,

    /// Tags copied into every record. Others are dropped.
    #[serde(default)]
    pub include_tags: Vec<String>,

    /// Timeout for the post request in milliseconds.
    #[serde(default = "default_post_timeout")]
    pub timeout: u64,

    // NOTE only overwritten by tests, the endpoint is derived from the workspace
    #[serde(skip)]
    pub(crate) endpoint: Option<String>,
}

impl config::Impl for Config {}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogAnalyticsConfig")
            .field("workspace", &self.workspace)
            .field("log_name", &self.log_name)
            .field("include_tags", &self.include_tags)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Config {
    fn validate(&self) -> Result<()> {
        if self.shared_key.is_empty() || self.workspace.is_empty() {
            return Err(Error::InvalidConfiguration(
                "Log analytics workspace or shared key not defined",
            ));
        }
        if self.log_name.is_empty() {
            return Err(Error::InvalidConfiguration(
                "Log analytics log name not defined",
            ));
        }
        Ok(())
    }

    fn url(&self) -> String {
        self.endpoint.clone().unwrap_or_else(|| {
            format!(
                "https://{}.ods.opinsights.azure.com{RESOURCE}?api-version={API_VERSION}",
                self.workspace
            )
        })
    }
}

/// Writer for the Log Analytics data collector API
#[derive(Debug)]
pub struct LogAnalyticsWriter {
    config: Config,
    url: url::Url,
    signer: Signer,
    client: reqwest::Client,
}

impl LogAnalyticsWriter {
    /// Validates the configuration and checks that the endpoint resolves
    ///
    /// # Errors
    /// if the configuration is incomplete, the shared key is invalid
    /// or the endpoint host can't be resolved
    pub async fn connect(config: Config) -> Result<Self> {
        config.validate()?;
        let signer = Signer::new(&config.workspace, &config.shared_key)?;
        let url = url::Url::parse(&config.url())?;

        let host = url
            .host_str()
            .ok_or(Error::InvalidConfiguration("endpoint has no host"))?;
        let port = url.port_or_known_default().unwrap_or(443);
        if tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| Error::Resolve(url.to_string(), e))?
            .next()
            .is_none()
        {
            return Err(Error::Resolve(
                url.to_string(),
                std::io::ErrorKind::NotFound.into(),
            ));
        }

        let client = rest::client(Duration::from_millis(config.timeout))?;
        Ok(Self {
            config,
            url,
            signer,
            client,
        })
    }

    /// The ingestion url
    #[must_use]
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn post(&self, body: Vec<u8>) -> Result<()> {
        let date = rfc1123_date(Utc::now());
        let authorization = self.signer.sign(&SignatureContext {
            method: METHOD,
            content_length: body.len(),
            content_type: rest::CONTENT_TYPE_JSON,
            date: &date,
            resource_path: RESOURCE,
        });

        debug!("Sending {} bytes to {}", body.len(), self.config.log_name);
        let response = self
            .client
            .post(self.url.clone())
            .header("Authorization", authorization)
            .header("Log-Type", &self.config.log_name)
            .header("x-ms-date", date)
            .header("Content-Type", rest::CONTENT_TYPE_JSON)
            .body(body)
            .send()
            .await?;
        rest::read_body(response).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl crate::Writer for LogAnalyticsWriter {
    async fn write(&self, metrics: &[Metric]) -> Result<()> {
        let records = records::flatten(metrics, &self.config.include_tags);
        if records.is_empty() {
            return Ok(());
        }
        let body = records::encode(&records)?;
        if log_enabled!(Level::Trace) {
            trace!("Payload to send: {}", String::from_utf8_lossy(&body));
        }
        self.post(body).await.map_err(|e| {
            error!("Error publishing metrics {e}");
            e
        })
    }
}
