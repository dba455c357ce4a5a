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

use crate::auth::{IdentityEndpoint, IdentityToken, TokenClient};
use crate::config::{self, default_post_timeout};
use crate::errors::{Error, Result};
use crate::metadata::{MetadataClient, ResourceResolver};
use crate::metric::Metric;
use crate::normalize::format_field;
use crate::rest;
use chrono::SecondsFormat;
use log::{debug, error, log_enabled, trace, Level};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;

// Tokens expiring within this margin are fetched again before a write
const TOKEN_REFRESH_MARGIN_SECS: i64 = 300;

/// Series of a custom metric, the dimension values and aggregates
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Series {
    /// values of the dimensions, index aligned with the dimension names
    #[serde(rename = "dimValues")]
    pub dimension_values: Vec<String>,
    /// `min` field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    /// `max` field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    /// `sum` field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sum: Option<String>,
    /// `count` field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<String>,
}

/// The metric description of a custom metric record
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BaseData {
    /// metric name
    pub metric: String,
    /// metric namespace
    pub namespace: String,
    /// names of the dimensions
    #[serde(rename = "dimNames")]
    pub dimension_names: Vec<String>,
    /// the single series of the record
    pub series: Vec<Series>,
}

/// Payload wrapper of a custom metric record
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Data {
    /// metric description and series
    #[serde(rename = "baseData")]
    pub base_data: BaseData,
}

/// One custom metric record as posted to Azure Monitor
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricRecord {
    /// RFC 3339 time of the metric
    pub time: String,
    /// payload of the record
    pub data: Data,
}

impl MetricRecord {
    /// The series of the record
    #[must_use]
    pub fn series(&self) -> Option<&Series> {
        self.data.base_data.series.first()
    }
}

/// Maps metrics onto custom metric records
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flattener {
    namespace: String,
    exclude_aggregates: bool,
}

impl Default for Flattener {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            exclude_aggregates: false,
        }
    }
}

impl Flattener {
    /// A flattener reporting into `namespace`. With `exclude_aggregates` the
    /// `min`, `max`, `sum` and `count` fields only fill the aggregate slots.
    #[must_use]
    pub fn new<S: Into<String>>(namespace: S, exclude_aggregates: bool) -> Self {
        Self {
            namespace: namespace.into(),
            exclude_aggregates,
        }
    }

    /// One record per metric. Every field becomes a dimension, unsupported
    /// values are reported and rendered as empty string.
    #[must_use]
    pub fn flatten(&self, metrics: &[Metric]) -> Vec<MetricRecord> {
        metrics.iter().map(|m| self.flatten_one(m)).collect()
    }

    fn flatten_one(&self, metric: &Metric) -> MetricRecord {
        let fields = metric.fields();
        let mut dimension_names = Vec::with_capacity(fields.len());
        let mut series = Series {
            dimension_values: Vec::with_capacity(fields.len()),
            ..Series::default()
        };
        for (name, value) in fields {
            let formatted = format_field(name, value);
            let slot = match name.as_str() {
                "min" => Some(&mut series.min),
                "max" => Some(&mut series.max),
                "sum" => Some(&mut series.sum),
                "count" => Some(&mut series.count),
                _ => None,
            };
            if let Some(slot) = slot {
                *slot = formatted.clone();
                if self.exclude_aggregates {
                    continue;
                }
            }
            dimension_names.push(name.clone());
            series
                .dimension_values
                .push(formatted.unwrap_or_default());
        }

        MetricRecord {
            time: metric
                .timestamp()
                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
            data: Data {
                base_data: BaseData {
                    metric: metric.name().to_string(),
                    namespace: self.namespace.clone(),
                    dimension_names,
                    series: vec![series],
                },
            },
        }
    }
}

/// Serializes a batch of records into the JSON array posted to the service
///
/// # Errors
/// if the batch can't be serialized
pub fn encode(records: &[MetricRecord]) -> Result<Vec<u8>> {
    serde_json::to_vec(records).map_err(Error::Encode)
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_token_resource() -> String {
    "https://monitoring.azure.com/".to_string()
}

/// Custom metrics writer configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Resource id of the VM. Resolved from instance metadata if unset.
    #[serde(default)]
    pub resource_id: Option<String>,

    /// Azure region of the ingestion endpoint. Taken from instance metadata if unset.
    #[serde(default)]
    pub region: Option<String>,

    /// Metric namespace. Default value is "default".
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Where managed identity tokens are fetched from.
    #[serde(default)]
    pub identity_endpoint: IdentityEndpoint,

    /// The resource managed identity tokens are requested for.
    #[serde(default = "default_token_resource")]
    pub token_resource: String,

    /// Report the aggregate fields only in their slots, not as dimensions.
    #[serde(default)]
    pub exclude_aggregates_from_dimensions: bool,

    /// Timeout for the post request in milliseconds.
    #[serde(default = "default_post_timeout")]
    pub timeout: u64,

    // NOTE the url overrides are only set by tests
    #[serde(skip)]
    pub(crate) endpoint: Option<String>,
    #[serde(skip)]
    pub(crate) token_url: Option<String>,
    #[serde(skip)]
    pub(crate) metadata_url: Option<String>,
}

impl config::Impl for Config {}

/// Writer for the Azure Monitor custom metrics API
#[derive(Debug)]
pub struct MonitorWriter {
    config: Config,
    flattener: Flattener,
    resolver: ResourceResolver,
    tokens: TokenClient,
    token: Mutex<Option<IdentityToken>>,
    client: reqwest::Client,
}

impl MonitorWriter {
    /// Creates the writer, resource id and token are resolved on the first write
    ///
    /// # Errors
    /// if the http clients can't be created
    pub fn connect(config: Config) -> Result<Self> {
        let tokens = match &config.token_url {
            Some(url) => TokenClient::with_url(url.as_str())?,
            None => TokenClient::new(config.identity_endpoint)?,
        };
        let metadata = match &config.metadata_url {
            Some(url) => MetadataClient::with_url(url.as_str())?,
            None => MetadataClient::new()?,
        };
        let client = rest::client(Duration::from_millis(config.timeout))?;
        Ok(Self {
            flattener: Flattener::new(
                config.namespace.clone(),
                config.exclude_aggregates_from_dimensions,
            ),
            resolver: ResourceResolver::new(metadata),
            tokens,
            token: Mutex::new(None),
            client,
            config,
        })
    }

    /// The ingestion url for the resolved resource
    ///
    /// # Errors
    /// if resource id or region can't be resolved
    pub async fn url(&self) -> Result<url::Url> {
        let resource_id = self
            .resolver
            .resolve(self.config.resource_id.as_deref().unwrap_or_default())
            .await?;
        let base = match &self.config.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => {
                let region = self
                    .resolver
                    .region(self.config.region.as_deref().unwrap_or_default())
                    .await?;
                format!("https://{region}.monitoring.azure.com")
            }
        };
        Ok(url::Url::parse(&format!(
            "{base}/{}/metrics",
            resource_id.trim_start_matches('/')
        ))?)
    }

    // The cached token is reused until it is about to expire.
    async fn bearer_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        let margin = chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
        if let Some(cached) = token.as_ref().filter(|t| !t.is_expired(margin)) {
            return Ok(cached.access_token().to_string());
        }
        let fresh = self.tokens.fetch_token(&self.config.token_resource).await?;
        let access_token = fresh.access_token().to_string();
        *token = Some(fresh);
        Ok(access_token)
    }

    async fn post(&self, body: Vec<u8>) -> Result<()> {
        let url = self.url().await?;
        let token = self.bearer_token().await?;
        debug!("Sending {} bytes to {url}", body.len());
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer: {token}"))
            .header("Content-Type", rest::CONTENT_TYPE_JSON)
            .body(body)
            .send()
            .await?;
        rest::read_body(response).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl crate::Writer for MonitorWriter {
    async fn write(&self, metrics: &[Metric]) -> Result<()> {
        if metrics.is_empty() {
            return Ok(());
        }
        let records = self.flattener.flatten(metrics);
        let body = encode(&records)?;
        if log_enabled!(Level::Trace) {
            trace!("Payload to send: {}", String::from_utf8_lossy(&body));
        }
        self.post(body).await.map_err(|e| {
            error!("Error publishing metrics {e}");
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test::{mock_token_server, MOCK_RESOURCE};
    use crate::config::Impl;
    use crate::metadata::test::{mock_metadata_server, MOCK_RESOURCE_ID};
    use crate::Writer;
    use chrono::{TimeZone, Utc};
    use mockito::Matcher;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn metric() -> Metric {
        let at = Utc
            .with_ymd_and_hms(2024, 6, 5, 16, 55, 44)
            .single()
            .unwrap_or_default();
        Metric::new("requests", at)
            .with_tag("host", "badger")
            .with_field("count", 4_i32)
            .with_field("max", 0.75_f64)
            .with_field("min", 0.25_f32)
            .with_field("sum", 2_u8)
            .with_field("p99", 0.7)
    }

    #[test]
    fn one_record_with_aligned_dimensions() {
        let records = Flattener::default().flatten(&[metric(), metric()]);
        assert_eq!(records.len(), 2);
        let record = &records[0];
        let names = &record.data.base_data.dimension_names;
        let values = &record.series().map(|s| s.dimension_values.clone()).unwrap_or_default();
        assert_eq!(names, &vec!["count", "max", "min", "p99", "sum"]);
        assert_eq!(values, &vec!["4", "0.75", "0.25", "0.7", "2"]);
        assert_eq!(record.data.base_data.namespace, "default");
        assert_eq!(record.data.base_data.metric, "requests");
    }

    #[test]
    fn aggregates() {
        let records = Flattener::default().flatten(&[metric()]);
        let series = records[0].series().cloned().unwrap_or_default();
        assert_eq!(series.min.as_deref(), Some("0.25"));
        assert_eq!(series.max.as_deref(), Some("0.75"));
        assert_eq!(series.sum.as_deref(), Some("2"));
        assert_eq!(series.count.as_deref(), Some("4"));
    }

    #[test]
    fn aggregates_excluded_from_dimensions() {
        let records = Flattener::new("custom", true).flatten(&[metric()]);
        let record = &records[0];
        assert_eq!(record.data.base_data.dimension_names, vec!["p99"]);
        assert_eq!(record.data.base_data.namespace, "custom");
        let series = record.series().cloned().unwrap_or_default();
        assert_eq!(series.dimension_values, vec!["0.7"]);
        assert_eq!(series.count.as_deref(), Some("4"));
    }

    #[test]
    fn aggregate_keys_are_case_sensitive() {
        let m = Metric::new("m", Utc::now()).with_field("Min", 1);
        let records = Flattener::default().flatten(&[m]);
        assert_eq!(records[0].series().and_then(|s| s.min.clone()), None);
    }

    #[test]
    fn unsupported_field_keeps_the_rest() {
        let m = Metric::new("m", Utc::now())
            .with_field("a", 1)
            .with_field("b", json!({"nested": "object"}))
            .with_field("c", 2.5)
            .with_field("max", json!("high"));
        let records = Flattener::default().flatten(&[m]);
        assert_eq!(records.len(), 1);
        let series = records[0].series().cloned().unwrap_or_default();
        assert_eq!(
            records[0].data.base_data.dimension_names,
            vec!["a", "b", "c", "max"]
        );
        assert_eq!(series.dimension_values, vec!["1", "", "2.5", ""]);
        assert_eq!(series.max, None);
    }

    #[test]
    fn unsupported_aggregate_leaves_slot_empty() {
        let m = Metric::new("m", Utc::now())
            .with_field("count", json!(null))
            .with_field("sum", 3_u32);
        let included = Flattener::default().flatten(&[m.clone()]);
        let series = included[0].series().cloned().unwrap_or_default();
        assert_eq!(series.dimension_values, vec!["", "3"]);
        assert_eq!(series.count, None);
        assert_eq!(series.sum.as_deref(), Some("3"));

        let excluded = Flattener::new("default", true).flatten(&[m]);
        let series = excluded[0].series().cloned().unwrap_or_default();
        assert!(excluded[0].data.base_data.dimension_names.is_empty());
        assert!(series.dimension_values.is_empty());
        assert_eq!(series.count, None);
        assert_eq!(series.sum.as_deref(), Some("3"));
    }

    #[test]
    fn wire_shape() -> anyhow::Result<()> {
        let m = Metric::new(
            "disk",
            Utc.with_ymd_and_hms(2024, 6, 5, 16, 55, 44)
                .single()
                .unwrap_or_default(),
        )
        .with_field("sum", 10)
        .with_field("used", 42);
        let encoded: serde_json::Value =
            serde_json::from_slice(&encode(&Flattener::default().flatten(&[m]))?)?;
        assert_eq!(
            encoded,
            json!([{
                "time": "2024-06-05T16:55:44Z",
                "data": {
                    "baseData": {
                        "metric": "disk",
                        "namespace": "default",
                        "dimNames": ["sum", "used"],
                        "series": [{"dimValues": ["10", "42"], "sum": "10"}]
                    }
                }
            }])
        );
        Ok(())
    }

    #[test]
    fn deserialize_with_defaults() -> anyhow::Result<()> {
        let config = Config::new(&json!({"region": "westeurope"}))?;
        assert_eq!(config.resource_id, None);
        assert_eq!(config.region.as_deref(), Some("westeurope"));
        assert_eq!(config.namespace, "default");
        assert_eq!(config.identity_endpoint, IdentityEndpoint::VmExtension);
        assert_eq!(config.token_resource, "https://monitoring.azure.com/");
        assert!(!config.exclude_aggregates_from_dimensions);
        assert_eq!(config.timeout, 30_000);

        let config = Config::new(&json!({"identity_endpoint": "instance_metadata"}))?;
        assert_eq!(config.identity_endpoint, IdentityEndpoint::InstanceMetadata);
        Ok(())
    }

    fn mock_config(
        ingest: &mockito::ServerGuard,
        token: &mockito::ServerGuard,
        metadata: &mockito::ServerGuard,
    ) -> anyhow::Result<Config> {
        let mut config = Config::new(&json!({}))?;
        config.token_resource = MOCK_RESOURCE.to_string();
        config.endpoint = Some(ingest.url());
        config.token_url = Some(format!("{}/oauth2/token", token.url()));
        config.metadata_url = Some(format!("{}/metadata/instance", metadata.url()));
        Ok(config)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn url_from_explicit_config() -> anyhow::Result<()> {
        let (metadata, metadata_mock) = mock_metadata_server(0).await;
        let mut config = Config::new(&json!({
            "resource_id": MOCK_RESOURCE_ID,
            "region": "eastus"
        }))?;
        config.metadata_url = Some(format!("{}/metadata/instance", metadata.url()));
        let writer = MonitorWriter::connect(config)?;
        assert_eq!(
            writer.url().await?.as_str(),
            "https://eastus.monitoring.azure.com/subscriptions/s1/resourceGroups/rg1/providers/Microsoft.Compute/virtualMachines/vm1/metrics"
        );
        metadata_mock.assert_async().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn url_from_metadata() -> anyhow::Result<()> {
        let (metadata, metadata_mock) = mock_metadata_server(1).await;
        let mut config = Config::new(&json!({}))?;
        config.metadata_url = Some(format!("{}/metadata/instance", metadata.url()));
        let writer = MonitorWriter::connect(config)?;
        let expected = format!("https://westeurope.monitoring.azure.com{MOCK_RESOURCE_ID}/metrics");
        assert_eq!(writer.url().await?.as_str(), expected);
        assert_eq!(writer.url().await?.as_str(), expected);
        metadata_mock.assert_async().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn write_with_managed_identity() -> anyhow::Result<()> {
        let _ = env_logger::try_init();
        let token = mock_token_server(Utc::now().timestamp() + 3600).await;
        let (metadata, metadata_mock) = mock_metadata_server(1).await;
        let mut ingest = mockito::Server::new_async().await;
        let ingest_mock = ingest
            .mock("POST", format!("{MOCK_RESOURCE_ID}/metrics").as_str())
            .match_header("Authorization", "Bearer: test_access_token")
            .match_header("Content-Type", "application/json")
            .match_body(Matcher::Regex(
                r#""baseData":\{"metric":"requests","namespace":"default""#.to_string(),
            ))
            .with_status(200)
            .expect(2)
            .create_async()
            .await;

        let writer = MonitorWriter::connect(mock_config(&ingest, &token, &metadata)?)?;
        writer.write(&[metric()]).await?;
        writer.write(&[metric()]).await?;

        ingest_mock.assert_async().await;
        metadata_mock.assert_async().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn token_failure_is_propagated() -> anyhow::Result<()> {
        let mut token = mockito::Server::new_async().await;
        let _token_mock = token
            .mock("GET", "/oauth2/token")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body("no identity assigned")
            .create_async()
            .await;
        let (metadata, _metadata_mock) = mock_metadata_server(1).await;
        let mut ingest = mockito::Server::new_async().await;
        let ingest_mock = ingest
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let writer = MonitorWriter::connect(mock_config(&ingest, &token, &metadata)?)?;
        let err = writer
            .write(&[metric()])
            .await
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected an error"))?;
        assert_eq!(err.status(), Some(400));
        ingest_mock.assert_async().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_batch_is_a_protocol_error() -> anyhow::Result<()> {
        let token = mock_token_server(Utc::now().timestamp() + 3600).await;
        let (metadata, _metadata_mock) = mock_metadata_server(1).await;
        let mut ingest = mockito::Server::new_async().await;
        let _ingest_mock = ingest
            .mock("POST", Matcher::Any)
            .with_status(413)
            .with_body("too large")
            .create_async()
            .await;

        let writer = MonitorWriter::connect(mock_config(&ingest, &token, &metadata)?)?;
        let err = writer
            .write(&[metric()])
            .await
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected an error"))?;
        assert_eq!(err.status(), Some(413));
        assert!(err.to_string().contains("too large"));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_batch_is_not_sent() -> anyhow::Result<()> {
        let (metadata, metadata_mock) = mock_metadata_server(0).await;
        let mut config = Config::new(&json!({}))?;
        config.metadata_url = Some(format!("{}/metadata/instance", metadata.url()));
        let writer = MonitorWriter::connect(config)?;
        writer.write(&[]).await?;
        metadata_mock.assert_async().await;
        Ok(())
    }
}
