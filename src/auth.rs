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

//! Managed identity tokens from the local identity endpoint of a VM

use crate::errors::Result;
use crate::rest;
use chrono::{DateTime, Duration, TimeZone, Utc};
use log::{debug, warn};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt::Debug;

// Loopback endpoint of the managed identity VM extension
const VM_EXTENSION_URL: &str = "http://localhost:50342/oauth2/token";

// Token endpoint of the instance metadata service
const INSTANCE_METADATA_URL: &str =
    "http://169.254.169.254/metadata/identity/oauth2/token?api-version=2018-02-01";

/// Where the managed identity token is requested from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityEndpoint {
    /// the managed identity VM extension listening on localhost
    #[default]
    VmExtension,
    /// the instance metadata service
    InstanceMetadata,
}

impl IdentityEndpoint {
    /// The token url of the endpoint
    #[must_use]
    pub fn url(self) -> &'static str {
        match self {
            Self::VmExtension => VM_EXTENSION_URL,
            Self::InstanceMetadata => INSTANCE_METADATA_URL,
        }
    }
}

/// A managed identity token, as returned by the identity endpoint.
///
/// The epoch second fields arrive as decimal strings and are converted
/// to instants once, when the token is fetched.
#[derive(Clone, Default, PartialEq, Deserialize)]
pub struct IdentityToken {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default, deserialize_with = "string_or_number")]
    expires_in: String,
    #[serde(default, deserialize_with = "string_or_number")]
    expires_on: String,
    #[serde(default, deserialize_with = "string_or_number")]
    not_before: String,
    #[serde(default)]
    resource: String,
    #[serde(default)]
    token_type: String,

    #[serde(skip)]
    expires_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    not_before_time: Option<DateTime<Utc>>,
}

// the secrets are kept out of logs
impl Debug for IdentityToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityToken")
            .field("expires_in", &self.expires_in)
            .field("expires_on", &self.expires_on)
            .field("not_before", &self.not_before)
            .field("resource", &self.resource)
            .field("token_type", &self.token_type)
            .finish_non_exhaustive()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

// A value that doesn't parse leaves the instant unset, it is not an error.
fn parse_epoch(field: &str, value: &str) -> Option<DateTime<Utc>> {
    if value.is_empty() {
        return None;
    }
    let instant = value
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
    if instant.is_none() {
        warn!("identity token field {field} is not an epoch second value: {value:?}");
    }
    instant
}

impl IdentityToken {
    fn parse_times(mut self) -> Self {
        self.expires_at = parse_epoch("expires_on", &self.expires_on);
        self.not_before_time = parse_epoch("not_before", &self.not_before);
        self
    }

    /// The bearer token
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// The refresh token, empty for managed identities
    #[must_use]
    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    /// Lifetime in seconds as reported by the endpoint
    #[must_use]
    pub fn expires_in(&self) -> &str {
        &self.expires_in
    }

    /// Expiry in epoch seconds as reported by the endpoint
    #[must_use]
    pub fn expires_on(&self) -> &str {
        &self.expires_on
    }

    /// Start of validity in epoch seconds as reported by the endpoint
    #[must_use]
    pub fn not_before(&self) -> &str {
        &self.not_before
    }

    /// The resource the token grants access to
    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Token type, usually `Bearer`
    #[must_use]
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    /// The instant the token expires, `None` if `expires_on` did not parse
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// The instant the token becomes valid, `None` if `not_before` did not parse
    #[must_use]
    pub fn not_before_time(&self) -> Option<DateTime<Utc>> {
        self.not_before_time
    }

    /// Time left until the token expires, negative once expired
    #[must_use]
    pub fn expires_in_duration(&self) -> Option<Duration> {
        self.expires_at.map(|at| at - Utc::now())
    }

    /// Whether the token expires within `margin` from now.
    /// A token without a known expiry is treated as expired.
    #[must_use]
    pub fn is_expired(&self, margin: Duration) -> bool {
        self.expires_at.map_or(true, |at| at <= Utc::now() + margin)
    }

    /// Whether the token is valid right now
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let now = Utc::now();
        self.not_before_time.map_or(true, |nb| nb <= now) && !self.is_expired(Duration::zero())
    }
}

/// Client for the managed identity token endpoint.
///
/// Every call performs a fresh request, caching tokens is up to the caller.
#[derive(Clone)]
pub struct TokenClient {
    url: String,
    client: reqwest::Client,
}

impl Debug for TokenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenClient")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl TokenClient {
    /// Client for one of the well known identity endpoints
    ///
    /// # Errors
    /// if the http client can't be created
    pub fn new(endpoint: IdentityEndpoint) -> Result<Self> {
        Self::with_url(endpoint.url())
    }

    /// Client for a custom token url
    ///
    /// # Errors
    /// if the http client can't be created
    pub fn with_url<S: Into<String>>(url: S) -> Result<Self> {
        Ok(Self {
            url: url.into(),
            client: rest::client(rest::METADATA_TIMEOUT)?,
        })
    }

    /// Fetches a token for `resource`
    ///
    /// # Errors
    /// on transport failures, non 2xx responses or malformed token documents
    pub async fn fetch_token(&self, resource: &str) -> Result<IdentityToken> {
        let url = url::Url::parse_with_params(&self.url, &[("resource", resource)])?;
        debug!("Requesting managed identity token for {resource}");
        let response = self
            .client
            .get(url)
            .header(rest::METADATA_HEADER.0, rest::METADATA_HEADER.1)
            .send()
            .await?;
        let body = rest::read_body(response).await?;
        let token = serde_json::from_str::<IdentityToken>(&body)?;
        Ok(token.parse_times())
    }
}
