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

//! HTTP helpers shared by the token, metadata and ingestion calls

use crate::errors::{Error, Result};
use std::time::Duration;

/// Header marking a request as targeted at the local metadata services
pub(crate) const METADATA_HEADER: (&str, &str) = ("Metadata", "true");

/// Timeout of the local metadata and identity endpoints
pub(crate) const METADATA_TIMEOUT: Duration = Duration::from_secs(15);

pub(crate) const CONTENT_TYPE_JSON: &str = "application/json";

pub(crate) fn client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Reads the body of a response, turning any status outside of `[200, 300)`
/// into a protocol error that carries the status and the reply.
pub(crate) async fn read_body(response: reqwest::Response) -> Result<String> {
    let status = response.status();
    if status.is_success() {
        Ok(response.text().await?)
    } else {
        // the body is diagnostics only, a failure to read it must not hide the status
        let body = response.text().await.unwrap_or_default();
        Err(Error::Protocol {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        })
    }
}
