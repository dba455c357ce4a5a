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

/// The error type for the azure writers
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Connection, DNS or timeout failure of an HTTP call
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The remote service answered with a status outside of `[200, 300)`
    #[error("HTTP response code:{status} message:{reason} reply:\n{body}")]
    Protocol {
        /// HTTP status code
        status: u16,
        /// Canonical reason phrase of the status code
        reason: String,
        /// Response body, empty if it could not be read
        body: String,
    },
    /// A response body was not the expected JSON document
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    /// A payload could not be serialized
    #[error("Failed to encode payload: {0}")]
    Encode(serde_json::Error),
    /// The configuration does not match the expected shape
    #[error("Invalid configuration: {0}")]
    Config(serde_json::Error),
    /// Required configuration is missing or empty
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
    /// The shared key is not valid base64
    #[error("Invalid shared key: {0}")]
    Signing(#[from] base64::DecodeError),
    /// An endpoint URL could not be built
    #[error("Invalid endpoint url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The ingestion host could not be resolved
    #[error("Could not resolve endpoint {0}: {1}")]
    Resolve(String, std::io::Error),
}

impl Error {
    /// The HTTP status for protocol errors
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Protocol { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Result type for the azure writers
pub type Result<T> = std::result::Result<T, Error>;
