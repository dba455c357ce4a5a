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

//! Shared key signing of Log Analytics data collector requests

use crate::errors::{Error, Result};
use base64::alphabet::STANDARD as STANDARD_ALPHABET;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Encodes with padding, but accepts keys with and without padding.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &STANDARD_ALPHABET,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// The request summary covered by the signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureContext<'a> {
    /// HTTP method
    pub method: &'a str,
    /// length of the body in bytes
    pub content_length: usize,
    /// value of the `Content-Type` header
    pub content_type: &'a str,
    /// value of the `x-ms-date` header, see [`rfc1123_date`]
    pub date: &'a str,
    /// path of the request, without query
    pub resource_path: &'a str,
}

impl SignatureContext<'_> {
    /// The canonical string the signature is computed over.
    /// Field order, separators and the header prefix must match byte for byte.
    // the service verifies `x-ms-date:` without a space before the date
    #[must_use]
    pub fn string_to_sign(&self) -> String {
        format!(
            "{}\n{}\n{}\nx-ms-date:{}\n{}",
            self.method, self.content_length, self.content_type, self.date, self.resource_path
        )
    }
}

/// Formats `at` as RFC 1123 date for the `x-ms-date` header
#[must_use]
pub fn rfc1123_date(at: DateTime<Utc>) -> String {
    // the service only accepts GMT as zone designator
    at.format("%a, %d %b %Y %H:%M:%S %Z")
        .to_string()
        .replacen("UTC", "GMT", 1)
}

/// Signs requests for a workspace with its shared key
#[derive(Clone)]
pub struct Signer {
    workspace: String,
    mac: Hmac<Sha256>,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("workspace", &self.workspace)
            .finish_non_exhaustive()
    }
}

impl Signer {
    /// Creates a signer from the base64 encoded shared key of `workspace`
    ///
    /// # Errors
    /// if the shared key is not valid base64
    pub fn new(workspace: &str, shared_key: &str) -> Result<Self> {
        let key = BASE64.decode(shared_key)?;
        let mac = Hmac::<Sha256>::new_from_slice(&key)
            .map_err(|_| Error::InvalidConfiguration("shared key can't be used as hmac key"))?;
        Ok(Self {
            workspace: workspace.to_string(),
            mac,
        })
    }

    /// The value of the `Authorization` header for a request
    #[must_use]
    pub fn sign(&self, ctx: &SignatureContext) -> String {
        let mut mac = self.mac.clone();
        mac.update(ctx.string_to_sign().as_bytes());
        let digest = BASE64.encode(mac.finalize().into_bytes());
        format!("SharedKey {}:{digest}", self.workspace)
    }
}
