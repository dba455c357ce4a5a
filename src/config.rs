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
use serde::de::DeserializeOwned;

/// Default timeout for posting to the ingestion endpoints, in milliseconds
pub(crate) const DEFAULT_POST_TIMEOUT_MS: u64 = 30_000;

pub(crate) fn default_post_timeout() -> u64 {
    DEFAULT_POST_TIMEOUT_MS
}

/// Trait for writer configurations, errors name the offending keys
pub trait Impl: DeserializeOwned {
    /// deserialises the config into a struct and returns nice errors
    /// this doesn't need to be overwritten in most cases.
    ///
    /// # Errors
    /// if the Configuration is invalid
    fn new(config: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(config.clone()).map_err(Error::Config)
    }
}
