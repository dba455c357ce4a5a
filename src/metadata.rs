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

//! Azure instance metadata and resource id resolution

use crate::errors::{Error, Result};
use crate::rest;
use log::debug;
use serde::Deserialize;
use tokio::sync::OnceCell;

const INSTANCE_METADATA_URL: &str =
    "http://169.254.169.254/metadata/instance?api-version=2017-12-01";

/// The compute section of the instance metadata document
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Compute {
    /// Azure region of the VM
    pub location: String,
    /// VM name
    pub name: String,
    /// Resource group the VM belongs to
    pub resource_group_name: String,
    /// Subscription the VM belongs to
    pub subscription_id: String,
    /// Unique id of the VM
    pub vm_id: String,
    /// VM size
    pub vm_size: String,
    /// Operating system type
    pub os_type: String,
    /// Scale set the VM belongs to, if any
    pub vm_scale_set_name: String,
    /// Availability zone
    pub zone: String,
}

/// An ip address of a network interface
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IpAddress {
    /// private address
    pub private_ip_address: String,
    /// public address, empty if there is none
    pub public_ip_address: String,
}

/// The ipv4 configuration of a network interface
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Ipv4 {
    /// assigned addresses
    pub ip_address: Vec<IpAddress>,
}

/// A network interface of the VM
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Interface {
    /// ipv4 configuration
    pub ipv4: Ipv4,
    /// MAC address
    pub mac_address: String,
}

/// The network section of the instance metadata document
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Network {
    /// network interfaces
    pub interface: Vec<Interface>,
}

/// The subset of the instance metadata document used by the writers
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct VirtualMachineMetadata {
    /// compute section
    pub compute: Compute,
    /// network section
    pub network: Network,
}

impl VirtualMachineMetadata {
    /// The Azure resource id of the VM
    #[must_use]
    pub fn resource_id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachines/{}",
            self.compute.subscription_id, self.compute.resource_group_name, self.compute.name
        )
    }
}

/// Client for the instance metadata service
#[derive(Debug, Clone)]
pub struct MetadataClient {
    url: String,
    client: reqwest::Client,
}

impl MetadataClient {
    /// Client for the well known instance metadata endpoint
    ///
    /// # Errors
    /// if the http client can't be created
    pub fn new() -> Result<Self> {
        Self::with_url(INSTANCE_METADATA_URL)
    }

    /// Client for a custom metadata url
    ///
    /// # Errors
    /// if the http client can't be created
    pub fn with_url<S: Into<String>>(url: S) -> Result<Self> {
        Ok(Self {
            url: url.into(),
            client: rest::client(rest::METADATA_TIMEOUT)?,
        })
    }

    /// Fetches the metadata document of the VM
    ///
    /// # Errors
    /// on transport failures, non 2xx responses or malformed documents
    pub async fn fetch(&self) -> Result<VirtualMachineMetadata> {
        let response = self
            .client
            .get(&self.url)
            .header(rest::METADATA_HEADER.0, rest::METADATA_HEADER.1)
            .send()
            .await?;
        let body = rest::read_body(response).await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Resolves the target resource id and region of the custom metrics writer.
///
/// The metadata document is fetched at most once and the resolved resource id
/// is kept for the lifetime of the resolver, concurrent callers wait for the
/// first resolution instead of fetching again.
#[derive(Debug)]
pub struct ResourceResolver {
    client: MetadataClient,
    metadata: OnceCell<VirtualMachineMetadata>,
    resource_id: OnceCell<String>,
}

impl ResourceResolver {
    /// Creates a resolver using `client` for metadata lookups
    #[must_use]
    pub fn new(client: MetadataClient) -> Self {
        Self {
            client,
            metadata: OnceCell::new(),
            resource_id: OnceCell::new(),
        }
    }

    async fn metadata(&self) -> Result<&VirtualMachineMetadata> {
        self.metadata
            .get_or_try_init(|| async { self.client.fetch().await })
            .await
    }

    /// Resolves the resource id, an explicitly configured id always wins
    ///
    /// # Errors
    /// if the metadata document can't be fetched
    pub async fn resolve(&self, explicit_id: &str) -> Result<String> {
        if !explicit_id.is_empty() {
            return Ok(explicit_id.to_string());
        }
        let id = self
            .resource_id
            .get_or_try_init(|| async {
                let id = self.metadata().await?.resource_id();
                debug!("Resolved resource id {id} from instance metadata");
                Ok::<_, Error>(id)
            })
            .await?;
        Ok(id.clone())
    }

    /// Resolves the region, an explicitly configured region always wins
    ///
    /// # Errors
    /// if the metadata document can't be fetched or has no location
    pub async fn region(&self, explicit_region: &str) -> Result<String> {
        if !explicit_region.is_empty() {
            return Ok(explicit_region.to_string());
        }
        let location = &self.metadata().await?.compute.location;
        if location.is_empty() {
            return Err(Error::InvalidConfiguration(
                "no region configured and instance metadata has no location",
            ));
        }
        Ok(location.clone())
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) const MOCK_RESOURCE_ID: &str =
        "/subscriptions/s1/resourceGroups/rg1/providers/Microsoft.Compute/virtualMachines/vm1";

    pub(crate) async fn mock_metadata_server(hits: usize) -> (mockito::ServerGuard, mockito::Mock) {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/metadata/instance")
            .match_header("Metadata", "true")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "compute": {
                        "location": "westeurope",
                        "name": "vm1",
                        "resourceGroupName": "rg1",
                        "subscriptionId": "s1",
                        "vmId": "13f56399-bd52-4150-9748-7190aae1ff21",
                        "vmSize": "Standard_D1",
                        "tags": "",
                        "platformFaultDomain": "0"
                    },
                    "network": {
                        "interface": [{
                            "ipv4": {
                                "ipAddress": [{"privateIpAddress": "10.1.0.4", "publicIpAddress": ""}],
                                "subnet": [{"address": "10.1.0.0", "prefix": "24"}]
                            },
                            "ipv6": {"ipAddress": []},
                            "macAddress": "000D3A00FA89"
                        }]
                    }
                }"#,
            )
            .expect(hits)
            .create_async()
            .await;
        (server, mock)
    }

    pub(crate) fn mock_client(server: &mockito::ServerGuard) -> Result<MetadataClient> {
        MetadataClient::with_url(format!("{}/metadata/instance", server.url()))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fetch_document() -> anyhow::Result<()> {
        let (server, mock) = mock_metadata_server(1).await;
        let metadata = mock_client(&server)?.fetch().await?;
        assert_eq!(metadata.compute.location, "westeurope");
        assert_eq!(metadata.compute.vm_size, "Standard_D1");
        assert_eq!(
            metadata.network.interface[0].ipv4.ip_address[0].private_ip_address,
            "10.1.0.4"
        );
        assert_eq!(metadata.resource_id(), MOCK_RESOURCE_ID);
        mock.assert_async().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_from_metadata_once() -> anyhow::Result<()> {
        let (server, mock) = mock_metadata_server(1).await;
        let resolver = ResourceResolver::new(mock_client(&server)?);

        assert_eq!(resolver.resolve("").await?, MOCK_RESOURCE_ID);
        assert_eq!(resolver.resolve("").await?, MOCK_RESOURCE_ID);
        assert_eq!(resolver.region("").await?, "westeurope");
        mock.assert_async().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn explicit_id_skips_metadata() -> anyhow::Result<()> {
        let (server, mock) = mock_metadata_server(0).await;
        let resolver = ResourceResolver::new(mock_client(&server)?);

        assert_eq!(resolver.resolve("explicit-id").await?, "explicit-id");
        assert_eq!(resolver.region("eastus").await?, "eastus");
        mock.assert_async().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn metadata_failure_is_fatal() -> anyhow::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/metadata/instance")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;
        let resolver = ResourceResolver::new(mock_client(&server)?);

        let err = resolver
            .resolve("")
            .await
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected an error"))?;
        assert_eq!(err.status(), Some(500));
        assert!(err.to_string().contains("boom"));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_location() -> anyhow::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/metadata/instance")
            .with_status(200)
            .with_body(r#"{"compute": {"name": "vm1"}}"#)
            .create_async()
            .await;
        let resolver = ResourceResolver::new(mock_client(&server)?);

        assert!(matches!(
            resolver.region("").await,
            Err(Error::InvalidConfiguration(_))
        ));
        Ok(())
    }
}
