// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! IPFS HTTP API client (Kubo-compatible), with optional Pinata mirroring.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::ContentStore;
use crate::blockchain::ContentRef;
use crate::config::{ContentConfig, PinataCredentials};
use crate::error::ContentError;

const DEFAULT_PINATA_URL: &str = "https://api.pinata.cloud";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_FILE_NAME: &str = "document.json";

#[derive(Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

#[derive(Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

struct PinataMirror {
    base_url: String,
    credentials: PinataCredentials,
}

/// Content store backed by an IPFS node's HTTP API.
pub struct IpfsStore {
    http: Client,
    api_url: String,
    mirror: Option<PinataMirror>,
}

impl IpfsStore {
    pub fn new(config: &ContentConfig) -> Result<Self, ContentError> {
        let api_url: url::Url = config
            .api_url
            .parse()
            .map_err(|e: url::ParseError| {
                ContentError::Publish(format!("invalid IPFS API URL {}: {e}", config.api_url))
            })?;

        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ContentError::Publish(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_url: api_url.as_str().trim_end_matches('/').to_string(),
            mirror: config.pinata.clone().map(|credentials| PinataMirror {
                base_url: DEFAULT_PINATA_URL.to_string(),
                credentials,
            }),
        })
    }

    #[cfg(test)]
    fn with_pinata_url(mut self, base_url: &str) -> Self {
        if let Some(mirror) = self.mirror.as_mut() {
            mirror.base_url = base_url.trim_end_matches('/').to_string();
        }
        self
    }

    fn endpoint(&self, command: &str) -> String {
        format!("{}/api/v0/{command}", self.api_url)
    }

    fn upload_form(bytes: Vec<u8>) -> Form {
        Form::new().part("file", Part::bytes(bytes).file_name(UPLOAD_FILE_NAME))
    }

    async fn add(&self, bytes: Vec<u8>) -> Result<ContentRef, ContentError> {
        let response = self
            .http
            .post(self.endpoint("add"))
            .query(&[("pin", "true")])
            .multipart(Self::upload_form(bytes))
            .send()
            .await
            .map_err(|e| ContentError::Publish(format!("add request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ContentError::Publish(format!(
                "add returned {status}: {body}"
            )));
        }

        let added: AddResponse = response
            .json()
            .await
            .map_err(|e| ContentError::Publish(format!("invalid add response: {e}")))?;

        ContentRef::new(added.hash)
    }

    async fn pin_to_mirror(
        &self,
        mirror: &PinataMirror,
        bytes: Vec<u8>,
    ) -> Result<String, ContentError> {
        let response = self
            .http
            .post(format!("{}/pinning/pinFileToIPFS", mirror.base_url))
            .header("pinata_api_key", &mirror.credentials.api_key)
            .header("pinata_secret_api_key", &mirror.credentials.secret_api_key)
            .multipart(Self::upload_form(bytes))
            .send()
            .await
            .map_err(|e| ContentError::Publish(format!("pin request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ContentError::Publish(format!(
                "pin returned {status}: {body}"
            )));
        }

        let pinned: PinResponse = response
            .json()
            .await
            .map_err(|e| ContentError::Publish(format!("invalid pin response: {e}")))?;

        Ok(pinned.ipfs_hash)
    }
}

impl ContentStore for IpfsStore {
    async fn publish(&self, bytes: Vec<u8>) -> Result<ContentRef, ContentError> {
        let mirror_copy = self.mirror.as_ref().map(|_| bytes.clone());
        let reference = self.add(bytes).await?;
        info!(content = %reference, "Published content to IPFS");

        // Mirror failures never fail the publish.
        if let (Some(mirror), Some(bytes)) = (self.mirror.as_ref(), mirror_copy) {
            match self.pin_to_mirror(mirror, bytes).await {
                Ok(pinned) if pinned == reference.as_str() => {
                    debug!(content = %reference, "Pinned content to mirror");
                }
                Ok(pinned) => {
                    warn!(
                        content = %reference,
                        mirror_content = %pinned,
                        "Mirror returned a different content reference"
                    );
                }
                Err(e) => {
                    warn!(content = %reference, error = %e, "Failed to pin content to mirror");
                }
            }
        }

        Ok(reference)
    }

    async fn fetch(&self, reference: &ContentRef) -> Result<Vec<u8>, ContentError> {
        let response = self
            .http
            .post(self.endpoint("cat"))
            .query(&[("arg", reference.as_str())])
            .send()
            .await
            .map_err(|e| ContentError::Fetch(format!("cat request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ContentError::Fetch(format!(
                "cat {reference} returned {status}: {body}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ContentError::Fetch(format!("failed to read {reference}: {e}")))?;

        Ok(bytes.to_vec())
    }
}
