//! reqwest implementation of the box relay contract.

use std::time::Duration;

use async_trait::async_trait;
use domains::{AdDelivery, BoxClient, BoxRoute, DomainError, PushMode, RemoveAds, SyncError};
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

const API_KEY_HEADER: &str = "X-API-KEY";

#[derive(Debug, Clone)]
pub struct BoxClientConfig {
    /// Every box listens on the same port
    pub port: u16,
    pub api_key: SecretString,
    pub timeout: Duration,
}

/// Entries of a `/get-ads` answer. Boxes return either bare file names or
/// delivery objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DisplayedAd {
    Name(String),
    Delivery {
        #[serde(rename = "fileName")]
        file_name: String,
    },
}

impl DisplayedAd {
    fn into_file_name(self) -> String {
        match self {
            Self::Name(name) => name,
            Self::Delivery { file_name } => file_name,
        }
    }
}

pub struct HttpBoxClient {
    client: Client,
    config: BoxClientConfig,
}

impl HttpBoxClient {
    pub fn new(config: BoxClientConfig) -> Result<Self, DomainError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DomainError::Internal(format!("could not build box client: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self, route: &BoxRoute, path: &str) -> String {
        format!("http://{}:{}{}", route.ip, self.config.port, path)
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<Response, SyncError> {
        let response = request
            .header(API_KEY_HEADER, self.config.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Rejected { url: url.to_owned(), status: status.as_u16() });
        }
        debug!(url, status = status.as_u16(), "box call succeeded");
        Ok(response)
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> SyncError {
    if e.is_timeout() {
        SyncError::Timeout { url: url.to_owned() }
    } else if e.is_decode() {
        SyncError::InvalidResponse { url: url.to_owned(), message: e.to_string() }
    } else {
        SyncError::Unreachable { url: url.to_owned(), message: e.to_string() }
    }
}

#[async_trait]
impl BoxClient for HttpBoxClient {
    async fn push_ads(&self, route: &BoxRoute, mode: PushMode, ads: Vec<AdDelivery>) -> Result<(), SyncError> {
        let path = match mode {
            PushMode::Single => "/ad",
            PushMode::Bulk => "/update-ads",
        };
        let url = self.url(route, path);
        self.send(&url, self.client.post(&url).json(&ads)).await?;
        Ok(())
    }

    async fn remove_ads(&self, route: &BoxRoute, body: RemoveAds) -> Result<(), SyncError> {
        let url = self.url(route, "/remove-ads");
        self.send(&url, self.client.post(&url).json(&body)).await?;
        Ok(())
    }

    async fn remove_monitor(&self, route: &BoxRoute, monitor_id: Uuid) -> Result<(), SyncError> {
        let url = self.url(route, &format!("/remove-monitor/{monitor_id}"));
        self.send(&url, self.client.delete(&url)).await?;
        Ok(())
    }

    async fn displayed_ads(&self, route: &BoxRoute, monitor_id: Uuid) -> Result<Vec<String>, SyncError> {
        let url = self.url(route, &format!("/get-ads/{monitor_id}"));
        let response = self.send(&url, self.client.get(&url)).await?;
        let ads: Vec<DisplayedAd> = response.json().await.map_err(|e| SyncError::InvalidResponse {
            url: url.clone(),
            message: e.to_string(),
        })?;
        Ok(ads.into_iter().map(DisplayedAd::into_file_name).collect())
    }
}
