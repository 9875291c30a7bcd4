//! RabbitMQ management HTTP API client

use super::ManagementApi;
use crate::error::{Result, ShadowError};
use crate::types::{
    BindingInfo, BrokerOverview, ExchangeInfo, ListenerInfo, Permissions, QueueInfo,
    QueuedMessage, VhostInfo, WhoAmI,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Management client over the broker's HTTP API with basic auth
#[derive(Debug)]
pub struct HttpManagementClient {
    client: reqwest::Client,
    /// Base URL without trailing slash, e.g. `http://broker:15672`
    base: String,
    username: String,
    password: String,
}

/// Wire shape of `/api/overview`: identity fields plus listeners
#[derive(Debug, Deserialize)]
struct OverviewDto {
    #[serde(default)]
    product_name: String,
    #[serde(default)]
    product_version: String,
    #[serde(default)]
    cluster_name: String,
    #[serde(default)]
    management_version: String,
    #[serde(default)]
    listeners: Vec<ListenerInfo>,
}

impl HttpManagementClient {
    /// Create a client for the given management URL and credentials
    pub fn new(url: &str, username: &str, password: &str) -> Result<Self> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| ShadowError::Config(format!("invalid management URL '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ShadowError::Config(format!(
                "management URL must be http(s), got '{}'",
                parsed.scheme()
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ShadowError::Management(e.to_string()))?;

        Ok(Self {
            client,
            base: url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// The host part of the management URL (used to probe wildcard listeners)
    pub fn host(&self) -> Option<String> {
        reqwest::Url::parse(&self.base)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        vhost: Option<&str>,
    ) -> Result<T> {
        let url = format!("{}{}", self.base, path);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| ShadowError::Management(format!("GET {}: {}", path, e)))?;

        check_status(path, vhost, &response)?;

        response
            .json::<T>()
            .await
            .map_err(|e| ShadowError::Management(format!("GET {}: bad response: {}", path, e)))
    }

    async fn overview_dto(&self) -> Result<OverviewDto> {
        self.get_json("/api/overview", None).await
    }
}

fn check_status(path: &str, vhost: Option<&str>, response: &reqwest::Response) -> Result<()> {
    match status_error(response.status(), path, vhost) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Classify a management status code
///
/// 401/403 on a vhost-scoped endpoint is an access denial on that vhost;
/// on an unscoped endpoint it means the credentials themselves are bad.
fn status_error(
    status: reqwest::StatusCode,
    path: &str,
    vhost: Option<&str>,
) -> Option<ShadowError> {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Some(match vhost {
            Some(v) => ShadowError::AccessDenied {
                vhost: v.to_string(),
                reason: format!("management API returned {}", status),
            },
            None => ShadowError::Management(format!("{} returned {}: access refused", path, status)),
        });
    }
    if !status.is_success() {
        return Some(ShadowError::Management(format!(
            "{} returned {}",
            path, status
        )));
    }
    None
}

fn seg(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

#[async_trait]
impl ManagementApi for HttpManagementClient {
    async fn overview(&self) -> Result<BrokerOverview> {
        let dto = self.overview_dto().await?;
        Ok(BrokerOverview {
            product_name: dto.product_name,
            product_version: dto.product_version,
            cluster_name: dto.cluster_name,
            management_version: dto.management_version,
        })
    }

    async fn whoami(&self) -> Result<WhoAmI> {
        self.get_json("/api/whoami", None).await
    }

    async fn list_vhosts(&self) -> Result<Vec<VhostInfo>> {
        self.get_json("/api/vhosts", None).await
    }

    async fn list_queues(&self, vhost: &str) -> Result<Vec<QueueInfo>> {
        self.get_json(&format!("/api/queues/{}", seg(vhost)), Some(vhost))
            .await
    }

    async fn list_exchanges(&self, vhost: &str) -> Result<Vec<ExchangeInfo>> {
        self.get_json(&format!("/api/exchanges/{}", seg(vhost)), Some(vhost))
            .await
    }

    async fn list_bindings(&self, vhost: &str) -> Result<Vec<BindingInfo>> {
        self.get_json(&format!("/api/bindings/{}", seg(vhost)), Some(vhost))
            .await
    }

    async fn permissions_for(&self, vhost: &str, user: &str) -> Result<Option<Permissions>> {
        let path = format!("/api/permissions/{}/{}", seg(vhost), seg(user));
        let url = format!("{}{}", self.base, path);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| ShadowError::Management(format!("GET {}: {}", path, e)))?;

        // No permission record for this vhost means no access, not an error
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        check_status(&path, Some(vhost), &response)?;

        let perms = response
            .json::<Permissions>()
            .await
            .map_err(|e| ShadowError::Management(format!("GET {}: bad response: {}", path, e)))?;
        Ok(Some(perms))
    }

    async fn list_amqp_listeners(&self) -> Result<Vec<ListenerInfo>> {
        let dto = self.overview_dto().await?;
        Ok(dto
            .listeners
            .into_iter()
            .filter(|l| l.protocol.starts_with("amqp"))
            .collect())
    }

    async fn get_messages(
        &self,
        vhost: &str,
        queue: &str,
        count: u32,
    ) -> Result<Vec<QueuedMessage>> {
        let path = format!("/api/queues/{}/{}/get", seg(vhost), seg(queue));
        let url = format!("{}{}", self.base, path);
        let body = serde_json::json!({
            "count": count,
            "ackmode": "ack_requeue_true",
            "encoding": "auto",
            "truncate": 50_000,
        });

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| ShadowError::Management(format!("POST {}: {}", path, e)))?;

        check_status(&path, Some(vhost), &response)?;

        response
            .json::<Vec<QueuedMessage>>()
            .await
            .map_err(|e| ShadowError::Management(format!("POST {}: bad response: {}", path, e)))
    }
}
