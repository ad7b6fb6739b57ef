//! `reqwest` client for the worker control plane.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::config::ControlPlaneSettings;
use crate::schema_change::ports::{
    ControlPlane, ControlPlaneError, ControlPlaneResult, MigrationCounters, SupervisorResponse,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest {
    throttle_rps: u32,
}

/// HTTP control-plane client with one timeout per endpoint.
#[derive(Debug, Clone)]
pub struct HttpControlPlaneClient {
    client: Client,
    settings: ControlPlaneSettings,
}

impl HttpControlPlaneClient {
    /// Builds a client from timeout settings.
    ///
    /// # Errors
    ///
    /// Returns [`ControlPlaneError::Transport`] when the HTTP client cannot
    /// be initialised.
    pub fn new(settings: ControlPlaneSettings) -> ControlPlaneResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(settings.connect_timeout_ms))
            .build()
            .map_err(|err| ControlPlaneError::Transport {
                path: String::new(),
                message: err.to_string(),
            })?;
        Ok(Self { client, settings })
    }

    async fn send(
        &self,
        path: &str,
        request: RequestBuilder,
        timeout_ms: u64,
    ) -> ControlPlaneResult<SupervisorResponse> {
        let response = request
            .timeout(Duration::from_millis(timeout_ms))
            .send()
            .await
            .map_err(|err| ControlPlaneError::Transport {
                path: path.to_owned(),
                message: err.to_string(),
            })?;
        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            return Err(ControlPlaneError::Status {
                path: path.to_owned(),
                status: status.as_u16(),
            });
        }
        let body = response
            .json::<SupervisorResponse>()
            .await
            .map_err(|err| ControlPlaneError::Decode(err.to_string()))?;
        debug!(path, success = body.success, "control plane answered");
        Ok(body)
    }
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{path}", base_url.trim_end_matches('/'))
}

#[async_trait]
impl ControlPlane for HttpControlPlaneClient {
    async fn heartbeat(&self, base_url: &str) -> ControlPlaneResult<SupervisorResponse> {
        let request = self.client.get(endpoint(base_url, "/heartbeat"));
        self.send("/heartbeat", request, self.settings.heartbeat_timeout_ms)
            .await
    }

    async fn start(
        &self,
        base_url: &str,
        config: &BTreeMap<String, String>,
    ) -> ControlPlaneResult<SupervisorResponse> {
        let request = self.client.post(endpoint(base_url, "/start")).json(config);
        self.send("/start", request, self.settings.start_timeout_ms)
            .await
    }

    async fn monitor(&self, base_url: &str) -> ControlPlaneResult<MigrationCounters> {
        let request = self.client.get(endpoint(base_url, "/monitor"));
        let response = self
            .send("/monitor", request, self.settings.monitor_timeout_ms)
            .await?;
        MigrationCounters::from_response(&response)
    }

    async fn update(
        &self,
        base_url: &str,
        throttle_rps: u32,
    ) -> ControlPlaneResult<SupervisorResponse> {
        let request = self
            .client
            .post(endpoint(base_url, "/update"))
            .json(&UpdateRequest { throttle_rps });
        self.send("/update", request, self.settings.update_timeout_ms)
            .await
    }

    async fn clear(&self, base_url: &str) -> ControlPlaneResult<SupervisorResponse> {
        let request = self.client.get(endpoint(base_url, "/clear"));
        self.send("/clear", request, self.settings.clear_timeout_ms)
            .await
    }
}
