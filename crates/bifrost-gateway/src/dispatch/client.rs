//! HTTP target client backed by reqwest.

use async_trait::async_trait;
use axum::http::header;

use super::{OutboundRequest, OutboundResponse, TargetClient};
use crate::config::DispatchConfig;
use crate::error::GatewayError;

#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(config: &DispatchConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.target_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(concat!("bifrost-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Config(format!("HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl TargetClient for ReqwestClient {
    async fn send(&self, request: OutboundRequest) -> Result<OutboundResponse, GatewayError> {
        let mut builder = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(classify)?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await.map_err(classify)?;

        Ok(OutboundResponse {
            status,
            content_type,
            body: body.to_vec(),
        })
    }
}

fn classify(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout
    } else if err.is_connect() {
        GatewayError::ConnectionFailed(err.to_string())
    } else if err.is_builder() {
        GatewayError::RequestBuildFailed(err.to_string())
    } else {
        GatewayError::BackendError(err.to_string())
    }
}
