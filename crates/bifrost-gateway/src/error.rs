//! Gateway error types.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bifrost_store::StoreError;
use thiserror::Error;

use crate::template::TemplateError;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Route not found: {0}")]
    NotFound(String),

    #[error("Route already exists: {0}")]
    Conflict(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid route definition: {0}")]
    InvalidDefinition(String),

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Request body unreadable: {0}")]
    BodyUnreadable(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request build failed: {0}")]
    RequestBuildFailed(String),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Unauthorized => "unauthorized",
            Self::InvalidDefinition(_) => "invalid_definition",
            Self::PayloadTooLarge => "payload_too_large",
            Self::BodyUnreadable(_) => "body_unreadable",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::RequestBuildFailed(_) => "request_build_failed",
            Self::BackendError(_) => "backend_error",
            Self::Timeout => "timeout",
            Self::Template(_) => "template_error",
            Self::Store(_) => "store_error",
            Self::Io(_) => "io_error",
        }
    }

    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InvalidDefinition(_) | Self::BodyUnreadable(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::ConnectionFailed(_) | Self::BackendError(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_)
            | Self::RequestBuildFailed(_)
            | Self::Template(_)
            | Self::Store(_)
            | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match &self {
            Self::NotFound(_) => "Not found".to_owned(),
            Self::Conflict(_) => "Conflict".to_owned(),
            Self::Unauthorized => "Unauthorized".to_owned(),
            Self::InvalidDefinition(reason) => format!("Invalid route definition: {reason}"),
            Self::PayloadTooLarge => "Request body too large".to_owned(),
            Self::BodyUnreadable(_) => "Request body unreadable".to_owned(),
            Self::Timeout => "Request timeout".to_owned(),

            // Hide internal details
            Self::Config(_)
            | Self::ConnectionFailed(_)
            | Self::RequestBuildFailed(_)
            | Self::BackendError(_)
            | Self::Template(_)
            | Self::Store(_)
            | Self::Io(_) => {
                tracing::error!(error = %self, error_type = self.error_type(), "Request failed");
                "Internal server error".to_owned()
            }
        };

        let mut response = (status, message).into_response();
        if matches!(self, Self::Unauthorized) {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"bifrost\""),
            );
        }
        response
    }
}
