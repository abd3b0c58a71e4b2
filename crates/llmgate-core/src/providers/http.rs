//! Shared HTTP plumbing for vendor adapters

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::AdapterError;

/// Longest vendor error body kept in an error message
const MAX_ERROR_BODY: usize = 512;

pub(crate) fn client() -> Client {
    // Timeouts are applied per request from the endpoint config.
    Client::new()
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

pub(crate) fn map_transport_error(err: reqwest::Error) -> AdapterError {
    if err.is_timeout() {
        AdapterError::Timeout
    } else if err.is_decode() {
        AdapterError::InvalidResponse(err.to_string())
    } else {
        AdapterError::Network(err.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, AdapterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message: String = body.chars().take(MAX_ERROR_BODY).collect();
    debug!(status = status.as_u16(), "Vendor returned error status");
    Err(AdapterError::Vendor {
        status: status.as_u16(),
        message,
    })
}

/// Send a request and decode a JSON success body
pub(crate) async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, AdapterError> {
    let response = request.send().await.map_err(map_transport_error)?;
    let response = check_status(response).await?;
    let bytes = response.bytes().await.map_err(map_transport_error)?;
    serde_json::from_slice(&bytes).map_err(|e| AdapterError::InvalidResponse(e.to_string()))
}

/// Send a request where only the status matters
pub(crate) async fn send_probe(request: RequestBuilder) -> Result<(), AdapterError> {
    let response = request.send().await.map_err(map_transport_error)?;
    check_status(response).await.map(|_| ())
}
