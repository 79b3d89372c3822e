//! HTTP Transport Adapter
//!
//! Implements `MessageTransport` by posting envelopes with reqwest.

use crate::domain::SendError;
use crate::ports::outbound::{MessageTransport, TransportRequest, TransportResponse};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Default per-request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const CONTENT_TYPE: &str = "text/xml; charset=utf-8";

/// reqwest-backed transport.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Transport with the default timeout.
    pub fn new() -> Result<Self, SendError> {
        Self::with_timeout(DEFAULT_HTTP_TIMEOUT)
    }

    /// Transport with a custom per-request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, SendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SendError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MessageTransport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, SendError> {
        let url = reqwest::Url::parse(&request.endpoint)
            .map_err(|e| SendError::InvalidEndpoint(format!("{}: {e}", request.endpoint)))?;

        debug!(
            message_id = %request.message_id,
            endpoint = %url,
            "Posting envelope"
        );

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .header("SOAPAction", request.soap_action)
            .body(request.body)
            .send()
            .await
            .map_err(map_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(map_error)?;

        debug!(message_id = %request.message_id, status, "Remote responded");
        Ok(TransportResponse { status, body })
    }
}

fn map_error(err: reqwest::Error) -> SendError {
    if err.is_timeout() {
        SendError::Timeout
    } else {
        SendError::Connection(err.to_string())
    }
}
