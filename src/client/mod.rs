use crate::api_error::{user_facing, ApiError};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::transport::{OutboundRequest, Transport};
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Fully-read response of one logical request
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Turn a non-2xx response into [`ClientError::Api`]
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        Err(ClientError::Api(ApiError::from_response(
            self.status,
            &self.body,
        )))
    }

    /// Terminal-friendly description of a non-2xx response
    pub fn user_message(&self, context: Option<&str>) -> String {
        user_facing(self.status, &self.body, context)
    }
}

/// Client for the Beeper Desktop local API
#[derive(Debug, Clone)]
pub struct BeeperClient {
    transport: Transport,
}

impl BeeperClient {
    /// Build a client from configuration
    pub fn new(config: ClientConfig) -> Result<Self> {
        Ok(Self::from_transport(Transport::new(config)?))
    }

    pub fn from_transport(transport: Transport) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Send `body` (if any) with `method` to `path` and read the whole response
    pub async fn send(
        &self,
        cancel: &CancellationToken,
        method: Method,
        path: &str,
        body: Option<Bytes>,
    ) -> Result<ApiResponse> {
        let mut request = OutboundRequest::new(method, path);
        if let Some(body) = body {
            request = request.with_body(body);
        }
        self.execute(request, cancel).await
    }

    pub async fn get(&self, cancel: &CancellationToken, path: &str) -> Result<ApiResponse> {
        self.send(cancel, Method::GET, path, None).await
    }

    /// POST `body` encoded as JSON
    pub async fn post<T: Serialize + ?Sized>(
        &self,
        cancel: &CancellationToken,
        path: &str,
        body: &T,
    ) -> Result<ApiResponse> {
        let request = OutboundRequest::post(path).with_json(body)?;
        self.execute(request, cancel).await
    }

    pub async fn delete(&self, cancel: &CancellationToken, path: &str) -> Result<ApiResponse> {
        self.send(cancel, Method::DELETE, path, None).await
    }

    async fn execute(
        &self,
        request: OutboundRequest,
        cancel: &CancellationToken,
    ) -> Result<ApiResponse> {
        let response = self.transport.send(request, cancel).await?;
        let status = response.status();
        let headers = response.headers().clone();

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            body = response.bytes() => body?,
        };

        debug!(status = status.as_u16(), bytes = body.len(), "Read response body");
        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
