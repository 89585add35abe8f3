//! Client for the txt2img endpoint of a running instance, reached through its activity tunnel.

use std::time::{Duration, Instant};

use compute_market::Binding;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use thiserror::Error;
use tracing::debug;
use txt2img_protocol::{
    GenerationRequest, GenerationResponse, JSON_CONTENT_TYPE, ProtocolError, Representation,
    activity_proxy_path,
};
use uuid::Uuid;

pub const MIN_TIMEOUT_MS: u64 = 250;

#[derive(Debug, Clone, Default)]
pub struct ProxyClientConfig {
    /// Limit on the whole call, streamed body included. `None` waits as long as the
    /// generation takes.
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ProxyClientError {
    #[error("proxy_binding_incomplete")]
    BindingIncomplete,
    #[error("proxy_request_encode_failed:{message}")]
    Encode { message: String },
    #[error("proxy_request_failed:{message}")]
    Request { message: String },
    #[error("proxy_read_failed:{message}")]
    Read { message: String },
    #[error("proxy_http_{status}:{body}")]
    Remote { status: StatusCode, body: String },
    /// The body arrived but is not a usable generation document. `body` is the raw payload.
    #[error("proxy_decode_failed:{message}")]
    Decode { message: String, body: Vec<u8> },
}

/// Posts generation requests to a bound instance. One attempt per call.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    timeout: Option<Duration>,
    http: reqwest::Client,
}

impl Default for ProxyClient {
    fn default() -> Self {
        Self::new(ProxyClientConfig::default())
    }
}

impl ProxyClient {
    pub fn new(config: ProxyClientConfig) -> Self {
        Self {
            timeout: config
                .timeout_ms
                .map(|timeout_ms| Duration::from_millis(timeout_ms.max(MIN_TIMEOUT_MS))),
            http: reqwest::Client::new(),
        }
    }

    /// `{tunnel_base_url}/activity/{activity_id}/proxy-http/sdapi/v1/txt2img`
    pub fn endpoint(binding: &Binding) -> Result<String, ProxyClientError> {
        let base_url = binding.tunnel_base_url.trim().trim_end_matches('/');
        if base_url.is_empty() || binding.activity_id.trim().is_empty() {
            return Err(ProxyClientError::BindingIncomplete);
        }
        Ok(format!(
            "{base_url}{}",
            activity_proxy_path(&binding.activity_id)
        ))
    }

    pub async fn generate(
        &self,
        binding: &Binding,
        request: &GenerationRequest,
        representation: Representation,
    ) -> Result<GenerationResponse, ProxyClientError> {
        let body = self.fetch(binding, request, representation).await?;
        GenerationResponse::from_slice(&body).map_err(|error| decode_error(error, body))
    }

    /// [`generate`](Self::generate) followed by base64 decoding of every image, in order.
    pub async fn generate_images(
        &self,
        binding: &Binding,
        request: &GenerationRequest,
        representation: Representation,
    ) -> Result<Vec<Vec<u8>>, ProxyClientError> {
        let body = self.fetch(binding, request, representation).await?;
        let decoded = GenerationResponse::from_slice(&body)
            .and_then(|document| document.decode_images());
        decoded.map_err(|error| decode_error(error, body))
    }

    async fn fetch(
        &self,
        binding: &Binding,
        request: &GenerationRequest,
        representation: Representation,
    ) -> Result<Vec<u8>, ProxyClientError> {
        let url = Self::endpoint(binding)?;
        let payload = serde_json::to_vec(request).map_err(|error| ProxyClientError::Encode {
            message: error.to_string(),
        })?;
        let started = Instant::now();

        let mut builder = self
            .http
            .post(url.as_str())
            .bearer_auth(&binding.token)
            .header(ACCEPT, representation.media_type())
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()));
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder
            .body(payload)
            .send()
            .await
            .map_err(|error| ProxyClientError::Request {
                message: error.to_string(),
            })?;

        let status = response.status();
        let body = match representation {
            Representation::Json => response.bytes().await.map(|bytes| bytes.to_vec()),
            Representation::Stream => collect_chunks(response.bytes_stream()).await,
        }
        .map_err(|error| ProxyClientError::Read {
            message: error.to_string(),
        })?;

        debug!(
            activity_id = %binding.activity_id,
            status = status.as_u16(),
            representation = representation.media_type(),
            bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "txt2img response received"
        );

        if !status.is_success() {
            return Err(format_http_error(status, &body));
        }
        Ok(body)
    }
}

/// Concatenate a chunked body in arrival order. Nothing is returned until the stream ends.
pub async fn collect_chunks<S, B, E>(chunks: S) -> Result<Vec<u8>, E>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    let mut chunks = std::pin::pin!(chunks);
    let mut body = Vec::new();
    while let Some(chunk) = chunks.next().await {
        body.extend_from_slice(chunk?.as_ref());
    }
    Ok(body)
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> ProxyClientError {
    let body = String::from_utf8_lossy(body).trim().to_string();
    ProxyClientError::Remote {
        status,
        body: if body.is_empty() {
            "<empty>".to_string()
        } else {
            body
        },
    }
}

fn decode_error(error: ProtocolError, body: Vec<u8>) -> ProxyClientError {
    ProxyClientError::Decode {
        message: error.to_string(),
        body,
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use anyhow::Result;
    use axum::Router;
    use axum::routing::post;
    use futures::stream;
    use tokio::net::TcpListener;
    use txt2img_server::{Txt2ImgService, make_txt2img_http_server};

    use super::*;

    fn binding(base_url: &str, token: &str) -> Binding {
        Binding {
            activity_id: "act-1".to_string(),
            tunnel_base_url: base_url.to_string(),
            token: token.to_string(),
        }
    }

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[test]
    fn endpoint_is_composed_from_binding() {
        let url = ProxyClient::endpoint(&binding("http://127.0.0.1:7465/", "k")).expect("url");
        assert_eq!(
            url,
            "http://127.0.0.1:7465/activity/act-1/proxy-http/sdapi/v1/txt2img"
        );
    }

    #[test]
    fn incomplete_binding_is_rejected() {
        assert!(matches!(
            ProxyClient::endpoint(&binding("  ", "k")),
            Err(ProxyClientError::BindingIncomplete)
        ));
        let mut missing_activity = binding("http://t", "k");
        missing_activity.activity_id = String::new();
        assert!(matches!(
            ProxyClient::endpoint(&missing_activity),
            Err(ProxyClientError::BindingIncomplete)
        ));
    }

    #[test]
    fn http_errors_keep_status_and_body() {
        let error = format_http_error(StatusCode::BAD_GATEWAY, b" upstream gone ");
        assert_eq!(error.to_string(), "proxy_http_502 Bad Gateway:upstream gone");
        let empty = format_http_error(StatusCode::INTERNAL_SERVER_ERROR, b"");
        assert!(matches!(empty, ProxyClientError::Remote { body, .. } if body == "<empty>"));
    }

    #[tokio::test]
    async fn chunks_are_concatenated_in_order() {
        let chunks: Vec<Result<Vec<u8>, ()>> = vec![
            Ok(b"{\"pr".to_vec()),
            Ok(b"ompt\"".to_vec()),
            Ok(b":\"x\"}".to_vec()),
        ];
        let body = collect_chunks(stream::iter(chunks)).await.expect("body");
        assert_eq!(body, br#"{"prompt":"x"}"#);
    }

    #[tokio::test]
    async fn chunk_error_aborts_collection() {
        let chunks: Vec<Result<Vec<u8>, &str>> =
            vec![Ok(b"{\"pr".to_vec()), Err("reset"), Ok(b"}".to_vec())];
        assert_eq!(collect_chunks(stream::iter(chunks)).await, Err("reset"));
    }

    #[tokio::test]
    async fn stream_and_json_replies_decode_to_the_same_document() -> Result<()> {
        let service = Arc::new(Txt2ImgService::new(b"hi", 4).with_auth_token("app-key"));
        let server = make_txt2img_http_server(loopback(), service)
            .await
            .map_err(anyhow::Error::msg)?;
        let client = ProxyClient::default();
        let bound = binding(&server.address, "app-key");
        let request = GenerationRequest::new("x");

        let streamed = client
            .generate(&bound, &request, Representation::Stream)
            .await?;
        let whole = client
            .generate(&bound, &request, Representation::Json)
            .await?;
        assert_eq!(streamed, GenerationResponse::new("x", vec!["aGk=".to_string()]));
        assert_eq!(streamed, whole);

        let images = client
            .generate_images(&bound, &request, Representation::Stream)
            .await?;
        assert_eq!(images, vec![b"hi".to_vec()]);

        server.close().await.map_err(anyhow::Error::msg)?;
        Ok(())
    }

    #[tokio::test]
    async fn remote_rejection_is_surfaced_without_retry() -> Result<()> {
        let service = Arc::new(Txt2ImgService::new(b"hi", 4).with_auth_token("app-key"));
        let server = make_txt2img_http_server(loopback(), service)
            .await
            .map_err(anyhow::Error::msg)?;

        let error = ProxyClient::default()
            .generate(
                &binding(&server.address, "wrong-key"),
                &GenerationRequest::new("x"),
                Representation::Json,
            )
            .await
            .expect_err("unauthorized");
        assert!(
            matches!(
                &error,
                ProxyClientError::Remote { status, body }
                    if *status == StatusCode::UNAUTHORIZED && body.contains("bearer token")
            ),
            "{error}"
        );

        server.close().await.map_err(anyhow::Error::msg)?;
        Ok(())
    }

    #[tokio::test]
    async fn malformed_document_keeps_raw_body() -> Result<()> {
        let app = Router::new().route(
            "/activity/:activity_id/proxy-http/sdapi/v1/txt2img",
            post(|| async { r#"{"prompt":"x","images":["@@@"]}"# }),
        );
        let listener = TcpListener::bind(loopback()).await?;
        let address = format!("http://{}", listener.local_addr()?);
        let join = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let client = ProxyClient::default();
        let bound = binding(&address, "k");
        let error = client
            .generate_images(&bound, &GenerationRequest::new("x"), Representation::Json)
            .await
            .expect_err("invalid base64");
        assert!(
            matches!(
                &error,
                ProxyClientError::Decode { body, .. }
                    if body.as_slice() == br#"{"prompt":"x","images":["@@@"]}"#
            ),
            "{error}"
        );

        let parsed = client
            .generate(&bound, &GenerationRequest::new("x"), Representation::Json)
            .await?;
        assert_eq!(parsed.images, vec!["@@@"]);

        join.abort();
        Ok(())
    }

    #[tokio::test]
    async fn slow_generation_outlives_default_client_but_not_configured_timeout() -> Result<()> {
        let app = Router::new().route(
            "/activity/:activity_id/proxy-http/sdapi/v1/txt2img",
            post(|| async {
                tokio::time::sleep(Duration::from_millis(1_000)).await;
                r#"{"prompt":"x","images":["aGk="]}"#
            }),
        );
        let listener = TcpListener::bind(loopback()).await?;
        let address = format!("http://{}", listener.local_addr()?);
        let join = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        let bound = binding(&address, "k");
        let request = GenerationRequest::new("x");

        let bounded = ProxyClient::new(ProxyClientConfig {
            timeout_ms: Some(MIN_TIMEOUT_MS),
        });
        let error = bounded
            .generate(&bound, &request, Representation::Json)
            .await
            .expect_err("timed out");
        assert!(matches!(error, ProxyClientError::Request { .. }), "{error}");

        let images = ProxyClient::default()
            .generate_images(&bound, &request, Representation::Json)
            .await?;
        assert_eq!(images, vec![b"hi".to_vec()]);

        join.abort();
        Ok(())
    }
}
