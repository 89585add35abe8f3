use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::Response;
use axum::routing::{get, post};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{info, warn};
use txt2img_protocol::{
    GenerationRequest, JSON_CONTENT_TYPE, REQUEST_MUST_BE_JSON, Representation, TXT2IMG_PATH,
    split_into_chunks,
};

use crate::service::Txt2ImgService;

pub struct Txt2ImgHttpServer {
    pub address: String,
    shutdown: Option<oneshot::Sender<()>>,
    join: tokio::task::JoinHandle<()>,
}

impl Txt2ImgHttpServer {
    pub async fn close(mut self) -> Result<(), String> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.join
            .await
            .map_err(|error| format!("server join failed: {error}"))
    }
}

pub async fn make_txt2img_http_server(
    bind_addr: SocketAddr,
    service: Arc<Txt2ImgService>,
) -> Result<Txt2ImgHttpServer, String> {
    let app = build_router(service);
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|error| format!("failed to bind listener: {error}"))?;

    let address = format!(
        "http://{}",
        listener.local_addr().map_err(|error| error.to_string())?
    );
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let join = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
    });

    info!(address = %address, "txt2img server listening");
    Ok(Txt2ImgHttpServer {
        address,
        shutdown: Some(shutdown_tx),
        join,
    })
}

pub fn build_router(service: Arc<Txt2ImgService>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(TXT2IMG_PATH, post(txt2img))
        .route(
            "/activity/:activity_id/proxy-http/sdapi/v1/txt2img",
            post(txt2img),
        )
        .with_state(service)
}

async fn healthz(headers: HeaderMap) -> Response {
    let request_id = request_id_from_headers(&headers);
    json_response(
        StatusCode::OK,
        &request_id,
        json!({ "ok": true, "requestId": request_id }),
        false,
    )
}

async fn txt2img(
    State(service): State<Arc<Txt2ImgService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = request_id_from_headers(&headers);

    if let Some(response) = authorize(&service, &headers, &request_id) {
        return response;
    }

    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            return json_response(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                &request_id,
                json!({ "error": REQUEST_MUST_BE_JSON }),
                false,
            );
        }
    };
    let request: GenerationRequest = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(error) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                &request_id,
                json!({ "error": format!("invalid generation request: {error}") }),
                false,
            );
        }
    };

    let representation = Representation::from_accept(
        headers
            .get(header::ACCEPT)
            .and_then(|value| value.to_str().ok()),
    );
    info!(
        request_id = %request_id,
        prompt_chars = request.prompt.chars().count(),
        steps = ?request.steps,
        representation = representation.media_type(),
        "txt2img request"
    );

    let document = service.generate(&request);
    let payload = match document.to_json_bytes() {
        Ok(payload) => payload,
        Err(error) => {
            warn!(request_id = %request_id, error = %error, "failed to serialize response");
            return json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &request_id,
                json!({ "error": "failed to serialize response" }),
                false,
            );
        }
    };

    match representation {
        Representation::Json => payload_response(representation, &request_id, Body::from(payload)),
        Representation::Stream => {
            let chunks = split_into_chunks(&payload, service.chunk_size())
                .into_iter()
                .map(|chunk| Ok::<_, Infallible>(Bytes::from(chunk)));
            payload_response(
                representation,
                &request_id,
                Body::from_stream(futures::stream::iter(chunks)),
            )
        }
    }
}

fn payload_response(representation: Representation, request_id: &str, body: Body) -> Response {
    let content_type = match representation {
        Representation::Json => JSON_CONTENT_TYPE,
        Representation::Stream => representation.media_type(),
    };
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    let _ = headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Ok(value) = HeaderValue::from_str(request_id) {
        let _ = headers.insert("x-request-id", value);
    }
    response
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn bearer_token_from_headers(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn authorize(service: &Txt2ImgService, headers: &HeaderMap, request_id: &str) -> Option<Response> {
    let expected = service.auth_token()?;
    if bearer_token_from_headers(headers).is_some_and(|token| constant_time_eq(token, expected)) {
        return None;
    }

    Some(json_response(
        StatusCode::UNAUTHORIZED,
        request_id,
        json!({ "error": "missing or invalid bearer token" }),
        true,
    ))
}

fn constant_time_eq(left: &str, right: &str) -> bool {
    let left_bytes = left.as_bytes();
    let right_bytes = right.as_bytes();
    if left_bytes.len() != right_bytes.len() {
        return false;
    }

    let mut diff = 0_u8;
    for (a, b) in left_bytes.iter().zip(right_bytes.iter()) {
        diff |= *a ^ *b;
    }
    diff == 0
}

fn json_response(
    status: StatusCode,
    request_id: &str,
    body: Value,
    include_www_authenticate: bool,
) -> Response {
    let mut response = payload_response(
        Representation::Json,
        request_id,
        Body::from(body.to_string()),
    );
    *response.status_mut() = status;
    if include_www_authenticate {
        let _ = response.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Bearer realm=\"txt2img\""),
        );
    }
    response
}
