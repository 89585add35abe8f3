//! Local stand-in for the provider-side txt2img endpoint.
//!
//! Replies with a canned image either as one JSON document or as the same JSON text split
//! into fixed-size chunks, chosen by the request's `Accept` header.

pub mod config;
pub mod http;
pub mod service;

pub use config::{Config, ConfigError, DEFAULT_BIND_ADDR};
pub use http::{Txt2ImgHttpServer, build_router, make_txt2img_http_server};
pub use service::{BUILTIN_IMAGE_BASE64, Txt2ImgService};
