use txt2img_protocol::{GenerationRequest, GenerationResponse, encode_image};

use crate::config::{Config, ConfigError};

/// 1x1 transparent PNG served when no image file is configured.
pub const BUILTIN_IMAGE_BASE64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

/// Canned generator: every prompt is answered with the same image.
#[derive(Debug, Clone)]
pub struct Txt2ImgService {
    image_base64: String,
    chunk_size: usize,
    auth_token: Option<String>,
}

impl Txt2ImgService {
    pub fn new(image: &[u8], chunk_size: usize) -> Self {
        Self::with_encoded_image(encode_image(image), chunk_size)
    }

    pub fn builtin(chunk_size: usize) -> Self {
        Self::with_encoded_image(BUILTIN_IMAGE_BASE64.to_string(), chunk_size)
    }

    fn with_encoded_image(image_base64: String, chunk_size: usize) -> Self {
        Self {
            image_base64,
            chunk_size: chunk_size.max(1),
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub async fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let service = match config.image_path.as_ref() {
            Some(path) => {
                let image = tokio::fs::read(path)
                    .await
                    .map_err(|error| ConfigError::ImageRead {
                        path: path.display().to_string(),
                        message: error.to_string(),
                    })?;
                Self::new(&image, config.chunk_size)
            }
            None => Self::builtin(config.chunk_size),
        };
        Ok(match config.auth_token.as_ref() {
            Some(token) => service.with_auth_token(token.clone()),
            None => service,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn generate(&self, request: &GenerationRequest) -> GenerationResponse {
        GenerationResponse::new(request.prompt.clone(), vec![self.image_base64.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_image_decodes_to_png() {
        let response = Txt2ImgService::builtin(16).generate(&GenerationRequest::new("x"));
        let images = response.decode_images().expect("decode");
        assert_eq!(images.len(), 1);
        assert_eq!(&images[0][..4], &[0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn prompt_is_echoed() {
        let response = Txt2ImgService::new(b"hi", 4).generate(&GenerationRequest::new("a cat"));
        assert_eq!(response, GenerationResponse::new("a cat", vec!["aGk=".to_string()]));
    }

    #[tokio::test]
    async fn image_file_and_token_come_from_config() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("image.bin");
        tokio::fs::write(&path, b"hi").await.expect("write image");
        let config = Config {
            image_path: Some(path.clone()),
            auth_token: Some("secret".to_string()),
            chunk_size: 8,
            ..Config::default()
        };
        let service = Txt2ImgService::from_config(&config).await.expect("service");

        assert_eq!(service.auth_token(), Some("secret"));
        assert_eq!(service.chunk_size(), 8);
        assert_eq!(service.generate(&GenerationRequest::new("x")).images, vec!["aGk="]);
    }

    #[tokio::test]
    async fn missing_image_file_is_a_config_error() {
        let config = Config {
            image_path: Some("/nonexistent/txt2img.png".into()),
            ..Config::default()
        };
        let error = Txt2ImgService::from_config(&config)
            .await
            .expect_err("missing file");
        assert!(matches!(error, ConfigError::ImageRead { .. }));
    }
}
