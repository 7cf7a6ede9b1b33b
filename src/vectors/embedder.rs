use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{AppError, Result};

/// Longest side of the image sent to the embedding service
const EMBED_INPUT_SIDE: u32 = 512;

/// Maps images and texts into the same embedding space
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_image(&self, image: &DynamicImage) -> Result<Vec<f32>>;

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;
}

/// Client for a CLIP-style embedding service.
///
/// `POST {endpoint}/embed` with `{"images": [base64 PNG]}` or
/// `{"texts": [..]}`, answered by `{"embeddings": [[..]]}`.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    texts: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn request(&self, body: &EmbedRequest<'_>) -> Result<Vec<f32>> {
        let url = format!("{}/embed", self.endpoint);
        let resp = self.client.post(&url).json(body).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(AppError::Embedding(format!(
                "Embedding service returned {}: {}",
                status, detail
            )));
        }

        let parsed: EmbedResponse = resp.json().await?;
        parsed
            .embeddings
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Embedding("Embedding service returned no vector".to_string()))
    }
}

/// PNG + base64 payload for the service, downscaled to keep requests small
fn encode_for_service(image: &DynamicImage) -> Result<String> {
    let image = if image.width() > EMBED_INPUT_SIDE || image.height() > EMBED_INPUT_SIDE {
        image.thumbnail(EMBED_INPUT_SIDE, EMBED_INPUT_SIDE)
    } else {
        image.clone()
    };
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image.to_rgb8()).write_to(&mut buf, ImageFormat::Png)?;
    Ok(general_purpose::STANDARD.encode(buf.into_inner()))
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_image(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        let payload = encode_for_service(image)?;
        self.request(&EmbedRequest {
            images: vec![payload],
            texts: Vec::new(),
        })
        .await
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        self.request(&EmbedRequest {
            images: Vec::new(),
            texts: vec![text],
        })
        .await
    }
}
