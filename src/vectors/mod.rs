pub mod embedder;
pub mod sqlite;

pub use embedder::*;
pub use sqlite::*;

use async_trait::async_trait;
use image::DynamicImage;

use crate::error::Result;

/// Vector index adapter: one embedding per image identifier
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Embed `image` and store it under `id`, replacing any previous vector
    async fn upsert(&self, id: &str, image: &DynamicImage) -> Result<()>;

    /// Delete the vector for `id`; returns whether one existed
    async fn remove(&self, id: &str) -> Result<bool>;

    /// Up to `k` ids ranked by similarity to `text`, most similar first
    async fn query(&self, text: &str, k: usize) -> Result<Vec<String>>;

    async fn exists(&self, id: &str) -> Result<bool>;

    /// Every indexed id
    async fn ids(&self) -> Result<Vec<String>>;

    async fn count(&self) -> Result<usize>;

    /// Release connections held by the index
    async fn close(&self) {}
}

/// Cosine similarity; `None` when the lengths differ or a vector is zero
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Embeds images as their mean colour and texts by colour keyword
    #[derive(Default)]
    pub struct ColorEmbedder {
        pub image_calls: AtomicUsize,
    }

    impl ColorEmbedder {
        pub fn image_calls(&self) -> usize {
            self.image_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Embedder for ColorEmbedder {
        async fn embed_image(&self, image: &DynamicImage) -> Result<Vec<f32>> {
            self.image_calls.fetch_add(1, Ordering::SeqCst);
            let rgb = image.to_rgb8();
            let mut sum = [0f32; 3];
            for pixel in rgb.pixels() {
                for (acc, c) in sum.iter_mut().zip(pixel.0) {
                    *acc += c as f32;
                }
            }
            let n = (rgb.width() * rgb.height()).max(1) as f32;
            Ok(sum.iter().map(|s| s / n / 255.0).collect())
        }

        async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
            let text = text.to_lowercase();
            let v = if text.contains("red") {
                vec![1.0, 0.0, 0.0]
            } else if text.contains("green") {
                vec![0.0, 1.0, 0.0]
            } else if text.contains("blue") {
                vec![0.0, 0.0, 1.0]
            } else {
                vec![1.0, 1.0, 1.0]
            };
            Ok(v)
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]), Some(1.0));
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 3.0]), Some(0.0));
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), None);
    }
}
