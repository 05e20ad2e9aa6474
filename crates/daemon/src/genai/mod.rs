//! Generative collaborators: the director (plan author), the image model
//! used for composites, and the video model used for clips.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use engine::DirectorInput;
use serde::Serialize;
use serde_json::Value;

pub mod http;

pub use http::GenAiClient;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageOptions {
    pub count: u32,
    pub aspect_ratio: String,
    pub size: String,
    pub mime_type: String,
}

impl ImageOptions {
    /// One vertical PNG, matching the clip format.
    pub fn composite() -> Self {
        ImageOptions {
            count: 1,
            aspect_ratio: "9:16".to_string(),
            size: "1K".to_string(),
            mime_type: "image/png".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Bytes,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoOptions {
    /// Seconds, at most 8.
    pub duration: u32,
    pub disable_audio: bool,
    pub reference_images: Vec<String>,
}

impl VideoOptions {
    /// An 8 second clip with the speech track embedded.
    pub fn clip() -> Self {
        VideoOptions {
            duration: 8,
            disable_audio: false,
            reference_images: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratedVideo {
    pub bytes: Bytes,
    pub mime_type: String,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate_image_from_reference(
        &self,
        reference_url: &str,
        prompt: &str,
        options: &ImageOptions,
        extra_reference_urls: &[String],
    ) -> Result<Vec<GeneratedImage>>;
}

#[async_trait]
pub trait VideoGenerator: Send + Sync {
    async fn generate_video(
        &self,
        prompt: &str,
        source_image_url: &str,
        options: &VideoOptions,
    ) -> Result<GeneratedVideo>;
}

/// Authors a raw plan for a catalog. The output is untrusted JSON and must go
/// through validation before anything acts on it.
#[async_trait]
pub trait Director: Send + Sync {
    async fn plan(&self, input: &DirectorInput) -> Result<Value>;
}
