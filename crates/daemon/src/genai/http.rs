use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use engine::DirectorInput;
use serde::Deserialize;
use serde_json::Value;

use super::{
    Director, GeneratedImage, GeneratedVideo, ImageGenerator, ImageOptions, VideoGenerator,
    VideoOptions,
};

/// Client for the generation service. Media comes back base64 encoded.
pub struct GenAiClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageResponse {
    #[serde(default)]
    images: Vec<EncodedMedia>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EncodedMedia {
    bytes_base64_encoded: String,
    mime_type: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoResponse {
    video: Option<EncodedMedia>,
}

#[derive(Deserialize)]
struct PlanResponse {
    plan: Value,
}

fn decode(media: &EncodedMedia) -> Result<Bytes> {
    let data = base64::engine::general_purpose::STANDARD
        .decode(media.bytes_base64_encoded.trim())
        .context("generation service returned invalid base64")?;
    Ok(Bytes::from(data))
}

impl GenAiClient {
    pub fn new(base_url: &str) -> Self {
        GenAiClient {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(anyhow::anyhow!(
                "generation service {} returned {}: {}",
                path,
                status,
                error_text
            ))
        }
    }
}

#[async_trait]
impl ImageGenerator for GenAiClient {
    async fn generate_image_from_reference(
        &self,
        reference_url: &str,
        prompt: &str,
        options: &ImageOptions,
        extra_reference_urls: &[String],
    ) -> Result<Vec<GeneratedImage>> {
        let response: ImageResponse = self
            .post(
                "/images/generate",
                &serde_json::json!({
                    "referenceImageUrl": reference_url,
                    "prompt": prompt,
                    "options": options,
                    "extraReferenceUrls": extra_reference_urls,
                }),
            )
            .await?;

        response
            .images
            .iter()
            .map(|image| {
                Ok(GeneratedImage {
                    bytes: decode(image)?,
                    mime_type: image
                        .mime_type
                        .clone()
                        .unwrap_or_else(|| options.mime_type.clone()),
                })
            })
            .collect()
    }
}

#[async_trait]
impl VideoGenerator for GenAiClient {
    async fn generate_video(
        &self,
        prompt: &str,
        source_image_url: &str,
        options: &VideoOptions,
    ) -> Result<GeneratedVideo> {
        let response: VideoResponse = self
            .post(
                "/videos/generate",
                &serde_json::json!({
                    "prompt": prompt,
                    "sourceImageUrl": source_image_url,
                    "options": options,
                }),
            )
            .await?;

        let video = response
            .video
            .ok_or_else(|| anyhow::anyhow!("generation service returned no video"))?;
        Ok(GeneratedVideo {
            bytes: decode(&video)?,
            mime_type: video.mime_type.unwrap_or_else(|| "video/mp4".to_string()),
        })
    }
}

#[async_trait]
impl Director for GenAiClient {
    async fn plan(&self, input: &DirectorInput) -> Result<Value> {
        let response: PlanResponse = self
            .post("/director/plan", &serde_json::json!({ "input": input }))
            .await?;
        Ok(response.plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_image_payloads() {
        let body = r#"{"images":[{"bytesBase64Encoded":"aGVsbG8=","mimeType":"image/png"}]}"#;
        let response: ImageResponse = serde_json::from_str(body).unwrap();
        assert_eq!(&decode(&response.images[0]).unwrap()[..], b"hello");
    }

    #[test]
    fn invalid_base64_is_an_error() {
        let media = EncodedMedia {
            bytes_base64_encoded: "***".to_string(),
            mime_type: None,
        };
        assert!(decode(&media).is_err());
    }
}
