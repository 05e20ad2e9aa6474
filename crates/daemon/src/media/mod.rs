pub mod ffmpeg;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use engine::VideoGenerationPlan;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

pub use ffmpeg::FfmpegAssembler;

/// Source media keyed by Veo call id, demo id or existing clip id.
pub type MediaMap = HashMap<String, Bytes>;

/// Turns a realized plan plus its source media into the final video.
#[async_trait]
pub trait MediaAssembler: Send + Sync {
    async fn assemble(
        &self,
        plan: &VideoGenerationPlan,
        veo_clip_map: &MediaMap,
        demo_map: &MediaMap,
        existing_clip_map: &MediaMap,
    ) -> Result<Bytes>;
}

/// Short content hash used to make storage keys unique per payload.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(&hasher.finalize()[..8])
}
