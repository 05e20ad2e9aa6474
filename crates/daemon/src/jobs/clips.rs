use anyhow::Result;
use engine::{SourceImageType, VeoCall, VideoGenerationPlan};
use std::collections::HashMap;
use tracing::info;

use crate::db::{Avatar, Product, VideoJob};
use crate::error::PipelineError;
use crate::genai::VideoOptions;
use crate::orchestrator::Pipeline;

/// Generates one 8 second clip per Veo call, in plan order. Calls whose clip
/// already has a stored video are skipped.
pub async fn generate_clips(pipeline: &Pipeline, job: &VideoJob, plan: &VideoGenerationPlan) -> Result<()> {
    let product = pipeline
        .db
        .get_product(job.product_id)?
        .ok_or_else(|| PipelineError::not_found("product", job.product_id))?;
    let avatar = pipeline
        .db
        .get_avatar(job.avatar_id)?
        .ok_or_else(|| PipelineError::not_found("avatar", job.avatar_id))?;
    let composites: HashMap<String, String> = pipeline
        .db
        .list_composites_for_job(job.id)?
        .into_iter()
        .map(|c| (c.composite_id, c.image_url))
        .collect();

    for (idx, call) in plan.veo_calls.iter().enumerate() {
        if let Some(clip) = pipeline.db.get_veo_clip(job.id, &call.call_id)? {
            if clip.video_url.is_some() {
                info!("[CLIPS] Job {} call {} already generated, skipping", job.id, call.call_id);
                continue;
            }
        }

        let source_image_url = source_image(call, &avatar, &product, &composites)?;
        info!(
            "[CLIPS] Job {} generating {} from {} ({}/{})",
            job.id,
            call.call_id,
            call.source_image_type,
            idx + 1,
            plan.veo_calls.len()
        );
        pipeline
            .db
            .upsert_veo_clip(job.id, &call.call_id, &source_image_url, &call.prompt)?;

        let video = pipeline
            .videos
            .generate_video(&call.prompt, &source_image_url, &VideoOptions::clip())
            .await?;
        if video.bytes.is_empty() {
            return Err(PipelineError::GenerationFailure(format!(
                "video generator returned an empty clip for {}",
                call.call_id
            ))
            .into());
        }

        let key = format!("clips/job-{}/{}.mp4", job.id, call.call_id);
        let video_url = pipeline
            .storage
            .upload(video.bytes, &key, &video.mime_type)
            .await?;
        pipeline.db.set_veo_clip_url(job.id, &call.call_id, &video_url)?;
        info!("[CLIPS] Job {} stored {} at {}", job.id, call.call_id, video_url);
    }

    Ok(())
}

/// The still image a call animates.
fn source_image(
    call: &VeoCall,
    avatar: &Avatar,
    product: &Product,
    composites: &HashMap<String, String>,
) -> Result<String, PipelineError> {
    match call.source_image_type {
        SourceImageType::Avatar => Ok(avatar.image_url.clone()),
        SourceImageType::Composite => composites.get(&call.source_image_ref).cloned().ok_or_else(|| {
            PipelineError::GenerationFailure(format!(
                "call {} needs composite {} which has not been generated",
                call.call_id, call.source_image_ref
            ))
        }),
        SourceImageType::Product => call
            .product_image_index()
            .and_then(|i| product.images.get(i))
            .cloned()
            .ok_or_else(|| {
                PipelineError::GenerationFailure(format!(
                    "call {} references product image {:?} which does not exist",
                    call.call_id, call.source_image_ref
                ))
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> (Avatar, Product, HashMap<String, String>) {
        let avatar = Avatar {
            id: 1,
            name: "Ava".to_string(),
            image_url: "https://cdn/ava.png".to_string(),
        };
        let product = Product {
            id: 1,
            name: "Blender".to_string(),
            price: None,
            description: None,
            hooks: vec![],
            images: vec!["https://cdn/p0.png".to_string(), "https://cdn/p1.png".to_string()],
        };
        let mut composites = HashMap::new();
        composites.insert("composite_1".to_string(), "http://local/c1.png".to_string());
        (avatar, product, composites)
    }

    fn call(kind: SourceImageType, reference: &str) -> VeoCall {
        VeoCall {
            call_id: "call_1".to_string(),
            source_image_type: kind,
            source_image_ref: reference.to_string(),
            prompt: "talk".to_string(),
        }
    }

    #[test]
    fn resolves_each_source_kind() {
        let (avatar, product, composites) = fixtures();
        let resolve = |c: VeoCall| source_image(&c, &avatar, &product, &composites);
        assert_eq!(resolve(call(SourceImageType::Avatar, "AVATAR_1")).unwrap(), "https://cdn/ava.png");
        assert_eq!(
            resolve(call(SourceImageType::Composite, "composite_1")).unwrap(),
            "http://local/c1.png"
        );
        assert_eq!(resolve(call(SourceImageType::Product, "PRODUCT_2")).unwrap(), "https://cdn/p1.png");
    }

    #[test]
    fn missing_composite_or_product_image_is_a_generation_failure() {
        let (avatar, product, composites) = fixtures();
        let missing = source_image(&call(SourceImageType::Composite, "composite_9"), &avatar, &product, &composites);
        assert!(matches!(missing, Err(PipelineError::GenerationFailure(_))));
        let out_of_range = source_image(&call(SourceImageType::Product, "PRODUCT_3"), &avatar, &product, &composites);
        assert!(matches!(out_of_range, Err(PipelineError::GenerationFailure(_))));
    }
}
