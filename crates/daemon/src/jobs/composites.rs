use anyhow::Result;
use engine::{ImageGenerationTask, VideoGenerationPlan};
use tracing::info;

use crate::db::{NewCompositeImage, VideoJob};
use crate::error::PipelineError;
use crate::genai::ImageOptions;
use crate::media::content_hash;
use crate::orchestrator::Pipeline;

/// Generates every avatar-plus-product composite the plan asks for, one at a
/// time. Each composite is persisted and recorded on the job before the next
/// one starts, so a rerun resumes after the last finished composite.
pub async fn generate_composites(
    pipeline: &Pipeline,
    job: &VideoJob,
    plan: &VideoGenerationPlan,
) -> Result<()> {
    if plan.image_generation.is_empty() {
        info!("[COMPOSITES] Job {} needs no composites", job.id);
        return Ok(());
    }

    let product = pipeline
        .db
        .get_product(job.product_id)?
        .ok_or_else(|| PipelineError::not_found("product", job.product_id))?;
    let avatar = pipeline
        .db
        .get_avatar(job.avatar_id)?
        .ok_or_else(|| PipelineError::not_found("avatar", job.avatar_id))?;

    for (idx, task) in plan.image_generation.iter().enumerate() {
        if let Some(existing) = pipeline.db.get_composite_for_job(job.id, &task.composite_id)? {
            info!(
                "[COMPOSITES] Job {} composite {} already generated, skipping",
                job.id, task.composite_id
            );
            pipeline
                .db
                .record_completed_composite(job.id, existing.id, &task.composite_id)?;
            continue;
        }

        info!(
            "[COMPOSITES] Job {} generating {} ({}/{})",
            job.id,
            task.composite_id,
            idx + 1,
            plan.image_generation.len()
        );

        let reference_url = avatar_reference(task, &avatar.image_url);
        let product_urls = task
            .product_sources
            .iter()
            .map(|&i| {
                product.images.get(i as usize).cloned().ok_or_else(|| {
                    PipelineError::GenerationFailure(format!(
                        "composite {} references product image {} but the product has {}",
                        task.composite_id,
                        i,
                        product.images.len()
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let images = pipeline
            .images
            .generate_image_from_reference(
                reference_url,
                &task.prompt,
                &ImageOptions::composite(),
                &product_urls,
            )
            .await?;
        // The first image is the one we keep.
        let image = images.into_iter().next().ok_or_else(|| {
            PipelineError::GenerationFailure(format!(
                "image generator returned no images for composite {}",
                task.composite_id
            ))
        })?;

        let key = format!(
            "composites/job-{}/{}-{}.png",
            job.id,
            task.composite_id,
            content_hash(&image.bytes)
        );
        let image_url = pipeline
            .storage
            .upload(image.bytes, &key, &image.mime_type)
            .await?;

        let composite_image_id = pipeline.db.create_composite_image(&NewCompositeImage {
            job_id: job.id,
            composite_id: &task.composite_id,
            avatar_id: avatar.id,
            product_id: product.id,
            product_image_indices: &task.product_sources,
            prompt: &task.prompt,
            description: &task.description,
            image_url: &image_url,
        })?;
        pipeline
            .db
            .record_completed_composite(job.id, composite_image_id, &task.composite_id)?;
        info!("[COMPOSITES] Job {} stored {} at {}", job.id, task.composite_id, image_url);
    }

    Ok(())
}

/// `avatarSource` is normally a placeholder for the job's avatar; a literal
/// URL is used as given.
fn avatar_reference<'a>(task: &'a ImageGenerationTask, avatar_url: &'a str) -> &'a str {
    let source = task.avatar_source.trim();
    if source.starts_with("http://") || source.starts_with("https://") {
        source
    } else {
        avatar_url
    }
}
