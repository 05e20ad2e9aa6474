use anyhow::Result;
use engine::{AvatarInfo, DemoInfo, DirectorInput, ExistingClipInfo, Preferences, ProductInfo};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::PipelineError;

/// What a caller asks for. Stored verbatim as a generation's prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRequest {
    pub product_id: i64,
    pub avatar_id: i64,
    /// Demos the director may cut to. Empty means every demo of the product.
    #[serde(default)]
    pub demo_ids: Vec<String>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub target_duration: Option<u32>,
}

/// Snapshot of the catalog the director plans against.
pub fn build_director_input(db: &Database, request: &VideoRequest) -> Result<DirectorInput> {
    let product = db
        .get_product(request.product_id)?
        .ok_or_else(|| PipelineError::not_found("product", request.product_id))?;
    let avatar = db
        .get_avatar(request.avatar_id)?
        .ok_or_else(|| PipelineError::not_found("avatar", request.avatar_id))?;

    let demos = if request.demo_ids.is_empty() {
        db.list_demos_for_product(product.id)?
    } else {
        let mut demos = Vec::with_capacity(request.demo_ids.len());
        for id in &request.demo_ids {
            let demo = db
                .get_demo(id)?
                .filter(|d| d.product_id == product.id)
                .ok_or_else(|| PipelineError::not_found("demo", id))?;
            demos.push(demo);
        }
        demos
    };
    // Broll without footage is never offered to the director.
    let demos: Vec<_> = demos.into_iter().filter(|d| d.video_url.is_some()).collect();
    let existing_clips: Vec<_> = db
        .list_existing_clips_for_product(product.id)?
        .into_iter()
        .filter(|c| c.video_url.is_some())
        .collect();

    Ok(DirectorInput {
        product: ProductInfo {
            id: product.id,
            name: product.name,
            price: product.price,
            description: product.description,
            hooks: product.hooks,
            images: product.images,
        },
        avatar: AvatarInfo {
            id: avatar.id,
            image_url: avatar.image_url,
        },
        demos: demos
            .into_iter()
            .map(|d| DemoInfo {
                id: d.id,
                description: d.description,
                video_url: d.video_url,
            })
            .collect(),
        existing_clips: existing_clips
            .into_iter()
            .map(|c| ExistingClipInfo {
                id: c.id,
                description: c.description,
                duration: c.duration,
                clip_type: c.clip_type,
                video_url: c.video_url,
            })
            .collect(),
        preferences: Preferences {
            tone: request.tone.clone(),
            target_duration: request.target_duration,
        },
    })
}
