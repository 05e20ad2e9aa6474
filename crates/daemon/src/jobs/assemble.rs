use anyhow::Result;
use engine::assembly::originating_segment;
use engine::{SegmentKind, VideoGenerationPlan};
use std::collections::BTreeSet;
use tracing::info;

use crate::db::VideoJob;
use crate::error::PipelineError;
use crate::media::MediaMap;
use crate::orchestrator::Pipeline;

/// Fetches every source the plan cuts from, renders the final video and
/// stores it on the job.
pub async fn assemble_video(pipeline: &Pipeline, job: &VideoJob, plan: &VideoGenerationPlan) -> Result<()> {
    let mut veo_clip_map = MediaMap::new();
    for clip in pipeline.db.list_veo_clips_for_job(job.id)? {
        let Some(url) = clip.video_url else {
            continue;
        };
        veo_clip_map.insert(clip.call_id, pipeline.fetcher.fetch(&url).await?);
    }
    if let Some(missing) = plan
        .veo_calls
        .iter()
        .find(|c| !veo_clip_map.contains_key(&c.call_id))
    {
        return Err(PipelineError::GenerationFailure(format!(
            "clip for {} was never generated",
            missing.call_id
        ))
        .into());
    }

    let (demo_ids, existing_ids) = referenced_broll(plan);

    let mut demo_map = MediaMap::new();
    for id in demo_ids {
        let demo = pipeline
            .db
            .get_demo(&id)?
            .ok_or_else(|| PipelineError::not_found("demo", &id))?;
        let url = demo
            .video_url
            .ok_or_else(|| PipelineError::GenerationFailure(format!("demo {} has no video", id)))?;
        demo_map.insert(id, pipeline.fetcher.fetch(&url).await?);
    }

    let mut existing_clip_map = MediaMap::new();
    for id in existing_ids {
        let clip = pipeline
            .db
            .get_existing_clip(&id)?
            .ok_or_else(|| PipelineError::not_found("existing clip", &id))?;
        let url = clip
            .video_url
            .ok_or_else(|| PipelineError::GenerationFailure(format!("existing clip {} has no video", id)))?;
        existing_clip_map.insert(id, pipeline.fetcher.fetch(&url).await?);
    }

    info!(
        "[ASSEMBLY] Job {} assembling {} clips from {} veo clips, {} demos, {} existing clips",
        job.id,
        plan.clips.len(),
        veo_clip_map.len(),
        demo_map.len(),
        existing_clip_map.len()
    );
    let output = pipeline
        .assembler
        .assemble(plan, &veo_clip_map, &demo_map, &existing_clip_map)
        .await?;

    let key = format!("videos/job-{}/final.mp4", job.id);
    let url = pipeline.storage.upload(output, &key, "video/mp4").await?;
    pipeline.db.set_final_video_url(job.id, &url)?;
    info!("[ASSEMBLY] Job {} final video at {}", job.id, url);
    Ok(())
}

/// Demo and existing-clip ids that some clip actually cuts to.
fn referenced_broll(plan: &VideoGenerationPlan) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut demos = BTreeSet::new();
    let mut existing = BTreeSet::new();
    for clip in &plan.clips {
        let Some(segment) = originating_segment(plan, clip) else {
            continue;
        };
        if let SegmentKind::DemoBroll { demo_id: Some(id), .. } = &segment.kind {
            demos.insert(id.clone());
        }
        if let Some(id) = segment.existing_clip_id() {
            existing.insert(id.to_string());
        }
    }
    (demos, existing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collects_broll_that_clips_cut_to_once() {
        let plan: VideoGenerationPlan = serde_json::from_value(json!({
            "productInteraction": "non-handheld",
            "interactionReasoning": "Software product shown on screen only.",
            "totalDuration": 16,
            "imageGeneration": [],
            "segments": [
                { "segmentIndex": 0, "type": "talking_head", "veoCallId": "call_1", "startTime": 0, "endTime": 4, "script": "hi there" },
                { "segmentIndex": 1, "type": "demo_broll", "veoCallId": "call_1", "startTime": 4, "endTime": 8, "demoId": "demo_1" },
                { "segmentIndex": 2, "type": "demo_broll", "veoCallId": "call_2", "startTime": 0, "endTime": 4, "demoId": "demo_1" },
                { "segmentIndex": 3, "type": "virtual_broll", "veoCallId": "call_2", "startTime": 4, "endTime": 8, "existingClipId": "clip_7" },
                { "segmentIndex": 4, "type": "demo_broll", "veoCallId": "call_3", "startTime": 0, "endTime": 4, "demoId": "demo_unused" }
            ],
            "veoCalls": [],
            "clips": [
                { "clipId": "clip_a", "veoCallId": "call_1", "startTime": 4, "endTime": 8, "order": 0 },
                { "clipId": "clip_b", "veoCallId": "call_2", "startTime": 0, "endTime": 4, "order": 1 },
                { "clipId": "clip_c", "veoCallId": "call_2", "startTime": 4, "endTime": 8, "order": 2 }
            ]
        }))
        .unwrap();
        let (demos, existing) = referenced_broll(&plan);
        assert_eq!(demos.into_iter().collect::<Vec<_>>(), vec!["demo_1".to_string()]);
        assert_eq!(existing.into_iter().collect::<Vec<_>>(), vec!["clip_7".to_string()]);
    }
}
