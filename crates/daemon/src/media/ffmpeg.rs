use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use engine::render::{generate_render_commands, RenderSettings};
use engine::{compile_assembly, AssemblyError, AvailableSources, SourceKind, VideoGenerationPlan};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::info;

use super::{MediaAssembler, MediaMap};
use crate::error::PipelineError;

pub struct FFmpegWrapper;

impl FFmpegWrapper {
    pub async fn run(args: &[String]) -> Result<()> {
        let output = Command::new("ffmpeg")
            .args(args)
            .output()
            .await
            .context("Failed to execute ffmpeg. Make sure FFmpeg is installed.")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(10)..].join("\n");
            anyhow::bail!("ffmpeg failed: {}", tail);
        }
        Ok(())
    }
}

/// Renders with a local ffmpeg binary. Sources are spilled to a scratch
/// directory under `work_dir` that is removed when assembly returns.
pub struct FfmpegAssembler {
    work_dir: PathBuf,
    settings: RenderSettings,
}

impl FfmpegAssembler {
    pub fn new(work_dir: impl Into<PathBuf>, settings: RenderSettings) -> Self {
        FfmpegAssembler {
            work_dir: work_dir.into(),
            settings,
        }
    }
}

#[async_trait]
impl MediaAssembler for FfmpegAssembler {
    async fn assemble(
        &self,
        plan: &VideoGenerationPlan,
        veo_clip_map: &MediaMap,
        demo_map: &MediaMap,
        existing_clip_map: &MediaMap,
    ) -> Result<Bytes> {
        let available = AvailableSources::from_maps(veo_clip_map, demo_map, existing_clip_map);
        let timeline = compile_assembly(plan, &available).map_err(PipelineError::from)?;

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix("assemble-")
            .tempdir_in(&self.work_dir)
            .context("Failed to create assembly scratch directory")?;

        let mut source_paths = HashMap::new();
        for (idx, key) in timeline.sources().into_iter().enumerate() {
            let map = match key.kind {
                SourceKind::Veo => veo_clip_map,
                SourceKind::Demo => demo_map,
                SourceKind::ExistingClip => existing_clip_map,
            };
            let data = map
                .get(&key.id)
                .ok_or_else(|| PipelineError::from(AssemblyError::UnresolvedPath(key.clone())))?;
            let path = scratch.path().join(format!("source-{}.mp4", idx));
            tokio::fs::write(&path, data).await?;
            source_paths.insert(key.clone(), path);
        }

        let output_path = scratch.path().join("final.mp4");
        let command = generate_render_commands(&timeline, output_path, &source_paths, &self.settings)
            .map_err(PipelineError::from)?;

        info!(
            "[ASSEMBLY] Rendering {} entries from {} sources, {:.1}s",
            timeline.entries.len(),
            source_paths.len(),
            timeline.duration()
        );
        FFmpegWrapper::run(&command.ffmpeg_args).await?;

        let data = tokio::fs::read(&command.output_path)
            .await
            .context("ffmpeg reported success but wrote no output")?;
        Ok(Bytes::from(data))
    }
}
