use crate::assembly::{AssemblyError, AssemblyTimeline, SourceKey};
use std::collections::HashMap;
use std::path::PathBuf;

pub struct RenderCommand {
    pub ffmpeg_args: Vec<String>,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub sample_rate: u32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        // Vertical 9:16, the format the avatar videos are generated in.
        RenderSettings {
            width: 1080,
            height: 1920,
            fps: 30,
            sample_rate: 48000,
        }
    }
}

/// Generate the FFmpeg command that cuts every timeline entry out of its
/// source, normalizes size/fps, concatenates and caps the total duration.
/// Hard cuts only.
pub fn generate_render_commands(
    timeline: &AssemblyTimeline,
    output_path: PathBuf,
    source_paths: &HashMap<SourceKey, PathBuf>,
    settings: &RenderSettings,
) -> Result<RenderCommand, AssemblyError> {
    if timeline.entries.is_empty() {
        return Err(AssemblyError::EmptyPlan);
    }

    // One -i per distinct source, shared by every entry that reads it
    let mut input_args = Vec::new();
    let mut input_index: HashMap<&SourceKey, usize> = HashMap::new();
    for key in timeline.sources() {
        let path = source_paths
            .get(key)
            .ok_or_else(|| AssemblyError::UnresolvedPath(key.clone()))?;
        input_index.insert(key, input_index.len());
        input_args.push("-i".to_string());
        input_args.push(path.to_string_lossy().to_string());
    }

    let mut filter_parts = Vec::new();
    let mut concat_inputs = String::new();

    for (idx, entry) in timeline.entries.iter().enumerate() {
        let video_input = input_index[&entry.video.source];
        filter_parts.push(format!(
            "[{}:v]trim=start={:.3}:end={:.3},setpts=PTS-STARTPTS,scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps}[v{}]",
            video_input,
            entry.video.start,
            entry.video.end,
            idx,
            w = settings.width,
            h = settings.height,
            fps = settings.fps,
        ));

        match &entry.audio {
            Some(audio) => {
                let audio_input = input_index[&audio.source];
                filter_parts.push(format!(
                    "[{}:a]atrim=start={:.3}:end={:.3},asetpts=PTS-STARTPTS,aresample={}[a{}]",
                    audio_input, audio.start, audio.end, settings.sample_rate, idx
                ));
            }
            None => {
                filter_parts.push(format!(
                    "anullsrc=r={}:cl=stereo,atrim=duration={:.3}[a{}]",
                    settings.sample_rate,
                    entry.duration(),
                    idx
                ));
            }
        }
        concat_inputs.push_str(&format!("[v{}][a{}]", idx, idx));
    }

    filter_parts.push(format!(
        "{}concat=n={}:v=1:a=1[outv][outa]",
        concat_inputs,
        timeline.entries.len()
    ));

    let mut args = input_args;
    args.push("-filter_complex".to_string());
    args.push(filter_parts.join(";"));
    for arg in [
        "-map", "[outv]", "-map", "[outa]", "-c:v", "libx264", "-preset", "medium", "-crf", "23",
        "-pix_fmt", "yuv420p", "-c:a", "aac", "-b:a", "128k", "-movflags", "+faststart",
    ] {
        args.push(arg.to_string());
    }
    args.push("-t".to_string());
    args.push(format!("{:.3}", timeline.total_duration));
    args.push("-y".to_string());
    args.push(output_path.to_string_lossy().to_string());

    Ok(RenderCommand {
        ffmpeg_args: args,
        output_path,
    })
}
