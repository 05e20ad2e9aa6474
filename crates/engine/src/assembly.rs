//! Compiles a realized plan into an ordered list of source ranges.
//!
//! The timeline says which sub-range of which media source plays at each
//! position; turning it into bytes is the renderer's job.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

use crate::plan::{SegmentKind, VideoClip, VideoGenerationPlan, VideoSegment};

/// Gaps shorter than this are treated as rounding noise.
const EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssemblyError {
    #[error("plan has no clips to assemble")]
    EmptyPlan,
    #[error("clip {clip_id:?} needs {key} which was not provided")]
    MissingSource { clip_id: String, key: SourceKey },
    #[error("clip {clip_id:?} has an empty or inverted range")]
    InvalidRange { clip_id: String },
    #[error("no media path resolved for {0}")]
    UnresolvedPath(SourceKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Veo,
    Demo,
    ExistingClip,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceKey {
    pub kind: SourceKind,
    pub id: String,
}

impl SourceKey {
    pub fn veo(id: &str) -> Self {
        SourceKey {
            kind: SourceKind::Veo,
            id: id.to_string(),
        }
    }

    pub fn demo(id: &str) -> Self {
        SourceKey {
            kind: SourceKind::Demo,
            id: id.to_string(),
        }
    }

    pub fn existing(id: &str) -> Self {
        SourceKey {
            kind: SourceKind::ExistingClip,
            id: id.to_string(),
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            SourceKind::Veo => "veo clip",
            SourceKind::Demo => "demo",
            SourceKind::ExistingClip => "existing clip",
        };
        write!(f, "{} {:?}", kind, self.id)
    }
}

/// `[start, end)` of one source, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRange {
    pub source: SourceKey,
    pub start: f64,
    pub end: f64,
}

impl SourceRange {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub clip_id: String,
    pub timeline_start: f64,
    pub video: SourceRange,
    /// Embedded Veo audio for the same range; `None` plays silence.
    pub audio: Option<SourceRange>,
}

impl TimelineEntry {
    pub fn duration(&self) -> f64 {
        self.video.duration()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyTimeline {
    pub total_duration: f64,
    pub entries: Vec<TimelineEntry>,
}

impl AssemblyTimeline {
    pub fn duration(&self) -> f64 {
        self.entries.iter().map(TimelineEntry::duration).sum()
    }

    /// Every source the timeline reads, in first-use order.
    pub fn sources(&self) -> Vec<&SourceKey> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for entry in &self.entries {
            let keys = std::iter::once(&entry.video.source).chain(entry.audio.as_ref().map(|a| &a.source));
            for key in keys {
                if seen.insert(key) {
                    out.push(key);
                }
            }
        }
        out
    }
}

/// Ids of the media that were actually resolved for a job.
#[derive(Debug, Clone, Default)]
pub struct AvailableSources {
    pub veo_calls: HashSet<String>,
    pub demos: HashSet<String>,
    pub existing_clips: HashSet<String>,
}

impl AvailableSources {
    pub fn from_maps<A, B, C>(
        veo_clip_map: &HashMap<String, A>,
        demo_map: &HashMap<String, B>,
        existing_clip_map: &HashMap<String, C>,
    ) -> Self {
        AvailableSources {
            veo_calls: veo_clip_map.keys().cloned().collect(),
            demos: demo_map.keys().cloned().collect(),
            existing_clips: existing_clip_map.keys().cloned().collect(),
        }
    }

    pub fn contains(&self, key: &SourceKey) -> bool {
        match key.kind {
            SourceKind::Veo => self.veo_calls.contains(&key.id),
            SourceKind::Demo => self.demos.contains(&key.id),
            SourceKind::ExistingClip => self.existing_clips.contains(&key.id),
        }
    }
}

pub fn compile_assembly(
    plan: &VideoGenerationPlan,
    available: &AvailableSources,
) -> Result<AssemblyTimeline, AssemblyError> {
    if plan.clips.is_empty() {
        return Err(AssemblyError::EmptyPlan);
    }

    let total = plan.total_duration.as_f64();
    let mut cursor = 0.0;
    let mut entries = Vec::new();

    for clip in plan.ordered_clips() {
        if clip.duration() <= 0.0 {
            return Err(AssemblyError::InvalidRange {
                clip_id: clip.clip_id.clone(),
            });
        }
        let remaining = total - cursor;
        if remaining <= EPSILON {
            break;
        }
        let length = clip.duration().min(remaining);

        let (video, audio) = resolve_ranges(plan, clip, length, available)?;
        entries.push(TimelineEntry {
            clip_id: clip.clip_id.clone(),
            timeline_start: cursor,
            video,
            audio,
        });
        cursor += length;
    }

    Ok(AssemblyTimeline {
        total_duration: total,
        entries,
    })
}

/// The segment a clip was cut for: same call and overlapping range, else the
/// first segment on the same call.
pub fn originating_segment<'a>(plan: &'a VideoGenerationPlan, clip: &VideoClip) -> Option<&'a VideoSegment> {
    let same_call = || {
        plan.segments
            .iter()
            .filter(move |s| s.veo_call_id.as_deref() == Some(clip.veo_call_id.as_str()))
    };
    same_call()
        .find(|s| s.start_time < clip.end_time && clip.start_time < s.end_time)
        .or_else(|| same_call().next())
}

fn resolve_ranges(
    plan: &VideoGenerationPlan,
    clip: &VideoClip,
    length: f64,
    available: &AvailableSources,
) -> Result<(SourceRange, Option<SourceRange>), AssemblyError> {
    let veo_key = SourceKey::veo(&clip.veo_call_id);
    let veo_range = SourceRange {
        source: veo_key.clone(),
        start: clip.start_time,
        end: clip.start_time + length,
    };
    let veo_audio = available.contains(&veo_key).then(|| veo_range.clone());

    let segment = originating_segment(plan, clip);
    let offset_in_segment = segment
        .map(|s| (clip.start_time - s.start_time).max(0.0))
        .unwrap_or(0.0);

    let broll = segment.and_then(|s| match &s.kind {
        SegmentKind::DemoBroll {
            demo_id: Some(id),
            demo_timestamp,
            ..
        } => Some((SourceKey::demo(id), demo_timestamp.unwrap_or(0.0).max(0.0))),
        _ => s.existing_clip_id().map(|id| (SourceKey::existing(id), 0.0)),
    });

    let (video, audio) = match broll {
        Some((key, base)) => {
            let start = base + offset_in_segment;
            let range = SourceRange {
                source: key,
                start,
                end: start + length,
            };
            (range, veo_audio)
        }
        None => (veo_range, veo_audio),
    };

    if !available.contains(&video.source) {
        return Err(AssemblyError::MissingSource {
            clip_id: clip.clip_id.clone(),
            key: video.source,
        });
    }
    Ok((video, audio))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan(total: u32, segments: serde_json::Value, clips: serde_json::Value) -> VideoGenerationPlan {
        serde_json::from_value(json!({
            "productInteraction": "non-handheld",
            "interactionReasoning": "App demo, nothing to hold in hand.",
            "totalDuration": total,
            "imageGeneration": [],
            "segments": segments,
            "veoCalls": [
                { "callId": "call_1", "sourceImageType": "avatar", "sourceImageRef": "AVATAR_1", "prompt": "a" },
                { "callId": "call_2", "sourceImageType": "avatar", "sourceImageRef": "AVATAR_1", "prompt": "b" },
                { "callId": "call_3", "sourceImageType": "avatar", "sourceImageRef": "AVATAR_1", "prompt": "c" }
            ],
            "clips": clips
        }))
        .unwrap()
    }

    fn all_sources() -> AvailableSources {
        AvailableSources {
            veo_calls: ["call_1", "call_2", "call_3"].iter().map(|s| s.to_string()).collect(),
            demos: ["demo_1"].iter().map(|s| s.to_string()).collect(),
            existing_clips: ["clip_9"].iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn clips_play_in_order_with_exact_ranges() {
        let p = plan(
            16,
            json!([]),
            json!([
                { "clipId": "b", "veoCallId": "call_2", "startTime": 1, "endTime": 8, "order": 1 },
                { "clipId": "a", "veoCallId": "call_1", "startTime": 0, "endTime": 8, "order": 0 }
            ]),
        );
        let timeline = compile_assembly(&p, &all_sources()).unwrap();

        assert_eq!(timeline.entries.len(), 2);
        assert_eq!(timeline.entries[0].clip_id, "a");
        assert_eq!(timeline.entries[1].clip_id, "b");
        assert_eq!(timeline.entries[1].timeline_start, 8.0);
        assert_eq!(timeline.entries[1].video.start, 1.0);
        assert_eq!(timeline.entries[1].video.end, 8.0);
        assert_eq!(timeline.entries[1].audio.as_ref().unwrap().source, SourceKey::veo("call_2"));
        assert_eq!(timeline.duration(), 15.0);
    }

    #[test]
    fn output_is_trimmed_to_total_duration() {
        let p = plan(
            16,
            json!([]),
            json!([
                { "clipId": "a", "veoCallId": "call_1", "startTime": 0, "endTime": 8, "order": 0 },
                { "clipId": "b", "veoCallId": "call_2", "startTime": 0, "endTime": 6, "order": 1 },
                { "clipId": "c", "veoCallId": "call_3", "startTime": 0, "endTime": 8, "order": 2 }
            ]),
        );
        let timeline = compile_assembly(&p, &all_sources()).unwrap();

        assert_eq!(timeline.entries.len(), 3);
        assert_eq!(timeline.entries[2].video.end, 2.0);
        assert_eq!(timeline.duration(), 16.0);
    }

    #[test]
    fn entries_past_the_end_are_dropped() {
        let p = plan(
            16,
            json!([]),
            json!([
                { "clipId": "a", "veoCallId": "call_1", "startTime": 0, "endTime": 8, "order": 0 },
                { "clipId": "b", "veoCallId": "call_2", "startTime": 0, "endTime": 8, "order": 1 },
                { "clipId": "c", "veoCallId": "call_3", "startTime": 0, "endTime": 8, "order": 2 }
            ]),
        );
        let timeline = compile_assembly(&p, &all_sources()).unwrap();
        assert_eq!(timeline.entries.len(), 2);
    }

    #[test]
    fn demo_broll_reads_from_demo_with_veo_audio() {
        let p = plan(
            16,
            json!([
                { "segmentIndex": 0, "veoCallId": "call_1", "startTime": 0, "endTime": 4, "type": "talking_head", "script": "hi" },
                { "segmentIndex": 1, "veoCallId": "call_1", "startTime": 4, "endTime": 8, "type": "demo_broll",
                  "demoId": "demo_1", "demoTimestamp": 12.5 }
            ]),
            json!([
                { "clipId": "a", "veoCallId": "call_1", "startTime": 0, "endTime": 4, "order": 0 },
                { "clipId": "b", "veoCallId": "call_1", "startTime": 5, "endTime": 8, "order": 1 }
            ]),
        );
        let timeline = compile_assembly(&p, &all_sources()).unwrap();

        let demo = &timeline.entries[1];
        assert_eq!(demo.video.source, SourceKey::demo("demo_1"));
        assert_eq!(demo.video.start, 13.5);
        assert_eq!(demo.video.end, 16.5);
        let audio = demo.audio.as_ref().unwrap();
        assert_eq!(audio.source, SourceKey::veo("call_1"));
        assert_eq!((audio.start, audio.end), (5.0, 8.0));

        assert_eq!(timeline.entries[0].video.source, SourceKey::veo("call_1"));
    }

    #[test]
    fn existing_clip_segment_reads_from_index() {
        let p = plan(
            16,
            json!([
                { "segmentIndex": 0, "veoCallId": "call_2", "startTime": 0, "endTime": 8, "type": "virtual_broll",
                  "existingClipId": "clip_9" }
            ]),
            json!([
                { "clipId": "a", "veoCallId": "call_2", "startTime": 2, "endTime": 6, "order": 0 }
            ]),
        );
        let timeline = compile_assembly(&p, &all_sources()).unwrap();
        let entry = &timeline.entries[0];
        assert_eq!(entry.video.source, SourceKey::existing("clip_9"));
        assert_eq!((entry.video.start, entry.video.end), (2.0, 6.0));
    }

    #[test]
    fn missing_source_is_an_error() {
        let p = plan(
            16,
            json!([]),
            json!([{ "clipId": "a", "veoCallId": "call_1", "startTime": 0, "endTime": 8, "order": 0 }]),
        );
        let mut sources = all_sources();
        sources.veo_calls.clear();
        let err = compile_assembly(&p, &sources).unwrap_err();
        assert_eq!(
            err,
            AssemblyError::MissingSource {
                clip_id: "a".to_string(),
                key: SourceKey::veo("call_1"),
            }
        );
    }

    #[test]
    fn empty_plan_is_an_error() {
        let p = plan(16, json!([]), json!([]));
        assert_eq!(compile_assembly(&p, &all_sources()), Err(AssemblyError::EmptyPlan));
    }

    #[test]
    fn sources_are_listed_once_in_first_use_order() {
        let p = plan(
            16,
            json!([]),
            json!([
                { "clipId": "a", "veoCallId": "call_2", "startTime": 0, "endTime": 4, "order": 0 },
                { "clipId": "b", "veoCallId": "call_1", "startTime": 0, "endTime": 4, "order": 1 },
                { "clipId": "c", "veoCallId": "call_2", "startTime": 4, "endTime": 8, "order": 2 }
            ]),
        );
        let timeline = compile_assembly(&p, &all_sources()).unwrap();
        let keys: Vec<&str> = timeline.sources().iter().map(|k| k.id.as_str()).collect();
        assert_eq!(keys, vec!["call_2", "call_1"]);
    }
}
