use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of one generated Veo clip in seconds.
pub const VEO_CLIP_SECONDS: f64 = 8.0;

/// Durations the pipeline can bill for.
pub const ALLOWED_TOTAL_DURATIONS: [u32; 3] = [16, 20, 24];

// ---------------------------------------------------------------------------
// Director input
// ---------------------------------------------------------------------------

/// Catalog the director plans against. Built fresh from the database for every
/// planning call and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DirectorInput {
    pub product: ProductInfo,
    pub avatar: AvatarInfo,
    #[serde(default)]
    pub demos: Vec<DemoInfo>,
    #[serde(default)]
    pub existing_clips: Vec<ExistingClipInfo>,
    pub preferences: Preferences,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductInfo {
    pub id: i64,
    pub name: String,
    pub price: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub hooks: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AvatarInfo {
    pub id: i64,
    pub image_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DemoInfo {
    pub id: String,
    pub description: String,
    pub video_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExistingClipInfo {
    pub id: String,
    pub description: String,
    pub duration: f64,
    #[serde(rename = "type")]
    pub clip_type: String,
    pub video_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub tone: Option<String>,
    pub target_duration: Option<u32>,
}

// ---------------------------------------------------------------------------
// Video generation plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProductInteraction {
    #[serde(rename = "handheld")]
    Handheld,
    #[serde(rename = "non-handheld")]
    NonHandheld,
}

/// Total video length. Only 16, 20 and 24 seconds are representable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "u32", into = "u32")]
pub struct TotalDuration(u32);

impl TotalDuration {
    pub fn seconds(self) -> u32 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64
    }

    /// Number of 8-second Veo calls needed to cover the duration.
    pub fn base_veo_calls(self) -> usize {
        (self.0 as f64 / VEO_CLIP_SECONDS).ceil() as usize
    }
}

impl TryFrom<u32> for TotalDuration {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if ALLOWED_TOTAL_DURATIONS.contains(&value) {
            Ok(TotalDuration(value))
        } else {
            Err(format!(
                "totalDuration must be one of {:?}, got {}",
                ALLOWED_TOTAL_DURATIONS, value
            ))
        }
    }
}

impl From<TotalDuration> for u32 {
    fn from(value: TotalDuration) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoGenerationPlan {
    pub product_interaction: ProductInteraction,
    pub interaction_reasoning: String,
    pub total_duration: TotalDuration,
    #[serde(default)]
    pub image_generation: Vec<ImageGenerationTask>,
    #[serde(default)]
    pub segments: Vec<VideoSegment>,
    #[serde(default)]
    pub veo_calls: Vec<VeoCall>,
    #[serde(default)]
    pub clips: Vec<VideoClip>,
}

/// One avatar-plus-product composite to synthesize before clip generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageGenerationTask {
    pub composite_id: String,
    pub avatar_source: String,
    /// 0-based indices into the product's image list.
    #[serde(default)]
    pub product_sources: Vec<u32>,
    pub prompt: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoSegment {
    pub segment_index: u32,
    #[serde(default)]
    pub veo_call_id: Option<String>,
    pub start_time: f64,
    pub end_time: f64,
    #[serde(flatten)]
    pub kind: SegmentKind,
}

impl VideoSegment {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    pub fn segment_type(&self) -> SegmentType {
        self.kind.segment_type()
    }

    pub fn existing_clip_id(&self) -> Option<&str> {
        match &self.kind {
            SegmentKind::ProductBroll { existing_clip_id, .. }
            | SegmentKind::VirtualBroll { existing_clip_id, .. } => existing_clip_id.as_deref(),
            _ => None,
        }
    }

    pub fn overlays_talking_head(&self) -> bool {
        matches!(
            self.kind,
            SegmentKind::DemoBroll {
                overlay_talking_head: Some(true),
                ..
            }
        )
    }
}

/// Type-specific segment payload, tagged by the `type` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SegmentKind {
    #[serde(rename_all = "camelCase")]
    TalkingHead {
        #[serde(default)]
        script: Option<String>,
        #[serde(default)]
        setting: Option<String>,
        #[serde(default)]
        action: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    DemoBroll {
        #[serde(default)]
        demo_id: Option<String>,
        #[serde(default)]
        demo_timestamp: Option<f64>,
        #[serde(default)]
        overlay_talking_head: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    ProductBroll {
        #[serde(default)]
        product_image_index: Option<u32>,
        #[serde(default)]
        broll_prompt: Option<String>,
        #[serde(default)]
        existing_clip_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    VirtualBroll {
        #[serde(default)]
        broll_prompt: Option<String>,
        #[serde(default)]
        existing_clip_id: Option<String>,
    },
}

impl SegmentKind {
    pub fn segment_type(&self) -> SegmentType {
        match self {
            SegmentKind::TalkingHead { .. } => SegmentType::TalkingHead,
            SegmentKind::DemoBroll { .. } => SegmentType::DemoBroll,
            SegmentKind::ProductBroll { .. } => SegmentType::ProductBroll,
            SegmentKind::VirtualBroll { .. } => SegmentType::VirtualBroll,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentType {
    TalkingHead,
    DemoBroll,
    ProductBroll,
    VirtualBroll,
}

impl SegmentType {
    pub const ALL: [SegmentType; 4] = [
        SegmentType::TalkingHead,
        SegmentType::DemoBroll,
        SegmentType::ProductBroll,
        SegmentType::VirtualBroll,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SegmentType::TalkingHead => "talking_head",
            SegmentType::DemoBroll => "demo_broll",
            SegmentType::ProductBroll => "product_broll",
            SegmentType::VirtualBroll => "virtual_broll",
        }
    }
}

impl fmt::Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceImageType {
    Avatar,
    Composite,
    Product,
}

impl SourceImageType {
    pub const ALL: [SourceImageType; 3] = [
        SourceImageType::Avatar,
        SourceImageType::Composite,
        SourceImageType::Product,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceImageType::Avatar => "avatar",
            SourceImageType::Composite => "composite",
            SourceImageType::Product => "product",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

impl fmt::Display for SourceImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One paid invocation of the video generator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VeoCall {
    pub call_id: String,
    pub source_image_type: SourceImageType,
    pub source_image_ref: String,
    pub prompt: String,
}

impl VeoCall {
    /// 0-based product image index for `PRODUCT_<n>` refs (which are 1-based).
    pub fn product_image_index(&self) -> Option<usize> {
        if self.source_image_type != SourceImageType::Product {
            return None;
        }
        parse_product_ref(&self.source_image_ref)
    }
}

/// Parses `PRODUCT_3` / `product-3` / `product3` into index 2.
pub fn parse_product_ref(reference: &str) -> Option<usize> {
    let lower = reference.trim().to_ascii_lowercase();
    let rest = lower.strip_prefix("product")?;
    let digits = rest.trim_start_matches(|c: char| c == '_' || c == '-' || c == ' ');
    let n: usize = digits.parse().ok()?;
    n.checked_sub(1)
}

/// A sub-range of a Veo call's output placed at `order` in the final timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VideoClip {
    pub clip_id: String,
    pub veo_call_id: String,
    pub start_time: f64,
    pub end_time: f64,
    pub order: u32,
}

impl VideoClip {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

impl VideoGenerationPlan {
    pub fn veo_call(&self, call_id: &str) -> Option<&VeoCall> {
        self.veo_calls.iter().find(|c| c.call_id == call_id)
    }

    pub fn image_task(&self, composite_id: &str) -> Option<&ImageGenerationTask> {
        self.image_generation
            .iter()
            .find(|t| t.composite_id == composite_id)
    }

    /// Clips in timeline order.
    pub fn ordered_clips(&self) -> Vec<&VideoClip> {
        let mut clips: Vec<&VideoClip> = self.clips.iter().collect();
        clips.sort_by_key(|c| c.order);
        clips
    }

    /// Upper bound on paid Veo calls: one per 8 seconds plus one per
    /// talking-head overlay.
    pub fn max_veo_calls(&self) -> usize {
        let overlays = self
            .segments
            .iter()
            .filter(|s| s.overlays_talking_head())
            .count();
        self.total_duration.base_veo_calls() + overlays
    }

    pub fn clip_duration_sum(&self) -> f64 {
        self.clips.iter().map(VideoClip::duration).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn segment_kind_is_tagged_by_type() {
        let seg: VideoSegment = serde_json::from_value(json!({
            "segmentIndex": 0,
            "veoCallId": "call_1",
            "startTime": 0,
            "endTime": 4.5,
            "type": "demo_broll",
            "demoId": "demo_a",
            "overlayTalkingHead": true
        }))
        .unwrap();

        assert_eq!(seg.segment_type(), SegmentType::DemoBroll);
        assert!(seg.overlays_talking_head());
        assert_eq!(seg.duration(), 4.5);
    }

    #[test]
    fn total_duration_rejects_unbilled_lengths() {
        assert!(serde_json::from_value::<TotalDuration>(json!(24)).is_ok());
        assert!(serde_json::from_value::<TotalDuration>(json!(18)).is_err());
        assert_eq!(TotalDuration::try_from(20).unwrap().base_veo_calls(), 3);
    }

    #[test]
    fn product_refs_are_one_based() {
        assert_eq!(parse_product_ref("PRODUCT_1"), Some(0));
        assert_eq!(parse_product_ref("product-3"), Some(2));
        assert_eq!(parse_product_ref("PRODUCT_0"), None);
        assert_eq!(parse_product_ref("AVATAR_1"), None);
    }

    #[test]
    fn product_interaction_uses_hyphenated_wire_name() {
        let value = serde_json::to_value(ProductInteraction::NonHandheld).unwrap();
        assert_eq!(value, json!("non-handheld"));
    }
}
