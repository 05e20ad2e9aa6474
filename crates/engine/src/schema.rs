//! Structural validation of a (normalized) plan.
//!
//! Checks types, required fields, numeric ranges and enum membership on the
//! raw JSON so every problem is reported with its path, then hands the value
//! to serde for the typed conversion.

use serde_json::{Map, Value};

use crate::plan::{
    SegmentType, SourceImageType, VideoGenerationPlan, ALLOWED_TOTAL_DURATIONS, VEO_CLIP_SECONDS,
};

/// Shortest `interactionReasoning` accepted as a real justification.
pub const MIN_REASONING_CHARS: usize = 20;

pub fn check_schema(plan: &Value) -> Result<VideoGenerationPlan, Vec<String>> {
    let mut errors = Vec::new();

    let Some(root) = plan.as_object() else {
        return Err(vec!["plan: expected a JSON object".to_string()]);
    };

    let mut ctx = Ctx {
        errors: &mut errors,
    };

    if let Some(v) = ctx.required_str(root, "", "productInteraction") {
        if v != "handheld" && v != "non-handheld" {
            ctx.push("productInteraction", format!("must be handheld or non-handheld, got {:?}", v));
        }
    }
    if let Some(v) = ctx.required_str(root, "", "interactionReasoning") {
        let len = v.trim().chars().count();
        if len < MIN_REASONING_CHARS {
            ctx.push(
                "interactionReasoning",
                format!("must be at least {} characters, got {}", MIN_REASONING_CHARS, len),
            );
        }
    }
    match root.get("totalDuration") {
        None => ctx.push("totalDuration", "is required".to_string()),
        Some(v) => match as_whole_number(v) {
            Some(n) if ALLOWED_TOTAL_DURATIONS.iter().any(|d| *d as u64 == n) => {}
            _ => ctx.push(
                "totalDuration",
                format!("must be one of {:?}, got {}", ALLOWED_TOTAL_DURATIONS, v),
            ),
        },
    }

    if let Some(tasks) = ctx.required_array(root, "imageGeneration") {
        for (i, task) in tasks.iter().enumerate() {
            let path = format!("imageGeneration[{}]", i);
            let Some(obj) = ctx.object(task, &path) else { continue };
            ctx.required_non_empty_str(obj, &path, "compositeId");
            ctx.required_str(obj, &path, "avatarSource");
            ctx.required_non_empty_str(obj, &path, "prompt");
            ctx.optional_str(obj, &path, "description");
            if let Some(sources) = obj.get("productSources") {
                match sources.as_array() {
                    Some(items) => {
                        for (j, item) in items.iter().enumerate() {
                            if as_whole_number(item).is_none() {
                                ctx.push(
                                    &format!("{}.productSources[{}]", path, j),
                                    format!("must be a non-negative integer, got {}", item),
                                );
                            }
                        }
                    }
                    None => ctx.push(&format!("{}.productSources", path), "must be an array".to_string()),
                }
            }
        }
    }

    if let Some(segments) = ctx.required_array(root, "segments") {
        for (i, segment) in segments.iter().enumerate() {
            let path = format!("segments[{}]", i);
            let Some(obj) = ctx.object(segment, &path) else { continue };
            ctx.required_index(obj, &path, "segmentIndex");
            ctx.optional_str(obj, &path, "veoCallId");
            ctx.required_time(obj, &path, "startTime");
            ctx.required_time(obj, &path, "endTime");
            if let Some(t) = ctx.required_str(obj, &path, "type") {
                if !SegmentType::ALL.iter().any(|st| st.as_str() == t) {
                    ctx.push(
                        &format!("{}.type", path),
                        format!(
                            "must be one of talking_head, demo_broll, product_broll, virtual_broll, got {:?}",
                            t
                        ),
                    );
                }
            }
            for key in ["script", "setting", "action", "demoId", "brollPrompt", "existingClipId"] {
                ctx.optional_str(obj, &path, key);
            }
            if let Some(v) = obj.get("demoTimestamp").filter(|v| !v.is_null()) {
                if v.as_f64().map_or(true, |t| t < 0.0) {
                    ctx.push(
                        &format!("{}.demoTimestamp", path),
                        format!("must be a non-negative number, got {}", v),
                    );
                }
            }
            if let Some(v) = obj.get("overlayTalkingHead").filter(|v| !v.is_null()) {
                if !v.is_boolean() {
                    ctx.push(&format!("{}.overlayTalkingHead", path), format!("must be a boolean, got {}", v));
                }
            }
            if let Some(v) = obj.get("productImageIndex").filter(|v| !v.is_null()) {
                if as_whole_number(v).is_none() {
                    ctx.push(
                        &format!("{}.productImageIndex", path),
                        format!("must be a non-negative integer, got {}", v),
                    );
                }
            }
        }
    }

    if let Some(calls) = ctx.required_array(root, "veoCalls") {
        for (i, call) in calls.iter().enumerate() {
            let path = format!("veoCalls[{}]", i);
            let Some(obj) = ctx.object(call, &path) else { continue };
            ctx.required_non_empty_str(obj, &path, "callId");
            if let Some(t) = ctx.required_str(obj, &path, "sourceImageType") {
                if SourceImageType::parse(t).is_none() {
                    ctx.push(
                        &format!("{}.sourceImageType", path),
                        format!("must be one of avatar, composite, product, got {:?}", t),
                    );
                }
            }
            ctx.required_non_empty_str(obj, &path, "sourceImageRef");
            ctx.required_non_empty_str(obj, &path, "prompt");
        }
    }

    if let Some(clips) = ctx.required_array(root, "clips") {
        for (i, clip) in clips.iter().enumerate() {
            let path = format!("clips[{}]", i);
            let Some(obj) = ctx.object(clip, &path) else { continue };
            ctx.required_non_empty_str(obj, &path, "clipId");
            ctx.required_non_empty_str(obj, &path, "veoCallId");
            ctx.required_time(obj, &path, "startTime");
            ctx.required_time(obj, &path, "endTime");
            ctx.required_index(obj, &path, "order");
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    serde_json::from_value(plan.clone()).map_err(|e| vec![format!("plan: {}", e)])
}

/// Non-negative integers that fit the typed model's `u32` fields.
fn as_whole_number(v: &Value) -> Option<u64> {
    v.as_u64().filter(|n| *n <= u32::MAX as u64)
}

struct Ctx<'a> {
    errors: &'a mut Vec<String>,
}

impl<'a> Ctx<'a> {
    fn push(&mut self, path: &str, message: String) {
        self.errors.push(format!("{}: {}", path, message));
    }

    fn join(parent: &str, key: &str) -> String {
        if parent.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", parent, key)
        }
    }

    fn object<'v>(&mut self, value: &'v Value, path: &str) -> Option<&'v Map<String, Value>> {
        let obj = value.as_object();
        if obj.is_none() {
            self.push(path, "expected an object".to_string());
        }
        obj
    }

    fn required_array<'v>(&mut self, obj: &'v Map<String, Value>, key: &str) -> Option<&'v Vec<Value>> {
        match obj.get(key) {
            None => {
                self.push(key, "is required".to_string());
                None
            }
            Some(v) => {
                let arr = v.as_array();
                if arr.is_none() {
                    self.push(key, "must be an array".to_string());
                }
                arr
            }
        }
    }

    fn required_str<'v>(&mut self, obj: &'v Map<String, Value>, parent: &str, key: &str) -> Option<&'v str> {
        let path = Self::join(parent, key);
        match obj.get(key) {
            None | Some(Value::Null) => {
                self.push(&path, "is required".to_string());
                None
            }
            Some(Value::String(s)) => Some(s.as_str()),
            Some(other) => {
                self.push(&path, format!("must be a string, got {}", other));
                None
            }
        }
    }

    fn required_non_empty_str(&mut self, obj: &Map<String, Value>, parent: &str, key: &str) {
        if let Some(s) = self.required_str(obj, parent, key) {
            if s.trim().is_empty() {
                self.push(&Self::join(parent, key), "must not be empty".to_string());
            }
        }
    }

    fn optional_str(&mut self, obj: &Map<String, Value>, parent: &str, key: &str) {
        match obj.get(key) {
            None | Some(Value::Null) | Some(Value::String(_)) => {}
            Some(other) => self.push(&Self::join(parent, key), format!("must be a string, got {}", other)),
        }
    }

    fn required_index(&mut self, obj: &Map<String, Value>, parent: &str, key: &str) {
        let path = Self::join(parent, key);
        match obj.get(key) {
            None | Some(Value::Null) => self.push(&path, "is required".to_string()),
            Some(v) if as_whole_number(v).is_none() => {
                self.push(&path, format!("must be a non-negative integer, got {}", v))
            }
            Some(_) => {}
        }
    }

    /// Times are offsets inside one generated call and so live in [0, 8].
    fn required_time(&mut self, obj: &Map<String, Value>, parent: &str, key: &str) {
        let path = Self::join(parent, key);
        match obj.get(key) {
            None | Some(Value::Null) => self.push(&path, "is required".to_string()),
            Some(v) => match v.as_f64() {
                Some(t) if (0.0..=VEO_CLIP_SECONDS).contains(&t) => {}
                Some(_) => self.push(
                    &path,
                    format!("must be within [0, {}], got {}", VEO_CLIP_SECONDS, v),
                ),
                None => self.push(&path, format!("must be a number, got {}", v)),
            },
        }
    }
}
