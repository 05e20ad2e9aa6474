//! Best-effort coercion of near-valid planner output.
//!
//! Runs on the raw JSON before schema validation so that casing, whitespace
//! and naming drift in the director's output does not hard-fail a plan.
//! Anything that cannot be resolved with certainty is reported as an error;
//! the image source of a paid Veo call is never guessed.

use serde_json::Value;

use crate::plan::{SegmentType, SourceImageType};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Normalization {
    /// Unresolvable values, reported as schema-level errors.
    pub errors: Vec<String>,
    /// Human-readable record of every rewrite applied.
    pub notes: Vec<String>,
}

pub fn normalize_plan(plan: &mut Value) -> Normalization {
    let mut out = Normalization::default();
    normalize_product_interaction(plan, &mut out);
    normalize_segment_types(plan, &mut out);
    normalize_source_image_types(plan, &mut out);
    out
}

fn normalize_product_interaction(plan: &mut Value, out: &mut Normalization) {
    let Some(raw) = plan.get("productInteraction").and_then(Value::as_str) else {
        return;
    };
    let cleaned = raw.trim().to_ascii_lowercase().replace(&['_', ' '][..], "-");
    let cleaned = if cleaned == "nonhandheld" {
        "non-handheld".to_string()
    } else {
        cleaned
    };
    if cleaned != raw && (cleaned == "handheld" || cleaned == "non-handheld") {
        out.notes.push(format!(
            "productInteraction {:?} normalized to {:?}",
            raw, cleaned
        ));
        plan["productInteraction"] = Value::String(cleaned);
    }
}

fn normalize_segment_types(plan: &mut Value, out: &mut Normalization) {
    let Some(segments) = plan.get_mut("segments").and_then(Value::as_array_mut) else {
        return;
    };
    for (i, segment) in segments.iter_mut().enumerate() {
        let Some(raw) = segment.get("type").and_then(Value::as_str) else {
            continue;
        };
        let cleaned = raw.trim().to_ascii_lowercase().replace(&['-', ' '][..], "_");
        if cleaned == raw {
            continue;
        }
        if SegmentType::ALL.iter().any(|t| t.as_str() == cleaned) {
            out.notes.push(format!(
                "segments[{}].type {:?} normalized to {:?}",
                i, raw, cleaned
            ));
            segment["type"] = Value::String(cleaned);
        }
    }
}

fn normalize_source_image_types(plan: &mut Value, out: &mut Normalization) {
    let Some(calls) = plan.get_mut("veoCalls").and_then(Value::as_array_mut) else {
        return;
    };
    for (i, call) in calls.iter_mut().enumerate() {
        if !call.is_object() {
            // Shape problems belong to schema validation.
            continue;
        }
        let call_id = call
            .get("callId")
            .and_then(Value::as_str)
            .unwrap_or("<missing callId>")
            .to_string();
        let raw_type = call.get("sourceImageType").and_then(Value::as_str);
        let cleaned = raw_type.map(|t| t.trim().to_ascii_lowercase());

        if let Some(parsed) = cleaned.as_deref().and_then(SourceImageType::parse) {
            if raw_type != Some(parsed.as_str()) {
                out.notes.push(format!(
                    "veoCalls[{}] ({}): sourceImageType {:?} normalized to {:?}",
                    i,
                    call_id,
                    raw_type.unwrap_or_default(),
                    parsed.as_str()
                ));
                call["sourceImageType"] = Value::String(parsed.as_str().to_string());
            }
            continue;
        }

        let reference = call.get("sourceImageRef").and_then(Value::as_str);
        match reference.and_then(infer_from_ref) {
            Some(inferred) => {
                out.notes.push(format!(
                    "veoCalls[{}] ({}): sourceImageType {:?} inferred as {:?} from sourceImageRef {:?}",
                    i,
                    call_id,
                    raw_type.unwrap_or_default(),
                    inferred.as_str(),
                    reference.unwrap_or_default()
                ));
                call["sourceImageType"] = Value::String(inferred.as_str().to_string());
            }
            None => out.errors.push(format!(
                "veoCalls[{}] ({}): sourceImageType {:?} is not one of avatar, composite, product and cannot be inferred from sourceImageRef {:?}",
                i,
                call_id,
                raw_type.unwrap_or_default(),
                reference.unwrap_or_default()
            )),
        }
    }
}

/// Infers the image source from the `AVATAR_1` / `composite_1` / `PRODUCT_1`
/// naming convention.
pub fn infer_from_ref(reference: &str) -> Option<SourceImageType> {
    let lower = reference.trim().to_ascii_lowercase();
    SourceImageType::ALL
        .into_iter()
        .find(|t| lower.starts_with(t.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lowercases_and_trims_source_image_type() {
        let mut plan = json!({
            "veoCalls": [{ "callId": "c1", "sourceImageType": "  Composite ", "sourceImageRef": "composite_1" }]
        });
        let result = normalize_plan(&mut plan);
        assert!(result.errors.is_empty());
        assert_eq!(plan["veoCalls"][0]["sourceImageType"], "composite");
        assert_eq!(result.notes.len(), 1);
    }

    #[test]
    fn infers_type_from_reference_prefix() {
        let mut plan = json!({
            "veoCalls": [
                { "callId": "c1", "sourceImageType": "image", "sourceImageRef": "AVATAR_1" },
                { "callId": "c2", "sourceImageRef": "PRODUCT_2" }
            ]
        });
        let result = normalize_plan(&mut plan);
        assert!(result.errors.is_empty());
        assert_eq!(plan["veoCalls"][0]["sourceImageType"], "avatar");
        assert_eq!(plan["veoCalls"][1]["sourceImageType"], "product");
    }

    #[test]
    fn unresolvable_source_fails_closed() {
        let mut plan = json!({
            "veoCalls": [{ "callId": "c9", "sourceImageType": "photo", "sourceImageRef": "hero_shot" }]
        });
        let result = normalize_plan(&mut plan);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("c9"));
        assert_eq!(plan["veoCalls"][0]["sourceImageType"], "photo");
    }

    #[test]
    fn normalizes_segment_type_and_interaction() {
        let mut plan = json!({
            "productInteraction": "Non_Handheld",
            "segments": [{ "type": "Talking-Head" }, { "type": "mystery" }]
        });
        let result = normalize_plan(&mut plan);
        assert_eq!(plan["productInteraction"], "non-handheld");
        assert_eq!(plan["segments"][0]["type"], "talking_head");
        assert_eq!(plan["segments"][1]["type"], "mystery");
        assert!(result.errors.is_empty());
    }

    #[test]
    fn already_clean_plan_is_untouched() {
        let mut plan = json!({
            "productInteraction": "handheld",
            "veoCalls": [{ "callId": "c1", "sourceImageType": "avatar", "sourceImageRef": "AVATAR_1" }]
        });
        let before = plan.clone();
        let result = normalize_plan(&mut plan);
        assert_eq!(plan, before);
        assert!(result.notes.is_empty());
    }
}
