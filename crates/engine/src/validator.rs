//! Plan validation: normalize, then schema, then semantics.
//!
//! Errors block generation; warnings are surfaced but never block. Both are
//! returned as data. Validation is pure: the same plan and input always
//! produce the same report.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::assembly::originating_segment;
use crate::normalize::normalize_plan;
use crate::plan::{
    parse_product_ref, DirectorInput, ProductInteraction, SegmentKind, SourceImageType,
    VideoGenerationPlan,
};
use crate::schema::check_schema;

/// Allowed drift between the clip duration sum and `totalDuration`.
pub const DURATION_TOLERANCE_SECONDS: f64 = 0.5;
const RANGE_TOLERANCE_SECONDS: f64 = 0.01;
/// Spoken pacing bounds for talking-head scripts.
pub const MIN_WORDS_PER_SECOND: f64 = 1.5;
pub const MAX_WORDS_PER_SECOND: f64 = 4.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    fn from_parts(errors: Vec<String>, warnings: Vec<String>) -> Self {
        ValidationReport {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

/// Outcome of validating raw planner output.
#[derive(Debug, Clone)]
pub struct ValidatedPlan {
    pub report: ValidationReport,
    /// Present whenever the plan passed schema validation, even if semantic
    /// errors were found.
    pub plan: Option<VideoGenerationPlan>,
    /// Rewrites applied during normalization.
    pub normalizations: Vec<String>,
}

/// Validates raw director output, normalizing near-valid fields in place.
pub fn validate_plan_json(raw: &mut Value, input: &DirectorInput) -> ValidatedPlan {
    let normalization = normalize_plan(raw);
    let mut errors = normalization.errors;

    let plan = match check_schema(raw) {
        Ok(plan) if errors.is_empty() => plan,
        Ok(_) => {
            return ValidatedPlan {
                report: ValidationReport::from_parts(errors, Vec::new()),
                plan: None,
                normalizations: normalization.notes,
            }
        }
        Err(schema_errors) => {
            errors.extend(schema_errors);
            return ValidatedPlan {
                report: ValidationReport::from_parts(errors, Vec::new()),
                plan: None,
                normalizations: normalization.notes,
            };
        }
    };

    let mut warnings = Vec::new();
    check_semantics(&plan, input, &mut errors, &mut warnings);

    ValidatedPlan {
        report: ValidationReport::from_parts(errors, warnings),
        plan: Some(plan),
        normalizations: normalization.notes,
    }
}

/// Validates an already-typed plan. Ranges and shapes are re-checked through
/// the same pipeline as raw output, so a plan built in code gets no shortcuts.
pub fn validate(plan: &VideoGenerationPlan, input: &DirectorInput) -> ValidationReport {
    match serde_json::to_value(plan) {
        Ok(mut raw) => validate_plan_json(&mut raw, input).report,
        Err(e) => ValidationReport::from_parts(vec![format!("plan: {}", e)], Vec::new()),
    }
}

pub fn check_semantics(
    plan: &VideoGenerationPlan,
    input: &DirectorInput,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    check_product_interaction(plan, errors);
    check_unique_ids(plan, errors);
    check_image_generation(plan, input, errors);
    check_veo_calls(plan, input, errors, warnings);
    check_segments(plan, input, errors, warnings);
    check_clips(plan, errors, warnings);
    check_existing_clip_lengths(plan, input, errors);
}

fn check_product_interaction(plan: &VideoGenerationPlan, errors: &mut Vec<String>) {
    if plan.product_interaction == ProductInteraction::Handheld && plan.image_generation.is_empty() {
        errors.push(
            "productInteraction is handheld but imageGeneration is empty: a handheld product requires a composite image"
                .to_string(),
        );
    }
}

fn check_unique_ids(plan: &VideoGenerationPlan, errors: &mut Vec<String>) {
    let mut report = |kind: &str, ids: Vec<&str>| {
        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        for id in ids {
            if !seen.insert(id) && reported.insert(id) {
                errors.push(format!("duplicate {} {:?}", kind, id));
            }
        }
    };
    report(
        "compositeId",
        plan.image_generation.iter().map(|t| t.composite_id.as_str()).collect(),
    );
    report("callId", plan.veo_calls.iter().map(|c| c.call_id.as_str()).collect());
    report("clipId", plan.clips.iter().map(|c| c.clip_id.as_str()).collect());
}

fn check_image_generation(plan: &VideoGenerationPlan, input: &DirectorInput, errors: &mut Vec<String>) {
    let image_count = input.product.images.len();
    for task in &plan.image_generation {
        for index in &task.product_sources {
            if *index as usize >= image_count {
                errors.push(format!(
                    "imageGeneration {:?} references product image index {} but the product has {} image(s)",
                    task.composite_id, index, image_count
                ));
            }
        }
    }
}

fn check_veo_calls(
    plan: &VideoGenerationPlan,
    input: &DirectorInput,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    let composite_ids: HashSet<&str> = plan
        .image_generation
        .iter()
        .map(|t| t.composite_id.as_str())
        .collect();
    let image_count = input.product.images.len();

    for call in &plan.veo_calls {
        match call.source_image_type {
            SourceImageType::Composite => {
                if !composite_ids.contains(call.source_image_ref.as_str()) {
                    errors.push(format!(
                        "veoCall {:?} references composite {:?} which is not in imageGeneration",
                        call.call_id, call.source_image_ref
                    ));
                }
            }
            SourceImageType::Product => match parse_product_ref(&call.source_image_ref) {
                Some(index) if index < image_count => {}
                Some(index) => errors.push(format!(
                    "veoCall {:?} references product image {:?} (index {}) but the product has {} image(s)",
                    call.call_id, call.source_image_ref, index, image_count
                )),
                None => errors.push(format!(
                    "veoCall {:?} has product sourceImageRef {:?} which is not of the form PRODUCT_<n>",
                    call.call_id, call.source_image_ref
                )),
            },
            SourceImageType::Avatar => {}
        }
    }

    let max_calls = plan.max_veo_calls();
    if plan.veo_calls.len() > max_calls {
        errors.push(format!(
            "veoCalls has {} calls but at most {} are allowed for a {}s video ({} base + {} talking-head overlay(s))",
            plan.veo_calls.len(),
            max_calls,
            plan.total_duration.seconds(),
            plan.total_duration.base_veo_calls(),
            max_calls - plan.total_duration.base_veo_calls()
        ));
    }

    let used: HashSet<&str> = plan.clips.iter().map(|c| c.veo_call_id.as_str()).collect();
    for call in &plan.veo_calls {
        if !used.contains(call.call_id.as_str()) {
            warnings.push(format!(
                "veoCall {:?} is not used by any clip and would be generated for nothing",
                call.call_id
            ));
        }
    }
}

fn check_segments(
    plan: &VideoGenerationPlan,
    input: &DirectorInput,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    let call_ids: HashSet<&str> = plan.veo_calls.iter().map(|c| c.call_id.as_str()).collect();
    let demo_ids: HashSet<&str> = input.demos.iter().map(|d| d.id.as_str()).collect();
    let existing_ids: HashSet<&str> = input.existing_clips.iter().map(|c| c.id.as_str()).collect();
    let image_count = input.product.images.len();

    for segment in &plan.segments {
        let label = format!("segment {} ({})", segment.segment_index, segment.segment_type());

        if segment.start_time >= segment.end_time {
            errors.push(format!(
                "{}: startTime {} must be before endTime {}",
                label, segment.start_time, segment.end_time
            ));
        }
        if let Some(call_id) = &segment.veo_call_id {
            if !call_ids.contains(call_id.as_str()) {
                errors.push(format!("{}: veoCallId {:?} does not exist in veoCalls", label, call_id));
            }
        }
        if let Some(clip_id) = segment.existing_clip_id() {
            if !existing_ids.contains(clip_id) {
                errors.push(format!(
                    "{}: existingClipId {:?} is not one of the available clips",
                    label, clip_id
                ));
            }
        }

        match &segment.kind {
            SegmentKind::TalkingHead { script, .. } => {
                let script = script.as_deref().unwrap_or("").trim();
                if script.is_empty() {
                    errors.push(format!("{}: talking_head segment requires a non-empty script", label));
                } else if let Some(warning) = pacing_warning(script, segment.duration()) {
                    warnings.push(format!("{}: {}", label, warning));
                }
            }
            SegmentKind::DemoBroll { demo_id, .. } => match demo_id {
                Some(id) if !demo_ids.contains(id.as_str()) => {
                    errors.push(format!("{}: demoId {:?} is not one of the available demos", label, id));
                }
                Some(_) => {}
                None => warnings.push(format!(
                    "{}: demo_broll segment has no demoId and will use generated footage",
                    label
                )),
            },
            SegmentKind::ProductBroll {
                product_image_index: Some(index),
                ..
            } if *index as usize >= image_count => {
                errors.push(format!(
                    "{}: productImageIndex {} is out of range for {} product image(s)",
                    label, index, image_count
                ));
            }
            _ => {}
        }
    }

    let mut indices: Vec<u32> = plan.segments.iter().map(|s| s.segment_index).collect();
    indices.sort_unstable();
    if !is_zero_based_sequence(&indices) {
        warnings.push(format!(
            "segments: segmentIndex values {:?} do not form a sequence starting at 0",
            indices
        ));
    }
}

fn check_clips(plan: &VideoGenerationPlan, errors: &mut Vec<String>, warnings: &mut Vec<String>) {
    let call_ids: HashSet<&str> = plan.veo_calls.iter().map(|c| c.call_id.as_str()).collect();

    for clip in &plan.clips {
        if !call_ids.contains(clip.veo_call_id.as_str()) {
            errors.push(format!(
                "clip {:?} references veoCallId {:?} which does not exist in veoCalls",
                clip.clip_id, clip.veo_call_id
            ));
        }
        if clip.start_time >= clip.end_time {
            errors.push(format!(
                "clip {:?}: startTime {} must be before endTime {}",
                clip.clip_id, clip.start_time, clip.end_time
            ));
        }
    }

    let mut orders: Vec<u32> = plan.clips.iter().map(|c| c.order).collect();
    orders.sort_unstable();
    if !is_zero_based_sequence(&orders) {
        warnings.push(format!(
            "clips: order values {:?} are not sequential from 0",
            orders
        ));
    }

    let total = plan.total_duration.as_f64();
    let sum = plan.clip_duration_sum();
    if (sum - total).abs() > DURATION_TOLERANCE_SECONDS {
        warnings.push(format!(
            "clips: durations sum to {:.2}s but totalDuration is {}s",
            sum, total
        ));
    }
}

/// A clip cut from an existing clip must fit inside that clip's footage.
fn check_existing_clip_lengths(plan: &VideoGenerationPlan, input: &DirectorInput, errors: &mut Vec<String>) {
    for clip in &plan.clips {
        let Some(segment) = originating_segment(plan, clip) else {
            continue;
        };
        let Some(id) = segment.existing_clip_id() else {
            continue;
        };
        let Some(existing) = input.existing_clips.iter().find(|c| c.id == id) else {
            continue;
        };
        let needed = (clip.start_time - segment.start_time).max(0.0) + clip.duration();
        if needed > existing.duration + RANGE_TOLERANCE_SECONDS {
            errors.push(format!(
                "clip {:?} needs {:.2}s of existing clip {:?} but it is only {:.2}s long",
                clip.clip_id, needed, id, existing.duration
            ));
        }
    }
}

fn is_zero_based_sequence(sorted: &[u32]) -> bool {
    sorted.iter().enumerate().all(|(i, v)| *v as usize == i)
}

/// Flags scripts that will read too fast or too slow once spoken.
pub fn pacing_warning(script: &str, duration: f64) -> Option<String> {
    if duration <= 0.0 {
        return None;
    }
    let words = script.split_whitespace().count();
    let rate = words as f64 / duration;
    if rate > MAX_WORDS_PER_SECOND {
        Some(format!(
            "script is too fast: {} words in {:.1}s ({:.2} words/sec, max {})",
            words, duration, rate, MAX_WORDS_PER_SECOND
        ))
    } else if rate < MIN_WORDS_PER_SECOND {
        Some(format!(
            "script is too slow: {} words in {:.1}s ({:.2} words/sec, min {})",
            words, duration, rate, MIN_WORDS_PER_SECOND
        ))
    } else {
        None
    }
}
