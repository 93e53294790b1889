// ── Job request builder ──
//
// Workers reject requests with missing fields, so every request starts
// from a full default template and the project parameters are layered on
// top of its single key frame.

use serde_json::{Map, Value, json};

use crate::error::CoreError;
use crate::model::{ControlNetParams, ProjectParams};

const CUSTOM_SIZE_PRESET: &str = "custom";
const MIN_CUSTOM_SIZE: u32 = 256;
const MAX_CUSTOM_SIZE: u32 = 2048;
const DEFAULT_STARTING_IMAGE_STRENGTH: f64 = 0.5;

fn object<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v))
        .collect()
}

fn key_frame_template() -> Map<String, Value> {
    object([
        ("stepsIsEnabled", json!(true)),
        ("siRotation", json!(0)),
        ("siDragOffsetIsEnabled", json!(true)),
        ("strength", json!(0.5)),
        ("siZoomScaleIsEnabled", json!(true)),
        ("isEnabled", json!(true)),
        ("processing", json!("CPU, GPU")),
        ("useLastImageAsGuideImageInAnimation", json!(true)),
        ("guidanceScaleIsEnabled", json!(true)),
        ("siImageBackgroundColor", json!("black")),
        ("cnDragOffset", json!([0, 0])),
        ("scheduler", json!("DPM Solver Multistep (DPM-Solver++)")),
        ("timeStepSpacing", json!("Linear")),
        ("steps", json!(20)),
        ("cnRotation", json!(0)),
        ("guidanceScale", json!(7.5)),
        ("siZoomScale", json!(1)),
        ("modelID", json!("")),
        ("cnRotationIsEnabled", json!(true)),
        ("negativePrompt", json!("")),
        ("startingImageZoomPanIsOn", json!(false)),
        ("siRotationIsEnabled", json!(true)),
        ("cnImageBackgroundColor", json!("clear")),
        ("strengthIsEnabled", json!(true)),
        ("siDragOffset", json!([0, 0])),
        ("useLastImageAsCNImageInAnimation", json!(false)),
        ("positivePrompt", json!("")),
        ("controlNetZoomPanIsOn", json!(false)),
        ("cnZoomScaleIsEnabled", json!(true)),
        ("currentControlNets", Value::Null),
        ("stylePrompt", json!("")),
        ("cnDragOffsetIsEnabled", json!(true)),
        ("frameIndex", json!(0)),
        ("startingImage", Value::Null),
        ("cnZoomScale", json!(1)),
    ])
}

fn request_template() -> Map<String, Value> {
    object([
        ("selectedUpscalingModel", json!("OFF")),
        ("cnVideoFramesSketch", json!([])),
        ("cnVideoFramesSegmentedSubject", json!([])),
        ("cnVideoFramesFace", json!([])),
        ("doCanvasBlending", json!(false)),
        ("animationIsOn", json!(false)),
        ("cnVideoFramesBoth", json!([])),
        ("cnVideoFramesDepth", json!([])),
        ("previews", json!(5)),
        ("frameRate", json!(24)),
        ("generatedVideoSeconds", json!(10)),
        ("canvasIsOn", json!(false)),
        ("cnVideoFrames", json!([])),
        ("disableSafety", json!(false)),
        ("cnVideoFramesSegmentedBackground", json!([])),
        ("cnVideoFramesSegmented", json!([])),
        ("numberOfImages", json!(1)),
        ("cnVideoFramesPose", json!([])),
        ("jobID", json!("")),
        ("siVideoFrames", json!([])),
    ])
}

// ── Validation ───────────────────────────────────────────────────────

fn unit_interval(value: f64, name: &str) -> Result<f64, CoreError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(CoreError::validation(format!(
            "{name} must be between 0 and 1, got {value}"
        )))
    }
}

fn custom_size(value: Option<u32>, name: &str) -> Result<u32, CoreError> {
    match value {
        Some(v) if (MIN_CUSTOM_SIZE..=MAX_CUSTOM_SIZE).contains(&v) => Ok(v),
        Some(v) => Err(CoreError::validation(format!(
            "{name} must be between {MIN_CUSTOM_SIZE} and {MAX_CUSTOM_SIZE}, got {v}"
        ))),
        None => Err(CoreError::validation(format!(
            "{name} is required when sizePreset is \"custom\""
        ))),
    }
}

/// Reject parameters no worker could run.
pub fn validate(params: &ProjectParams) -> Result<(), CoreError> {
    if params.model_id.trim().is_empty() {
        return Err(CoreError::validation("modelId is required"));
    }
    if params.number_of_images == 0 {
        return Err(CoreError::validation("numberOfImages must be at least 1"));
    }
    if params.steps == 0 {
        return Err(CoreError::validation("steps must be at least 1"));
    }
    if let Some(strength) = params.starting_image_strength {
        unit_interval(strength, "startingImageStrength")?;
    }
    Ok(())
}

fn control_net(params: &ControlNetParams) -> Result<Value, CoreError> {
    let mut cn = object([
        ("name", json!(params.name)),
        ("cnImageState", json!("original")),
        ("hasImage", json!(params.image.is_some())),
    ]);
    if let Some(strength) = params.strength {
        cn.insert(
            "controlStrength".into(),
            json!(unit_interval(strength, "strength")?),
        );
    }
    if let Some(mode) = params.mode {
        cn.insert("controlMode".into(), json!(mode.code()));
    }
    if let Some(start) = params.guidance_start {
        cn.insert(
            "controlGuidanceStart".into(),
            json!(unit_interval(start, "guidanceStart")?),
        );
    }
    if let Some(end) = params.guidance_end {
        cn.insert(
            "controlGuidanceEnd".into(),
            json!(unit_interval(end, "guidanceEnd")?),
        );
    }
    Ok(Value::Array(vec![Value::Object(cn)]))
}

// ── Builder ──────────────────────────────────────────────────────────

/// Build the `jobRequest` payload for project `id`.
pub fn build_job_request(id: &str, params: &ProjectParams) -> Result<Value, CoreError> {
    validate(params)?;

    let has_starting_image = params.starting_image.is_some();
    let mut key_frame = key_frame_template();
    key_frame.extend(object([
        ("scheduler", json!(params.scheduler)),
        ("timeStepSpacing", json!(params.time_step_spacing)),
        ("steps", json!(params.steps)),
        ("guidanceScale", json!(params.guidance)),
        ("modelID", json!(params.model_id)),
        ("negativePrompt", json!(params.negative_prompt)),
        ("positivePrompt", json!(params.positive_prompt)),
        ("stylePrompt", json!(params.style_prompt)),
        ("hasStartingImage", json!(has_starting_image)),
        ("strengthIsEnabled", json!(has_starting_image)),
    ]));

    // Absent optional values are omitted rather than sent as null.
    key_frame.remove("strength");
    if has_starting_image {
        let strength = params
            .starting_image_strength
            .unwrap_or(DEFAULT_STARTING_IMAGE_STRENGTH);
        key_frame.insert("strength".into(), json!(1.0 - strength));
    }
    if let Some(seed) = params.seed {
        key_frame.insert("seed".into(), json!(seed));
    }
    if let Some(preset) = &params.size_preset {
        key_frame.insert("sizePreset".into(), json!(preset));
        if preset == CUSTOM_SIZE_PRESET {
            key_frame.insert("width".into(), json!(custom_size(params.width, "width")?));
            key_frame.insert("height".into(), json!(custom_size(params.height, "height")?));
        }
    }
    if let Some(cn) = &params.control_net {
        key_frame.insert("currentControlNetsJob".into(), control_net(cn)?);
    }

    let mut request = request_template();
    request.extend(object([
        ("keyFrames", Value::Array(vec![Value::Object(key_frame)])),
        ("previews", json!(params.number_of_previews.unwrap_or(0))),
        ("numberOfImages", json!(params.number_of_images)),
        ("jobID", json!(id)),
        ("disableSafety", json!(params.disable_nsfw_filter)),
    ]));
    if let Some(token_type) = params.token_type {
        request.insert("tokenType".into(), json!(token_type));
    }
    if let Some(network) = params.network {
        request.insert("network".into(), json!(network));
    }
    Ok(Value::Object(request))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{ControlNetMode, ControlNetName, ImageInput, TokenType};
    use supernet_api::Network;

    fn params() -> ProjectParams {
        let mut p = ProjectParams::new("flux1-schnell", "a lighthouse at dusk");
        p.number_of_images = 2;
        p.steps = 4;
        p
    }

    #[test]
    fn request_fills_template_and_overrides_key_frame() {
        let req = build_job_request("P1", &params()).unwrap();

        assert_eq!(req["jobID"], "P1");
        assert_eq!(req["numberOfImages"], 2);
        assert_eq!(req["previews"], 0);
        assert_eq!(req["selectedUpscalingModel"], "OFF");
        assert_eq!(req["disableSafety"], false);
        assert!(req.get("network").is_none());
        assert!(req.get("tokenType").is_none());

        let kf = &req["keyFrames"][0];
        assert_eq!(kf["modelID"], "flux1-schnell");
        assert_eq!(kf["steps"], 4);
        assert_eq!(kf["positivePrompt"], "a lighthouse at dusk");
        assert_eq!(kf["scheduler"], Value::Null);
        assert_eq!(kf["hasStartingImage"], false);
        assert_eq!(kf["processing"], "CPU, GPU");
        assert!(kf.get("strength").is_none());
        assert!(kf.get("seed").is_none());
    }

    #[test]
    fn starting_image_strength_is_inverted() {
        let mut p = params();
        p.starting_image = Some(ImageInput::Bytes(Bytes::from_static(b"png")));
        p.starting_image_strength = Some(0.75);
        let req = build_job_request("P1", &p).unwrap();
        assert_eq!(req["keyFrames"][0]["strength"], 0.25);
        assert_eq!(req["keyFrames"][0]["strengthIsEnabled"], true);

        p.starting_image_strength = None;
        let req = build_job_request("P1", &p).unwrap();
        assert_eq!(req["keyFrames"][0]["strength"], 0.5);
    }

    #[test]
    fn optional_top_level_fields() {
        let mut p = params();
        p.network = Some(Network::Relaxed);
        p.token_type = Some(TokenType::Spark);
        p.number_of_previews = Some(3);
        p.seed = Some(42);
        p.disable_nsfw_filter = true;
        let req = build_job_request("P1", &p).unwrap();
        assert_eq!(req["network"], "relaxed");
        assert_eq!(req["tokenType"], "spark");
        assert_eq!(req["previews"], 3);
        assert_eq!(req["disableSafety"], true);
        assert_eq!(req["keyFrames"][0]["seed"], 42);
    }

    #[test]
    fn custom_size_is_validated() {
        let mut p = params();
        p.size_preset = Some("custom".into());
        p.width = Some(1024);
        p.height = Some(4096);
        let err = build_job_request("P1", &p).unwrap_err();
        assert!(matches!(err, CoreError::ValidationFailed { ref message } if message.contains("height")));

        p.height = Some(768);
        let req = build_job_request("P1", &p).unwrap();
        assert_eq!(req["keyFrames"][0]["width"], 1024);
        assert_eq!(req["keyFrames"][0]["height"], 768);
        assert_eq!(req["keyFrames"][0]["sizePreset"], "custom");
    }

    #[test]
    fn named_size_preset_ignores_dimensions() {
        let mut p = params();
        p.size_preset = Some("square_hd".into());
        p.width = Some(1);
        let req = build_job_request("P1", &p).unwrap();
        assert!(req["keyFrames"][0].get("width").is_none());
    }

    #[test]
    fn control_net_block() {
        let mut p = params();
        let mut cn = ControlNetParams::new(ControlNetName::Openpose);
        cn.image = Some(ImageInput::Uploaded);
        cn.strength = Some(0.8);
        cn.mode = Some(ControlNetMode::CnPriority);
        cn.guidance_end = Some(0.9);
        p.control_net = Some(cn);

        let req = build_job_request("P1", &p).unwrap();
        assert_eq!(
            req["keyFrames"][0]["currentControlNetsJob"],
            json!([{
                "name": "openpose",
                "cnImageState": "original",
                "hasImage": true,
                "controlStrength": 0.8,
                "controlMode": 2,
                "controlGuidanceEnd": 0.9
            }])
        );
    }

    #[test]
    fn out_of_range_control_strength_is_rejected() {
        let mut p = params();
        let mut cn = ControlNetParams::new(ControlNetName::Canny);
        cn.strength = Some(1.5);
        p.control_net = Some(cn);
        assert!(matches!(
            build_job_request("P1", &p),
            Err(CoreError::ValidationFailed { .. })
        ));
    }

    #[test]
    fn zero_images_is_rejected() {
        let mut p = params();
        p.number_of_images = 0;
        assert!(validate(&p).is_err());
    }
}
