// ── Project request parameters ──

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use supernet_api::Network;

/// Binary input attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageInput {
    /// Image bytes, uploaded to a presigned URL before the request is sent.
    Bytes(Bytes),
    /// The image was uploaded out of band.
    Uploaded,
}

/// Token a project is paid with.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TokenType {
    #[default]
    Sogni,
    Spark,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ControlNetName {
    Canny,
    Depth,
    Inpaint,
    Instrp2p,
    Lineart,
    Lineartanime,
    Mlsd,
    Normalbae,
    Openpose,
    Scribble,
    Segmentation,
    Shuffle,
    Softedge,
    Tile,
    Instantid,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ControlNetMode {
    Balanced,
    PromptPriority,
    CnPriority,
}

impl ControlNetMode {
    /// Numeric mode understood by workers.
    pub fn code(self) -> u8 {
        match self {
            Self::Balanced => 0,
            Self::PromptPriority => 1,
            Self::CnPriority => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlNetParams {
    pub name: ControlNetName,
    #[serde(skip)]
    pub image: Option<ImageInput>,
    /// `0.0..=1.0`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ControlNetMode>,
    /// `0.0..=1.0`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance_start: Option<f64>,
    /// `0.0..=1.0`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance_end: Option<f64>,
}

impl ControlNetParams {
    pub fn new(name: ControlNetName) -> Self {
        Self {
            name,
            image: None,
            strength: None,
            mode: None,
            guidance_start: None,
            guidance_end: None,
        }
    }
}

/// Everything needed to request a project.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectParams {
    pub model_id: String,
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub style_prompt: String,
    pub steps: u32,
    pub guidance: f64,
    /// Overrides the session's network for this project.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<Network>,
    #[serde(rename = "disableNSFWFilter")]
    pub disable_nsfw_filter: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
    pub number_of_images: u32,
    #[serde(skip)]
    pub starting_image: Option<ImageInput>,
    /// How strongly the starting image shapes the output, `0.0..=1.0`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub starting_image_strength: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_of_previews: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_step_spacing: Option<String>,
    /// Size preset id, or `"custom"` to use `width` and `height`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_preset: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_net: Option<ControlNetParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<TokenType>,
}

impl ProjectParams {
    /// Parameters with the usual Stable Diffusion defaults: 20 steps,
    /// guidance 7.5, one image.
    pub fn new(model_id: impl Into<String>, positive_prompt: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            positive_prompt: positive_prompt.into(),
            negative_prompt: String::new(),
            style_prompt: String::new(),
            steps: 20,
            guidance: 7.5,
            network: None,
            disable_nsfw_filter: false,
            seed: None,
            number_of_images: 1,
            starting_image: None,
            starting_image_strength: None,
            number_of_previews: None,
            scheduler: None,
            time_step_spacing: None,
            size_preset: None,
            width: None,
            height: None,
            control_net: None,
            token_type: None,
        }
    }
}

/// A model currently served by at least one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableModel {
    pub id: String,
    pub name: String,
    pub worker_count: u32,
}

impl AvailableModel {
    pub fn new(id: impl Into<String>, worker_count: u32) -> Self {
        let id = id.into();
        Self {
            name: id.replace('-', " "),
            id,
            worker_count,
        }
    }
}
