//! Prompt bank for the vision and generation services.
//!
//! Everything here is pure string work: instruction variants for the vision
//! call, fallback prompts for manual requests, and the composition step that
//! turns a caption plus the original dimensions into a generation request.

use crate::models::generation::{GenerationRequest, OutputSize};

/// System prompt sent with every vision call.
pub const VISION_SYSTEM_PROMPT: &str = "You are a professional image analysis \
assistant, skilled at turning pictures into detailed descriptions suitable \
for AI image generation.";

/// Named vision instruction variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InstructionKind {
    Basic,
    /// Like Basic but omits facial features. The default for screenshots.
    #[default]
    NoFace,
    Artistic,
    Landscape,
    Object,
}

pub fn vision_instruction(kind: InstructionKind) -> &'static str {
    match kind {
        InstructionKind::Basic => {
            "Analyze this image and produce a detailed description for AI image \
             generation, covering the main subjects, scene, style, colors, and mood."
        }
        InstructionKind::NoFace => {
            "Analyze this image and produce a detailed description for AI image \
             generation, covering the main subjects, scene, style, colors, and \
             mood, but do not describe any person's facial features."
        }
        InstructionKind::Artistic => {
            "Analyze this image and produce a detailed artistic description for \
             AI image generation, emphasizing artistic technique and aesthetics."
        }
        InstructionKind::Landscape => {
            "Analyze this landscape image and describe its main elements, \
             geography, season, weather, lighting, colors, and mood."
        }
        InstructionKind::Object => {
            "Analyze this object and describe its appearance, material, color, \
             shape, function, and style."
        }
    }
}

/// Preset generation prompts offered to manual requests when the caller has
/// no caption of their own.
pub fn generation_preset(name: &str) -> Option<&'static str> {
    match name {
        "keep_composition" => Some(
            "Create an artistic rendition of this scene, keeping the original \
             composition and the position of the main elements while elevating \
             its artistry and beauty.",
        ),
        "park_scene" => Some(
            "Create an image of a park based on this scene. The composition \
             must not change, the main subjects stay in similar positions, and \
             the types of facilities remain the same.",
        ),
        "nature_scene" => Some(
            "Create a natural landscape from this scene, enriching the natural \
             elements with fuller color and light while keeping the original \
             composition.",
        ),
        "city_scene" => Some(
            "Create a city scene from this image, enhancing architectural \
             detail and urban atmosphere while keeping the original composition.",
        ),
        "indoor_scene" => Some(
            "Create an indoor scene from this image, enhancing interior detail \
             and atmosphere while keeping the original composition.",
        ),
        _ => None,
    }
}

/// Pure prompt-composition component. No I/O, no side effects.
#[derive(Debug, Clone, Default)]
pub struct PromptCatalog {
    instruction: InstructionKind,
}

impl PromptCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instruction text used for the vision stage.
    pub fn instruction(&self) -> &'static str {
        vision_instruction(self.instruction)
    }

    /// Merge a vision caption with the composition-preserving template and
    /// pick the supported size nearest the original's aspect ratio.
    pub fn compose(&self, caption: &str, original_dimensions: (u32, u32)) -> GenerationRequest {
        let (width, height) = original_dimensions;
        let prompt = format!(
            "{} Keep the original composition and the position of the main \
             elements, but elevate the artistry and beauty of the scene.",
            caption.trim()
        );
        GenerationRequest::new(prompt, OutputSize::closest_to(width, height))
    }

    /// Build a request from a manually submitted caption, with an optional
    /// style merged in.
    pub fn compose_manual(
        &self,
        caption: &str,
        style: Option<&str>,
        width: u32,
        height: u32,
    ) -> GenerationRequest {
        let prompt = match style {
            Some(style) if !style.trim().is_empty() => {
                format!("{}, rendered in {} style", caption.trim(), style.trim())
            }
            _ => caption.trim().to_string(),
        };
        GenerationRequest::new(prompt, OutputSize::closest_to(width, height))
    }
}
