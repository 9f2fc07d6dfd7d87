use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Output sizes the generation service accepts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
pub enum OutputSize {
    #[strum(serialize = "1024x1024")]
    Square1024,
    #[strum(serialize = "1152x864")]
    Landscape4x3,
    #[strum(serialize = "864x1152")]
    Portrait3x4,
    #[strum(serialize = "1280x720")]
    Landscape16x9,
    #[strum(serialize = "720x1280")]
    Portrait9x16,
    #[strum(serialize = "1248x832")]
    Landscape3x2,
    #[strum(serialize = "832x1248")]
    Portrait2x3,
    #[strum(serialize = "1512x648")]
    Ultrawide7x3,
}

impl OutputSize {
    pub const ALL: [OutputSize; 8] = [
        OutputSize::Square1024,
        OutputSize::Landscape4x3,
        OutputSize::Portrait3x4,
        OutputSize::Landscape16x9,
        OutputSize::Portrait9x16,
        OutputSize::Landscape3x2,
        OutputSize::Portrait2x3,
        OutputSize::Ultrawide7x3,
    ];

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            OutputSize::Square1024 => (1024, 1024),
            OutputSize::Landscape4x3 => (1152, 864),
            OutputSize::Portrait3x4 => (864, 1152),
            OutputSize::Landscape16x9 => (1280, 720),
            OutputSize::Portrait9x16 => (720, 1280),
            OutputSize::Landscape3x2 => (1248, 832),
            OutputSize::Portrait2x3 => (832, 1248),
            OutputSize::Ultrawide7x3 => (1512, 648),
        }
    }

    fn aspect(&self) -> f64 {
        let (w, h) = self.dimensions();
        w as f64 / h as f64
    }

    /// Supported size with the smallest aspect-ratio distance to the
    /// original dimensions.
    pub fn closest_to(width: u32, height: u32) -> OutputSize {
        let ratio = width as f64 / height.max(1) as f64;
        let mut best = OutputSize::Square1024;
        let mut min_diff = f64::INFINITY;
        for size in OutputSize::ALL {
            let diff = (ratio - size.aspect()).abs();
            if diff < min_diff {
                min_diff = diff;
                best = size;
            }
        }
        best
    }
}

/// A fully composed request for the generation service. Built by the prompt
/// catalog, consumed by value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub size: OutputSize,
    pub guidance_scale: f64,
    pub seed: i64,
    pub watermark: bool,
}

impl GenerationRequest {
    pub fn new(prompt: String, size: OutputSize) -> Self {
        Self {
            prompt,
            size,
            guidance_scale: 2.5,
            seed: -1,
            watermark: true,
        }
    }
}

/// Generated image bytes plus the name they will be published under.
/// Ownership moves to the writer; once persisted the bytes are dropped.
#[derive(Debug)]
pub struct GenerationResult {
    pub image_bytes: Vec<u8>,
    pub output_filename: String,
}
