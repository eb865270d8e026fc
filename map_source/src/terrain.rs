use serde::Deserialize;

use crate::SourceValidation;

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    #[default]
    Bilinear,
    Nearest,
}

/// `<name>.terra`: heights either inline or from a grayscale heightmap.
#[derive(Clone, Debug, Deserialize)]
pub struct TerrainDescriptor {
    pub version: u32,
    #[serde(default)]
    pub resolution: Option<u32>,
    #[serde(default)]
    pub heights: Option<Vec<f32>>,
    /// Path relative to the descriptor.
    #[serde(default)]
    pub heightmap: Option<String>,
    #[serde(default = "default_one")]
    pub height_scale: f32,
    #[serde(default = "default_one")]
    pub cell_size: f32,
    #[serde(default)]
    pub interpolation: Interpolation,
    #[serde(default)]
    pub water_level: f32,
    #[serde(default)]
    pub water_texture: Option<String>,
    #[serde(default)]
    pub detail_texture: Option<String>,
    #[serde(default)]
    pub map_texture: Option<String>,
    #[serde(default = "default_detail_repeat")]
    pub detail_repeat: f32,
}

fn default_one() -> f32 {
    1.0
}

fn default_detail_repeat() -> f32 {
    8.0
}

impl TerrainDescriptor {
    pub fn parse_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|err| err.to_string())
    }

    /// Checks the descriptor against a target grid of `verts` per side.
    /// Heightmap-backed descriptors only get their resolution checked once
    /// the image is decoded.
    pub fn validate(&self, verts: usize) -> SourceValidation {
        let mut validation = SourceValidation::default();
        if self.version != 1 {
            validation
                .errors
                .push(format!("unsupported version {}", self.version));
        }
        match (&self.heights, &self.heightmap) {
            (Some(_), Some(_)) => validation
                .errors
                .push("use either heights or heightmap, not both".to_string()),
            (None, None) => validation
                .errors
                .push("missing heights or heightmap".to_string()),
            (Some(heights), None) => match self.resolution {
                None => validation
                    .errors
                    .push("inline heights need a resolution".to_string()),
                Some(resolution) => {
                    if let Err(err) = check_resolution(resolution as usize, verts) {
                        validation.errors.push(err);
                    }
                    let expected = (resolution as usize).saturating_mul(resolution as usize);
                    if heights.len() != expected {
                        validation.errors.push(format!(
                            "expected {} height samples for resolution {}, got {}",
                            expected,
                            resolution,
                            heights.len()
                        ));
                    }
                    if let Some(index) = heights.iter().position(|value| !value.is_finite()) {
                        validation
                            .errors
                            .push(format!("height sample {} is not finite", index));
                    }
                }
            },
            (None, Some(path)) => {
                if path.trim().is_empty() {
                    validation
                        .errors
                        .push("heightmap path must not be empty".to_string());
                }
            }
        }
        if !self.height_scale.is_finite() {
            validation
                .errors
                .push("height_scale must be finite".to_string());
        }
        if !self.cell_size.is_finite() || self.cell_size <= 0.0 {
            validation
                .errors
                .push("cell_size must be > 0".to_string());
        }
        if !self.water_level.is_finite() {
            validation
                .errors
                .push("water_level must be finite".to_string());
        }
        if !self.detail_repeat.is_finite() || self.detail_repeat <= 0.0 {
            validation
                .errors
                .push("detail_repeat must be > 0".to_string());
        }
        for (layer, name) in self.layers() {
            if name.trim().is_empty() {
                validation
                    .errors
                    .push(format!("{} layer texture name is empty", layer));
            }
        }
        if self.layers().next().is_none() {
            validation
                .warnings
                .push("terrain has no texture layers".to_string());
        }
        validation
    }

    /// Named texture layers in stream order.
    pub fn layers(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("water", self.water_texture.as_deref()),
            ("detail", self.detail_texture.as_deref()),
            ("map", self.map_texture.as_deref()),
        ]
        .into_iter()
        .filter_map(|(layer, name)| name.map(|name| (layer, name)))
    }
}

/// A source resolution must evenly divide the vertex grid.
pub fn check_resolution(resolution: usize, verts: usize) -> Result<(), String> {
    if resolution == 0 || verts % resolution != 0 {
        return Err(format!(
            "resolution {} does not divide the {}-vertex grid",
            resolution, verts
        ));
    }
    Ok(())
}
