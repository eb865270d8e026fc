use std::path::Path;

use cook_formats::terra::{TerraGrid, TerraLayers, VERTS};
use map_source::{check_resolution, Interpolation, TerrainDescriptor};
use tracing::{debug, warn};

use crate::error::CookError;
use crate::texture_build::decode_gray8;
use crate::unit::{
    read_source, BuildUnit, CompiledUnit, OutputFile, ResourceRef, UnitConfig, UnitKind,
};

/// Compiles `<terrain_dir>/<name>.terra`.
pub fn build(terrain_dir: &Path, name: &str) -> Result<CompiledUnit, CookError> {
    let source = terrain_dir.join(format!("{}.{}", name, UnitKind::Terrain.extension()));
    compile(&BuildUnit::new(
        UnitKind::Terrain,
        source,
        name,
        UnitConfig::default(),
    ))
}

pub fn compile(unit: &BuildUnit) -> Result<CompiledUnit, CookError> {
    let label = unit.label();
    let text = read_source(&unit.source, &label)?;
    let descriptor =
        TerrainDescriptor::parse_toml(&text).map_err(|err| CookError::validation(&label, err))?;
    let warnings = descriptor
        .validate(VERTS)
        .into_result()
        .map_err(|err| CookError::validation(&label, err))?;
    for warning in &warnings {
        warn!(unit = %label, "{}", warning);
    }

    let (resolution, samples) = load_samples(unit, &descriptor)?;
    let heights = resample(&samples, resolution, descriptor.interpolation);
    let grid = TerraGrid::new(heights, descriptor.cell_size)
        .map_err(|err| CookError::validation(&label, err))?;

    let layers = TerraLayers {
        water: descriptor.water_texture.clone(),
        detail: descriptor.detail_texture.clone(),
        map: descriptor.map_texture.clone(),
    };
    let client = grid
        .encode_client(&layers, descriptor.water_level, descriptor.detail_repeat)
        .map_err(|err| CookError::validation(&label, err))?;
    let references = descriptor
        .layers()
        .map(|(layer, name)| {
            ResourceRef::texture(name, format!("terrain '{}' {} layer", unit.name, layer))
        })
        .collect();
    debug!(unit = %label, resolution, "terrain compiled");

    Ok(CompiledUnit {
        outputs: vec![
            OutputFile::new(format!("{}.terra.sim", unit.name), grid.encode_sim()),
            OutputFile::new(format!("{}.terra.client", unit.name), client),
        ],
        references,
        provides: Vec::new(),
        warnings,
    })
}

/// Source samples scaled by `height_scale`, with their resolution.
fn load_samples(
    unit: &BuildUnit,
    descriptor: &TerrainDescriptor,
) -> Result<(usize, Vec<f32>), CookError> {
    let label = unit.label();
    if let Some(heights) = &descriptor.heights {
        let resolution = descriptor.resolution.unwrap_or(0) as usize;
        let scaled = heights
            .iter()
            .map(|height| height * descriptor.height_scale)
            .collect();
        return Ok((resolution, scaled));
    }
    let Some(heightmap) = &descriptor.heightmap else {
        return Err(CookError::validation(&label, "missing heights or heightmap"));
    };
    let base = unit.source.parent().unwrap_or_else(|| Path::new("."));
    let (width, height, gray) = decode_gray8(&base.join(heightmap), &label)?;
    if width != height {
        return Err(CookError::validation(
            &label,
            format!("heightmap must be square (got {}x{})", width, height),
        ));
    }
    if let Some(resolution) = descriptor.resolution {
        if resolution != width {
            return Err(CookError::validation(
                &label,
                format!(
                    "resolution {} does not match heightmap width {}",
                    resolution, width
                ),
            ));
        }
    }
    let resolution = width as usize;
    check_resolution(resolution, VERTS).map_err(|err| CookError::validation(&label, err))?;
    let scaled = gray
        .iter()
        .map(|value| f32::from(*value) / 255.0 * descriptor.height_scale)
        .collect();
    Ok((resolution, scaled))
}

/// Maps a `resolution`-sided sample grid onto the `VERTS`-sided vertex grid.
/// Vertex `i` reads source coordinate `i * resolution / VERTS`, clamped to
/// the edge.
pub fn resample(samples: &[f32], resolution: usize, interpolation: Interpolation) -> Vec<f32> {
    let max = resolution.saturating_sub(1);
    let sample = |x: usize, z: usize| samples[z.min(max) * resolution + x.min(max)];
    let mut heights = Vec::with_capacity(VERTS * VERTS);
    for z in 0..VERTS {
        let sz = source_coord(z, resolution);
        for x in 0..VERTS {
            let sx = source_coord(x, resolution);
            let height = match interpolation {
                Interpolation::Nearest => sample(sx.round() as usize, sz.round() as usize),
                Interpolation::Bilinear => {
                    let x0 = sx.floor() as usize;
                    let z0 = sz.floor() as usize;
                    let tx = sx - x0 as f32;
                    let tz = sz - z0 as f32;
                    let top = lerp(sample(x0, z0), sample(x0 + 1, z0), tx);
                    let bottom = lerp(sample(x0, z0 + 1), sample(x0 + 1, z0 + 1), tx);
                    lerp(top, bottom, tz)
                }
            };
            heights.push(height);
        }
    }
    heights
}

fn source_coord(index: usize, resolution: usize) -> f32 {
    (index * resolution) as f32 / VERTS as f32
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    if t == 0.0 {
        a
    } else {
        a + (b - a) * t
    }
}
