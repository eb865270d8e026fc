use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use cook_formats::resource_table::ResourceKind;
use cook_formats::texture::{CompiledTexture, MipLevel, SamplerSettings};
use tracing::debug;

use crate::error::CookError;
use crate::staging;
use crate::unit::{discover, BuildUnit, CompiledUnit, OutputFile, UnitConfig, UnitKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureSettings {
    pub sampler: SamplerSettings,
    pub require_power_of_two: bool,
}

impl Default for TextureSettings {
    fn default() -> Self {
        Self {
            sampler: SamplerSettings::default(),
            require_power_of_two: true,
        }
    }
}

/// Compiles every `.png` under `src_dir` into `<rel>.tex` under `dest_dir`.
/// Returns the texture names in sorted order.
pub fn build(
    src_dir: &Path,
    dest_dir: &Path,
    settings: TextureSettings,
) -> Result<Vec<String>, CookError> {
    let config = UnitConfig {
        texture: settings,
        ..UnitConfig::default()
    };
    let mut names = Vec::new();
    for unit in discover(src_dir, UnitKind::Texture, &config)? {
        let compiled = compile(&unit)?;
        staging::commit(dest_dir, &compiled.outputs, &unit.label())?;
        names.push(unit.name);
    }
    Ok(names)
}

pub fn compile(unit: &BuildUnit) -> Result<CompiledUnit, CookError> {
    let base = decode_png(&unit.source, &unit.label())?;
    let settings = unit.config.texture;
    let texture = CompiledTexture::from_base(base, settings.sampler, settings.require_power_of_two)
        .map_err(|err| CookError::validation(unit.label(), err))?;
    debug!(
        unit = %unit.label(),
        width = texture.width(),
        height = texture.height(),
        mips = texture.levels.len(),
        "texture compiled"
    );
    let bytes = texture
        .encode()
        .map_err(|err| CookError::validation(unit.label(), err))?;
    Ok(CompiledUnit {
        outputs: vec![OutputFile::new(format!("{}.tex", unit.name), bytes)],
        provides: vec![(ResourceKind::Texture, unit.name.clone())],
        ..CompiledUnit::default()
    })
}

/// Decodes a PNG into an RGBA8 level. Only 8-bit channels are accepted;
/// palettes and low-bit grayscale are expanded first.
pub(crate) fn decode_png(path: &Path, label: &str) -> Result<MipLevel, CookError> {
    let file = File::open(path).map_err(|err| CookError::io(label, err))?;
    let mut decoder = png::Decoder::new(BufReader::new(file));
    decoder.set_transformations(png::Transformations::EXPAND);
    let mut reader = decoder
        .read_info()
        .map_err(|err| png_error(label, err))?;
    let mut buf = vec![0; reader.output_buffer_size()];
    let output = reader
        .next_frame(&mut buf)
        .map_err(|err| png_error(label, err))?;
    if output.bit_depth != png::BitDepth::Eight {
        return Err(CookError::validation(
            label,
            format!("unsupported pixel format: {:?}-bit channels", output.bit_depth),
        ));
    }
    let bytes = &buf[..output.buffer_size()];
    let pixels = output.width as usize * output.height as usize;
    let rgba = match output.color_type {
        png::ColorType::Rgba => bytes.to_vec(),
        png::ColorType::Rgb => {
            let mut out = Vec::with_capacity(pixels * 4);
            for chunk in bytes.chunks_exact(3) {
                out.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
            }
            out
        }
        png::ColorType::Grayscale => {
            let mut out = Vec::with_capacity(pixels * 4);
            for value in bytes {
                out.extend_from_slice(&[*value, *value, *value, 255]);
            }
            out
        }
        png::ColorType::GrayscaleAlpha => {
            let mut out = Vec::with_capacity(pixels * 4);
            for chunk in bytes.chunks_exact(2) {
                out.extend_from_slice(&[chunk[0], chunk[0], chunk[0], chunk[1]]);
            }
            out
        }
        other => {
            return Err(CookError::validation(
                label,
                format!("unsupported pixel format: {:?}", other),
            ))
        }
    };
    MipLevel::new(output.width, output.height, rgba)
        .map_err(|err| CookError::validation(label, err))
}

/// Raw 8-bit grayscale samples of a PNG, for heightmaps.
pub(crate) fn decode_gray8(path: &Path, label: &str) -> Result<(u32, u32, Vec<u8>), CookError> {
    let level = decode_png(path, label)?;
    let gray = level.rgba.chunks_exact(4).map(|pixel| pixel[0]).collect();
    Ok((level.width, level.height, gray))
}

fn png_error(label: &str, err: png::DecodingError) -> CookError {
    match err {
        png::DecodingError::IoError(source) => CookError::io(label, source),
        other => CookError::validation(label, format!("invalid png: {}", other)),
    }
}
