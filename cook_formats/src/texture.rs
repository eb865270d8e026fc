use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{CodecError, Reader, Writer};

pub const TEXTURE_MAGIC: &[u8; 4] = b"PTEX";
pub const PIXEL_FORMAT_RGBA8: u8 = 0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TextureError {
    #[error("invalid texture dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("texture dimensions {width}x{height} are not a power of two")]
    NotPowerOfTwo { width: u32, height: u32 },
    #[error("pixel data too short: expected {expected} bytes, got {actual}")]
    DataTooShort { expected: usize, actual: usize },
    #[error("unknown {what} code {code}")]
    UnknownCode { what: &'static str, code: u8 },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MagFilter {
    Nearest,
    #[default]
    Linear,
}

impl MagFilter {
    fn code(self) -> u8 {
        match self {
            MagFilter::Nearest => 0,
            MagFilter::Linear => 1,
        }
    }

    fn from_code(code: u8) -> Result<Self, TextureError> {
        match code {
            0 => Ok(MagFilter::Nearest),
            1 => Ok(MagFilter::Linear),
            _ => Err(TextureError::UnknownCode {
                what: "mag filter",
                code,
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinFilter {
    Nearest,
    Linear,
    NearestMipmapNearest,
    LinearMipmapNearest,
    NearestMipmapLinear,
    #[default]
    LinearMipmapLinear,
}

impl MinFilter {
    pub fn uses_mipmaps(self) -> bool {
        !matches!(self, MinFilter::Nearest | MinFilter::Linear)
    }

    fn code(self) -> u8 {
        match self {
            MinFilter::Nearest => 0,
            MinFilter::Linear => 1,
            MinFilter::NearestMipmapNearest => 2,
            MinFilter::LinearMipmapNearest => 3,
            MinFilter::NearestMipmapLinear => 4,
            MinFilter::LinearMipmapLinear => 5,
        }
    }

    fn from_code(code: u8) -> Result<Self, TextureError> {
        match code {
            0 => Ok(MinFilter::Nearest),
            1 => Ok(MinFilter::Linear),
            2 => Ok(MinFilter::NearestMipmapNearest),
            3 => Ok(MinFilter::LinearMipmapNearest),
            4 => Ok(MinFilter::NearestMipmapLinear),
            5 => Ok(MinFilter::LinearMipmapLinear),
            _ => Err(TextureError::UnknownCode {
                what: "min filter",
                code,
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SamplerSettings {
    pub wrap: bool,
    pub mag_filter: MagFilter,
    pub min_filter: MinFilter,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            wrap: true,
            mag_filter: MagFilter::default(),
            min_filter: MinFilter::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MipLevel {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl MipLevel {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self, TextureError> {
        if width == 0 || height == 0 {
            return Err(TextureError::InvalidDimensions { width, height });
        }
        let expected = width as usize * height as usize * 4;
        if rgba.len() < expected {
            return Err(TextureError::DataTooShort {
                expected,
                actual: rgba.len(),
            });
        }
        let mut rgba = rgba;
        rgba.truncate(expected);
        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    /// Halves each dimension (clamped at 1) with a 2x2 box filter.
    pub fn downsample(&self) -> MipLevel {
        let width = (self.width / 2).max(1);
        let height = (self.height / 2).max(1);
        let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                let x0 = (x * 2).min(self.width - 1);
                let x1 = (x * 2 + 1).min(self.width - 1);
                let y0 = (y * 2).min(self.height - 1);
                let y1 = (y * 2 + 1).min(self.height - 1);
                for channel in 0..4 {
                    let sum = u32::from(self.texel(x0, y0, channel))
                        + u32::from(self.texel(x1, y0, channel))
                        + u32::from(self.texel(x0, y1, channel))
                        + u32::from(self.texel(x1, y1, channel));
                    rgba.push(((sum + 2) / 4) as u8);
                }
            }
        }
        MipLevel {
            width,
            height,
            rgba,
        }
    }

    fn texel(&self, x: u32, y: u32, channel: usize) -> u8 {
        let index = (y as usize * self.width as usize + x as usize) * 4 + channel;
        self.rgba[index]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledTexture {
    pub sampler: SamplerSettings,
    pub levels: Vec<MipLevel>,
}

impl CompiledTexture {
    /// Builds the texture from its base level, generating the full mip
    /// chain when the min filter samples mipmaps. Non-power-of-two chains
    /// halve with rounding down.
    pub fn from_base(
        base: MipLevel,
        sampler: SamplerSettings,
        require_power_of_two: bool,
    ) -> Result<Self, TextureError> {
        let pot = base.width.is_power_of_two() && base.height.is_power_of_two();
        if !pot && require_power_of_two {
            return Err(TextureError::NotPowerOfTwo {
                width: base.width,
                height: base.height,
            });
        }
        let mut levels = vec![base];
        if sampler.min_filter.uses_mipmaps() {
            loop {
                let last = &levels[levels.len() - 1];
                if last.width == 1 && last.height == 1 {
                    break;
                }
                let next = last.downsample();
                levels.push(next);
            }
        }
        Ok(Self { sampler, levels })
    }

    pub fn width(&self) -> u32 {
        self.levels.first().map(|level| level.width).unwrap_or(0)
    }

    pub fn height(&self) -> u32 {
        self.levels.first().map(|level| level.height).unwrap_or(0)
    }

    pub fn encode(&self) -> Result<Vec<u8>, TextureError> {
        let mut writer = Writer::with_header(TEXTURE_MAGIC);
        writer.u32(self.width());
        writer.u32(self.height());
        writer.u8(u8::from(self.sampler.wrap));
        writer.u8(self.sampler.mag_filter.code());
        writer.u8(self.sampler.min_filter.code());
        writer.u8(PIXEL_FORMAT_RGBA8);
        writer.count("mip level", self.levels.len())?;
        for level in &self.levels {
            writer.u32(level.width);
            writer.u32(level.height);
            writer.count("texel byte", level.rgba.len())?;
            writer.bytes(&level.rgba);
        }
        Ok(writer.into_bytes())
    }

    pub fn decode(data: &[u8]) -> Result<Self, TextureError> {
        let mut reader = Reader::with_header(data, TEXTURE_MAGIC)?;
        let _width = reader.u32()?;
        let _height = reader.u32()?;
        let wrap = reader.u8()? != 0;
        let mag_filter = MagFilter::from_code(reader.u8()?)?;
        let min_filter = MinFilter::from_code(reader.u8()?)?;
        let format = reader.u8()?;
        if format != PIXEL_FORMAT_RGBA8 {
            return Err(TextureError::UnknownCode {
                what: "pixel format",
                code: format,
            });
        }
        let level_count = reader.count("mip level", 12)?;
        let mut levels = Vec::with_capacity(level_count);
        for _ in 0..level_count {
            let width = reader.u32()?;
            let height = reader.u32()?;
            let len = reader.count("texel byte", 1)?;
            let rgba = reader.bytes(len)?.to_vec();
            levels.push(MipLevel::new(width, height, rgba)?);
        }
        Ok(Self {
            sampler: SamplerSettings {
                wrap,
                mag_filter,
                min_filter,
            },
            levels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, value: u8) -> MipLevel {
        MipLevel::new(width, height, vec![value; (width * height * 4) as usize]).expect("level")
    }

    fn sampler(min_filter: MinFilter) -> SamplerSettings {
        SamplerSettings {
            wrap: true,
            mag_filter: MagFilter::Linear,
            min_filter,
        }
    }

    #[test]
    fn mip_chain_reaches_one_texel() {
        let texture = CompiledTexture::from_base(
            solid(8, 2, 200),
            sampler(MinFilter::LinearMipmapLinear),
            true,
        )
        .expect("texture");
        let dims: Vec<(u32, u32)> = texture
            .levels
            .iter()
            .map(|level| (level.width, level.height))
            .collect();
        assert_eq!(dims, vec![(8, 2), (4, 1), (2, 1), (1, 1)]);
        assert!(texture.levels.iter().all(|level| level.rgba.iter().all(|v| *v == 200)));
    }

    #[test]
    fn no_mips_without_mipmap_filter() {
        let texture = CompiledTexture::from_base(solid(4, 4, 1), sampler(MinFilter::Linear), true)
            .expect("texture");
        assert_eq!(texture.levels.len(), 1);
    }

    #[test]
    fn box_filter_averages() {
        let base = MipLevel::new(2, 1, vec![0, 0, 0, 255, 100, 50, 10, 255]).expect("level");
        let half = base.downsample();
        assert_eq!((half.width, half.height), (1, 1));
        assert_eq!(half.rgba, vec![50, 25, 5, 255]);
    }

    #[test]
    fn non_power_of_two_policy() {
        let err = CompiledTexture::from_base(solid(3, 4, 0), sampler(MinFilter::Linear), true)
            .expect_err("pot required");
        assert_eq!(err, TextureError::NotPowerOfTwo { width: 3, height: 4 });
        let single = CompiledTexture::from_base(solid(3, 4, 0), sampler(MinFilter::Linear), false);
        assert!(single.is_ok());
        let texture = CompiledTexture::from_base(
            solid(3, 5, 60),
            sampler(MinFilter::NearestMipmapNearest),
            false,
        )
        .expect("npot mip chain");
        let dims: Vec<(u32, u32)> = texture
            .levels
            .iter()
            .map(|level| (level.width, level.height))
            .collect();
        assert_eq!(dims, vec![(3, 5), (1, 2), (1, 1)]);
        assert!(texture.levels.iter().all(|level| level.rgba.iter().all(|v| *v == 60)));
    }

    #[test]
    fn header_carries_sampler_flags() {
        let texture = CompiledTexture::from_base(
            solid(2, 2, 9),
            SamplerSettings {
                wrap: false,
                mag_filter: MagFilter::Nearest,
                min_filter: MinFilter::NearestMipmapLinear,
            },
            true,
        )
        .expect("texture");
        let bytes = texture.encode().expect("encode");
        assert_eq!(&bytes[0..4], TEXTURE_MAGIC);
        assert_eq!(bytes[16], 0);
        assert_eq!(bytes[17], 0);
        assert_eq!(bytes[18], 4);
        let decoded = CompiledTexture::decode(&bytes).expect("decode");
        assert_eq!(decoded, texture);
    }

    #[test]
    fn short_pixel_data_is_rejected() {
        let err = MipLevel::new(2, 2, vec![0; 15]).expect_err("too short");
        assert!(matches!(err, TextureError::DataTooShort { .. }));
    }
}
