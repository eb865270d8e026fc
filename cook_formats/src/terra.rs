//! Terrain grid and its two serializations: the simulation heightfield
//! and the client render stream.
use thiserror::Error;

use crate::codec::{CodecError, Reader, Writer};

/// Vertices per grid side. Constant across a build.
pub const VERTS: usize = 64;
/// Quads per grid side.
pub const QUADS: usize = VERTS - 1;

pub const SIM_MAGIC: &[u8; 4] = b"TSIM";
pub const CLIENT_MAGIC: &[u8; 4] = b"TCLI";

#[derive(Debug, Error, PartialEq)]
pub enum TerraError {
    #[error("expected {expected} height samples, got {actual}")]
    WrongSampleCount { expected: usize, actual: usize },
    #[error("height sample {index} is not finite")]
    NonFiniteHeight { index: usize },
    #[error("cell size must be finite and > 0 (got {0})")]
    InvalidCellSize(f32),
    #[error("stream grid is {found} verts per side, expected {expected}")]
    GridMismatch { found: u32, expected: u32 },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TerraLayers {
    pub water: Option<String>,
    pub detail: Option<String>,
    pub map: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TerraVertex {
    pub height: f32,
    pub normal: [f32; 3],
    pub map_uv: [f32; 2],
    pub detail_uv: [f32; 2],
}

/// `VERTS x VERTS` heights, row-major (`z * VERTS + x`).
#[derive(Clone, Debug, PartialEq)]
pub struct TerraGrid {
    cell_size: f32,
    heights: Vec<f32>,
}

impl TerraGrid {
    pub fn new(heights: Vec<f32>, cell_size: f32) -> Result<Self, TerraError> {
        if !cell_size.is_finite() || cell_size <= 0.0 {
            return Err(TerraError::InvalidCellSize(cell_size));
        }
        if heights.len() != VERTS * VERTS {
            return Err(TerraError::WrongSampleCount {
                expected: VERTS * VERTS,
                actual: heights.len(),
            });
        }
        if let Some(index) = heights.iter().position(|height| !height.is_finite()) {
            return Err(TerraError::NonFiniteHeight { index });
        }
        Ok(Self { cell_size, heights })
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    pub fn height(&self, x: usize, z: usize) -> f32 {
        self.heights[z * VERTS + x]
    }

    /// Vertex normal from central differences, one-sided on the border.
    pub fn normal(&self, x: usize, z: usize) -> [f32; 3] {
        let x0 = x.saturating_sub(1);
        let x1 = (x + 1).min(VERTS - 1);
        let z0 = z.saturating_sub(1);
        let z1 = (z + 1).min(VERTS - 1);
        let dx = (self.height(x1, z) - self.height(x0, z)) / ((x1 - x0) as f32 * self.cell_size);
        let dz = (self.height(x, z1) - self.height(x, z0)) / ((z1 - z0) as f32 * self.cell_size);
        normalize([-dx, 1.0, -dz])
    }

    /// Angle in radians between the quad normal and straight up.
    pub fn quad_slope(&self, qx: usize, qz: usize) -> f32 {
        let cell = self.cell_size;
        let a = self.height(qx, qz);
        let b = self.height(qx + 1, qz);
        let c = self.height(qx, qz + 1);
        let d = self.height(qx + 1, qz + 1);
        let diag_ad = [cell, d - a, cell];
        let diag_bc = [-cell, c - b, cell];
        let mut normal = cross(diag_ad, diag_bc);
        if normal[1] < 0.0 {
            normal = [-normal[0], -normal[1], -normal[2]];
        }
        let normal = normalize(normal);
        normal[1].clamp(-1.0, 1.0).acos()
    }

    pub fn vertex(&self, x: usize, z: usize, detail_repeat: f32) -> TerraVertex {
        let u = x as f32 / QUADS as f32;
        let v = z as f32 / QUADS as f32;
        TerraVertex {
            height: self.height(x, z),
            normal: self.normal(x, z),
            map_uv: [u, v],
            detail_uv: [u * detail_repeat, v * detail_repeat],
        }
    }

    pub fn encode_sim(&self) -> Vec<u8> {
        let mut writer = Writer::with_header(SIM_MAGIC);
        writer.u32(VERTS as u32);
        writer.f32(self.cell_size);
        for height in &self.heights {
            writer.f32(*height);
        }
        writer.into_bytes()
    }

    pub fn encode_client(
        &self,
        layers: &TerraLayers,
        water_level: f32,
        detail_repeat: f32,
    ) -> Result<Vec<u8>, TerraError> {
        let mut writer = Writer::with_header(CLIENT_MAGIC);
        writer.u32(VERTS as u32);
        writer.f32(self.cell_size);
        writer.f32(water_level);
        for layer in [&layers.water, &layers.detail, &layers.map] {
            writer.string(layer.as_deref().unwrap_or(""))?;
        }
        for z in 0..VERTS {
            for x in 0..VERTS {
                let vertex = self.vertex(x, z, detail_repeat);
                writer.f32(vertex.height);
                writer.vec3(vertex.normal);
                writer.vec2(vertex.map_uv);
                writer.vec2(vertex.detail_uv);
            }
        }
        for qz in 0..QUADS {
            for qx in 0..QUADS {
                writer.f32(self.quad_slope(qx, qz));
            }
        }
        Ok(writer.into_bytes())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SimStream {
    pub cell_size: f32,
    pub heights: Vec<f32>,
}

impl SimStream {
    pub fn decode(data: &[u8]) -> Result<Self, TerraError> {
        let mut reader = Reader::with_header(data, SIM_MAGIC)?;
        let verts = read_verts(&mut reader)?;
        let cell_size = reader.f32()?;
        let mut heights = Vec::with_capacity(verts * verts);
        for _ in 0..verts * verts {
            heights.push(reader.f32()?);
        }
        Ok(Self { cell_size, heights })
    }

    pub fn height(&self, x: usize, z: usize) -> f32 {
        self.heights[z * VERTS + x]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClientStream {
    pub cell_size: f32,
    pub water_level: f32,
    pub layers: TerraLayers,
    pub vertices: Vec<TerraVertex>,
    pub slopes: Vec<f32>,
}

impl ClientStream {
    pub fn decode(data: &[u8]) -> Result<Self, TerraError> {
        let mut reader = Reader::with_header(data, CLIENT_MAGIC)?;
        let verts = read_verts(&mut reader)?;
        let cell_size = reader.f32()?;
        let water_level = reader.f32()?;
        let mut names = Vec::with_capacity(3);
        for _ in 0..3 {
            let name = reader.string()?;
            names.push(if name.is_empty() { None } else { Some(name) });
        }
        let map = names.pop().flatten();
        let detail = names.pop().flatten();
        let water = names.pop().flatten();
        let mut vertices = Vec::with_capacity(verts * verts);
        for _ in 0..verts * verts {
            vertices.push(TerraVertex {
                height: reader.f32()?,
                normal: reader.vec3()?,
                map_uv: reader.vec2()?,
                detail_uv: reader.vec2()?,
            });
        }
        let quads = verts - 1;
        let mut slopes = Vec::with_capacity(quads * quads);
        for _ in 0..quads * quads {
            slopes.push(reader.f32()?);
        }
        Ok(Self {
            cell_size,
            water_level,
            layers: TerraLayers { water, detail, map },
            vertices,
            slopes,
        })
    }

    pub fn vertex(&self, x: usize, z: usize) -> &TerraVertex {
        &self.vertices[z * VERTS + x]
    }
}

fn read_verts(reader: &mut Reader<'_>) -> Result<usize, TerraError> {
    let verts = reader.u32()?;
    if verts as usize != VERTS {
        return Err(TerraError::GridMismatch {
            found: verts,
            expected: VERTS as u32,
        });
    }
    Ok(VERTS)
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn normalize(v: [f32; 3]) -> [f32; 3] {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if len <= f32::EPSILON {
        return [0.0, 1.0, 0.0];
    }
    [v[0] / len, v[1] / len, v[2] / len]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_grid() -> TerraGrid {
        let mut heights = Vec::with_capacity(VERTS * VERTS);
        for _z in 0..VERTS {
            for x in 0..VERTS {
                heights.push(x as f32 * 0.5);
            }
        }
        TerraGrid::new(heights, 1.0).expect("grid")
    }

    #[test]
    fn flat_grid_points_up() {
        let grid = TerraGrid::new(vec![3.0; VERTS * VERTS], 2.0).expect("grid");
        assert_eq!(grid.normal(0, 0), [0.0, 1.0, 0.0]);
        assert_eq!(grid.normal(10, 20), [0.0, 1.0, 0.0]);
        assert_eq!(grid.quad_slope(5, 5), 0.0);
    }

    #[test]
    fn ramp_slope_matches_gradient() {
        let grid = ramp_grid();
        let expected = 0.5f32.atan();
        assert!((grid.quad_slope(3, 7) - expected).abs() < 1.0e-5);
        let normal = grid.normal(10, 10);
        assert!(normal[0] < 0.0);
        assert!(normal[2].abs() < 1.0e-6);
    }

    #[test]
    fn rejects_bad_samples() {
        assert!(matches!(
            TerraGrid::new(vec![0.0; 10], 1.0),
            Err(TerraError::WrongSampleCount { .. })
        ));
        let mut heights = vec![0.0; VERTS * VERTS];
        heights[7] = f32::NAN;
        assert_eq!(
            TerraGrid::new(heights, 1.0),
            Err(TerraError::NonFiniteHeight { index: 7 })
        );
        assert!(matches!(
            TerraGrid::new(vec![0.0; VERTS * VERTS], 0.0),
            Err(TerraError::InvalidCellSize(_))
        ));
    }

    #[test]
    fn sim_and_client_agree_on_heights() {
        let grid = ramp_grid();
        let layers = TerraLayers {
            water: None,
            detail: Some("grass".to_string()),
            map: Some("island_map".to_string()),
        };
        let sim = SimStream::decode(&grid.encode_sim()).expect("sim");
        let client = ClientStream::decode(&grid.encode_client(&layers, 0.25, 8.0).expect("client"))
            .expect("client decode");
        assert_eq!(client.layers, layers);
        assert_eq!(client.water_level, 0.25);
        assert_eq!(client.slopes.len(), QUADS * QUADS);
        for z in 0..VERTS {
            for x in 0..VERTS {
                assert_eq!(sim.height(x, z), client.vertex(x, z).height);
            }
        }
        let corner = client.vertex(QUADS, QUADS);
        assert_eq!(corner.map_uv, [1.0, 1.0]);
        assert_eq!(corner.detail_uv, [8.0, 8.0]);
    }
}
