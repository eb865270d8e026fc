//! Render meshes: texture-batched map geometry (`PMSH`) and models (`PMDL`).
use crate::codec::{CodecError, Reader, Writer};

pub const MESH_MAGIC: &[u8; 4] = b"PMSH";
pub const MODEL_MAGIC: &[u8; 4] = b"PMDL";

// position + normal + uv
const VERTEX_STRIDE: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

/// Triangles sharing one material texture. An empty name means untextured.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshBatch {
    pub name: String,
    pub texture: String,
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
}

impl MeshBatch {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    fn write(&self, writer: &mut Writer, with_name: bool) -> Result<(), CodecError> {
        if with_name {
            writer.string(&self.name)?;
        }
        writer.string(&self.texture)?;
        writer.count("vertex", self.vertices.len())?;
        for vertex in &self.vertices {
            writer.vec3(vertex.position);
            writer.vec3(vertex.normal);
            writer.vec2(vertex.uv);
        }
        writer.count("index", self.indices.len())?;
        for index in &self.indices {
            writer.u32(*index);
        }
        Ok(())
    }

    fn read(reader: &mut Reader<'_>, with_name: bool) -> Result<Self, CodecError> {
        let name = if with_name {
            reader.string()?
        } else {
            String::new()
        };
        let texture = reader.string()?;
        let count = reader.count("vertex", VERTEX_STRIDE)?;
        let mut vertices = Vec::with_capacity(count);
        for _ in 0..count {
            vertices.push(MeshVertex {
                position: reader.vec3()?,
                normal: reader.vec3()?,
                uv: reader.vec2()?,
            });
        }
        let count = reader.count("index", 4)?;
        let mut indices = Vec::with_capacity(count);
        for _ in 0..count {
            indices.push(reader.u32()?);
        }
        Ok(Self {
            name,
            texture,
            vertices,
            indices,
        })
    }
}

/// Map render mesh, one batch per texture in name order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderMesh {
    pub batches: Vec<MeshBatch>,
}

impl RenderMesh {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_batches(MESH_MAGIC, &self.batches, false)
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            batches: decode_batches(data, MESH_MAGIC, false)?,
        })
    }
}

/// Compiled model: named meshes with their material texture.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Model {
    pub meshes: Vec<MeshBatch>,
}

impl Model {
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        encode_batches(MODEL_MAGIC, &self.meshes, true)
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            meshes: decode_batches(data, MODEL_MAGIC, true)?,
        })
    }
}

fn encode_batches(
    magic: &[u8; 4],
    batches: &[MeshBatch],
    with_name: bool,
) -> Result<Vec<u8>, CodecError> {
    let mut writer = Writer::with_header(magic);
    writer.count("batch", batches.len())?;
    for batch in batches {
        batch.write(&mut writer, with_name)?;
    }
    Ok(writer.into_bytes())
}

fn decode_batches(
    data: &[u8],
    magic: &[u8; 4],
    with_name: bool,
) -> Result<Vec<MeshBatch>, CodecError> {
    let mut reader = Reader::with_header(data, magic)?;
    let count = reader.count("batch", 10)?;
    let mut batches = Vec::with_capacity(count);
    for _ in 0..count {
        batches.push(MeshBatch::read(&mut reader, with_name)?);
    }
    Ok(batches)
}
