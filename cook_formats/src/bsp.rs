use std::collections::BTreeSet;

use thiserror::Error;

use crate::codec::{CodecError, Reader, Writer};

pub const BSP_MAGIC: &[u8; 4] = b"PBSP";

#[derive(Debug, Error, PartialEq)]
pub enum BspError {
    #[error("{lump} lump references {what} {index} out of range")]
    IndexOutOfRange {
        lump: LumpType,
        what: &'static str,
        index: i64,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LumpType {
    Textures,
    Planes,
    Nodes,
    Leaves,
    LeafFaces,
    Faces,
    Vertices,
    Entities,
}

impl LumpType {
    pub fn name(self) -> &'static str {
        match self {
            LumpType::Textures => "textures",
            LumpType::Planes => "planes",
            LumpType::Nodes => "nodes",
            LumpType::Leaves => "leaves",
            LumpType::LeafFaces => "leaf_faces",
            LumpType::Faces => "faces",
            LumpType::Vertices => "vertices",
            LumpType::Entities => "entities",
        }
    }
}

impl std::fmt::Display for LumpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bounds {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Bounds {
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a [f32; 3]>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        let mut bounds = Bounds {
            min: first,
            max: first,
        };
        for point in iter {
            for axis in 0..3 {
                bounds.min[axis] = bounds.min[axis].min(point[axis]);
                bounds.max[axis] = bounds.max[axis].max(point[axis]);
            }
        }
        Some(bounds)
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min: [
                self.min[0].min(other.min[0]),
                self.min[1].min(other.min[1]),
                self.min[2].min(other.min[2]),
            ],
            max: [
                self.max[0].max(other.max[0]),
                self.max[1].max(other.max[1]),
                self.max[2].max(other.max[2]),
            ],
        }
    }

    pub fn corners(&self) -> [[f32; 3]; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            [lo[0], lo[1], lo[2]],
            [hi[0], lo[1], lo[2]],
            [lo[0], hi[1], lo[2]],
            [hi[0], hi[1], lo[2]],
            [lo[0], lo[1], hi[2]],
            [hi[0], lo[1], hi[2]],
            [lo[0], hi[1], hi[2]],
            [hi[0], hi[1], hi[2]],
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: [f32; 3],
    pub dist: f32,
}

impl Plane {
    pub fn distance(&self, point: [f32; 3]) -> f32 {
        self.normal[0] * point[0] + self.normal[1] * point[1] + self.normal[2] * point[2]
            - self.dist
    }
}

/// Child or entity reference into the tree. Encoded as `i32`: non-negative
/// values are node indices, negative values are `-(leaf + 1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeRef {
    Node(u32),
    Leaf(u32),
}

impl TreeRef {
    pub fn to_i32(self) -> i32 {
        match self {
            TreeRef::Node(index) => index as i32,
            TreeRef::Leaf(index) => -(index as i32) - 1,
        }
    }

    pub fn from_i32(value: i32) -> Self {
        if value >= 0 {
            TreeRef::Node(value as u32)
        } else {
            TreeRef::Leaf((-(value + 1)) as u32)
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BspNode {
    pub plane: u32,
    pub front: TreeRef,
    pub back: TreeRef,
    pub bounds: Bounds,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BspLeaf {
    pub first_leaf_face: u32,
    pub leaf_face_count: u32,
    pub bounds: Bounds,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BspFace {
    /// Symbolic texture name, resolved through the resource table at load.
    pub texture: String,
    pub plane: u32,
    pub first_vertex: u32,
    pub vertex_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BspVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

#[derive(Clone, Debug, PartialEq)]
pub struct BspEntity {
    pub id: String,
    pub kind: String,
    pub origin: [f32; 3],
    /// Unit quaternion `[x, y, z, w]`.
    pub rotation: [f32; 4],
    pub first_face: u32,
    pub face_count: u32,
    pub tree_ref: TreeRef,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StructuralTree {
    pub planes: Vec<Plane>,
    pub nodes: Vec<BspNode>,
    pub leaves: Vec<BspLeaf>,
    pub leaf_faces: Vec<u32>,
    pub faces: Vec<BspFace>,
    pub vertices: Vec<BspVertex>,
    pub entities: Vec<BspEntity>,
}

impl StructuralTree {
    pub fn root(&self) -> TreeRef {
        if self.nodes.is_empty() {
            TreeRef::Leaf(0)
        } else {
            TreeRef::Node(0)
        }
    }

    /// Distinct face texture names, sorted.
    pub fn texture_names(&self) -> Vec<String> {
        let names: BTreeSet<&str> = self.faces.iter().map(|face| face.texture.as_str()).collect();
        names.into_iter().map(str::to_string).collect()
    }

    pub fn leaf_face_indices(&self, leaf: u32) -> &[u32] {
        let Some(leaf) = self.leaves.get(leaf as usize) else {
            return &[];
        };
        let start = leaf.first_leaf_face as usize;
        let end = start + leaf.leaf_face_count as usize;
        self.leaf_faces.get(start..end).unwrap_or(&[])
    }

    pub fn face_vertices(&self, face: &BspFace) -> &[BspVertex] {
        let start = face.first_vertex as usize;
        let end = start + face.vertex_count as usize;
        self.vertices.get(start..end).unwrap_or(&[])
    }

    /// Leaf containing `point`; points on a plane go to the front side.
    pub fn locate(&self, point: [f32; 3]) -> Option<u32> {
        let mut current = self.root();
        loop {
            match current {
                TreeRef::Leaf(index) => {
                    return ((index as usize) < self.leaves.len()).then_some(index);
                }
                TreeRef::Node(index) => {
                    let node = self.nodes.get(index as usize)?;
                    let plane = self.planes.get(node.plane as usize)?;
                    current = if plane.distance(point) >= 0.0 {
                        node.front
                    } else {
                        node.back
                    };
                }
            }
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let textures = self.texture_names();
        let mut writer = Writer::with_header(BSP_MAGIC);

        writer.count("texture", textures.len())?;
        for name in &textures {
            writer.string(name)?;
        }

        writer.count("plane", self.planes.len())?;
        for plane in &self.planes {
            writer.vec3(plane.normal);
            writer.f32(plane.dist);
        }

        writer.count("node", self.nodes.len())?;
        for node in &self.nodes {
            writer.u32(node.plane);
            writer.i32(node.front.to_i32());
            writer.i32(node.back.to_i32());
            write_bounds(&mut writer, &node.bounds);
        }

        writer.count("leaf", self.leaves.len())?;
        for leaf in &self.leaves {
            writer.u32(leaf.first_leaf_face);
            writer.u32(leaf.leaf_face_count);
            write_bounds(&mut writer, &leaf.bounds);
        }

        writer.count("leaf face", self.leaf_faces.len())?;
        for face in &self.leaf_faces {
            writer.u32(*face);
        }

        writer.count("face", self.faces.len())?;
        for face in &self.faces {
            // Sorted and deduplicated above, so the search always hits.
            let texture = textures
                .binary_search(&face.texture)
                .unwrap_or_default();
            writer.u32(texture as u32);
            writer.u32(face.plane);
            writer.u32(face.first_vertex);
            writer.u32(face.vertex_count);
        }

        writer.count("vertex", self.vertices.len())?;
        for vertex in &self.vertices {
            writer.vec3(vertex.position);
            writer.vec2(vertex.uv);
        }

        writer.count("entity", self.entities.len())?;
        for entity in &self.entities {
            writer.string(&entity.id)?;
            writer.string(&entity.kind)?;
            writer.vec3(entity.origin);
            writer.vec4(entity.rotation);
            writer.u32(entity.first_face);
            writer.u32(entity.face_count);
            writer.i32(entity.tree_ref.to_i32());
        }

        Ok(writer.into_bytes())
    }

    pub fn decode(data: &[u8]) -> Result<Self, BspError> {
        let mut reader = Reader::with_header(data, BSP_MAGIC)?;

        let count = reader.count("texture", 2)?;
        let mut textures = Vec::with_capacity(count);
        for _ in 0..count {
            textures.push(reader.string()?);
        }

        let count = reader.count("plane", 16)?;
        let mut planes = Vec::with_capacity(count);
        for _ in 0..count {
            planes.push(Plane {
                normal: reader.vec3()?,
                dist: reader.f32()?,
            });
        }

        let count = reader.count("node", 36)?;
        let mut nodes = Vec::with_capacity(count);
        for _ in 0..count {
            nodes.push(BspNode {
                plane: reader.u32()?,
                front: TreeRef::from_i32(reader.i32()?),
                back: TreeRef::from_i32(reader.i32()?),
                bounds: read_bounds(&mut reader)?,
            });
        }

        let count = reader.count("leaf", 32)?;
        let mut leaves = Vec::with_capacity(count);
        for _ in 0..count {
            leaves.push(BspLeaf {
                first_leaf_face: reader.u32()?,
                leaf_face_count: reader.u32()?,
                bounds: read_bounds(&mut reader)?,
            });
        }

        let count = reader.count("leaf face", 4)?;
        let mut leaf_faces = Vec::with_capacity(count);
        for _ in 0..count {
            leaf_faces.push(reader.u32()?);
        }

        let count = reader.count("face", 16)?;
        let mut faces = Vec::with_capacity(count);
        for _ in 0..count {
            let texture = reader.u32()?;
            let name = textures
                .get(texture as usize)
                .ok_or(BspError::IndexOutOfRange {
                    lump: LumpType::Faces,
                    what: "texture",
                    index: i64::from(texture),
                })?;
            faces.push(BspFace {
                texture: name.clone(),
                plane: reader.u32()?,
                first_vertex: reader.u32()?,
                vertex_count: reader.u32()?,
            });
        }

        let count = reader.count("vertex", 20)?;
        let mut vertices = Vec::with_capacity(count);
        for _ in 0..count {
            vertices.push(BspVertex {
                position: reader.vec3()?,
                uv: reader.vec2()?,
            });
        }

        let count = reader.count("entity", 48)?;
        let mut entities = Vec::with_capacity(count);
        for _ in 0..count {
            entities.push(BspEntity {
                id: reader.string()?,
                kind: reader.string()?,
                origin: reader.vec3()?,
                rotation: reader.vec4()?,
                first_face: reader.u32()?,
                face_count: reader.u32()?,
                tree_ref: TreeRef::from_i32(reader.i32()?),
            });
        }

        let tree = StructuralTree {
            planes,
            nodes,
            leaves,
            leaf_faces,
            faces,
            vertices,
            entities,
        };
        tree.check_indices()?;
        Ok(tree)
    }

    fn check_indices(&self) -> Result<(), BspError> {
        let out_of_range = |lump, what, index: i64| BspError::IndexOutOfRange { lump, what, index };
        let check_ref = |tree_ref: TreeRef, lump| match tree_ref {
            TreeRef::Node(index) if index as usize >= self.nodes.len() => {
                Err(out_of_range(lump, "node", i64::from(index)))
            }
            TreeRef::Leaf(index) if index as usize >= self.leaves.len() => {
                Err(out_of_range(lump, "leaf", i64::from(index)))
            }
            _ => Ok(()),
        };
        for node in &self.nodes {
            if node.plane as usize >= self.planes.len() {
                return Err(out_of_range(LumpType::Nodes, "plane", i64::from(node.plane)));
            }
            check_ref(node.front, LumpType::Nodes)?;
            check_ref(node.back, LumpType::Nodes)?;
        }
        for leaf in &self.leaves {
            let end = u64::from(leaf.first_leaf_face) + u64::from(leaf.leaf_face_count);
            if end > self.leaf_faces.len() as u64 {
                return Err(out_of_range(LumpType::Leaves, "leaf face", end as i64));
            }
        }
        for face in &self.leaf_faces {
            if *face as usize >= self.faces.len() {
                return Err(out_of_range(LumpType::LeafFaces, "face", i64::from(*face)));
            }
        }
        for face in &self.faces {
            let end = u64::from(face.first_vertex) + u64::from(face.vertex_count);
            if end > self.vertices.len() as u64 {
                return Err(out_of_range(LumpType::Faces, "vertex", end as i64));
            }
        }
        for entity in &self.entities {
            check_ref(entity.tree_ref, LumpType::Entities)?;
        }
        Ok(())
    }
}

fn write_bounds(writer: &mut Writer, bounds: &Bounds) {
    writer.vec3(bounds.min);
    writer.vec3(bounds.max);
}

fn read_bounds(reader: &mut Reader<'_>) -> Result<Bounds, CodecError> {
    Ok(Bounds {
        min: reader.vec3()?,
        max: reader.vec3()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_bounds() -> Bounds {
        Bounds {
            min: [0.0; 3],
            max: [1.0; 3],
        }
    }

    fn two_leaf_tree() -> StructuralTree {
        let vertex = |x: f32| BspVertex {
            position: [x, 0.0, 0.0],
            uv: [0.0, 0.0],
        };
        StructuralTree {
            planes: vec![Plane {
                normal: [1.0, 0.0, 0.0],
                dist: 0.0,
            }],
            nodes: vec![BspNode {
                plane: 0,
                front: TreeRef::Leaf(0),
                back: TreeRef::Leaf(1),
                bounds: unit_bounds(),
            }],
            leaves: vec![
                BspLeaf {
                    first_leaf_face: 0,
                    leaf_face_count: 1,
                    bounds: unit_bounds(),
                },
                BspLeaf {
                    first_leaf_face: 1,
                    leaf_face_count: 1,
                    bounds: unit_bounds(),
                },
            ],
            leaf_faces: vec![0, 1],
            faces: vec![
                BspFace {
                    texture: "stone".to_string(),
                    plane: 0,
                    first_vertex: 0,
                    vertex_count: 3,
                },
                BspFace {
                    texture: "brick".to_string(),
                    plane: 0,
                    first_vertex: 3,
                    vertex_count: 3,
                },
            ],
            vertices: (0..6).map(|i| vertex(i as f32)).collect(),
            entities: vec![BspEntity {
                id: "door1".to_string(),
                kind: "door".to_string(),
                origin: [1.0, 2.0, 3.0],
                rotation: [0.0, 0.0, 0.0, 1.0],
                first_face: 1,
                face_count: 1,
                tree_ref: TreeRef::Leaf(1),
            }],
        }
    }

    #[test]
    fn tree_ref_encoding() {
        assert_eq!(TreeRef::Leaf(0).to_i32(), -1);
        assert_eq!(TreeRef::from_i32(-3), TreeRef::Leaf(2));
        assert_eq!(TreeRef::from_i32(4), TreeRef::Node(4));
    }

    #[test]
    fn textures_are_stored_once_sorted() {
        let tree = two_leaf_tree();
        assert_eq!(tree.texture_names(), vec!["brick", "stone"]);
        let decoded = StructuralTree::decode(&tree.encode().expect("encode")).expect("decode");
        assert_eq!(decoded, tree);
    }

    #[test]
    fn locate_walks_planes() {
        let tree = two_leaf_tree();
        assert_eq!(tree.locate([2.0, 0.0, 0.0]), Some(0));
        assert_eq!(tree.locate([-2.0, 0.0, 0.0]), Some(1));
        assert_eq!(tree.leaf_face_indices(1), &[1]);
    }

    #[test]
    fn decode_rejects_dangling_child() {
        let mut tree = two_leaf_tree();
        tree.nodes[0].back = TreeRef::Leaf(9);
        let bytes = tree.encode().expect("encode");
        assert!(matches!(
            StructuralTree::decode(&bytes),
            Err(BspError::IndexOutOfRange { what: "leaf", .. })
        ));
    }
}
