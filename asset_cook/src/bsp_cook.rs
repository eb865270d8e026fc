//! Structural map compilation: `.map` source to `.bsp` tree and `.mesh`
//! render batches.
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use cook_formats::bsp::{Bounds, BspEntity, BspFace, BspVertex, Plane, StructuralTree};
use cook_formats::mesh::{MeshBatch, MeshVertex, RenderMesh};
use map_source::{EntitySpec, MapSource, ResolvedFace};
use tracing::{debug, warn};

use crate::bsp_tree::{build_tree, dot, locate_bounds, TreeFace, PLANE_EPSILON};
use crate::error::CookError;
use crate::unit::{
    read_source, BuildUnit, CompiledUnit, OutputFile, ResourceRef, UnitConfig, UnitKind,
};

const AREA_EPSILON: f32 = 1.0e-6;
const CONVEX_EPSILON: f32 = 1.0e-5;
const WINDING_EPSILON: f32 = 1.0e-2;

/// Compiles `<maps_dir>/<name>.map`.
pub fn build(maps_dir: &Path, name: &str, config: UnitConfig) -> Result<CompiledUnit, CookError> {
    let source = maps_dir.join(format!("{}.{}", name, UnitKind::Structural.extension()));
    compile(&BuildUnit::new(UnitKind::Structural, source, name, config))
}

pub fn compile(unit: &BuildUnit) -> Result<CompiledUnit, CookError> {
    let label = unit.label();
    let text = read_source(&unit.source, &label)?;
    let map = MapSource::parse_toml(&text).map_err(|err| CookError::validation(&label, err))?;
    let warnings = map
        .validate()
        .into_result()
        .map_err(|err| CookError::validation(&label, err))?;
    for warning in &warnings {
        warn!(unit = %label, "{}", warning);
    }

    let resolved = map
        .resolved_faces()
        .map_err(|err| CookError::validation(&label, err))?;
    let ordered = order_faces(&map, resolved);
    let mut compiled = CompiledMap::default();
    for face in &ordered {
        compiled
            .add_face(face)
            .map_err(|reason| {
                CookError::validation(&label, format!("{}: {}", face.label(), reason))
            })?;
    }

    let build = build_tree(&compiled.tree_faces, &compiled.planes, unit.config.max_depth)
        .map_err(|err| CookError::validation(&label, err))?;
    let mut tree = StructuralTree {
        planes: compiled.planes,
        nodes: build.nodes,
        leaves: build.leaves,
        leaf_faces: build.leaf_faces,
        faces: compiled.faces,
        vertices: compiled.vertices,
        entities: Vec::new(),
    };
    tree.entities = build_entities(&map, &ordered, &tree, &compiled.tree_faces);

    let references = tree
        .faces
        .iter()
        .enumerate()
        .map(|(index, face)| {
            ResourceRef::texture(
                face.texture.clone(),
                format!("map '{}' face {}", unit.name, index),
            )
        })
        .collect();
    let mesh = render_mesh(&tree, &compiled.normals);
    debug!(
        unit = %label,
        faces = tree.faces.len(),
        nodes = tree.nodes.len(),
        leaves = tree.leaves.len(),
        entities = tree.entities.len(),
        "map compiled"
    );

    let bsp_bytes = tree
        .encode()
        .map_err(|err| CookError::validation(&label, err))?;
    let mesh_bytes = mesh
        .encode()
        .map_err(|err| CookError::validation(&label, err))?;
    Ok(CompiledUnit {
        outputs: vec![
            OutputFile::new(format!("{}.bsp", unit.name), bsp_bytes),
            OutputFile::new(format!("{}.mesh", unit.name), mesh_bytes),
        ],
        references,
        provides: Vec::new(),
        warnings,
    })
}

#[derive(Default)]
struct CompiledMap {
    planes: Vec<Plane>,
    faces: Vec<BspFace>,
    vertices: Vec<BspVertex>,
    normals: Vec<[f32; 3]>,
    tree_faces: Vec<TreeFace>,
}

impl CompiledMap {
    fn add_face(&mut self, face: &ResolvedFace) -> Result<(), String> {
        let polygon = &face.vertices;
        if polygon.len() < 3 {
            return Err(format!("needs at least 3 vertices (got {})", polygon.len()));
        }
        let newell = newell_normal(polygon);
        let length = dot(newell, newell).sqrt();
        if length <= AREA_EPSILON {
            return Err("zero area".to_string());
        }
        let normal = [newell[0] / length, newell[1] / length, newell[2] / length];
        let centroid = centroid(polygon);
        let plane = Plane {
            normal,
            dist: dot(normal, centroid),
        };
        if let Some(index) = polygon
            .iter()
            .position(|vertex| plane.distance(*vertex).abs() > PLANE_EPSILON)
        {
            return Err(format!("non-planar vertex {}", index));
        }
        if !is_convex(polygon, normal) {
            return Err("non-convex polygon".to_string());
        }
        // A star winds twice while every turn still bends the same way.
        if (turning_angle(polygon, normal) - std::f32::consts::TAU).abs() > WINDING_EPSILON {
            return Err("self-intersecting polygon".to_string());
        }

        let plane_index = self.plane_index(plane);
        let bounds = Bounds::from_points(polygon.iter()).unwrap_or_default();
        self.faces.push(BspFace {
            texture: face.texture.clone(),
            plane: plane_index,
            first_vertex: self.vertices.len() as u32,
            vertex_count: polygon.len() as u32,
        });
        for vertex in polygon {
            self.vertices.push(BspVertex {
                position: *vertex,
                uv: planar_uv(*vertex, normal, face.uv_scale),
            });
        }
        self.normals.push(normal);
        self.tree_faces.push(TreeFace {
            plane: plane_index,
            vertices: polygon.clone(),
            bounds,
            centroid,
        });
        Ok(())
    }

    fn plane_index(&mut self, plane: Plane) -> u32 {
        let existing = self.planes.iter().position(|candidate| {
            (candidate.dist - plane.dist).abs() <= PLANE_EPSILON
                && (0..3).all(|axis| (candidate.normal[axis] - plane.normal[axis]).abs() <= 1.0e-5)
        });
        match existing {
            Some(index) => index as u32,
            None => {
                self.planes.push(plane);
                self.planes.len() as u32 - 1
            }
        }
    }
}

/// World brushes in declaration order, then each entity's brushes grouped in
/// entity order, so entity faces form contiguous ranges.
fn order_faces(map: &MapSource, faces: Vec<ResolvedFace>) -> Vec<ResolvedFace> {
    let mut owner: HashMap<&str, (usize, usize)> = HashMap::new();
    for (entity_index, entity) in map.entities.iter().enumerate() {
        for (brush_index, brush) in entity.brushes.iter().enumerate() {
            owner.insert(brush.as_str(), (entity_index + 1, brush_index));
        }
    }
    let mut keyed: Vec<((usize, usize), ResolvedFace)> = faces
        .into_iter()
        .map(|face| {
            let key = owner.get(face.brush.as_str()).copied().unwrap_or((0, 0));
            (key, face)
        })
        .collect();
    keyed.sort_by_key(|(key, _)| *key);
    keyed.into_iter().map(|(_, face)| face).collect()
}

fn build_entities(
    map: &MapSource,
    ordered: &[ResolvedFace],
    tree: &StructuralTree,
    tree_faces: &[TreeFace],
) -> Vec<BspEntity> {
    map.entities
        .iter()
        .map(|entity| {
            let owned: Vec<usize> = ordered
                .iter()
                .enumerate()
                .filter(|(_, face)| entity.brushes.iter().any(|brush| *brush == face.brush))
                .map(|(index, _)| index)
                .collect();
            let first_face = owned.first().copied().unwrap_or(0) as u32;
            let bounds = owned
                .iter()
                .map(|index| tree_faces[*index].bounds)
                .reduce(|acc, bounds| acc.union(&bounds))
                .unwrap_or(Bounds {
                    min: entity.origin,
                    max: entity.origin,
                });
            BspEntity {
                id: entity.id.clone(),
                kind: entity.kind.clone(),
                origin: entity.origin,
                rotation: entity_rotation(entity),
                first_face,
                face_count: owned.len() as u32,
                tree_ref: locate_bounds(&tree.nodes, &tree.planes, tree.root(), &bounds),
            }
        })
        .collect()
}

/// Quaternion `[x, y, z, w]`. Euler angles rotate about x, then y, then z.
fn entity_rotation(entity: &EntitySpec) -> [f32; 4] {
    let euler = match (entity.rot_euler_deg, entity.yaw_deg) {
        (Some(euler), _) => euler,
        (None, Some(yaw)) => [0.0, yaw, 0.0],
        (None, None) => return [0.0, 0.0, 0.0, 1.0],
    };
    let axis_quat = |axis: usize, degrees: f32| {
        let (sin, cos) = (degrees.to_radians() * 0.5).sin_cos();
        let mut quat = [0.0, 0.0, 0.0, cos];
        quat[axis] = sin;
        quat
    };
    let qx = axis_quat(0, euler[0]);
    let qy = axis_quat(1, euler[1]);
    let qz = axis_quat(2, euler[2]);
    quat_mul(quat_mul(qz, qy), qx)
}

fn quat_mul(a: [f32; 4], b: [f32; 4]) -> [f32; 4] {
    [
        a[3] * b[0] + a[0] * b[3] + a[1] * b[2] - a[2] * b[1],
        a[3] * b[1] - a[0] * b[2] + a[1] * b[3] + a[2] * b[0],
        a[3] * b[2] + a[0] * b[1] - a[1] * b[0] + a[2] * b[3],
        a[3] * b[3] - a[0] * b[0] - a[1] * b[1] - a[2] * b[2],
    ]
}

/// Triangle fans of every face, one batch per texture in name order.
fn render_mesh(tree: &StructuralTree, normals: &[[f32; 3]]) -> RenderMesh {
    let mut batches: BTreeMap<&str, MeshBatch> = BTreeMap::new();
    for (face, normal) in tree.faces.iter().zip(normals) {
        let batch = batches
            .entry(face.texture.as_str())
            .or_insert_with(|| MeshBatch {
                texture: face.texture.clone(),
                ..MeshBatch::default()
            });
        let base = batch.vertices.len() as u32;
        let vertices = tree.face_vertices(face);
        for vertex in vertices {
            batch.vertices.push(MeshVertex {
                position: vertex.position,
                normal: *normal,
                uv: vertex.uv,
            });
        }
        for i in 1..vertices.len().saturating_sub(1) {
            let (a, b, c) = (
                vertices[0].position,
                vertices[i].position,
                vertices[i + 1].position,
            );
            if triangle_is_degenerate(a, b, c) {
                continue;
            }
            batch
                .indices
                .extend_from_slice(&[base, base + i as u32, base + i as u32 + 1]);
        }
    }
    RenderMesh {
        batches: batches.into_values().collect(),
    }
}

fn newell_normal(polygon: &[[f32; 3]]) -> [f32; 3] {
    let mut normal = [0.0f32; 3];
    for (index, current) in polygon.iter().enumerate() {
        let next = polygon[(index + 1) % polygon.len()];
        normal[0] += (current[1] - next[1]) * (current[2] + next[2]);
        normal[1] += (current[2] - next[2]) * (current[0] + next[0]);
        normal[2] += (current[0] - next[0]) * (current[1] + next[1]);
    }
    normal
}

fn centroid(polygon: &[[f32; 3]]) -> [f32; 3] {
    let count = polygon.len() as f32;
    let sum = polygon.iter().fold([0.0f32; 3], |acc, vertex| {
        [acc[0] + vertex[0], acc[1] + vertex[1], acc[2] + vertex[2]]
    });
    [sum[0] / count, sum[1] / count, sum[2] / count]
}

/// Every turn bends the same way as the polygon normal.
fn is_convex(polygon: &[[f32; 3]], normal: [f32; 3]) -> bool {
    let count = polygon.len();
    (0..count).all(|index| {
        let a = polygon[index];
        let b = polygon[(index + 1) % count];
        let c = polygon[(index + 2) % count];
        let turn = cross(sub(b, a), sub(c, b));
        dot(turn, normal) >= -CONVEX_EPSILON
    })
}

/// Sum of the signed exterior angles about `normal`; `2π` for a simple
/// counter-clockwise polygon.
fn turning_angle(polygon: &[[f32; 3]], normal: [f32; 3]) -> f32 {
    let count = polygon.len();
    (0..count)
        .map(|index| {
            let a = polygon[index];
            let b = polygon[(index + 1) % count];
            let c = polygon[(index + 2) % count];
            let (incoming, outgoing) = (sub(b, a), sub(c, b));
            dot(cross(incoming, outgoing), normal).atan2(dot(incoming, outgoing))
        })
        .sum()
}

/// Projects onto the plane of the two axes least aligned with `normal`.
fn planar_uv(position: [f32; 3], normal: [f32; 3], scale: f32) -> [f32; 2] {
    let abs = [normal[0].abs(), normal[1].abs(), normal[2].abs()];
    let (u, v) = if abs[0] >= abs[1] && abs[0] >= abs[2] {
        (2, 1)
    } else if abs[1] >= abs[2] {
        (0, 2)
    } else {
        (0, 1)
    };
    [position[u] * scale, position[v] * scale]
}

fn triangle_is_degenerate(a: [f32; 3], b: [f32; 3], c: [f32; 3]) -> bool {
    let normal = cross(sub(b, a), sub(c, a));
    dot(normal, normal) <= 1.0e-10
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}
