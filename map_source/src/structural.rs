use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::{vector_is_finite, SourceValidation};

#[derive(Clone, Debug, Deserialize)]
pub struct MapSource {
    pub version: u32,
    pub name: String,
    #[serde(default)]
    pub brushes: Vec<BrushSpec>,
    #[serde(default)]
    pub entities: Vec<EntitySpec>,
}

/// A brush is either a list of explicit polygon faces or a box shorthand
/// expanded into six outward-facing quads.
#[derive(Clone, Debug, Deserialize)]
pub struct BrushSpec {
    pub id: String,
    #[serde(default)]
    pub faces: Vec<FaceSpec>,
    #[serde(default, rename = "box")]
    pub cuboid: Option<BoxSpec>,
    /// Texture for every face of a box brush.
    #[serde(default)]
    pub texture: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FaceSpec {
    pub texture: String,
    pub vertices: Vec<[f32; 3]>,
    #[serde(default)]
    pub uv_scale: Option<f32>,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct BoxSpec {
    pub pos: [f32; 3],
    pub size: [f32; 3],
    #[serde(default)]
    pub yaw_deg: Option<f32>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EntitySpec {
    pub id: String,
    pub kind: String,
    pub origin: [f32; 3],
    #[serde(default)]
    pub yaw_deg: Option<f32>,
    #[serde(default)]
    pub rot_euler_deg: Option<[f32; 3]>,
    #[serde(default)]
    pub brushes: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One polygon in declaration order, with its owning brush for diagnostics.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedFace {
    pub brush: String,
    pub face_index: usize,
    pub texture: String,
    pub vertices: Vec<[f32; 3]>,
    pub uv_scale: f32,
}

impl ResolvedFace {
    pub fn label(&self) -> String {
        format!("brush '{}' face {}", self.brush, self.face_index)
    }
}

impl MapSource {
    pub fn parse_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|err| err.to_string())
    }

    pub fn validate(&self) -> SourceValidation {
        let mut validation = SourceValidation::default();
        if self.version != 1 {
            validation
                .errors
                .push(format!("unsupported version {}", self.version));
        }
        if self.name.trim().is_empty() {
            validation.errors.push("name must not be empty".to_string());
        }
        if self.brushes.is_empty() {
            validation
                .warnings
                .push("map contains no brushes".to_string());
        }

        let mut brush_ids = HashSet::new();
        for brush in &self.brushes {
            validate_brush(brush, &mut validation);
            if !brush.id.trim().is_empty() && !brush_ids.insert(brush.id.as_str()) {
                validation
                    .errors
                    .push(format!("duplicate brush id '{}'", brush.id));
            }
        }

        let mut entity_ids = HashSet::new();
        let mut owners: HashMap<&str, &str> = HashMap::new();
        for entity in &self.entities {
            if entity.id.trim().is_empty() {
                validation
                    .errors
                    .push("entity id must not be empty".to_string());
            } else if !entity_ids.insert(entity.id.as_str()) {
                validation
                    .errors
                    .push(format!("duplicate entity id '{}'", entity.id));
            }
            if entity.kind.trim().is_empty() {
                validation
                    .errors
                    .push(format!("entity '{}' kind must not be empty", entity.id));
            }
            if !vector_is_finite(entity.origin) {
                validation
                    .errors
                    .push(format!("entity '{}' has invalid origin", entity.id));
            }
            let yaw_ok = entity.yaw_deg.map_or(true, f32::is_finite);
            let euler_ok = entity.rot_euler_deg.map_or(true, vector_is_finite);
            if !yaw_ok || !euler_ok {
                validation
                    .errors
                    .push(format!("entity '{}' has invalid rotation", entity.id));
            }
            if entity.brushes.is_empty() {
                validation
                    .warnings
                    .push(format!("entity '{}' owns no brushes", entity.id));
            }
            for brush in &entity.brushes {
                if !brush_ids.contains(brush.as_str()) {
                    validation.errors.push(format!(
                        "entity '{}' references unknown brush '{}'",
                        entity.id, brush
                    ));
                } else if let Some(owner) = owners.insert(brush.as_str(), entity.id.as_str()) {
                    validation.errors.push(format!(
                        "brush '{}' is owned by both '{}' and '{}'",
                        brush, owner, entity.id
                    ));
                }
            }
        }
        validation
    }

    /// Every face of every brush, boxes expanded, in declaration order.
    pub fn resolved_faces(&self) -> Result<Vec<ResolvedFace>, String> {
        let validation = self.validate();
        if !validation.is_ok() {
            return Err(validation.errors.join("; "));
        }
        let mut faces = Vec::new();
        for brush in &self.brushes {
            faces.extend(brush.resolve());
        }
        Ok(faces)
    }
}

impl BrushSpec {
    fn resolve(&self) -> Vec<ResolvedFace> {
        if let Some(cuboid) = self.cuboid {
            let texture = self.texture.clone().unwrap_or_default();
            return box_faces(&cuboid)
                .into_iter()
                .enumerate()
                .map(|(face_index, vertices)| ResolvedFace {
                    brush: self.id.clone(),
                    face_index,
                    texture: texture.clone(),
                    vertices,
                    uv_scale: 1.0,
                })
                .collect();
        }
        self.faces
            .iter()
            .enumerate()
            .map(|(face_index, face)| ResolvedFace {
                brush: self.id.clone(),
                face_index,
                texture: face.texture.clone(),
                vertices: face.vertices.clone(),
                uv_scale: face.uv_scale.unwrap_or(1.0),
            })
            .collect()
    }
}

fn validate_brush(brush: &BrushSpec, validation: &mut SourceValidation) {
    if brush.id.trim().is_empty() {
        validation
            .errors
            .push("brush id must not be empty".to_string());
    }
    match (&brush.cuboid, brush.faces.is_empty()) {
        (Some(_), false) => validation.errors.push(format!(
            "brush '{}' must use either faces or box, not both",
            brush.id
        )),
        (None, true) => validation
            .errors
            .push(format!("brush '{}' has no faces", brush.id)),
        _ => {}
    }
    if let Some(cuboid) = &brush.cuboid {
        if !vector_is_finite(cuboid.pos) {
            validation
                .errors
                .push(format!("brush '{}' box has invalid pos", brush.id));
        }
        if !vector_is_finite(cuboid.size) || cuboid.size.iter().any(|value| *value <= 0.0) {
            validation
                .errors
                .push(format!("brush '{}' box has invalid size", brush.id));
        }
        if brush.texture.as_deref().map_or(true, |name| name.trim().is_empty()) {
            validation
                .errors
                .push(format!("brush '{}' box needs a texture", brush.id));
        }
    }
    for (index, face) in brush.faces.iter().enumerate() {
        if face.texture.trim().is_empty() {
            validation.errors.push(format!(
                "brush '{}' face {} has no texture",
                brush.id, index
            ));
        }
        if face.vertices.len() < 3 {
            validation.errors.push(format!(
                "brush '{}' face {} needs at least 3 vertices (got {})",
                brush.id,
                index,
                face.vertices.len()
            ));
        }
        if face.vertices.iter().any(|vertex| !vector_is_finite(*vertex)) {
            validation.errors.push(format!(
                "brush '{}' face {} has non-finite coordinates",
                brush.id, index
            ));
        }
        if let Some(scale) = face.uv_scale {
            if !scale.is_finite() || scale <= 0.0 {
                validation.errors.push(format!(
                    "brush '{}' face {} uv_scale must be > 0",
                    brush.id, index
                ));
            }
        }
    }
}

// Corner signs per face, wound counter-clockwise seen from outside.
const BOX_FACES: [[[f32; 3]; 4]; 6] = [
    [[1.0, -1.0, -1.0], [1.0, 1.0, -1.0], [1.0, 1.0, 1.0], [1.0, -1.0, 1.0]],
    [[-1.0, -1.0, -1.0], [-1.0, -1.0, 1.0], [-1.0, 1.0, 1.0], [-1.0, 1.0, -1.0]],
    [[-1.0, 1.0, -1.0], [-1.0, 1.0, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, -1.0]],
    [[-1.0, -1.0, -1.0], [1.0, -1.0, -1.0], [1.0, -1.0, 1.0], [-1.0, -1.0, 1.0]],
    [[-1.0, -1.0, 1.0], [1.0, -1.0, 1.0], [1.0, 1.0, 1.0], [-1.0, 1.0, 1.0]],
    [[-1.0, -1.0, -1.0], [-1.0, 1.0, -1.0], [1.0, 1.0, -1.0], [1.0, -1.0, -1.0]],
];

fn box_faces(cuboid: &BoxSpec) -> Vec<Vec<[f32; 3]>> {
    let half = [
        cuboid.size[0] * 0.5,
        cuboid.size[1] * 0.5,
        cuboid.size[2] * 0.5,
    ];
    let yaw = cuboid.yaw_deg.unwrap_or(0.0).to_radians();
    BOX_FACES
        .iter()
        .map(|corners| {
            corners
                .iter()
                .map(|sign| {
                    let local = rotate_y(
                        [sign[0] * half[0], sign[1] * half[1], sign[2] * half[2]],
                        yaw,
                    );
                    [
                        cuboid.pos[0] + local[0],
                        cuboid.pos[1] + local[1],
                        cuboid.pos[2] + local[2],
                    ]
                })
                .collect()
        })
        .collect()
}

fn rotate_y(value: [f32; 3], yaw: f32) -> [f32; 3] {
    let (sin, cos) = yaw.sin_cos();
    [
        value[0] * cos + value[2] * sin,
        value[1],
        -value[0] * sin + value[2] * cos,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOM: &str = r#"
version = 1
name = "hall"

[[brushes]]
id = "floor"
texture = "stone"
box = { pos = [0.0, -0.5, 0.0], size = [8.0, 1.0, 8.0] }

[[brushes]]
id = "door_slab"

[[brushes.faces]]
texture = "wood"
vertices = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 2.0, 0.0], [0.0, 2.0, 0.0]]

[[entities]]
id = "door1"
kind = "door"
origin = [0.5, 1.0, 0.0]
yaw_deg = 90.0
brushes = ["door_slab"]
"#;

    #[test]
    fn parse_and_expand_room() {
        let map = MapSource::parse_toml(ROOM).expect("parse");
        assert!(map.validate().is_ok());
        let faces = map.resolved_faces().expect("faces");
        assert_eq!(faces.len(), 7);
        assert!(faces[..6].iter().all(|face| face.texture == "stone"));
        assert_eq!(faces[6].label(), "brush 'door_slab' face 0");
    }

    #[test]
    fn box_faces_wind_outward() {
        let faces = box_faces(&BoxSpec {
            pos: [0.0; 3],
            size: [2.0; 3],
            yaw_deg: None,
        });
        for face in faces {
            let centroid = face.iter().fold([0.0; 3], |acc, v| {
                [acc[0] + v[0] / 4.0, acc[1] + v[1] / 4.0, acc[2] + v[2] / 4.0]
            });
            let ab = sub(face[1], face[0]);
            let ac = sub(face[2], face[0]);
            let normal = [
                ab[1] * ac[2] - ab[2] * ac[1],
                ab[2] * ac[0] - ab[0] * ac[2],
                ab[0] * ac[1] - ab[1] * ac[0],
            ];
            let dot = normal[0] * centroid[0] + normal[1] * centroid[1] + normal[2] * centroid[2];
            assert!(dot > 0.0);
        }
    }

    #[test]
    fn rejects_shared_and_unknown_brushes() {
        let text = format!(
            "{}\n[[entities]]\nid = \"door2\"\nkind = \"door\"\norigin = [0.0, 0.0, 0.0]\n\
             brushes = [\"door_slab\", \"ghost\"]\n",
            ROOM
        );
        let map = MapSource::parse_toml(&text).expect("parse");
        let validation = map.validate();
        assert!(!validation.is_ok());
        assert!(validation.errors.iter().any(|err| err.contains("owned by both")));
        assert!(validation.errors.iter().any(|err| err.contains("unknown brush 'ghost'")));
        assert!(map.resolved_faces().is_err());
    }

    #[test]
    fn box_without_texture_is_an_error() {
        let text = r#"
version = 1
name = "bare"

[[brushes]]
id = "crate"
box = { pos = [0.0, 0.0, 0.0], size = [1.0, 1.0, 1.0] }
"#;
        let map = MapSource::parse_toml(text).expect("parse");
        let validation = map.validate();
        assert!(validation
            .errors
            .iter()
            .any(|err| err.contains("needs a texture")));
    }

    fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
        [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
    }
}
