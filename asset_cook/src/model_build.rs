use std::fs;
use std::io::BufReader;
use std::path::{Component, Path, PathBuf};

use cook_formats::mesh::{MeshBatch, MeshVertex, Model};
use cook_formats::resource_table::ResourceKind;
use tracing::debug;

use crate::error::CookError;
use crate::staging;
use crate::unit::{
    discover, relative_path, resource_name, BuildUnit, CompiledUnit, OutputFile, ResourceRef,
    UnitConfig, UnitKind,
};

/// Compiles every `.obj` under `src_dir` into `<rel>.mdl` under `dest_dir`.
pub fn build(src_dir: &Path, dest_dir: &Path) -> Result<Vec<CompiledUnit>, CookError> {
    build_with(src_dir, dest_dir, &UnitConfig::default())
}

/// [`build`] with material textures resolved against `config.texture_dirs`.
pub fn build_with(
    src_dir: &Path,
    dest_dir: &Path,
    config: &UnitConfig,
) -> Result<Vec<CompiledUnit>, CookError> {
    let mut compiled = Vec::new();
    for unit in discover(src_dir, UnitKind::Model, config)? {
        let model = compile(&unit)?;
        staging::commit(dest_dir, &model.outputs, &unit.label())?;
        compiled.push(model);
    }
    Ok(compiled)
}

pub fn compile(unit: &BuildUnit) -> Result<CompiledUnit, CookError> {
    let label = unit.label();
    let source = fs::read(&unit.source).map_err(|err| CookError::io(&label, err))?;
    let base = unit
        .source
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    let options = tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    };
    let (models, materials) = tobj::load_obj_buf(
        &mut BufReader::new(source.as_slice()),
        &options,
        |mtl_path| tobj::load_mtl(base.join(mtl_path)),
    )
    .map_err(|err| CookError::validation(&label, format!("invalid obj: {}", err)))?;
    let materials = materials.map_err(|err| {
        CookError::validation(&label, format!("cannot load material library: {}", err))
    })?;
    if models.is_empty() {
        return Err(CookError::validation(&label, "model has no meshes"));
    }

    let mut meshes = Vec::with_capacity(models.len());
    let mut references = Vec::new();
    for model in &models {
        let diffuse = model
            .mesh
            .material_id
            .and_then(|id| materials.get(id))
            .and_then(|material| material.diffuse_texture.as_deref());
        let texture = match diffuse {
            Some(map) => texture_name(&base, map, &unit.config.texture_dirs).map_err(|err| {
                CookError::validation(&label, format!("mesh '{}': {}", model.name, err))
            })?,
            None => String::new(),
        };
        let mesh = convert_mesh(&model.name, &model.mesh, texture)
            .map_err(|err| CookError::validation(&label, err))?;
        if !mesh.texture.is_empty() {
            references.push(ResourceRef::texture(
                mesh.texture.clone(),
                format!("model '{}' mesh '{}'", unit.name, mesh.name),
            ));
        }
        meshes.push(mesh);
    }
    debug!(unit = %label, meshes = meshes.len(), "model compiled");

    let bytes = Model { meshes }
        .encode()
        .map_err(|err| CookError::validation(&label, err))?;
    Ok(CompiledUnit {
        outputs: vec![OutputFile::new(format!("{}.mdl", unit.name), bytes)],
        references,
        provides: vec![(ResourceKind::Model, unit.name.clone())],
        warnings: Vec::new(),
    })
}

/// Names the texture behind a diffuse map: its path relative to the texture
/// directory holding it, without extension. A plain relative map path that
/// lies in no texture directory is taken as the name itself.
fn texture_name(model_dir: &Path, map: &str, texture_dirs: &[PathBuf]) -> Result<String, String> {
    let map_path = Path::new(map);
    let resolved = normalize(&model_dir.join(map_path));
    for dir in texture_dirs {
        let dir = normalize(dir);
        if resolved.starts_with(&dir) {
            return Ok(resource_name(&dir, &resolved));
        }
    }
    let plain = map_path
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
    if plain {
        return Ok(relative_path(Path::new(""), &map_path.with_extension("")));
    }
    Err(format!("diffuse map '{}' lies outside every texture directory", map))
}

/// Folds `.` and `..` segments without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn convert_mesh(name: &str, mesh: &tobj::Mesh, texture: String) -> Result<MeshBatch, String> {
    let count = mesh.positions.len() / 3;
    if count == 0 {
        return Err(format!("mesh '{}' has no positions", name));
    }
    if let Some(index) = mesh.indices.iter().find(|index| **index as usize >= count) {
        return Err(format!(
            "mesh '{}' index {} out of range ({} vertices)",
            name, index, count
        ));
    }
    let normals = if mesh.normals.len() == mesh.positions.len() {
        mesh.normals
            .chunks_exact(3)
            .map(|n| [n[0], n[1], n[2]])
            .collect()
    } else {
        accumulate_normals(&mesh.positions, &mesh.indices)
    };
    let vertices = (0..count)
        .map(|i| MeshVertex {
            position: [
                mesh.positions[i * 3],
                mesh.positions[i * 3 + 1],
                mesh.positions[i * 3 + 2],
            ],
            normal: normals[i],
            uv: [
                mesh.texcoords.get(i * 2).copied().unwrap_or(0.0),
                mesh.texcoords.get(i * 2 + 1).copied().unwrap_or(0.0),
            ],
        })
        .collect();
    Ok(MeshBatch {
        name: name.to_string(),
        texture,
        vertices,
        indices: mesh.indices.clone(),
    })
}

/// Area-weighted face normals summed per vertex, then normalized.
fn accumulate_normals(positions: &[f32], indices: &[u32]) -> Vec<[f32; 3]> {
    let position = |index: u32| {
        let i = index as usize * 3;
        [positions[i], positions[i + 1], positions[i + 2]]
    };
    let mut normals = vec![[0.0f32; 3]; positions.len() / 3];
    for triangle in indices.chunks_exact(3) {
        let [a, b, c] = [position(triangle[0]), position(triangle[1]), position(triangle[2])];
        let ab = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
        let ac = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
        let face = [
            ab[1] * ac[2] - ab[2] * ac[1],
            ab[2] * ac[0] - ab[0] * ac[2],
            ab[0] * ac[1] - ab[1] * ac[0],
        ];
        for index in triangle {
            let normal = &mut normals[*index as usize];
            for axis in 0..3 {
                normal[axis] += face[axis];
            }
        }
    }
    for normal in &mut normals {
        let len = (normal[0] * normal[0] + normal[1] * normal[1] + normal[2] * normal[2]).sqrt();
        if len > 0.0 {
            for value in normal.iter_mut() {
                *value /= len;
            }
        }
    }
    normals
}
