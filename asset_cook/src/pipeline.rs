//! Stage orchestration: copy, textures, terrain, maps, tagging, models,
//! scripts, pack. The first failing unit stops the build and no archive is
//! produced.
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use cook_formats::resource_table::{ResourceKind, ResourceTable};
use tracing::{debug, error, info, warn};

use crate::config::CookConfig;
use crate::copier;
use crate::error::{CookError, ExitStatus};
use crate::packer::{self, ArchiveSummary};
use crate::staging;
use crate::tagger::{self, Inventory};
use crate::unit::{self, discover, relative_path, BuildUnit, ResourceRef, UnitConfig, UnitKind};

#[derive(Clone, Debug, Default)]
pub struct BuildOptions {
    /// Overrides the configured archive name.
    pub archive_name: Option<String>,
    /// Overrides `<source_root>/cook.toml`.
    pub config_path: Option<PathBuf>,
    /// Removes the destination tree before building.
    pub clean: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildSummary {
    pub archive: PathBuf,
    pub archive_entries: usize,
    pub archive_bytes: usize,
    pub units: usize,
    pub copied: usize,
    pub warnings: usize,
}

/// Builds and maps the outcome to a process status, logging the failing
/// unit.
pub fn run(source_root: &Path, dest_root: &Path, options: &BuildOptions) -> ExitStatus {
    match build(source_root, dest_root, options) {
        Ok(summary) => {
            info!(
                archive = %summary.archive.display(),
                entries = summary.archive_entries,
                bytes = summary.archive_bytes,
                units = summary.units,
                warnings = summary.warnings,
                "build complete"
            );
            ExitStatus::Success
        }
        Err(err) => {
            let status = err.kind();
            error!(unit = err.unit(), status = %status, "{}", err);
            status
        }
    }
}

pub fn build(
    source_root: &Path,
    dest_root: &Path,
    options: &BuildOptions,
) -> Result<BuildSummary, CookError> {
    let mut config = CookConfig::load(source_root, options.config_path.as_deref())?;
    if let Some(name) = &options.archive_name {
        config.archive_name = name.clone();
        config
            .validate()
            .map_err(|errors| CookError::validation("options", errors.join("; ")))?;
    }
    if options.clean {
        clean(source_root, dest_root)?;
    }
    fs::create_dir_all(dest_root)
        .map_err(|err| CookError::io(format!("destination '{}'", dest_root.display()), err))?;

    let archive = dest_root.join(&config.archive_name);
    remove_stale_archive(&archive)?;

    let mut pipeline = Pipeline::new(source_root, dest_root, config);
    pipeline.copy()?;
    pipeline.textures()?;
    pipeline.terrain()?;
    pipeline.maps()?;
    let models = pipeline.discover_models()?;
    let table = pipeline.tag()?;
    pipeline.models(&models, &table)?;
    pipeline.scripts()?;
    let packed = pipeline.pack(&archive)?;

    Ok(BuildSummary {
        archive,
        archive_entries: packed.entries,
        archive_bytes: packed.bytes,
        units: pipeline.units,
        copied: pipeline.copied,
        warnings: pipeline.warnings,
    })
}

/// Owns the resource inventory, the references collected so far and every
/// destination file this run has written.
struct Pipeline<'a> {
    source_root: &'a Path,
    dest_root: &'a Path,
    config: CookConfig,
    inventory: Inventory,
    references: Vec<ResourceRef>,
    outputs: BTreeSet<PathBuf>,
    units: usize,
    copied: usize,
    warnings: usize,
}

impl<'a> Pipeline<'a> {
    fn new(source_root: &'a Path, dest_root: &'a Path, config: CookConfig) -> Self {
        Self {
            source_root,
            dest_root,
            config,
            inventory: Inventory::new(),
            references: Vec::new(),
            outputs: BTreeSet::new(),
            units: 0,
            copied: 0,
            warnings: 0,
        }
    }

    fn copy(&mut self) -> Result<(), CookError> {
        info!("stage: copy");
        for rule in &self.config.copy {
            let copied = copier::copy(
                &self.source_root.join(&rule.dir),
                &self.dest_root.join(&rule.dir),
                &rule.extensions,
                rule.recurse,
            )?;
            self.copied += copied.len();
            for rel in copied {
                if let Some(kind) = rule.resource {
                    let name = relative_path(Path::new(""), &rel.with_extension(""));
                    let origin = relative_path(Path::new(""), &Path::new(&rule.dir).join(&rel));
                    self.inventory.register(kind, name, &origin)?;
                }
                self.outputs.insert(self.dest_root.join(&rule.dir).join(rel));
            }
        }
        Ok(())
    }

    fn textures(&mut self) -> Result<(), CookError> {
        info!("stage: textures");
        let groups = self.config.textures.clone();
        for group in groups {
            let config = UnitConfig {
                texture: group.settings(),
                ..UnitConfig::default()
            };
            let dir = self.source_root.join(&group.dir);
            let units = discover(&dir, UnitKind::Texture, &config)?;
            self.cook(&units, &group.dir, None)?;
        }
        Ok(())
    }

    fn terrain(&mut self) -> Result<(), CookError> {
        info!("stage: terrain");
        let dir = self.config.dirs.terrain.clone();
        let source = self.source_root.join(&dir);
        let units = discover(&source, UnitKind::Terrain, &UnitConfig::default())?;
        let references = self.cook(&units, &dir, None)?;
        self.references.extend(references);
        Ok(())
    }

    fn maps(&mut self) -> Result<(), CookError> {
        info!("stage: maps");
        let dir = self.config.dirs.maps.clone();
        let config = UnitConfig {
            max_depth: self.config.bsp.max_depth,
            ..UnitConfig::default()
        };
        let units = discover(&self.source_root.join(&dir), UnitKind::Structural, &config)?;
        let references = self.cook(&units, &dir, None)?;
        self.references.extend(references);
        Ok(())
    }

    /// Model names enter the inventory before tagging; the models themselves
    /// compile afterwards.
    fn discover_models(&mut self) -> Result<Vec<BuildUnit>, CookError> {
        let dir = self.source_root.join(&self.config.dirs.models);
        let config = UnitConfig {
            texture_dirs: self
                .config
                .textures
                .iter()
                .map(|group| self.source_root.join(&group.dir))
                .collect(),
            ..UnitConfig::default()
        };
        let units = discover(&dir, UnitKind::Model, &config)?;
        for unit in &units {
            let origin = relative_path(self.source_root, &unit.source);
            self.inventory.register(ResourceKind::Model, unit.name.clone(), &origin)?;
        }
        debug!(models = units.len(), "models discovered");
        Ok(units)
    }

    fn tag(&mut self) -> Result<ResourceTable, CookError> {
        info!("stage: tagging");
        let dirs = &self.config.dirs;
        let (classes, fragments) = tagger::load_definitions(
            &self.source_root.join(&dirs.classes),
            &self.source_root.join(&dirs.fragments),
        )?;
        let tagged = tagger::tag(&self.inventory, &classes, &fragments, &self.references)?;
        let outputs = tagged.outputs(&dirs.classes, &dirs.fragments)?;
        let placed = staging::commit(self.dest_root, &outputs, "resource tagger")?;
        self.outputs.extend(placed);
        info!(
            resources = tagged.table.len(),
            classes = tagged.classes.len(),
            fragments = tagged.fragments.len(),
            "resources tagged"
        );
        Ok(tagged.table)
    }

    fn models(&mut self, units: &[BuildUnit], table: &ResourceTable) -> Result<(), CookError> {
        info!("stage: models");
        let dir = self.config.dirs.models.clone();
        self.cook(units, &dir, Some(table))?;
        Ok(())
    }

    /// Validates the source scripts; the copy stage has already placed them.
    fn scripts(&mut self) -> Result<(), CookError> {
        info!("stage: scripts");
        let dir = self.config.dirs.scripts.clone();
        let source = self.source_root.join(&dir);
        let units = discover(&source, UnitKind::Script, &UnitConfig::default())?;
        self.cook(&units, &dir, None)?;
        debug!(scripts = units.len(), "scripts validated");
        Ok(())
    }

    /// Packs the files this run placed, never leftovers of earlier runs.
    fn pack(&self, archive: &Path) -> Result<ArchiveSummary, CookError> {
        info!("stage: pack");
        let files: Vec<PathBuf> = self.outputs.iter().cloned().collect();
        packer::pack_files(self.dest_root, &files, archive)
    }

    /// Compiles and commits each unit under `<dest_root>/<dir>`, returning
    /// the references they emitted. With a frozen `table`, references are
    /// resolved before anything is committed and provided names were
    /// registered at discovery.
    fn cook(
        &mut self,
        units: &[BuildUnit],
        dir: &str,
        table: Option<&ResourceTable>,
    ) -> Result<Vec<ResourceRef>, CookError> {
        let dest_dir = self.dest_root.join(dir);
        let mut references = Vec::new();
        for build_unit in units {
            let label = build_unit.label();
            let compiled = unit::compile(build_unit)?;
            match table {
                Some(table) => tagger::check_references(table, &compiled.references)?,
                None => {
                    let origin = relative_path(self.source_root, &build_unit.source);
                    for (kind, name) in &compiled.provides {
                        self.inventory.register(*kind, name.clone(), &origin)?;
                    }
                }
            }
            for warning in &compiled.warnings {
                warn!(unit = %label, "{}", warning);
            }
            let placed = staging::commit(&dest_dir, &compiled.outputs, &label)?;
            debug!(unit = %label, outputs = placed.len(), "unit cooked");
            self.outputs.extend(placed);
            references.extend(compiled.references);
            self.warnings += compiled.warnings.len();
            self.units += 1;
        }
        Ok(references)
    }
}

/// Removes the destination tree, refusing when the source lives inside it.
fn clean(source_root: &Path, dest_root: &Path) -> Result<(), CookError> {
    let unit = format!("destination '{}'", dest_root.display());
    if !dest_root.exists() {
        return Ok(());
    }
    let dest = dest_root.canonicalize().map_err(|err| CookError::io(&unit, err))?;
    let source = source_root
        .canonicalize()
        .map_err(|err| CookError::io(format!("source '{}'", source_root.display()), err))?;
    if source.starts_with(&dest) {
        return Err(CookError::validation(
            &unit,
            "refusing to clean a destination that contains the source tree",
        ));
    }
    debug!(dir = %dest.display(), "cleaning destination");
    fs::remove_dir_all(&dest).map_err(|err| CookError::io(&unit, err))
}

fn remove_stale_archive(archive: &Path) -> Result<(), CookError> {
    match fs::remove_file(archive) {
        Ok(()) => {
            debug!(archive = %archive.display(), "removed stale archive");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(CookError::io(format!("archive '{}'", archive.display()), err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{temp_dir, write_png};
    use cook_formats::archive::read_archive;
    use cook_formats::defs::TaggedClass;
    use cook_formats::terra::VERTS;

    fn island(detail: &str) -> String {
        let heights: Vec<String> = (0..VERTS * VERTS)
            .map(|index| format!("{:.1}", (index / VERTS) as f32 * 0.5))
            .collect();
        format!(
            "version = 1\nresolution = {}\nheights = [{}]\ndetail_texture = \"{}\"\n",
            VERTS,
            heights.join(", "),
            detail
        )
    }

    fn minimal_source(label: &str, detail: &str, script: &str) -> PathBuf {
        let src = temp_dir(label);
        write_png(
            &src.join("textures").join("grass.png"),
            4,
            4,
            png::ColorType::Rgba,
            &[40u8; 4 * 4 * 4],
        );
        fs::create_dir_all(src.join("terrain")).expect("mkdir");
        fs::write(src.join("terrain").join("island.terra"), island(detail)).expect("terrain");
        fs::create_dir_all(src.join("scripts")).expect("mkdir");
        fs::write(src.join("scripts").join("main.lua"), script).expect("script");
        src
    }

    const MAIN_LUA: &str = "local M = {}\nfunction M.tick(dt)\n  return dt * 2\nend\nreturn M\n";

    #[test]
    fn end_to_end_build_packs_every_output() {
        let src = minimal_source("e2e_src", "grass", MAIN_LUA);
        let dest = temp_dir("e2e_dest");
        let status = run(&src, &dest, &BuildOptions::default());
        assert_eq!(status, ExitStatus::Success);

        let archive = read_archive(&dest.join("assets.pak")).expect("archive");
        assert_eq!(
            archive.entry_names(),
            vec![
                "resources.tbl",
                "scripts/main.lua",
                "terrain/island.terra.client",
                "terrain/island.terra.sim",
                "textures/grass.tex",
            ]
        );
        let script = archive
            .entry_data("scripts/main.lua")
            .expect("entry")
            .expect("present");
        assert_eq!(script, MAIN_LUA.as_bytes());
        let table = archive
            .entry_data("resources.tbl")
            .expect("entry")
            .expect("present");
        let table = ResourceTable::decode(table).expect("table");
        assert_eq!(table.names(ResourceKind::Texture), ["grass".to_string()]);
        let _ = fs::remove_dir_all(&src);
        let _ = fs::remove_dir_all(&dest);
    }

    #[test]
    fn repeated_builds_are_byte_identical() {
        let src = minimal_source("idempotent_src", "grass", MAIN_LUA);
        let first = temp_dir("idempotent_a");
        let second = temp_dir("idempotent_b");
        build(&src, &first, &BuildOptions::default()).expect("first");
        build(&src, &second, &BuildOptions::default()).expect("second");
        let a = fs::read(first.join("assets.pak")).expect("a");
        let b = fs::read(second.join("assets.pak")).expect("b");
        assert!(!a.is_empty());
        assert_eq!(a, b);

        // Rebuilding in place replaces the archive instead of packing it.
        build(&src, &first, &BuildOptions::default()).expect("rebuild");
        assert_eq!(fs::read(first.join("assets.pak")).expect("rebuilt"), a);
        for dir in [src, first, second] {
            let _ = fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn dangling_layer_texture_fails_without_archive() {
        let src = minimal_source("dangling_src", "lava", MAIN_LUA);
        let dest = temp_dir("dangling_dest");
        let err = build(&src, &dest, &BuildOptions::default()).expect_err("dangling");
        assert_eq!(err.kind(), ExitStatus::ValidationFailure);
        assert!(err.to_string().contains("unknown texture 'lava'"), "{}", err);
        assert_eq!(err.unit(), "terrain 'island' detail layer");
        assert!(!dest.join("assets.pak").exists());
        let _ = fs::remove_dir_all(&src);
        let _ = fs::remove_dir_all(&dest);
    }

    #[test]
    fn broken_script_exits_with_validation_code() {
        let src = minimal_source("script_src", "grass", "function f()\n  return 1\nend\nend\n");
        let dest = temp_dir("script_dest");
        let status = run(&src, &dest, &BuildOptions::default());
        assert_eq!(status.code(), 10);
        assert!(!dest.join("assets.pak").exists());

        let err = build(&src, &dest, &BuildOptions::default()).expect_err("syntax");
        assert_eq!(err.unit(), "script 'main'");
        assert!(err.to_string().contains("main.lua:4:"), "{}", err);
        let _ = fs::remove_dir_all(&src);
        let _ = fs::remove_dir_all(&dest);
    }

    #[test]
    fn maps_models_and_classes_cross_link() {
        let src = minimal_source("linked_src", "grass", MAIN_LUA);
        fs::create_dir_all(src.join("maps")).expect("mkdir");
        fs::write(
            src.join("maps").join("yard.map"),
            "version = 1\nname = \"yard\"\n\n[[brushes]]\nid = \"ground\"\ntexture = \"grass\"\n\
             box = { pos = [0.0, 0.0, 0.0], size = [4.0, 1.0, 4.0] }\n",
        )
        .expect("map");
        fs::create_dir_all(src.join("models")).expect("mkdir");
        fs::write(
            src.join("models").join("barrel.obj"),
            "mtllib barrel.mtl\no body\nv 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl skin\nf 1 2 3\n",
        )
        .expect("obj");
        fs::write(
            src.join("models").join("barrel.mtl"),
            "newmtl skin\nmap_Kd grass.png\n",
        )
        .expect("mtl");
        fs::create_dir_all(src.join("classes")).expect("mkdir");
        fs::write(
            src.join("classes").join("barrel.toml"),
            "name = \"barrel\"\nmodel = \"barrel\"\ntextures = [\"grass\"]\nhealth = 5.0\n",
        )
        .expect("class");
        let dest = temp_dir("linked_dest");

        let summary = build(&src, &dest, &BuildOptions::default()).expect("build");
        assert_eq!(summary.units, 5);
        let archive = read_archive(&summary.archive).expect("archive");
        let expected = [
            "maps/yard.bsp",
            "maps/yard.mesh",
            "models/barrel.mdl",
            "classes/barrel.class",
        ];
        for name in expected {
            assert!(archive.entry_by_name(name).is_some(), "missing {}", name);
        }
        let class = archive
            .entry_data("classes/barrel.class")
            .expect("entry")
            .expect("present");
        let class = TaggedClass::decode(class).expect("class");
        assert_eq!(class.model, Some(0));
        assert_eq!(class.textures, vec![0]);
        let _ = fs::remove_dir_all(&src);
        let _ = fs::remove_dir_all(&dest);
    }

    #[test]
    fn model_material_must_name_a_texture() {
        let src = minimal_source("model_ref_src", "grass", MAIN_LUA);
        fs::create_dir_all(src.join("models")).expect("mkdir");
        fs::write(
            src.join("models").join("rock.obj"),
            "mtllib rock.mtl\no rock\nv 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl stone\nf 1 2 3\n",
        )
        .expect("obj");
        fs::write(src.join("models").join("rock.mtl"), "newmtl stone\nmap_Kd granite.png\n")
            .expect("mtl");
        let dest = temp_dir("model_ref_dest");
        let err = build(&src, &dest, &BuildOptions::default()).expect_err("dangling");
        assert_eq!(err.unit(), "model 'rock' mesh 'rock'");
        assert!(err.to_string().contains("unknown texture 'granite'"), "{}", err);
        assert!(!dest.join("models").join("rock.mdl").exists());
        let _ = fs::remove_dir_all(&src);
        let _ = fs::remove_dir_all(&dest);
    }

    #[test]
    fn deleted_sources_drop_out_of_the_next_archive() {
        let src = minimal_source("rerun_src", "grass", MAIN_LUA);
        fs::write(src.join("scripts").join("old.lua"), "return 0\n").expect("script");
        let dest = temp_dir("rerun_dest");
        let first = build(&src, &dest, &BuildOptions::default()).expect("first");
        let archive = read_archive(&first.archive).expect("archive");
        assert!(archive.entry_by_name("scripts/old.lua").is_some());

        fs::remove_file(src.join("scripts").join("old.lua")).expect("remove");
        fs::write(dest.join("notes.txt"), b"scratch").expect("write");
        let second = build(&src, &dest, &BuildOptions::default()).expect("second");
        let archive = read_archive(&second.archive).expect("archive");
        assert_eq!(
            archive.entry_names(),
            vec![
                "resources.tbl",
                "scripts/main.lua",
                "terrain/island.terra.client",
                "terrain/island.terra.sim",
                "textures/grass.tex",
            ]
        );
        let _ = fs::remove_dir_all(&src);
        let _ = fs::remove_dir_all(&dest);
    }

    #[test]
    fn texture_names_are_unique_across_groups() {
        let src = minimal_source("dup_src", "grass", MAIN_LUA);
        write_png(
            &src.join("ui").join("grass.png"),
            2,
            2,
            png::ColorType::Rgba,
            &[90u8; 2 * 2 * 4],
        );
        fs::write(
            src.join("cook.toml"),
            "[[textures]]\ndir = \"textures\"\n\n[[textures]]\ndir = \"ui\"\n",
        )
        .expect("config");
        let dest = temp_dir("dup_dest");
        let err = build(&src, &dest, &BuildOptions::default()).expect_err("duplicate");
        assert_eq!(err.kind(), ExitStatus::ValidationFailure);
        assert_eq!(err.unit(), "ui/grass.png");
        assert!(
            err.to_string().contains("already provided by 'textures/grass.png'"),
            "{}",
            err
        );
        assert!(!dest.join("assets.pak").exists());
        assert!(!dest.join("ui").join("grass.tex").exists());
        let _ = fs::remove_dir_all(&src);
        let _ = fs::remove_dir_all(&dest);
    }

    #[test]
    fn undecodable_terrain_is_a_validation_failure() {
        let src = minimal_source("latin1_src", "grass", MAIN_LUA);
        let mut text = island("grass").into_bytes();
        text.extend_from_slice(b"# caf\xe9\n");
        fs::write(src.join("terrain").join("island.terra"), text).expect("terrain");
        let dest = temp_dir("latin1_dest");
        let status = run(&src, &dest, &BuildOptions::default());
        assert_eq!(status, ExitStatus::ValidationFailure);
        let _ = fs::remove_dir_all(&src);
        let _ = fs::remove_dir_all(&dest);
    }

    #[test]
    fn clean_resets_destination_but_protects_source() {
        let src = minimal_source("clean_src", "grass", MAIN_LUA);
        let dest = temp_dir("clean_dest");
        fs::write(dest.join("leftover.bin"), b"old").expect("write");
        let options = BuildOptions {
            clean: true,
            archive_name: Some("game.pak".to_string()),
            ..BuildOptions::default()
        };
        build(&src, &dest, &options).expect("clean build");
        assert!(!dest.join("leftover.bin").exists());
        let archive = read_archive(&dest.join("game.pak")).expect("archive");
        assert_eq!(archive.entries().len(), 5);

        let err = build(&src, src.parent().expect("parent"), &options).expect_err("refused");
        assert_eq!(err.kind(), ExitStatus::ValidationFailure);
        assert!(src.join("scripts").join("main.lua").exists());
        let _ = fs::remove_dir_all(&src);
        let _ = fs::remove_dir_all(&dest);
    }
}
