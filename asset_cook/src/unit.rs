use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

use cook_formats::resource_table::ResourceKind;
use walkdir::WalkDir;

use crate::error::CookError;
use crate::texture_build::TextureSettings;
use crate::{bsp_cook, model_build, terra_build, texture_build};

pub const DEFAULT_MAX_DEPTH: u32 = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnitKind {
    Texture,
    Terrain,
    Structural,
    Model,
    Script,
}

// Source extension per kind.
const EXTENSIONS: [(&str, UnitKind); 5] = [
    ("png", UnitKind::Texture),
    ("terra", UnitKind::Terrain),
    ("map", UnitKind::Structural),
    ("obj", UnitKind::Model),
    ("lua", UnitKind::Script),
];

impl UnitKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        EXTENSIONS
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(ext))
            .map(|(_, kind)| *kind)
    }

    pub fn extension(self) -> &'static str {
        EXTENSIONS
            .iter()
            .find(|(_, kind)| *kind == self)
            .map(|(ext, _)| *ext)
            .unwrap_or("")
    }

    pub fn label(self) -> &'static str {
        match self {
            UnitKind::Texture => "texture",
            UnitKind::Terrain => "terrain",
            UnitKind::Structural => "map",
            UnitKind::Model => "model",
            UnitKind::Script => "script",
        }
    }
}

/// Per-unit knobs taken from the cook configuration.
#[derive(Clone, Debug)]
pub struct UnitConfig {
    pub texture: TextureSettings,
    pub max_depth: u32,
    /// Source texture directories; model materials resolve against them.
    pub texture_dirs: Vec<PathBuf>,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            texture: TextureSettings::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            texture_dirs: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BuildUnit {
    pub kind: UnitKind,
    pub source: PathBuf,
    /// Source path relative to its stage directory, without extension.
    pub name: String,
    pub config: UnitConfig,
}

impl BuildUnit {
    pub fn new(
        kind: UnitKind,
        source: PathBuf,
        name: impl Into<String>,
        config: UnitConfig,
    ) -> Self {
        Self {
            kind,
            source,
            name: name.into(),
            config,
        }
    }

    pub fn label(&self) -> String {
        format!("{} '{}'", self.kind.label(), self.name)
    }
}

/// One file of a unit, relative to the stage's destination directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputFile {
    pub rel_path: String,
    pub bytes: Vec<u8>,
}

impl OutputFile {
    pub fn new(rel_path: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            rel_path: rel_path.into(),
            bytes,
        }
    }
}

/// Symbolic name emitted by a builder, resolved later by the tagger.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
    pub referrer: String,
}

impl ResourceRef {
    pub fn texture(name: impl Into<String>, referrer: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Texture,
            name: name.into(),
            referrer: referrer.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' (from {})", self.kind, self.name, self.referrer)
    }
}

#[derive(Clone, Debug, Default)]
pub struct CompiledUnit {
    pub outputs: Vec<OutputFile>,
    pub references: Vec<ResourceRef>,
    pub provides: Vec<(ResourceKind, String)>,
    pub warnings: Vec<String>,
}

pub fn compile(unit: &BuildUnit) -> Result<CompiledUnit, CookError> {
    match unit.kind {
        UnitKind::Texture => texture_build::compile(unit),
        UnitKind::Terrain => terra_build::compile(unit),
        UnitKind::Structural => bsp_cook::compile(unit),
        UnitKind::Model => model_build::compile(unit),
        UnitKind::Script => {
            let checker = script_check::ScriptChecker::new();
            checker
                .check_file(&unit.source, &format!("{}.lua", unit.name))
                .map_err(|err| script_error(unit, err))?;
            Ok(CompiledUnit::default())
        }
    }
}

pub(crate) fn script_error(unit: &BuildUnit, err: script_check::ScriptError) -> CookError {
    match err {
        script_check::ScriptError::Io { source, .. } => CookError::io(unit.label(), source),
        err @ script_check::ScriptError::Syntax { .. } => CookError::validation(unit.label(), err),
    }
}

/// Every source of `kind` under `dir`, recursively, in sorted path order.
/// A missing directory yields no units.
pub fn discover(
    dir: &Path,
    kind: UnitKind,
    config: &UnitConfig,
) -> Result<Vec<BuildUnit>, CookError> {
    let mut units = Vec::new();
    if !dir.is_dir() {
        return Ok(units);
    }
    for path in walk_files(dir, true)? {
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(UnitKind::from_extension)
            == Some(kind);
        if !matches {
            continue;
        }
        let name = resource_name(dir, &path);
        units.push(BuildUnit::new(kind, path, name, config.clone()));
    }
    Ok(units)
}

/// Regular files under `dir` in sorted order.
pub(crate) fn walk_files(dir: &Path, recurse: bool) -> Result<Vec<PathBuf>, CookError> {
    let mut walker = WalkDir::new(dir).sort_by_file_name();
    if !recurse {
        walker = walker.max_depth(1);
    }
    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|err| {
            let label = err
                .path()
                .unwrap_or(dir)
                .display()
                .to_string();
            let source = err
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
            CookError::io(label, source)
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// `/`-separated path of `path` relative to `root`, without `.` segments.
pub(crate) fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .filter(|component| !matches!(component, Component::CurDir))
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Reads a text source. Bytes that are not UTF-8 are bad input.
pub(crate) fn read_source(path: &Path, label: &str) -> Result<String, CookError> {
    let bytes = fs::read(path).map_err(|err| CookError::io(label, err))?;
    String::from_utf8(bytes).map_err(|err| {
        CookError::validation(label, format!("source is not valid UTF-8: {}", err.utf8_error()))
    })
}

/// Relative path with the final extension removed.
pub(crate) fn resource_name(root: &Path, path: &Path) -> String {
    relative_path(root, &path.with_extension(""))
}
