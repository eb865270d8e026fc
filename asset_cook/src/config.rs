//! `cook.toml`: stage directories, copy rules, and texture groups.
use std::path::{Component, Path};

use cook_formats::resource_table::ResourceKind;
use cook_formats::texture::{MagFilter, MinFilter, SamplerSettings};
use serde::Deserialize;

use crate::error::CookError;
use crate::texture_build::TextureSettings;
use crate::unit::{read_source, DEFAULT_MAX_DEPTH};

pub const CONFIG_FILE_NAME: &str = "cook.toml";
pub const DEFAULT_ARCHIVE_NAME: &str = "assets.pak";

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CookConfig {
    pub dirs: StageDirs,
    pub copy: Vec<CopyRule>,
    pub textures: Vec<TextureGroup>,
    pub archive_name: String,
    pub bsp: BspSettings,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StageDirs {
    pub terrain: String,
    pub maps: String,
    pub models: String,
    pub classes: String,
    pub fragments: String,
    pub scripts: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CopyRule {
    pub dir: String,
    /// Case-insensitive, without the dot. Empty copies every file.
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default = "default_true")]
    pub recurse: bool,
    /// Registers copied files as resources of this kind.
    #[serde(default)]
    pub resource: Option<ResourceKind>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextureGroup {
    pub dir: String,
    #[serde(default = "default_true")]
    pub wrap: bool,
    #[serde(default)]
    pub mag_filter: MagFilter,
    #[serde(default)]
    pub min_filter: MinFilter,
    #[serde(default = "default_true")]
    pub require_power_of_two: bool,
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BspSettings {
    pub max_depth: u32,
}

fn default_true() -> bool {
    true
}

impl Default for CookConfig {
    fn default() -> Self {
        Self {
            dirs: StageDirs::default(),
            copy: vec![
                CopyRule {
                    dir: "sounds".to_string(),
                    extensions: vec!["wav".to_string(), "ogg".to_string()],
                    recurse: true,
                    resource: Some(ResourceKind::Sound),
                },
                CopyRule {
                    dir: "scripts".to_string(),
                    extensions: vec!["lua".to_string()],
                    recurse: true,
                    resource: None,
                },
            ],
            textures: vec![TextureGroup::new("textures")],
            archive_name: DEFAULT_ARCHIVE_NAME.to_string(),
            bsp: BspSettings::default(),
        }
    }
}

impl Default for StageDirs {
    fn default() -> Self {
        Self {
            terrain: "terrain".to_string(),
            maps: "maps".to_string(),
            models: "models".to_string(),
            classes: "classes".to_string(),
            fragments: "fragments".to_string(),
            scripts: "scripts".to_string(),
        }
    }
}

impl Default for BspSettings {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl TextureGroup {
    pub fn new(dir: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            wrap: true,
            mag_filter: MagFilter::default(),
            min_filter: MinFilter::default(),
            require_power_of_two: true,
        }
    }

    pub fn settings(&self) -> TextureSettings {
        TextureSettings {
            sampler: SamplerSettings {
                wrap: self.wrap,
                mag_filter: self.mag_filter,
                min_filter: self.min_filter,
            },
            require_power_of_two: self.require_power_of_two,
        }
    }
}

impl CookConfig {
    pub fn parse_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|err| err.to_string())
    }

    /// Reads `explicit` when given, else `<source_root>/cook.toml` when it
    /// exists, else the defaults.
    pub fn load(source_root: &Path, explicit: Option<&Path>) -> Result<Self, CookError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = source_root.join(CONFIG_FILE_NAME);
                if !path.is_file() {
                    return Ok(Self::default());
                }
                path
            }
        };
        let unit = format!("config '{}'", path.display());
        let text = read_source(&path, &unit)?;
        let config = Self::parse_toml(&text).map_err(|err| CookError::validation(&unit, err))?;
        config
            .validate()
            .map_err(|errors| CookError::validation(&unit, errors.join("; ")))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let dirs = [
            ("dirs.terrain", &self.dirs.terrain),
            ("dirs.maps", &self.dirs.maps),
            ("dirs.models", &self.dirs.models),
            ("dirs.classes", &self.dirs.classes),
            ("dirs.fragments", &self.dirs.fragments),
            ("dirs.scripts", &self.dirs.scripts),
        ];
        for (field, dir) in dirs {
            check_dir(field, dir, &mut errors);
        }
        for rule in &self.copy {
            check_dir("copy.dir", &rule.dir, &mut errors);
            if rule.extensions.iter().any(|ext| ext.trim().is_empty() || ext.starts_with('.')) {
                errors.push(format!(
                    "copy rule '{}' extensions must be non-empty and have no leading dot",
                    rule.dir
                ));
            }
        }
        for group in &self.textures {
            check_dir("textures.dir", &group.dir, &mut errors);
        }
        let archive = Path::new(&self.archive_name);
        let plain_name = matches!(
            archive.components().collect::<Vec<_>>().as_slice(),
            [Component::Normal(_)]
        );
        if !plain_name {
            errors.push(format!(
                "archive_name '{}' must be a plain file name",
                self.archive_name
            ));
        }
        if self.bsp.max_depth == 0 {
            errors.push("bsp.max_depth must be > 0".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn check_dir(field: &str, dir: &str, errors: &mut Vec<String>) {
    let path = Path::new(dir);
    let relative = !dir.trim().is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
    if !relative {
        errors.push(format!("{} '{}' must be a relative directory", field, dir));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use crate::test_support::temp_dir;

    #[test]
    fn defaults_cover_every_stage() {
        let config = CookConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.archive_name, "assets.pak");
        assert_eq!(config.bsp.max_depth, 64);
        assert_eq!(config.copy[0].resource, Some(ResourceKind::Sound));
        let settings = config.textures[0].settings();
        assert!(settings.sampler.wrap);
        assert!(settings.require_power_of_two);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let text = r#"
archive_name = "game.pak"

[dirs]
maps = "levels"

[[textures]]
dir = "ui"
wrap = false
mag_filter = "nearest"
min_filter = "nearest"
require_power_of_two = false

[bsp]
max_depth = 12
"#;
        let config = CookConfig::parse_toml(text).expect("parse");
        assert!(config.validate().is_ok());
        assert_eq!(config.dirs.maps, "levels");
        assert_eq!(config.dirs.terrain, "terrain");
        assert_eq!(config.copy.len(), 2);
        assert_eq!(config.textures.len(), 1);
        assert_eq!(config.textures[0].min_filter, MinFilter::Nearest);
        assert_eq!(config.bsp.max_depth, 12);
    }

    #[test]
    fn rejects_escaping_paths() {
        let text = "archive_name = \"../out.pak\"\n[dirs]\nscripts = \"../elsewhere\"\n";
        let config = CookConfig::parse_toml(text).expect("parse");
        let errors = config.validate().expect_err("invalid");
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let dir = temp_dir("config");
        let config = CookConfig::load(&dir, None).expect("defaults");
        assert_eq!(config.archive_name, DEFAULT_ARCHIVE_NAME);

        fs::write(dir.join(CONFIG_FILE_NAME), "archive_name = 3\n").expect("write");
        let err = CookConfig::load(&dir, None).expect_err("bad type");
        assert_eq!(err.kind(), crate::ExitStatus::ValidationFailure);

        let err = CookConfig::load(&dir, Some(&dir.join("absent.toml"))).expect_err("missing");
        assert_eq!(err.kind(), crate::ExitStatus::IoFailure);
        let _ = fs::remove_dir_all(&dir);
    }
}
