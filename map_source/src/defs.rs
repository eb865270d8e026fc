use serde::Deserialize;

use crate::SourceValidation;

/// `classes/<name>.toml`: a gameplay class naming the resources it uses.
#[derive(Clone, Debug, Deserialize)]
pub struct ClassDef {
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub textures: Vec<String>,
    #[serde(default)]
    pub sounds: Vec<String>,
    #[serde(default)]
    pub fragments: Vec<String>,
    #[serde(default)]
    pub health: f32,
}

/// `fragments/<name>.toml`: a debris piece spawned by classes.
#[derive(Clone, Debug, Deserialize)]
pub struct FragmentDef {
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub texture: Option<String>,
    #[serde(default)]
    pub sound: Option<String>,
    #[serde(default = "default_mass")]
    pub mass: f32,
}

fn default_mass() -> f32 {
    1.0
}

impl ClassDef {
    pub fn parse_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|err| err.to_string())
    }

    pub fn validate(&self) -> SourceValidation {
        let mut validation = SourceValidation::default();
        check_name("class", &self.name, &mut validation);
        if !self.health.is_finite() || self.health < 0.0 {
            validation.errors.push(format!(
                "class '{}' health must be finite and >= 0",
                self.name
            ));
        }
        let names = self
            .model
            .iter()
            .chain(&self.textures)
            .chain(&self.sounds)
            .chain(&self.fragments);
        for name in names {
            if name.trim().is_empty() {
                validation
                    .errors
                    .push(format!("class '{}' has an empty reference", self.name));
            }
        }
        validation
    }
}

impl FragmentDef {
    pub fn parse_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|err| err.to_string())
    }

    pub fn validate(&self) -> SourceValidation {
        let mut validation = SourceValidation::default();
        check_name("fragment", &self.name, &mut validation);
        if !self.mass.is_finite() || self.mass <= 0.0 {
            validation
                .errors
                .push(format!("fragment '{}' mass must be > 0", self.name));
        }
        for name in [&self.model, &self.texture, &self.sound].into_iter().flatten() {
            if name.trim().is_empty() {
                validation
                    .errors
                    .push(format!("fragment '{}' has an empty reference", self.name));
            }
        }
        validation
    }
}

fn check_name(what: &str, name: &str, validation: &mut SourceValidation) {
    if name.trim().is_empty() {
        validation
            .errors
            .push(format!("{} name must not be empty", what));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_defaults() {
        let class =
            ClassDef::parse_toml("name = \"barrel\"\ntextures = [\"wood\"]\n").expect("parse");
        assert_eq!(class.health, 0.0);
        assert!(class.model.is_none());
        assert!(class.validate().is_ok());
    }

    #[test]
    fn fragment_mass_defaults_and_is_checked() {
        let fragment = FragmentDef::parse_toml("name = \"splinter\"\n").expect("parse");
        assert_eq!(fragment.mass, 1.0);
        assert!(fragment.validate().is_ok());

        let heavy = FragmentDef::parse_toml("name = \"rock\"\nmass = 0.0\nsound = \"\"\n")
            .expect("parse");
        let validation = heavy.validate();
        assert_eq!(validation.errors.len(), 2);
    }

    #[test]
    fn unknown_fields_parse_errors_are_reported() {
        assert!(ClassDef::parse_toml("health = 3.0\n").is_err());
    }
}
