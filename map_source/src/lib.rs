//! Authored source formats read by the asset cook: structural maps,
//! terrain descriptors, and class/fragment definitions (all TOML).
#![forbid(unsafe_code)]

mod defs;
mod structural;
mod terrain;

pub use defs::{ClassDef, FragmentDef};
pub use structural::{BoxSpec, BrushSpec, EntitySpec, FaceSpec, MapSource, ResolvedFace};
pub use terrain::{check_resolution, Interpolation, TerrainDescriptor};

/// Outcome of checking a source file: errors are fatal, warnings are only
/// reported.
#[derive(Clone, Debug, Default)]
pub struct SourceValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl SourceValidation {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Joins all errors into one message, or returns the warnings.
    pub fn into_result(self) -> Result<Vec<String>, String> {
        if self.errors.is_empty() {
            Ok(self.warnings)
        } else {
            Err(self.errors.join("; "))
        }
    }
}

pub(crate) fn vector_is_finite(value: [f32; 3]) -> bool {
    value.iter().all(|component| component.is_finite())
}
