//! Asset cooking: per-format builders, resource tagging, packaging, and the
//! stage orchestrator that runs them over a source tree.
#![forbid(unsafe_code)]

pub mod bsp_cook;
mod bsp_tree;
pub mod config;
pub mod copier;
mod error;
pub mod model_build;
pub mod packer;
pub mod pipeline;
pub mod staging;
pub mod tagger;
pub mod terra_build;
pub mod texture_build;
pub mod unit;

#[cfg(test)]
mod test_support;

pub use config::{CookConfig, CopyRule, TextureGroup};
pub use error::{CookError, ExitStatus};
pub use packer::{pack, pack_files, ArchiveSummary};
pub use pipeline::{build, run, BuildOptions, BuildSummary};
pub use tagger::{tag, Inventory, Tagged};
pub use texture_build::TextureSettings;
pub use unit::{BuildUnit, CompiledUnit, OutputFile, ResourceRef, UnitConfig, UnitKind};
