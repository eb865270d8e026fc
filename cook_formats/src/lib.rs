//! Runtime binary formats produced by the asset cook.
//!
//! Every file starts with a four byte magic followed by a `u32` version.
//! All records are little-endian.
#![forbid(unsafe_code)]

pub mod archive;
pub mod bsp;
pub mod codec;
pub mod defs;
pub mod mesh;
pub mod resource_table;
pub mod terra;
pub mod texture;

pub use codec::{CodecError, Reader, Writer};
