//! A loader and random-access reader for CLI managed-code images: PE/COFF
//! headers, the CLI header, and the ECMA-335 metadata root and heaps.
//!
//! This crate does not decode individual metadata table rows (types,
//! methods, signatures, generics); that's the rest of the metadata system,
//! built on top of the row counts exposed here via
//! [`metadata::tables::TableDescriptor`] and the [`modules::TableRowSource`]
//! contract it consumes.
//!
//! The entry points are [`registry::Registry::open`] for file-backed images
//! and [`registry::Registry::open_from_data`] for buffer-backed ones;
//! [`registry::Registry::global`] is the process-wide cache most embedders
//! use.

mod bytes;
mod cli;
mod error;
pub mod image;
pub mod metadata;
pub mod modules;
pub mod pe;
mod raw_buffer;
pub mod registry;

#[cfg(test)]
mod test_fixtures;

pub use crate::error::{Error, Result};
pub use crate::image::Image;
pub use crate::registry::{Config, Registry};
