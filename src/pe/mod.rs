//! PE/COFF physical layout (ECMA-335 II.25).
//!
//! `headers` parses the MS-DOS stub, COFF header, PE32 optional header, data
//! directories and section table; `sections` maps RVAs to file offsets and
//! provides the lazily-mapped section pointer used by the rest of the
//! loader; `resource` walks the three-level `.rsrc` directory tree.

pub mod headers;
pub mod resource;
pub mod sections;
