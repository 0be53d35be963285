//! The named metadata heaps: `#Strings`, `#US`, `#Blob` and `#GUID`.
//!
//! The table stream (`#~`/`#-`) is decoded separately by
//! [`crate::metadata::tables`], since its row-count header is the only part
//! of it this crate interprets.

pub mod blobs;
pub mod guids;
pub mod strings;
pub mod user_strings;
