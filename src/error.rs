//! Error taxonomy for the loader.
//!
//! Three kinds of failure cross the crate boundary: I/O failures from the
//! host OS, format failures detected while parsing, and the reserved
//! `MissingAssemblyRef` the loader sets aside for the (external) assembly
//! binder. Non-fatal anomalies (unknown stream names, non-zero reserved CLI
//! header fields, out-of-range table bits) are not errors at all, they are
//! logged via the `log` crate and parsing continues. Missing optional data
//! is not an error either; accessors like
//! [`crate::image::Image::resource`] return `Option::None`.

use std::io;

/// The crate's error type. `Display` plays the role of `strerror`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// An underlying OS error occurred opening or mapping the backing file.
  #[error("{0}")]
  Io(#[from] io::Error),

  /// The image failed to parse: bad signature, an offset outside the
  /// buffer, or a structural inconsistency. `reason` identifies which check
  /// failed.
  #[error("image invalid: {reason}")]
  Invalid { reason: &'static str },

  /// Reserved for the assembly-loading layer; the core never returns this
  /// itself.
  #[error("missing assembly reference")]
  MissingAssemblyRef,
}

impl Error {
  pub(crate) fn invalid(reason: &'static str) -> Self {
    Self::Invalid { reason }
  }
}

pub type Result<T> = std::result::Result<T, Error>;
