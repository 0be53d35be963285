//! The [`RawBuffer`] accessor.
//!
//! Yields a read-only `&[u8]` view over an image's backing bytes, whether
//! they come from a memory-mapped file or a buffer supplied by the caller.
//! The view is kept alive for as long as any [`crate::image::Image`] built
//! on top of it is reachable, which in this crate means it is owned through
//! an `Arc` rather than borrowed with a lifetime parameter: images are
//! cached and handed out to arbitrary threads, so a borrowed slice tied to a
//! caller's stack frame would not outlive its lookup in the registry.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

use crate::error::Result;

enum Backing {
  Mapped(Mmap),
  Owned(Arc<[u8]>),
}

/// A contiguous, read-only byte region backing an [`crate::image::Image`].
pub struct RawBuffer {
  backing: Backing,
  /// True when this crate made its own allocation/mapping for the data
  /// (file-backed images, or buffer-backed images opened with `copy = true`).
  /// False when the bytes are a shared reference into a caller-supplied
  /// buffer.
  owns_raw_data: bool,
}

impl RawBuffer {
  /// Memory-maps `path` read-only. Always "owns" its data: the mapping is
  /// torn down when the buffer is dropped.
  pub fn from_path(path: &Path) -> Result<Self> {
    let file = File::open(path)?;
    // Safety: the mapping is read-only and this type never hands out a
    // `&'static` slice past its own lifetime; concurrent external writers
    // to the same file are outside this crate's contract (matching every
    // mmap-backed loader in the ecosystem).
    let mmap = unsafe { Mmap::map(&file)? };

    Ok(Self {
      backing: Backing::Mapped(mmap),
      owns_raw_data: true,
    })
  }

  /// Wraps caller-supplied bytes. When `copy` is true the bytes are
  /// duplicated into a fresh allocation this crate owns outright; mutating
  /// the caller's original buffer afterwards has no effect on the returned
  /// [`RawBuffer`]. When `copy` is false the `Arc` is cloned, sharing the
  /// allocation with the caller.
  pub fn from_data(data: Arc<[u8]>, copy: bool) -> Self {
    if copy {
      Self {
        backing: Backing::Owned(Arc::from(&data[..])),
        owns_raw_data: true,
      }
    } else {
      Self {
        backing: Backing::Owned(data),
        owns_raw_data: false,
      }
    }
  }

  #[inline]
  pub fn as_slice(&self) -> &[u8] {
    match &self.backing {
      Backing::Mapped(mmap) => &mmap[..],
      Backing::Owned(data) => data,
    }
  }

  #[inline]
  pub fn len(&self) -> usize {
    self.as_slice().len()
  }

  #[inline]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  #[inline]
  pub fn owns_raw_data(&self) -> bool {
    self.owns_raw_data
  }
}

impl std::fmt::Debug for RawBuffer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RawBuffer")
      .field("len", &self.len())
      .field("owns_raw_data", &self.owns_raw_data)
      .finish()
  }
}
