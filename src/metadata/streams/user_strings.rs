//! The `#US` (user strings) metadata stream.

use crate::bytes::{ByteSliceExt, CompressedLength};
use std::fmt;

/// A handle to a string in the `#US` metadata stream.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserStringId(usize);

/// A `#US` heap.
///
/// Contains UTF-16 strings prefixed with a variable length integer indicating the length of the
/// string.
#[repr(transparent)]
#[derive(Default, Clone, Copy)]
pub struct UserStringsHeap<'a>(pub(crate) &'a [u8]);

impl<'a> UserStringsHeap<'a> {
  pub fn new(data: &'a [u8]) -> Self {
    Self(data)
  }

  /// Returns the UTF-16LE encoded bytes of the string at `id` (the trailing encoding-hint byte,
  /// if present, is included).
  ///
  /// Will return `None` if the given id is out of bounds.
  pub fn get(&self, id: UserStringId) -> Option<&'a [u8]> {
    let mut offset = id.0;

    let len = self.0.read_with(&mut offset, CompressedLength)?;
    self.0.read_with(&mut offset, len)
  }
}

impl fmt::Debug for UserStringsHeap<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("UserStringsHeap").finish()
  }
}
