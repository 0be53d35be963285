//! The `#Blob` metadata stream.

use crate::bytes::{ByteSize, ByteSliceExt, CompressedLength, FromBytes};
use crate::metadata::headers::HeapSizes;
use std::fmt;

/// A handle to a blob of bytes in the `#Blob` metadata stream.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlobId(usize);

/// The `#Blob` heap.
///
/// Contains blobs of bytes prefixed with a variable length integer indicating the length of the
/// blob.
#[repr(transparent)]
#[derive(Default, Clone, Copy)]
pub struct BlobsHeap<'a>(pub(crate) &'a [u8]);

impl BlobId {
  pub fn new(offset: usize) -> Self {
    Self(offset)
  }
}

impl<'a> BlobsHeap<'a> {
  pub fn new(data: &'a [u8]) -> Self {
    Self(data)
  }

  /// Returns the blob at the given [BlobId].
  ///
  /// Will return `None` if the given id is out of bounds.
  pub fn get(&self, id: BlobId) -> Option<&'a [u8]> {
    let mut offset = id.0;

    let len = self.0.read_with(&mut offset, CompressedLength)?;
    self.0.read_with(&mut offset, len)
  }
}

impl fmt::Debug for BlobsHeap<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("BlobsHeap").finish()
  }
}

impl FromBytes<'_, HeapSizes> for BlobId {
  #[inline]
  fn from_bytes(buf: &[u8], offset: &mut usize, heap_sizes: HeapSizes) -> Option<Self> {
    Some(Self(match Self::byte_size(heap_sizes) {
      4 => buf.read::<u32>(offset)? as _,
      2 => buf.read::<u16>(offset)? as _,
      _ => unreachable!(),
    }))
  }
}

impl ByteSize<HeapSizes> for BlobId {
  #[inline]
  fn byte_size(heap_sizes: HeapSizes) -> usize {
    match heap_sizes.contains(HeapSizes::WIDE_BLOB_HEAP) {
      true => 4,
      false => 2,
    }
  }
}
