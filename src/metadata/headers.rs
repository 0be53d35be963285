//! Metadata root and stream header records.

use crate::bytes::{align4, bitflags, BoundedCString, ByteSliceExt, FromBytes, LengthPrefixed};
use std::ffi::CStr;

/// The magic signature for the CLI metadata header (`BSJB`).
pub const METADATA_MAGIC: u32 = 0x424A5342;

/// A stream name is never trusted to run past this many bytes looking for a
/// terminator; every well-known stream name is well under it.
pub const MAX_STREAM_NAME: usize = 32;

/// The metadata root header (ECMA-335 II.24.2.1): signature, version
/// strings, flags and stream count.
#[derive(Debug)]
pub struct MetadataHeader<'a> {
  pub signature: u32,
  pub major_version: u16,
  pub minor_version: u16,
  pub reserved: u32,
  pub version: &'a CStr,
  pub flags: u16,
  pub streams: u16,
}

impl<'a> FromBytes<'a> for MetadataHeader<'a> {
  fn from_bytes(buf: &'a [u8], offset: &mut usize, _: ()) -> Option<Self> {
    let signature = buf.read(offset)?;
    let major_version = buf.read(offset)?;
    let minor_version = buf.read(offset)?;
    let reserved = buf.read(offset)?;
    let version = buf.read_with(offset, LengthPrefixed)?;
    align4(offset);
    let flags = buf.read(offset)?;
    let streams = buf.read(offset)?;

    Some(Self {
      signature,
      major_version,
      minor_version,
      reserved,
      version,
      flags,
      streams,
    })
  }
}

/// A single `#~`/`#Strings`/`#US`/`#Blob`/`#GUID` stream header (ECMA-335
/// II.24.2.2): an offset/size pair relative to the metadata root, followed
/// by a nul-terminated, 4-byte-padded name.
#[derive(Debug)]
pub struct MetadataStreamHeader<'a> {
  pub offset: u32,
  pub size: u32,
  pub name: &'a CStr,
}

impl<'a> MetadataStreamHeader<'a> {
  /// Slices this stream's bytes out of the metadata root buffer.
  pub fn data(&self, metadata: &'a [u8]) -> Option<&'a [u8]> {
    let beg = self.offset as usize;
    let end = beg.saturating_add(self.size as usize);

    metadata.get(beg..end)
  }

  pub fn name_str(&self) -> &str {
    self.name.to_str().unwrap_or("")
  }
}

impl<'a> FromBytes<'a> for MetadataStreamHeader<'a> {
  fn from_bytes(buf: &'a [u8], offset: &mut usize, _: ()) -> Option<Self> {
    let stream_offset = buf.read(offset)?;
    let size = buf.read(offset)?;
    let name = buf.read_with(offset, BoundedCString { limit: MAX_STREAM_NAME })?;
    align4(offset);

    Some(Self {
      offset: stream_offset,
      size,
      name,
    })
  }
}

bitflags! {
  /// `#~`/`#-` stream `HeapSizes` bit vector: which heaps use a 4-byte
  /// index instead of a 2-byte one (ECMA-335 II.24.2.6).
  #[derive(Default, Clone, Copy)]
  pub struct HeapSizes: u8 {
    const WIDE_STRING_HEAP = 0x01;
    const WIDE_GUID_HEAP = 0x02;
    const WIDE_BLOB_HEAP = 0x04;
  }
}
