//! ECMA-335 metadata physical layout.

pub mod headers;
pub mod streams;
pub mod tables;

use crate::bytes::{align4, ByteSliceExt};
use crate::error::{Error, Result};
use headers::{MetadataHeader, MetadataStreamHeader, METADATA_MAGIC};
use streams::blobs::BlobsHeap;
use streams::guids::GuidsHeap;
use streams::strings::StringsHeap;
use streams::user_strings::UserStringsHeap;
use tables::TableDescriptor;

/// The parsed metadata root: version string, the four named heaps and the
/// decoded table descriptor.
#[derive(Debug)]
pub struct MetadataRoot<'a> {
  pub version: String,
  pub strings: Option<StringsHeap<'a>>,
  pub user_strings: Option<UserStringsHeap<'a>>,
  pub blobs: Option<BlobsHeap<'a>>,
  pub guids: Option<GuidsHeap<'a>>,
  pub tables: Option<TableDescriptor>,
  /// Set when the table stream was named `#-` rather than `#~`: an
  /// "unoptimized", non-sorted representation some obfuscators and debug
  /// builds emit.
  pub uncompressed_metadata: bool,
  /// Canonical hyphenated GUID string taken from the first 16 bytes of the
  /// `#GUID` heap; this becomes the image's identity GUID.
  pub guid: String,
}

impl<'a> MetadataRoot<'a> {
  /// Parses the metadata root out of `data`, which must start at the file
  /// offset `cli_header.metadata.rva` maps to.
  pub fn parse(data: &'a [u8]) -> Result<Self> {
    let offset = &mut 0;
    let header: MetadataHeader = data
      .read(offset)
      .ok_or_else(|| Error::invalid("truncated metadata root header"))?;

    if header.signature != METADATA_MAGIC {
      return Err(Error::invalid("metadata root is missing the BSJB signature"));
    }

    let mut strings = None;
    let mut user_strings = None;
    let mut blobs = None;
    let mut guids = None;
    let mut tables_data: Option<&'a [u8]> = None;
    let mut uncompressed_metadata = false;

    for _ in 0..header.streams {
      let stream: MetadataStreamHeader = data
        .read(offset)
        .ok_or_else(|| Error::invalid("truncated stream header"))?;
      align4(offset);

      let stream_data = stream
        .data(data)
        .ok_or_else(|| Error::invalid("stream header points outside the metadata root"))?;

      match stream.name.to_bytes() {
        b"#~" => tables_data = Some(stream_data),
        b"#-" => {
          tables_data = Some(stream_data);
          uncompressed_metadata = true;
        }
        b"#Strings" => strings = Some(StringsHeap::new(stream_data)),
        b"#US" => user_strings = Some(UserStringsHeap::new(stream_data)),
        b"#Blob" => blobs = Some(BlobsHeap::new(stream_data)),
        b"#GUID" => guids = Some(GuidsHeap::new(stream_data)),
        other => log::warn!(
          "unrecognized metadata stream {:?}, skipping",
          String::from_utf8_lossy(other)
        ),
      }
    }

    let guid_heap = guids.ok_or_else(|| Error::invalid("metadata root has no #GUID heap"))?;
    if guid_heap.len() < 16 {
      return Err(Error::invalid("#GUID heap is smaller than one GUID"));
    }

    let guid = guid_heap
      .get_string(streams::guids::GuidId::new(0))
      .ok_or_else(|| Error::invalid("failed to read the image GUID"))?;

    let tables = tables_data.map(TableDescriptor::parse).transpose()?;

    Ok(Self {
      version: header.version.to_string_lossy().into_owned(),
      strings,
      user_strings,
      blobs,
      guids: Some(guid_heap),
      tables,
      uncompressed_metadata,
      guid,
    })
  }
}
