//! Synthetic minimal CLI images for this crate's own unit tests.
//!
//! Builds the smallest byte layout this crate's own parser accepts: one PE
//! section, a CLI header with no strong name or resources, and a metadata
//! root carrying only the heaps a given test needs. Offsets are computed
//! from actual content lengths rather than hardcoded, so changing a
//! fixture's strings or streams never desynchronizes the PE header fields
//! that point at them.

use crate::metadata::headers::METADATA_MAGIC;
use crate::pe::headers::OPTIONAL_HEADER32_SIZE;

const SECTION_VIRTUAL_ADDRESS: u32 = 0x2000;

fn stream_header(name: &str, offset: u32, size: u32) -> Vec<u8> {
  let mut buf = Vec::new();
  buf.extend_from_slice(&offset.to_le_bytes());
  buf.extend_from_slice(&size.to_le_bytes());
  buf.extend_from_slice(name.as_bytes());
  buf.push(0);
  while buf.len() % 4 != 0 {
    buf.push(0);
  }
  buf
}

/// Assembles a metadata root with the given named streams, computing each
/// stream's offset (relative to the root) from the preceding streams'
/// payload lengths.
fn metadata_root(streams: &[(&str, Vec<u8>)]) -> Vec<u8> {
  let mut buf = Vec::new();
  buf.extend_from_slice(&METADATA_MAGIC.to_le_bytes());
  buf.extend_from_slice(&1u16.to_le_bytes()); // major
  buf.extend_from_slice(&1u16.to_le_bytes()); // minor
  buf.extend_from_slice(&0u32.to_le_bytes()); // reserved

  let version: &[u8] = b"v4.0.30319\0\0";
  buf.extend_from_slice(&(version.len() as u32).to_le_bytes());
  buf.extend_from_slice(version);

  buf.extend_from_slice(&0u16.to_le_bytes()); // flags
  buf.extend_from_slice(&(streams.len() as u16).to_le_bytes());

  let headers_len: usize = streams
    .iter()
    .map(|(name, data)| stream_header(name, 0, data.len() as u32).len())
    .sum();
  let data_start = buf.len() + headers_len;

  let mut offset = data_start;
  for (name, data) in streams {
    buf.extend_from_slice(&stream_header(name, offset as u32, data.len() as u32));
    offset += data.len();
  }
  for (_, data) in streams {
    buf.extend_from_slice(data);
  }

  buf
}

/// The fixed-size portion of a CLI header (ECMA-335 II.25.3.3): `cb`
/// through `entry_point_token`, plus the 14 trailing data directories
/// (`resources` through `ip_map`), all zeroed except whichever ones the
/// caller patches in afterwards.
fn cli_header_bytes(metadata_rva: u32, metadata_size: u32, entry_point: u32) -> Vec<u8> {
  let mut buf = Vec::new();
  buf.extend_from_slice(&72u32.to_le_bytes()); // cb
  buf.extend_from_slice(&2u16.to_le_bytes()); // major_runtime_version
  buf.extend_from_slice(&5u16.to_le_bytes()); // minor_runtime_version
  buf.extend_from_slice(&metadata_rva.to_le_bytes());
  buf.extend_from_slice(&metadata_size.to_le_bytes());
  buf.extend_from_slice(&1u32.to_le_bytes()); // flags: COMIMAGE_FLAGS_ILONLY
  buf.extend_from_slice(&entry_point.to_le_bytes());
  for _ in 0..14 {
    // resources .. ip_map
    buf.extend_from_slice(&[0u8; 8]);
  }
  buf
}

/// Builds a full PE32+CLI+metadata image. `module_ref_count` and
/// `file_count` become the row counts of a `#~` stream (no row bytes
/// follow the header, since this crate never decodes row contents, see
/// [`crate::metadata::tables::TableDescriptor`]). `extra_strings` is
/// appended to the `#Strings` heap after the mandatory leading NUL.
fn build(module_ref_count: u32, file_count: u32, extra_strings: &[u8]) -> Vec<u8> {
  // -- metadata root ---------------------------------------------------
  let mut strings = vec![0u8];
  strings.extend_from_slice(extra_strings);

  let guid = [0xABu8; 16];

  let mut tables_stream = Vec::new();
  if module_ref_count > 0 || file_count > 0 {
    tables_stream.extend_from_slice(&0u32.to_le_bytes()); // reserved
    tables_stream.push(2); // major
    tables_stream.push(0); // minor
    tables_stream.push(0); // heap_sizes: narrow heaps
    tables_stream.push(0); // reserved

    let valid_mask: u64 = (if module_ref_count > 0 { 1u64 << 0x1A } else { 0 }) | (if file_count > 0 { 1u64 << 0x26 } else { 0 });
    tables_stream.extend_from_slice(&valid_mask.to_le_bytes());
    tables_stream.extend_from_slice(&0u64.to_le_bytes()); // sorted_mask

    // Row counts follow in ascending table-id order.
    if module_ref_count > 0 {
      tables_stream.extend_from_slice(&module_ref_count.to_le_bytes());
    }
    if file_count > 0 {
      tables_stream.extend_from_slice(&file_count.to_le_bytes());
    }
  }

  let mut streams: Vec<(&str, Vec<u8>)> = vec![("#Strings", strings), ("#GUID", guid.to_vec())];
  if !tables_stream.is_empty() {
    streams.push(("#~", tables_stream));
  }

  let metadata = metadata_root(&streams);

  // -- CLI header --------------------------------------------------------
  let cli_header_rva = SECTION_VIRTUAL_ADDRESS;
  // The metadata root follows the CLI header directly within the section;
  // the header's own encoded length doesn't depend on the RVA value, so
  // its size is known before the RVA that goes inside it is.
  let cli_header_len = cli_header_bytes(0, 0, 0).len();
  let metadata_rva = cli_header_rva + cli_header_len as u32;
  let cli_header = cli_header_bytes(metadata_rva, metadata.len() as u32, 0x0600_0001);

  let mut payload = Vec::new();
  payload.extend_from_slice(&cli_header);
  payload.extend_from_slice(&metadata);

  // -- PE/COFF headers -----------------------------------------------------
  let mut buf = vec![0u8; 64];
  buf[0..2].copy_from_slice(b"MZ");
  buf[60..64].copy_from_slice(&64u32.to_le_bytes()); // e_lfanew

  buf.extend_from_slice(b"PE\0\0");

  buf.extend_from_slice(&0x14cu16.to_le_bytes()); // machine: I386
  buf.extend_from_slice(&1u16.to_le_bytes()); // number_of_sections
  buf.extend_from_slice(&0u32.to_le_bytes()); // time_date_stamp
  buf.extend_from_slice(&0u32.to_le_bytes()); // pointer_to_symbol_table
  buf.extend_from_slice(&0u32.to_le_bytes()); // number_of_symbols
  buf.extend_from_slice(&(OPTIONAL_HEADER32_SIZE as u16).to_le_bytes());
  buf.extend_from_slice(&0u16.to_le_bytes()); // characteristics

  buf.extend_from_slice(&0x10bu16.to_le_bytes()); // magic: PE32
  buf.extend_from_slice(&[6, 0]); // linker version 6.0
  buf.resize(buf.len() + (96 - 4), 0); // remaining OptionalHeader32 fixed fields

  for i in 0..16u32 {
    if i == 14 {
      buf.extend_from_slice(&cli_header_rva.to_le_bytes());
      buf.extend_from_slice(&(cli_header.len() as u32).to_le_bytes());
    } else {
      buf.extend_from_slice(&0u32.to_le_bytes());
      buf.extend_from_slice(&0u32.to_le_bytes());
    }
  }

  // -- section table: one section holding the whole payload -------------
  let section_header_start = buf.len();
  let raw_data_ptr = (section_header_start + 40) as u32;
  buf.extend_from_slice(b".text\0\0\0");
  buf.extend_from_slice(&(payload.len() as u32).to_le_bytes()); // virtual_size
  buf.extend_from_slice(&SECTION_VIRTUAL_ADDRESS.to_le_bytes());
  buf.extend_from_slice(&(payload.len() as u32).to_le_bytes()); // raw_data_size
  buf.extend_from_slice(&raw_data_ptr.to_le_bytes());
  buf.extend_from_slice(&0u32.to_le_bytes()); // reloc_ptr
  buf.extend_from_slice(&0u32.to_le_bytes()); // lineno_ptr
  buf.extend_from_slice(&0u16.to_le_bytes()); // reloc_count
  buf.extend_from_slice(&0u16.to_le_bytes()); // line_count
  buf.extend_from_slice(&0u32.to_le_bytes()); // flags

  debug_assert_eq!(raw_data_ptr as usize, buf.len());
  buf.extend_from_slice(&payload);

  buf
}

/// A minimal but complete CLI image: one section, no ModuleRef/File rows,
/// GUID and `#Strings` heaps present.
pub fn minimal_cli_image() -> Vec<u8> {
  build(0, 0, &[])
}

/// Like [`minimal_cli_image`], but declares `count` `ModuleRef` rows (no
/// `File` table), for exercising `Image::module_count` and the module
/// graph loader's row-count-driven slot allocation.
pub fn cli_image_with_module_row_count(count: u32) -> Vec<u8> {
  build(count, 0, b"child.dll\0")
}

/// Like [`cli_image_with_module_row_count`], but also declares a nonempty
/// `File` table (row count only; this crate never decodes row contents,
/// see [`crate::metadata::tables::TableDescriptor`]), with `"other.dll"`
/// appended to the `#Strings` heap after `"child.dll"`, for exercising the
/// "nonempty File table, no matching row" rejection boundary.
pub fn cli_image_with_module_and_file_row_counts(module_ref_count: u32, file_count: u32) -> Vec<u8> {
  build(module_ref_count, file_count, b"child.dll\0other.dll\0")
}

/// Offset of `"child.dll"` within the `#Strings` heap built by
/// [`cli_image_with_module_row_count`] (and friends): index 0 is the
/// mandatory leading NUL, so the first real string starts at 1.
pub const CHILD_DLL_NAME_OFFSET: u16 = 1;

/// Offset of `"other.dll"` within the `#Strings` heap built by
/// [`cli_image_with_module_and_file_row_counts`]: immediately after
/// `"child.dll\0"` (10 bytes including its own NUL), past the leading NUL.
pub const OTHER_DLL_NAME_OFFSET: u16 = 1 + 10;

/// Like [`cli_header_bytes`], but with explicit `resources`/`strong_name`
/// data directories instead of leaving them zeroed, for exercising
/// [`crate::image::Image::resource`] and
/// [`crate::image::Image::strong_name`]/`strong_name_position`.
fn cli_header_bytes_with_dirs(metadata_rva: u32, metadata_size: u32, resources: (u32, u32), strong_name: (u32, u32)) -> Vec<u8> {
  let mut buf = Vec::new();
  buf.extend_from_slice(&72u32.to_le_bytes()); // cb
  buf.extend_from_slice(&2u16.to_le_bytes()); // major_runtime_version
  buf.extend_from_slice(&5u16.to_le_bytes()); // minor_runtime_version
  buf.extend_from_slice(&metadata_rva.to_le_bytes());
  buf.extend_from_slice(&metadata_size.to_le_bytes());
  buf.extend_from_slice(&1u32.to_le_bytes()); // flags: COMIMAGE_FLAGS_ILONLY
  buf.extend_from_slice(&0x0600_0001u32.to_le_bytes()); // entry_point_token
  buf.extend_from_slice(&resources.0.to_le_bytes());
  buf.extend_from_slice(&resources.1.to_le_bytes());
  buf.extend_from_slice(&strong_name.0.to_le_bytes());
  buf.extend_from_slice(&strong_name.1.to_le_bytes());
  for _ in 0..12 {
    // code_manager_table .. ip_map
    buf.extend_from_slice(&[0u8; 8]);
  }
  buf
}

/// Extra, optional payloads layered onto the minimal fixture for exercising
/// the public-query-surface accessors the other fixtures never touch:
/// managed resources, the strong-name signature blob, the Assembly public
/// key (via the `#Blob` heap) and the Authenticode certificate-table
/// directory.
#[derive(Default)]
pub struct Extras<'a> {
  pub resource_payload: Option<&'a [u8]>,
  pub strong_name: Option<&'a [u8]>,
  pub public_key_blob: Option<&'a [u8]>,
  pub authenticode: bool,
}

/// Builds a CLI image carrying whichever of `extras` is set. Returns the
/// image bytes and the `#Blob` heap token for `extras.public_key_blob`
/// (`0`, the conventional "no public key" token, if unset; a public-key
/// blob token of 0 returns nil).
pub fn cli_image_with_extras(extras: Extras<'_>) -> (Vec<u8>, u32) {
  let strings = vec![0u8];
  let guid = [0xABu8; 16];

  let mut streams: Vec<(&str, Vec<u8>)> = vec![("#Strings", strings), ("#GUID", guid.to_vec())];

  // Blob heap offset 0 is conventionally the empty blob (ECMA-335 II.24.2.4),
  // matching the `#Strings` heap's leading NUL convention used elsewhere in
  // this file.
  let mut blob_heap = vec![0u8];
  let mut public_key_token = 0u32;
  if let Some(blob) = extras.public_key_blob {
    assert!(blob.len() < 0x80, "fixture helper only supports single-byte compressed lengths");
    public_key_token = blob_heap.len() as u32;
    blob_heap.push(blob.len() as u8);
    blob_heap.extend_from_slice(blob);
  }
  if blob_heap.len() > 1 {
    streams.push(("#Blob", blob_heap));
  }

  let metadata = metadata_root(&streams);

  let cli_header_rva = SECTION_VIRTUAL_ADDRESS;
  let cli_header_len = cli_header_bytes_with_dirs(0, 0, (0, 0), (0, 0)).len();
  let metadata_rva = cli_header_rva + cli_header_len as u32;

  // `resources`/`strong_name` payloads are placed after the metadata root,
  // in the order they're requested; each directory points at its own
  // payload's RVA.
  let mut trailer = Vec::new();
  let mut resources_dir = (0u32, 0u32);
  if let Some(resource_payload) = extras.resource_payload {
    let rva = metadata_rva + metadata.len() as u32 + trailer.len() as u32;
    let mut blob = (resource_payload.len() as u32).to_le_bytes().to_vec();
    blob.extend_from_slice(resource_payload);
    resources_dir = (rva, blob.len() as u32);
    trailer.extend_from_slice(&blob);
  }

  let mut strong_name_dir = (0u32, 0u32);
  if let Some(strong_name) = extras.strong_name {
    let rva = metadata_rva + metadata.len() as u32 + trailer.len() as u32;
    strong_name_dir = (rva, strong_name.len() as u32);
    trailer.extend_from_slice(strong_name);
  }

  let cli_header = cli_header_bytes_with_dirs(metadata_rva, metadata.len() as u32, resources_dir, strong_name_dir);

  let mut payload = Vec::new();
  payload.extend_from_slice(&cli_header);
  payload.extend_from_slice(&metadata);
  payload.extend_from_slice(&trailer);

  let mut buf = vec![0u8; 64];
  buf[0..2].copy_from_slice(b"MZ");
  buf[60..64].copy_from_slice(&64u32.to_le_bytes());

  buf.extend_from_slice(b"PE\0\0");
  buf.extend_from_slice(&0x14cu16.to_le_bytes()); // machine: I386
  buf.extend_from_slice(&1u16.to_le_bytes()); // number_of_sections
  buf.extend_from_slice(&0u32.to_le_bytes());
  buf.extend_from_slice(&0u32.to_le_bytes());
  buf.extend_from_slice(&0u32.to_le_bytes());
  buf.extend_from_slice(&(OPTIONAL_HEADER32_SIZE as u16).to_le_bytes());
  buf.extend_from_slice(&0u16.to_le_bytes());

  buf.extend_from_slice(&0x10bu16.to_le_bytes()); // magic: PE32
  buf.extend_from_slice(&[6, 0]); // linker version 6.0
  buf.resize(buf.len() + (96 - 4), 0);

  for i in 0..16u32 {
    if i == 14 {
      buf.extend_from_slice(&cli_header_rva.to_le_bytes());
      buf.extend_from_slice(&(cli_header.len() as u32).to_le_bytes());
    } else if i == 4 && extras.authenticode {
      // CERTIFICATE_TABLE: `has_authenticode_entry` only checks that this
      // directory is present and larger than the minimal WIN_CERTIFICATE
      // header, never that it resolves to real signature bytes.
      buf.extend_from_slice(&0x1000u32.to_le_bytes());
      buf.extend_from_slice(&200u32.to_le_bytes());
    } else {
      buf.extend_from_slice(&0u32.to_le_bytes());
      buf.extend_from_slice(&0u32.to_le_bytes());
    }
  }

  let section_header_start = buf.len();
  let raw_data_ptr = (section_header_start + 40) as u32;
  buf.extend_from_slice(b".text\0\0\0");
  buf.extend_from_slice(&(payload.len() as u32).to_le_bytes()); // virtual_size
  buf.extend_from_slice(&SECTION_VIRTUAL_ADDRESS.to_le_bytes());
  buf.extend_from_slice(&(payload.len() as u32).to_le_bytes()); // raw_data_size
  buf.extend_from_slice(&raw_data_ptr.to_le_bytes());
  buf.extend_from_slice(&0u32.to_le_bytes());
  buf.extend_from_slice(&0u32.to_le_bytes());
  buf.extend_from_slice(&0u16.to_le_bytes());
  buf.extend_from_slice(&0u16.to_le_bytes());
  buf.extend_from_slice(&0u32.to_le_bytes());

  debug_assert_eq!(raw_data_ptr as usize, buf.len());
  buf.extend_from_slice(&payload);

  (buf, public_key_token)
}
