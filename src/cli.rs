//! CLI header parser.
//!
//! The CLI header lives at the file offset the `CLI_HEADER` data directory
//! points to. Only `metadata`, `flags`, `entry_point_token`, `resources` and
//! `strong_name` are meaningful to this loader; the trailing directories
//! (`eeinfo_table` through `ip_map`) are historical reserved slots that
//! should be zero and are read, but never checked, for tolerance.

use crate::bytes::{bitflags, ByteSliceExt};
use crate::error::{Error, Result};
use crate::pe::headers::{DataDirectory, PeHeaders};
use crate::pe::sections::SectionIndex;

bitflags! {
  /// `COMIMAGE_FLAGS_*` runtime flags (ECMA-335 II.25.3.3.1).
  #[derive(Debug, Clone, Copy)]
  pub struct CliRuntimeFlags: u32 {
    const ILONLY = 0x0000_0001;
    const REQUIRES_32BIT = 0x0000_0002;
    const STRONG_NAME_SIGNED = 0x0000_0008;
    const NATIVE_ENTRY_POINT = 0x0000_0010;
    const TRACK_DEBUG_DATA = 0x0001_0000;
  }
}

/// The CLI header (ECMA-335 II.25.3.3), including the tail of reserved
/// directories this loader never interprets.
#[derive(Debug, Clone, Copy)]
pub struct CliHeader {
  pub cb: u32,
  pub major_runtime_version: u16,
  pub minor_runtime_version: u16,
  pub metadata: DataDirectory,
  pub flags: CliRuntimeFlags,
  pub entry_point_token: u32,
  pub resources: DataDirectory,
  pub strong_name: DataDirectory,
  pub code_manager_table: DataDirectory,
  pub vtable_fixups: DataDirectory,
  pub export_address_table_jumps: DataDirectory,
  pub eeinfo_table: DataDirectory,
  pub helper_table: DataDirectory,
  pub dynamic_info: DataDirectory,
  pub delay_load_info: DataDirectory,
  pub module_image: DataDirectory,
  pub external_fixups: DataDirectory,
  pub ridmap: DataDirectory,
  pub debug_map: DataDirectory,
  pub ip_map: DataDirectory,
}

impl<'a> crate::bytes::FromBytes<'a> for CliHeader {
  fn from_bytes(buf: &'a [u8], offset: &mut usize, _: ()) -> Option<Self> {
    Some(Self {
      cb: buf.read(offset)?,
      major_runtime_version: buf.read(offset)?,
      minor_runtime_version: buf.read(offset)?,
      metadata: buf.read(offset)?,
      flags: buf.read(offset)?,
      entry_point_token: buf.read(offset)?,
      resources: buf.read(offset)?,
      strong_name: buf.read(offset)?,
      code_manager_table: buf.read(offset)?,
      vtable_fixups: buf.read(offset)?,
      export_address_table_jumps: buf.read(offset)?,
      eeinfo_table: buf.read(offset)?,
      helper_table: buf.read(offset)?,
      dynamic_info: buf.read(offset)?,
      delay_load_info: buf.read(offset)?,
      module_image: buf.read(offset)?,
      external_fixups: buf.read(offset)?,
      ridmap: buf.read(offset)?,
      debug_map: buf.read(offset)?,
      ip_map: buf.read(offset)?,
    })
  }
}

impl CliHeader {
  /// Resolves the `CLI_HEADER` data directory to a file offset via
  /// `headers`'s section table and parses the header there.
  pub fn parse(raw_data: &[u8], headers: &PeHeaders, sections: &SectionIndex) -> Result<Self> {
    let dir = headers.data_directory(DataDirectory::CLI_HEADER);
    if !dir.is_present() {
      return Err(Error::invalid("image has no CLI header"));
    }

    let file_offset = sections.rva_to_offset(dir.virtual_address);
    if file_offset == crate::pe::sections::INVALID_OFFSET {
      return Err(Error::invalid("CLI header RVA maps to no section"));
    }

    let mut offset = file_offset as usize;
    raw_data
      .read(&mut offset)
      .ok_or_else(|| Error::invalid("truncated CLI header"))
  }
}
