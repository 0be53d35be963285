//! MS-DOS stub, COFF header, PE32 optional header and data directories.
//!
//! Only the 32-bit (`PE32`, magic `0x10B`) layout is accepted; PE32+ images
//! are rejected as out of scope.

use crate::bytes::{bitflags, ByteSliceExt};
use crate::error::{Error, Result};

/// Offset within the file of the `e_lfanew` field of the MS-DOS header.
const E_LFANEW_OFFSET: usize = 60;
const MZ_SIGNATURE: [u8; 2] = *b"MZ";
const PE_SIGNATURE: [u8; 4] = *b"PE\0\0";

/// COFF `Machine` value for x86 (the only machine type this crate loads).
const IMAGE_FILE_MACHINE_I386: u16 = 0x14c;
/// `Magic` value identifying a PE32 (32-bit) optional header.
const PE32_MAGIC: u16 = 0x10b;

/// Number of data directories a CLI image's optional header must declare.
/// The CLI header directory is index 14 (`DataDirectory::CLI_HEADER`), so an
/// image must carry at least 15; ECMA-335 images conventionally carry all
/// 16, and this is the size the parser requires.
pub const NUM_DATA_DIRECTORIES: usize = 16;

/// Size, in bytes, of the PE32 optional header including its 16 data
/// directories. The header parser rejects any other declared
/// `size_of_optional_header`.
pub const OPTIONAL_HEADER32_SIZE: usize = 96 + NUM_DATA_DIRECTORIES * 8;

/// A data directory: an RVA and size pair describing one of the well-known
/// PE tables (imports, resources, the CLI header, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataDirectory {
  pub virtual_address: u32,
  pub size: u32,
}

impl DataDirectory {
  pub const EXPORT_TABLE: usize = 0;
  pub const IMPORT_TABLE: usize = 1;
  pub const RESOURCE_TABLE: usize = 2;
  pub const CERTIFICATE_TABLE: usize = 4;
  pub const BASE_RELOCATION_TABLE: usize = 5;
  pub const CLI_HEADER: usize = 14;

  pub fn is_present(&self) -> bool {
    self.virtual_address != 0 && self.size != 0
  }
}

impl<'a> crate::bytes::FromBytes<'a> for DataDirectory {
  fn from_bytes(buf: &'a [u8], offset: &mut usize, _: ()) -> Option<Self> {
    Some(Self {
      virtual_address: buf.read(offset)?,
      size: buf.read(offset)?,
    })
  }
}

bitflags! {
  /// COFF file characteristics (a small subset; unrecognized bits pass
  /// through unexamined).
  #[derive(Debug, Clone, Copy)]
  pub struct FileCharacteristics: u16 {
    const RELOCS_STRIPPED = 0x0001;
    const EXECUTABLE_IMAGE = 0x0002;
    const LINE_NUMS_STRIPPED = 0x0004;
    const LOCAL_SYMS_STRIPPED = 0x0008;
    const DLL = 0x2000;
  }
}

/// The standard COFF header (ECMA-335 II.25.2.2).
#[derive(Debug, Clone, Copy)]
pub struct CoffHeader {
  pub machine: u16,
  pub number_of_sections: u16,
  pub time_date_stamp: u32,
  pub pointer_to_symbol_table: u32,
  pub number_of_symbols: u32,
  pub size_of_optional_header: u16,
  pub characteristics: FileCharacteristics,
}

impl<'a> crate::bytes::FromBytes<'a> for CoffHeader {
  fn from_bytes(buf: &'a [u8], offset: &mut usize, _: ()) -> Option<Self> {
    Some(Self {
      machine: buf.read(offset)?,
      number_of_sections: buf.read(offset)?,
      time_date_stamp: buf.read(offset)?,
      pointer_to_symbol_table: buf.read(offset)?,
      number_of_symbols: buf.read(offset)?,
      size_of_optional_header: buf.read(offset)?,
      characteristics: buf.read(offset)?,
    })
  }
}

/// The PE32 optional header (ECMA-335 II.25.2.3.1), minus its data
/// directories, which are parsed separately.
#[derive(Debug, Clone, Copy)]
pub struct OptionalHeader32 {
  pub magic: u16,
  pub major_linker_version: u8,
  pub minor_linker_version: u8,
  pub size_of_code: u32,
  pub size_of_initialized_data: u32,
  pub size_of_uninitialized_data: u32,
  pub address_of_entry_point: u32,
  pub base_of_code: u32,
  pub base_of_data: u32,
  pub image_base: u32,
  pub section_alignment: u32,
  pub file_alignment: u32,
  pub major_os_version: u16,
  pub minor_os_version: u16,
  pub major_image_version: u16,
  pub minor_image_version: u16,
  pub major_subsystem_version: u16,
  pub minor_subsystem_version: u16,
  pub win32_version_value: u32,
  pub size_of_image: u32,
  pub size_of_headers: u32,
  pub check_sum: u32,
  pub subsystem: u16,
  pub dll_characteristics: u16,
  pub size_of_stack_reserve: u32,
  pub size_of_stack_commit: u32,
  pub size_of_heap_reserve: u32,
  pub size_of_heap_commit: u32,
  pub loader_flags: u32,
  pub number_of_rva_and_sizes: u32,
}

impl<'a> crate::bytes::FromBytes<'a> for OptionalHeader32 {
  fn from_bytes(buf: &'a [u8], offset: &mut usize, _: ()) -> Option<Self> {
    Some(Self {
      magic: buf.read(offset)?,
      major_linker_version: buf.read(offset)?,
      minor_linker_version: buf.read(offset)?,
      size_of_code: buf.read(offset)?,
      size_of_initialized_data: buf.read(offset)?,
      size_of_uninitialized_data: buf.read(offset)?,
      address_of_entry_point: buf.read(offset)?,
      base_of_code: buf.read(offset)?,
      base_of_data: buf.read(offset)?,
      image_base: buf.read(offset)?,
      section_alignment: buf.read(offset)?,
      file_alignment: buf.read(offset)?,
      major_os_version: buf.read(offset)?,
      minor_os_version: buf.read(offset)?,
      major_image_version: buf.read(offset)?,
      minor_image_version: buf.read(offset)?,
      major_subsystem_version: buf.read(offset)?,
      minor_subsystem_version: buf.read(offset)?,
      win32_version_value: buf.read(offset)?,
      size_of_image: buf.read(offset)?,
      size_of_headers: buf.read(offset)?,
      check_sum: buf.read(offset)?,
      subsystem: buf.read(offset)?,
      dll_characteristics: buf.read(offset)?,
      size_of_stack_reserve: buf.read(offset)?,
      size_of_stack_commit: buf.read(offset)?,
      size_of_heap_reserve: buf.read(offset)?,
      size_of_heap_commit: buf.read(offset)?,
      loader_flags: buf.read(offset)?,
      number_of_rva_and_sizes: buf.read(offset)?,
    })
  }
}

/// A section-table entry, the header for a single section of the image
/// (ECMA-335 II.25.3).
#[derive(Debug, Clone, Copy)]
pub struct SectionTableEntry {
  pub name: [u8; 8],
  pub virtual_size: u32,
  pub virtual_address: u32,
  pub raw_data_size: u32,
  pub raw_data_ptr: u32,
  pub reloc_ptr: u32,
  pub lineno_ptr: u32,
  pub reloc_count: u16,
  pub line_count: u16,
  pub flags: u32,
}

impl SectionTableEntry {
  /// Section flag `IMAGE_SCN_MEM_WRITE`: recorded but never enforced, since
  /// this loader never patches image contents.
  pub const MEM_WRITE: u32 = 0x8000_0000;

  pub fn name_str(&self) -> std::borrow::Cow<'_, str> {
    let end = self.name.iter().position(|&b| b == 0).unwrap_or(8);
    String::from_utf8_lossy(&self.name[..end])
  }

  pub fn is_writable(&self) -> bool {
    self.flags & Self::MEM_WRITE != 0
  }
}

impl<'a> crate::bytes::FromBytes<'a> for SectionTableEntry {
  fn from_bytes(buf: &'a [u8], offset: &mut usize, _: ()) -> Option<Self> {
    Some(Self {
      name: buf.read(offset)?,
      virtual_size: buf.read(offset)?,
      virtual_address: buf.read(offset)?,
      raw_data_size: buf.read(offset)?,
      raw_data_ptr: buf.read(offset)?,
      reloc_ptr: buf.read(offset)?,
      lineno_ptr: buf.read(offset)?,
      reloc_count: buf.read(offset)?,
      line_count: buf.read(offset)?,
      flags: buf.read(offset)?,
    })
  }
}

/// The fully parsed PE/COFF header region: COFF header, optional header,
/// data directories and section table.
#[derive(Debug, Clone)]
pub struct PeHeaders {
  pub coff: CoffHeader,
  pub optional: OptionalHeader32,
  pub data_directories: Vec<DataDirectory>,
  pub sections: Vec<SectionTableEntry>,
}

impl PeHeaders {
  pub fn data_directory(&self, index: usize) -> DataDirectory {
    self.data_directories.get(index).copied().unwrap_or_default()
  }

  /// Parses the PE/COFF headers from `raw_data`.
  ///
  /// The linker version fields are read but never checked; images with
  /// linker version 6.0 or 7.0 must both be accepted, so this
  /// implementation accepts any value.
  pub fn parse(raw_data: &[u8]) -> Result<Self> {
    let mz: [u8; 2] = raw_data
      .read(&mut 0)
      .ok_or_else(|| Error::invalid("truncated MS-DOS header"))?;
    if mz != MZ_SIGNATURE {
      return Err(Error::invalid("missing MZ signature"));
    }

    let mut lfanew_offset = E_LFANEW_OFFSET;
    let pe_offset: u32 = raw_data
      .read(&mut lfanew_offset)
      .ok_or_else(|| Error::invalid("truncated e_lfanew"))?;
    let mut offset = pe_offset as usize;

    let pe_sig: [u8; 4] = raw_data
      .read(&mut offset)
      .ok_or_else(|| Error::invalid("truncated PE signature"))?;
    if pe_sig != PE_SIGNATURE {
      return Err(Error::invalid("missing PE\\0\\0 signature"));
    }

    let coff: CoffHeader = raw_data
      .read(&mut offset)
      .ok_or_else(|| Error::invalid("truncated COFF header"))?;
    if coff.machine != IMAGE_FILE_MACHINE_I386 {
      return Err(Error::invalid("unsupported machine (only x86/PE32 is supported)"));
    }
    if coff.size_of_optional_header as usize != OPTIONAL_HEADER32_SIZE {
      return Err(Error::invalid("unexpected optional header size"));
    }

    let optional_start = offset;
    let optional: OptionalHeader32 = raw_data
      .read(&mut offset)
      .ok_or_else(|| Error::invalid("truncated optional header"))?;
    if optional.magic != PE32_MAGIC {
      return Err(Error::invalid("not a PE32 image (PE32+ is unsupported)"));
    }

    let mut data_directories = Vec::with_capacity(NUM_DATA_DIRECTORIES);
    for _ in 0..NUM_DATA_DIRECTORIES {
      let dir: DataDirectory = raw_data
        .read(&mut offset)
        .ok_or_else(|| Error::invalid("truncated data directory"))?;
      data_directories.push(dir);
    }

    debug_assert_eq!(offset - optional_start, OPTIONAL_HEADER32_SIZE);

    let mut sections = Vec::with_capacity(coff.number_of_sections as usize);
    for _ in 0..coff.number_of_sections {
      let section: SectionTableEntry = raw_data
        .read(&mut offset)
        .ok_or_else(|| Error::invalid("truncated section table"))?;

      let end = section.raw_data_ptr as usize + section.raw_data_size as usize;
      if end > raw_data.len() {
        return Err(Error::invalid("section extends beyond the image"));
      }

      sections.push(section);
    }

    Ok(Self {
      coff,
      optional,
      data_directories,
      sections,
    })
  }
}
