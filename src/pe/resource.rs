//! Resource tree walker.
//!
//! The `.rsrc` section is a three-level tree: resource type, resource name,
//! and language. Each level is an [`ResourceDirectory`] header followed by
//! [`ResourceDirectoryEntry`] records; the high bit of each entry's two
//! fields distinguishes a name string from a numeric ID, and a subdirectory
//! from a leaf [`ResourceDataEntry`].

use crate::bytes::ByteSliceExt;

const NAME_FLAG: u32 = 0x8000_0000;
const DIRECTORY_FLAG: u32 = 0x8000_0000;

/// The header at the start of each of the three directory levels.
#[derive(Debug, Clone, Copy)]
pub struct ResourceDirectory {
  pub characteristics: u32,
  pub time_date_stamp: u32,
  pub major_version: u16,
  pub minor_version: u16,
  pub number_of_named_entries: u16,
  pub number_of_id_entries: u16,
}

impl<'a> crate::bytes::FromBytes<'a> for ResourceDirectory {
  fn from_bytes(buf: &'a [u8], offset: &mut usize, _: ()) -> Option<Self> {
    Some(Self {
      characteristics: buf.read(offset)?,
      time_date_stamp: buf.read(offset)?,
      major_version: buf.read(offset)?,
      minor_version: buf.read(offset)?,
      number_of_named_entries: buf.read(offset)?,
      number_of_id_entries: buf.read(offset)?,
    })
  }
}

impl ResourceDirectory {
  fn entry_count(&self) -> usize {
    self.number_of_named_entries as usize + self.number_of_id_entries as usize
  }
}

/// A single entry in a [`ResourceDirectory`].
#[derive(Debug, Clone, Copy)]
pub struct ResourceDirectoryEntry {
  pub name: u32,
  pub offset: u32,
}

impl<'a> crate::bytes::FromBytes<'a> for ResourceDirectoryEntry {
  fn from_bytes(buf: &'a [u8], offset: &mut usize, _: ()) -> Option<Self> {
    Some(Self {
      name: buf.read(offset)?,
      offset: buf.read(offset)?,
    })
  }
}

impl ResourceDirectoryEntry {
  pub fn is_name(&self) -> bool {
    self.name & NAME_FLAG != 0
  }

  pub fn id(&self) -> u32 {
    self.name & !NAME_FLAG
  }

  pub fn is_directory(&self) -> bool {
    self.offset & DIRECTORY_FLAG != 0
  }

  pub fn sub_offset(&self) -> u32 {
    self.offset & !DIRECTORY_FLAG
  }
}

/// The 16-byte leaf record describing a resource's data: a copy is handed
/// to the caller, who owns it thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDataEntry {
  pub offset_to_data: u32,
  pub size: u32,
  pub code_page: u32,
  pub reserved: u32,
}

impl<'a> crate::bytes::FromBytes<'a> for ResourceDataEntry {
  fn from_bytes(buf: &'a [u8], offset: &mut usize, _: ()) -> Option<Self> {
    Some(Self {
      offset_to_data: buf.read(offset)?,
      size: buf.read(offset)?,
      code_page: buf.read(offset)?,
      reserved: buf.read(offset)?,
    })
  }
}

/// Walks the three-level resource tree rooted at `rsrc`, returning the first
/// matching leaf.
///
/// - Level 0 (type): matches a numeric entry equal to `res_id`.
/// - Level 1 (name): the name comparison is not yet implemented upstream,
///   so every entry at this level is accepted, matching the legacy behavior
///   this loader reproduces. `name` is accepted for a future implementation
///   but currently unused.
/// - Level 2 (language): matches a numeric entry equal to `lang_id`, or any
///   numeric entry when `lang_id == 0`. String-named language entries are
///   never matched.
///
/// The walk is depth-first and returns on the first match.
pub fn lookup_resource(
  rsrc: &[u8],
  res_id: u32,
  lang_id: u32,
  _name: Option<&str>,
) -> Option<ResourceDataEntry> {
  let level0 = read_directory(rsrc, 0)?;

  for entry in level0.1 {
    if entry.is_name() || entry.id() != res_id {
      continue;
    }
    if !entry.is_directory() {
      continue;
    }

    if let Some(found) = walk_level1(rsrc, entry.sub_offset(), lang_id) {
      return Some(found);
    }
  }

  None
}

fn walk_level1(rsrc: &[u8], dir_offset: u32, lang_id: u32) -> Option<ResourceDataEntry> {
  let (_, entries) = read_directory(rsrc, dir_offset)?;

  for entry in entries {
    if !entry.is_directory() {
      continue;
    }

    if let Some(found) = walk_level2(rsrc, entry.sub_offset(), lang_id) {
      return Some(found);
    }
  }

  None
}

fn walk_level2(rsrc: &[u8], dir_offset: u32, lang_id: u32) -> Option<ResourceDataEntry> {
  let (_, entries) = read_directory(rsrc, dir_offset)?;

  for entry in entries {
    if entry.is_name() {
      continue;
    }
    if lang_id != 0 && entry.id() != lang_id {
      continue;
    }
    if entry.is_directory() {
      continue;
    }

    let mut offset = entry.sub_offset() as usize;
    return rsrc.read::<ResourceDataEntry>(&mut offset);
  }

  None
}

fn read_directory(rsrc: &[u8], dir_offset: u32) -> Option<(ResourceDirectory, Vec<ResourceDirectoryEntry>)> {
  let mut offset = dir_offset as usize;
  let header: ResourceDirectory = rsrc.read(&mut offset)?;
  let mut entries = Vec::with_capacity(header.entry_count());

  for _ in 0..header.entry_count() {
    entries.push(rsrc.read::<ResourceDirectoryEntry>(&mut offset)?);
  }

  Some((header, entries))
}
