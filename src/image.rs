//! The [`Image`] entity: lifecycle, parsed header/metadata storage and the
//! public query surface.
//!
//! An `Image` owns its backing bytes (via [`RawBuffer`]) and never borrows a
//! slice with an external lifetime parameter. It is reached through
//! `Arc<Image>` from the process-wide [`crate::registry::Registry`] and
//! handed to arbitrary threads, so every parsed sub-structure that would
//! naturally borrow from the raw bytes instead stores a byte [`Range`] and
//! re-slices `self.raw.as_slice()` on access, which keeps the borrow tied to
//! `&self` rather than to the moment of parsing.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use crate::cli::CliHeader;
use crate::error::{Error, Result};
use crate::metadata::streams::blobs::BlobsHeap;
use crate::metadata::streams::guids::GuidsHeap;
use crate::metadata::streams::strings::StringsHeap;
use crate::metadata::streams::user_strings::UserStringsHeap;
use crate::metadata::tables::TableDescriptor;
use crate::metadata::MetadataRoot;
use crate::pe::headers::PeHeaders;
use crate::pe::resource::{lookup_resource, ResourceDataEntry};
use crate::pe::sections::SectionIndex;
use crate::raw_buffer::RawBuffer;

/// `resource(offset, size)` reads a 4-byte length prefix before the
/// resource's own bytes.
const RESOURCE_LENGTH_PREFIX: usize = 4;

/// Byte offsets of each named heap within `raw_data`, computed once at open
/// time.
#[derive(Debug, Default, Clone)]
struct HeapRanges {
  strings: Option<Range<usize>>,
  user_strings: Option<Range<usize>>,
  blobs: Option<Range<usize>>,
  guids: Option<Range<usize>>,
}

/// Everything the metadata root parser produces, stored by value so `Image`
/// never holds a lifetime parameter.
#[derive(Debug)]
struct ParsedMetadata {
  version: String,
  guid: String,
  uncompressed_metadata: bool,
  tables: Option<TableDescriptor>,
  heaps: HeapRanges,
}

/// The central entity of this crate: a parsed, reference-counted CLI image,
/// backed by either a memory-mapped file or a caller-supplied buffer.
pub struct Image {
  /// Canonical absolute path, or `"data-<addr>"` for buffer-backed images.
  name: String,
  /// Set once by `mark_debug_unloaded` (`debug_assembly_unload` mode);
  /// `name()` prefers this over `name` once present.
  renamed: OnceLock<String>,
  ref_only: bool,
  raw: RawBuffer,
  ref_count: AtomicUsize,
  headers: Option<PeHeaders>,
  sections: Option<SectionIndex>,
  cli_header: Option<CliHeader>,
  metadata: Option<ParsedMetadata>,
  assembly_name: Option<String>,
  module_name: Option<String>,
  /// One slot per ModuleRef row (1-based index, slot `i-1`); first write
  /// wins.
  modules: Vec<OnceLock<Option<Arc<Image>>>>,
  /// One slot per File row (1-based index, slot `i-1`).
  files: Vec<OnceLock<Option<Arc<Image>>>>,
  /// Non-owning back-pointer to the owning assembly's primary image,
  /// propagated to every recursively loaded child.
  assembly: OnceLock<Weak<Image>>,
  dynamic: bool,
}

impl Image {
  /// Builds an image from `raw`, parsing PE headers, the CLI header and the
  /// metadata root. On any format error the partially built state is
  /// discarded and an error returned; callers never observe a half-built
  /// `Image`.
  fn build(name: String, ref_only: bool, raw: RawBuffer) -> Result<Self> {
    let data = raw.as_slice();
    let headers = PeHeaders::parse(data)?;
    let sections = SectionIndex::new(headers.sections.clone());
    let cli_header = CliHeader::parse(data, &headers, &sections)?;

    let metadata_offset = sections.rva_to_offset(cli_header.metadata.virtual_address);
    if metadata_offset == crate::pe::sections::INVALID_OFFSET {
      return Err(Error::invalid("metadata RVA maps to no section"));
    }

    let metadata_bytes = data
      .get(metadata_offset as usize..)
      .ok_or_else(|| Error::invalid("metadata root starts past the end of the image"))?;
    let root = MetadataRoot::parse(metadata_bytes)?;

    let heaps = HeapRanges {
      strings: root.strings.map(|h| heap_range(metadata_bytes, metadata_offset as usize, h.0)),
      user_strings: root
        .user_strings
        .map(|h| heap_range(metadata_bytes, metadata_offset as usize, h.0)),
      blobs: root.blobs.map(|h| heap_range(metadata_bytes, metadata_offset as usize, h.0)),
      guids: root.guids.map(|h| heap_range(metadata_bytes, metadata_offset as usize, h.0)),
    };

    let row_count = |id: u8| root.tables.as_ref().map(|t| t.row_count(id)).unwrap_or(0);
    let module_count = row_count(0x1A) as usize; // ModuleRef
    let file_count = row_count(0x26) as usize; // File

    let metadata = ParsedMetadata {
      version: root.version,
      guid: root.guid,
      uncompressed_metadata: root.uncompressed_metadata,
      tables: root.tables,
      heaps,
    };

    Ok(Self {
      name,
      renamed: OnceLock::new(),
      ref_only,
      raw,
      ref_count: AtomicUsize::new(1),
      headers: Some(headers),
      sections: Some(sections),
      cli_header: Some(cli_header),
      metadata: Some(metadata),
      assembly_name: None,
      module_name: None,
      modules: (0..module_count).map(|_| OnceLock::new()).collect(),
      files: (0..file_count).map(|_| OnceLock::new()).collect(),
      assembly: OnceLock::new(),
      dynamic: false,
    })
  }

  /// Opens and fully parses a file-backed image.
  pub fn open_path(path: &Path, ref_only: bool) -> Result<Self> {
    let canonical = path.canonicalize()?;
    let raw = RawBuffer::from_path(&canonical)?;
    Self::build(canonical.to_string_lossy().into_owned(), ref_only, raw)
  }

  /// Opens a buffer-backed image. `copy = true` duplicates `data` into a
  /// fresh allocation this crate owns outright.
  pub fn open_from_data(data: Arc<[u8]>, copy: bool, ref_only: bool) -> Result<Self> {
    let raw = RawBuffer::from_data(data, copy);
    let name = format!("data-{:p}", raw.as_slice().as_ptr());
    Self::build(name, ref_only, raw)
  }

  /// Opens a file purely as a PE image, skipping CLI/metadata parsing
  /// entirely; never registered in the cache (`pe_file_open`).
  pub fn open_pe_only(path: &Path) -> Result<Self> {
    let canonical = path.canonicalize()?;
    let raw = RawBuffer::from_path(&canonical)?;
    let headers = PeHeaders::parse(raw.as_slice())?;
    let sections = SectionIndex::new(headers.sections.clone());

    Ok(Self {
      name: canonical.to_string_lossy().into_owned(),
      renamed: OnceLock::new(),
      ref_only: true,
      raw,
      ref_count: AtomicUsize::new(1),
      headers: Some(headers),
      sections: Some(sections),
      cli_header: None,
      metadata: None,
      assembly_name: None,
      module_name: None,
      modules: Vec::new(),
      files: Vec::new(),
      assembly: OnceLock::new(),
      dynamic: false,
    })
  }

  /// Builds a dynamic (emit-API) image: the core records the flag and skips
  /// all PE/CLI parsing.
  pub fn open_dynamic(data: Arc<[u8]>) -> Self {
    let raw = RawBuffer::from_data(data, false);
    let name = format!("data-{:p}", raw.as_slice().as_ptr());

    Self {
      name,
      renamed: OnceLock::new(),
      ref_only: false,
      raw,
      ref_count: AtomicUsize::new(1),
      headers: None,
      sections: None,
      cli_header: None,
      metadata: None,
      assembly_name: None,
      module_name: None,
      modules: Vec::new(),
      files: Vec::new(),
      assembly: OnceLock::new(),
      dynamic: true,
    }
  }

  // -- lifecycle -----------------------------------------------------

  pub fn name(&self) -> &str {
    self.renamed.get().map(String::as_str).unwrap_or(&self.name)
  }

  /// Rewrites the reported name to `"{name} - UNLOADED"` instead of being
  /// deallocated, for `debug_assembly_unload` teardown
  /// (`MONO_DEBUG_ASSEMBLY_UNLOAD`). Idempotent; only the first call takes
  /// effect.
  pub(crate) fn mark_debug_unloaded(&self) {
    let _ = self.renamed.set(format!("{} - UNLOADED", self.name));
  }

  pub fn ref_only(&self) -> bool {
    self.ref_only
  }

  pub fn is_dynamic(&self) -> bool {
    self.dynamic
  }

  pub(crate) fn ref_count(&self) -> usize {
    self.ref_count.load(Ordering::Acquire)
  }

  /// Increments the logical reference count. Callers hold their own
  /// `Arc<Image>` clone for Rust-level memory safety; this tracks the
  /// explicit addref/close contract on top of that.
  pub(crate) fn addref(&self) -> usize {
    self.ref_count.fetch_add(1, Ordering::AcqRel) + 1
  }

  /// Decrements the logical reference count, returning the value after the
  /// decrement. The caller tears the image down when this reaches zero.
  pub(crate) fn release(&self) -> usize {
    self.ref_count.fetch_sub(1, Ordering::AcqRel) - 1
  }

  /// The Assembly row's interned name (`assembly_name`). Always `None` in
  /// this crate: populating it requires decoding the single Assembly table
  /// row's `Name` column, which needs the row-column decoder this crate
  /// doesn't implement. A consumer that does decode that row has no
  /// reachable setter here, since by the time an `Image` is handed out it
  /// is already behind `Arc<Image>` and already published in the registry
  /// (`registry.rs`'s `publish` would need the name before insertion to
  /// alias under it, not after); the "insert under assembly_name" aliasing
  /// step is accordingly not exercised by this crate.
  pub fn assembly_name(&self) -> Option<&str> {
    self.assembly_name.as_deref()
  }

  /// The Module row's interned name (`module_name`); see
  /// [`Image::assembly_name`] for why this crate never populates it.
  pub fn module_name(&self) -> Option<&str> {
    self.module_name.as_deref()
  }

  /// The owning assembly's primary image, if one has been set.
  pub fn assembly(&self) -> Option<Arc<Image>> {
    self.assembly.get().and_then(Weak::upgrade)
  }

  /// Sets the back-pointer once; subsequent calls are no-ops, matching the
  /// first-writer-wins discipline used for `modules`/`files`.
  pub fn set_assembly(&self, assembly: Option<Arc<Image>>) {
    if let Some(assembly) = assembly {
      let _ = self.assembly.set(Arc::downgrade(&assembly));
    }
  }

  pub(crate) fn module_slot(&self, idx: u32) -> Option<&OnceLock<Option<Arc<Image>>>> {
    self.modules.get(idx.checked_sub(1)? as usize)
  }

  pub(crate) fn file_slot(&self, idx: u32) -> Option<&OnceLock<Option<Arc<Image>>>> {
    self.files.get(idx.checked_sub(1)? as usize)
  }

  /// All module slots, in ModuleRef row order.
  pub(crate) fn module_slots(&self) -> impl Iterator<Item = &OnceLock<Option<Arc<Image>>>> {
    self.modules.iter()
  }

  /// All file slots, in File row order.
  pub(crate) fn file_slots(&self) -> impl Iterator<Item = &OnceLock<Option<Arc<Image>>>> {
    self.files.iter()
  }

  pub fn module_count(&self) -> usize {
    self.modules.len()
  }

  pub fn file_count(&self) -> usize {
    self.files.len()
  }

  // -- headers / sections ----------------------------------------------

  pub fn headers(&self) -> Option<&PeHeaders> {
    self.headers.as_ref()
  }

  pub fn sections(&self) -> Option<&SectionIndex> {
    self.sections.as_ref()
  }

  pub fn cli_header(&self) -> Option<&CliHeader> {
    self.cli_header.as_ref()
  }

  pub fn guid(&self) -> Option<&str> {
    self.metadata.as_ref().map(|m| m.guid.as_str())
  }

  pub fn version(&self) -> Option<&str> {
    self.metadata.as_ref().map(|m| m.version.as_str())
  }

  pub fn uncompressed_metadata(&self) -> bool {
    self.metadata.as_ref().map(|m| m.uncompressed_metadata).unwrap_or(false)
  }

  pub fn tables(&self) -> Option<&TableDescriptor> {
    self.metadata.as_ref().and_then(|m| m.tables.as_ref())
  }

  pub fn strings(&self) -> Option<StringsHeap<'_>> {
    let range = self.metadata.as_ref()?.heaps.strings.clone()?;
    Some(StringsHeap::new(&self.raw.as_slice()[range]))
  }

  pub fn user_strings(&self) -> Option<UserStringsHeap<'_>> {
    let range = self.metadata.as_ref()?.heaps.user_strings.clone()?;
    Some(UserStringsHeap::new(&self.raw.as_slice()[range]))
  }

  pub fn blobs(&self) -> Option<BlobsHeap<'_>> {
    let range = self.metadata.as_ref()?.heaps.blobs.clone()?;
    Some(BlobsHeap::new(&self.raw.as_slice()[range]))
  }

  pub fn guids(&self) -> Option<GuidsHeap<'_>> {
    let range = self.metadata.as_ref()?.heaps.guids.clone()?;
    Some(GuidsHeap::new(&self.raw.as_slice()[range]))
  }

  pub fn rva_to_pointer(&self, rva: u32) -> Option<&[u8]> {
    self.sections()?.rva_to_pointer(self.raw.as_slice(), rva)
  }

  pub fn ensure_section_named(&self, name: &str) -> Result<&[u8]> {
    let sections = self.sections().ok_or_else(|| Error::invalid("image has no section table"))?;
    let range = sections.ensure_section_named(name, self.raw.len())?;
    Ok(&self.raw.as_slice()[range])
  }

  // -- public query surface ---------------------------------------------

  /// `entry_point()`: the 32-bit method token from the CLI header, or 0 if
  /// this image has no CLI header (e.g. `open_pe_only`/dynamic images).
  pub fn entry_point(&self) -> u32 {
    self.cli_header.map(|h| h.entry_point_token).unwrap_or(0)
  }

  /// `resource(offset, size)`: reads the 4-byte length prefix at
  /// `resources.rva + offset` and returns the bytes immediately following
  /// it, or `None` if the prefix can't be read within the resource
  /// directory.
  pub fn resource(&self, offset: u32) -> Option<(&[u8], u32)> {
    let cli_header = self.cli_header?;
    if !cli_header.resources.is_present() {
      return None;
    }

    let base_rva = cli_header.resources.virtual_address.checked_add(offset)?;
    let prefixed = self.rva_to_pointer(base_rva)?;
    if prefixed.len() < RESOURCE_LENGTH_PREFIX {
      return None;
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&prefixed[..RESOURCE_LENGTH_PREFIX]);
    let size = u32::from_le_bytes(len_bytes);

    let data = prefixed.get(RESOURCE_LENGTH_PREFIX..)?;
    if (data.len() as u64) < size as u64 {
      return None;
    }

    Some((&data[..size as usize], size))
  }

  /// `strong_name(size)`: pointer and size of the strong-name signature
  /// blob, or `None` if the image isn't strong-name signed.
  pub fn strong_name(&self) -> Option<&[u8]> {
    let cli_header = self.cli_header?;
    if !cli_header.strong_name.is_present() {
      return None;
    }

    self.rva_to_pointer(cli_header.strong_name.virtual_address)
      .map(|s| &s[..(cli_header.strong_name.size as usize).min(s.len())])
  }

  /// `strong_name_position(size)`: the strong-name blob's file offset, or 0
  /// if absent.
  pub fn strong_name_position(&self) -> u32 {
    let Some(cli_header) = self.cli_header else { return 0 };
    if !cli_header.strong_name.is_present() {
      return 0;
    }

    let Some(sections) = self.sections() else { return 0 };
    match sections.rva_to_offset(cli_header.strong_name.virtual_address) {
      crate::pe::sections::INVALID_OFFSET => 0,
      offset => offset,
    }
  }

  /// `public_key(size)`: the blob referenced by the single Assembly row's
  /// `PublicKey` column. Not implemented here: decoding the Assembly row
  /// itself requires the row-column decoder contract this crate does not
  /// implement; callers pass the already-decoded blob token.
  pub fn public_key(&self, blob_token: u32) -> Option<&[u8]> {
    if blob_token == 0 {
      return None;
    }

    self.blobs().and_then(|heap| heap.get(crate::metadata::streams::blobs::BlobId::new(blob_token as usize)))
  }

  /// `has_authenticode_entry()`: true iff the certificate data directory
  /// has a non-zero RVA and a size greater than 8 bytes (the minimal
  /// `WIN_CERTIFICATE` header).
  pub fn has_authenticode_entry(&self) -> bool {
    self
      .headers()
      .map(|h| {
        let dir = h.data_directory(crate::pe::headers::DataDirectory::CERTIFICATE_TABLE);
        dir.virtual_address != 0 && dir.size > 8
      })
      .unwrap_or(false)
  }

  /// Depth-first resource tree lookup; `None` if the image has no resource
  /// directory or no matching leaf.
  pub fn lookup_resource(&self, res_id: u32, lang_id: u32, name: Option<&str>) -> Option<ResourceDataEntry> {
    let rsrc = self.ensure_section_named(".rsrc").ok()?;
    lookup_resource(rsrc, res_id, lang_id, name)
  }

  pub(crate) fn sibling_path(&self, child_name: &str) -> Option<PathBuf> {
    Path::new(&self.name).parent().map(|p| p.join(child_name))
  }
}

impl std::fmt::Debug for Image {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Image")
      .field("name", &self.name)
      .field("ref_only", &self.ref_only)
      .field("ref_count", &self.ref_count())
      .field("dynamic", &self.dynamic)
      .finish()
  }
}

/// Computes `heap`'s byte range within `raw_data`, given `heap` is a slice
/// of `metadata_bytes`, itself a slice of `raw_data` starting at
/// `metadata_offset`. Pure pointer-address arithmetic; neither slice is
/// dereferenced past its own bounds.
fn heap_range(metadata_bytes: &[u8], metadata_offset: usize, heap: &[u8]) -> Range<usize> {
  let rel_start = heap.as_ptr() as usize - metadata_bytes.as_ptr() as usize;
  let start = metadata_offset + rel_start;

  start..start + heap.len()
}
