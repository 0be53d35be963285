//! Module graph loader.
//!
//! Discovers child-module images via the `ModuleRef` table and sibling file
//! references via the `File` table, and recursively opens them through the
//! same [`crate::registry::Registry`]. This crate does not itself compute
//! table row widths or offsets for arbitrary tables, that is the rest of
//! the metadata system, so the two columns this loader needs
//! (`ModuleRef.Name`, `File.Name`/`File.Flags`) are obtained through
//! [`TableRowSource`], the row-column decoder contract the metadata layer
//! sitting above this crate implements.

use std::sync::Arc;

use crate::image::Image;
use crate::metadata::streams::strings::StringId;
use crate::registry::Registry;

/// `File.Flags` bit meaning the referenced file carries no metadata
/// (ECMA-335 II.23.1.6). A `ModuleRef` naming such a file is never loaded.
pub const FILE_CONTAINS_NO_METADATA: u32 = 0x0001;

/// Row-column access the module graph loader needs from the `ModuleRef`
/// and `File` tables. `idx` is 1-based, matching this crate's row-token
/// convention elsewhere (`load_module`/`load_file_for_image`).
///
/// A real implementation sits in the metadata layer this crate doesn't
/// own: it knows how to compute per-table row widths and offsets from
/// [`crate::metadata::tables::TableDescriptor`]. This crate only consumes
/// the trait.
pub trait TableRowSource {
  /// `ModuleRef.Name` for row `idx`, or `None` if `idx` is out of range.
  fn module_ref_name(&self, idx: u32) -> Option<StringId>;
  /// `File.Name` for row `idx`, or `None` if `idx` is out of range.
  fn file_name(&self, idx: u32) -> Option<StringId>;
  /// `File.Flags` for row `idx`, or `None` if `idx` is out of range.
  fn file_flags(&self, idx: u32) -> Option<u32>;
}

fn resolve_name(image: &Image, id: StringId) -> Option<String> {
  image.strings()?.get(id).map(|s| s.to_string_lossy().into_owned())
}

/// A *valid name set* is constructed from the File table by accepting all
/// rows whose flags don't carry `FILE_CONTAINS_NO_METADATA`. An empty File
/// table means "accept" unconditionally.
fn is_valid_module_name(image: &Image, rows: &dyn TableRowSource, name: &str) -> bool {
  let file_count = image.file_count() as u32;
  if file_count == 0 {
    return true;
  }

  (1..=file_count).any(|i| {
    let Some(flags) = rows.file_flags(i) else {
      return false;
    };
    if flags & FILE_CONTAINS_NO_METADATA != 0 {
      return false;
    }

    rows
      .file_name(i)
      .and_then(|id| resolve_name(image, id))
      .is_some_and(|file_name| file_name == name)
  })
}

/// `load_module(image, idx)`.
///
/// - If `modules_loaded[idx-1]` is already set, returns the published value
///   without touching `rows` again.
/// - Otherwise resolves `ModuleRef.Name` via `#Strings`, checks it against
///   the valid name set built from the File table, and on success opens
///   `dirname(image.name())/name` through `registry` and shares
///   `image`'s assembly back-pointer.
/// - `modules_loaded[idx-1]` becomes true whether or not loading succeeded.
pub fn load_module(registry: &Registry, image: &Arc<Image>, rows: &dyn TableRowSource, idx: u32) -> Option<Arc<Image>> {
  let slot = image.module_slot(idx)?;
  if let Some(published) = slot.get() {
    return published.clone();
  }

  let result = (|| {
    let name_id = rows.module_ref_name(idx)?;
    let name = resolve_name(image, name_id)?;

    if !is_valid_module_name(image, rows, &name) {
      return None;
    }

    let path = image.sibling_path(&name)?;
    let child = registry.open(&path).ok()?;
    child.set_assembly(image.assembly());

    Some(child)
  })();

  // First-writer-wins: if another thread published first, defer to it
  // rather than leak a second, distinct child image.
  match slot.set(result.clone()) {
    Ok(()) => result,
    Err(_) => slot.get().cloned().flatten(),
  }
}

/// `load_file_for_image(image, idx)`: the analogous operation against the
/// File table. On success, propagates `image`'s assembly
/// back-pointer into any of the child's own already-loaded modules.
pub fn load_file_for_image(registry: &Registry, image: &Arc<Image>, rows: &dyn TableRowSource, idx: u32) -> Option<Arc<Image>> {
  let slot = image.file_slot(idx)?;
  if let Some(published) = slot.get() {
    return published.clone();
  }

  let result = (|| {
    let flags = rows.file_flags(idx)?;
    if flags & FILE_CONTAINS_NO_METADATA != 0 {
      return None;
    }

    let name_id = rows.file_name(idx)?;
    let name = resolve_name(image, name_id)?;
    let path = image.sibling_path(&name)?;
    let child = registry.open(&path).ok()?;
    child.set_assembly(image.assembly());

    for module_slot in child.module_slots() {
      if let Some(grandchild) = module_slot.get().and_then(Option::as_ref) {
        grandchild.set_assembly(image.assembly());
      }
    }

    Some(child)
  })();

  match slot.set(result.clone()) {
    Ok(()) => result,
    Err(_) => slot.get().cloned().flatten(),
  }
}
